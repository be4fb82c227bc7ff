//! Scoped access to a store file, encrypted or not.
//!
//! An encrypted store is never opened directly: its envelope is decrypted
//! into a process-local working copy, the engine runs against that copy, and
//! closing re-encrypts it over the original. The working copy is deleted on
//! every exit path.

use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, error};
use zeroize::Zeroizing;

use csvcatalog_core::error::CatalogError;

use crate::engine::{SqliteStorage, Storage};
use crate::envelope;

struct WorkingCopy {
    file: NamedTempFile,
    password: Zeroizing<String>,
}

/// An open store. Call [`Session::close`] to surface close errors; dropping
/// an unclosed session closes it on a best-effort basis.
pub struct Session {
    storage: SqliteStorage,
    original: PathBuf,
    working: Option<WorkingCopy>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("storage", &self.storage)
            .field("original", &self.original)
            .field("encrypted", &self.working.is_some())
            .finish()
    }
}

impl Session {
    /// Open the store at `path`. With a password the file is treated as an
    /// encrypted envelope (missing file means a new, empty store).
    pub fn open(path: &Path, password: Option<&str>) -> Result<Self, CatalogError> {
        let (storage, working) = match password {
            None => (SqliteStorage::open(path)?, None),
            Some(password) => {
                let file = envelope::open_for_session(path, password)?;
                let storage = SqliteStorage::open(file.path())?;
                debug!(working = %file.path().display(), "Opened encrypted store");
                let working = WorkingCopy {
                    file,
                    password: Zeroizing::new(password.to_string()),
                };
                (storage, Some(working))
            }
        };

        Ok(Self {
            storage,
            original: path.to_path_buf(),
            working,
        })
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Path of the store as the user knows it.
    pub fn path(&self) -> &Path {
        &self.original
    }

    /// Path of the plaintext working copy, if encrypted.
    pub fn working_path(&self) -> Option<&Path> {
        self.working.as_ref().map(|w| w.file.path())
    }

    pub fn is_encrypted(&self) -> bool {
        self.working.is_some()
    }

    /// Close the connection, then re-encrypt if needed.
    pub fn close(mut self) -> Result<(), CatalogError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), CatalogError> {
        self.storage.close()?;
        if let Some(working) = self.working.take() {
            envelope::close_session(working.file, &self.original, &working.password)?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.working.is_none() && self.storage.is_closed() {
            return;
        }
        if let Err(e) = self.finish() {
            error!(path = %self.original.display(), error = %e, "Failed to close store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csvcatalog_core::types::Row;

    #[test]
    fn test_plain_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.db");

        let session = Session::open(&path, None).unwrap();
        assert!(!session.is_encrypted());
        assert!(session.working_path().is_none());
        let storage = session.storage();
        storage.create_table("t", &["a".to_string()]).unwrap();
        session.close().unwrap();

        let session = Session::open(&path, None).unwrap();
        assert!(session.storage().get_table("t").unwrap().is_some());
    }

    #[test]
    fn test_encrypted_session_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.db");

        let session = Session::open(&path, Some("pw")).unwrap();
        let working = session.working_path().unwrap().to_path_buf();
        assert_ne!(working, path);
        let storage = session.storage();
        storage.create_table("people", &["name".to_string()]).unwrap();
        storage.save("people", &[Row::from_pairs([("name", "Ann")])]).unwrap();
        session.close().unwrap();

        assert!(!working.exists());
        let bytes = std::fs::read(&path).unwrap();
        assert!(!bytes.starts_with(b"SQLite format 3"));

        let session = Session::open(&path, Some("pw")).unwrap();
        assert_eq!(session.storage().get_table("people").unwrap().unwrap().count, 1);
    }

    #[test]
    fn test_drop_closes_and_encrypts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dropped.db");

        let working = {
            let session = Session::open(&path, Some("pw")).unwrap();
            let storage = session.storage();
            storage.create_table("t", &["a".to_string()]).unwrap();
            session.working_path().unwrap().to_path_buf()
        };

        assert!(!working.exists());
        assert!(path.exists());
        let session = Session::open(&path, Some("pw")).unwrap();
        assert!(session.storage().get_table("t").unwrap().is_some());
    }

    #[test]
    fn test_wrong_password() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.db");
        Session::open(&path, Some("right")).unwrap().close().unwrap();

        assert!(matches!(
            Session::open(&path, Some("wrong")),
            Err(CatalogError::DecryptionFailed)
        ));
    }
}
