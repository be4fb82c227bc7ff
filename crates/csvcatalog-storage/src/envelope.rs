//! Password-based at-rest encryption of the store file.
//!
//! Envelope layout: `salt(16) || nonce(16) || tag(16) || ciphertext`.
//! The key is PBKDF2-HMAC-SHA256 over the password and salt; the cipher is
//! AES-256-GCM with a 128-bit nonce. Salt and nonce are fresh on every
//! encryption.

use std::fs;
use std::io::Write;
use std::path::Path;

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce, Tag};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use zeroize::Zeroizing;

use csvcatalog_core::error::CatalogError;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 16;
pub const TAG_LEN: usize = 16;
pub const KEY_LEN: usize = 32;
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Fixed-size prefix preceding the ciphertext.
pub const HEADER_LEN: usize = SALT_LEN + NONCE_LEN + TAG_LEN;

type Cipher = AesGcm<Aes256, U16>;

fn derive_key(password: &str, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key[..]);
    key
}

fn cipher_for(key: &[u8]) -> Result<Cipher, CatalogError> {
    Cipher::new_from_slice(key).map_err(|e| CatalogError::Crypto(format!("Invalid key: {}", e)))
}

/// Encrypt `plaintext` into a self-contained envelope.
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<Vec<u8>, CatalogError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt);
    let cipher = cipher_for(&key[..])?;

    let mut out = Vec::with_capacity(HEADER_LEN + plaintext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&[0u8; TAG_LEN]);
    out.extend_from_slice(plaintext);

    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&nonce), b"", &mut out[HEADER_LEN..])
        .map_err(|_| CatalogError::Crypto("Encryption failed".to_string()))?;
    out[SALT_LEN + NONCE_LEN..HEADER_LEN].copy_from_slice(tag.as_slice());

    Ok(out)
}

/// Verify and decrypt an envelope.
///
/// A truncated envelope, a wrong password and tampered data all fail with
/// the same `DecryptionFailed`.
pub fn decrypt(envelope: &[u8], password: &str) -> Result<Zeroizing<Vec<u8>>, CatalogError> {
    if envelope.len() < HEADER_LEN {
        return Err(CatalogError::DecryptionFailed);
    }
    let (salt, rest) = envelope.split_at(SALT_LEN);
    let (nonce, rest) = rest.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let key = derive_key(password, salt);
    let cipher = cipher_for(&key[..])?;

    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(nonce),
            b"",
            &mut buffer[..],
            Tag::<U16>::from_slice(tag),
        )
        .map_err(|_| CatalogError::DecryptionFailed)?;
    Ok(buffer)
}

/// Materialize a plaintext working copy of the store at `path`.
///
/// A missing `path` yields an empty working file, which SQLite opens as a
/// new store. The working file is removed when the returned handle drops.
pub fn open_for_session(path: &Path, password: &str) -> Result<NamedTempFile, CatalogError> {
    let mut working = tempfile::Builder::new()
        .prefix("csvcatalog-")
        .suffix(".db")
        .tempfile()?;

    if !path.exists() {
        debug!(path = %path.display(), "No encrypted store yet, starting empty");
        return Ok(working);
    }

    let envelope = fs::read(path)?;
    let plaintext = decrypt(&envelope, password)?;
    working.write_all(&plaintext)?;
    working.as_file().sync_all()?;

    info!(path = %path.display(), "Decrypted store into working copy");
    Ok(working)
}

/// Re-encrypt the working copy over `original`, then discard it.
///
/// The new envelope is written beside `original` and renamed over it, so a
/// failure never leaves a half-written store.
pub fn close_session(
    working: NamedTempFile,
    original: &Path,
    password: &str,
) -> Result<(), CatalogError> {
    let plaintext = Zeroizing::new(fs::read(working.path())?);
    let envelope = encrypt(&plaintext, password)?;
    write_atomic(original, &envelope)?;
    working.close()?;

    info!(path = %original.display(), "Re-encrypted store");
    Ok(())
}

/// Encrypt a plaintext store in place. Returns `false` if `path` is missing.
pub fn encrypt_file_in_place(path: &Path, password: &str) -> Result<bool, CatalogError> {
    if !path.exists() {
        return Ok(false);
    }
    let plaintext = Zeroizing::new(fs::read(path)?);
    let envelope = encrypt(&plaintext, password)?;
    write_atomic(path, &envelope)?;
    info!(path = %path.display(), "Encrypted store");
    Ok(true)
}

/// Decrypt an encrypted store in place. Returns `false` if `path` is missing.
pub fn decrypt_file_in_place(path: &Path, password: &str) -> Result<bool, CatalogError> {
    if !path.exists() {
        return Ok(false);
    }
    let envelope = fs::read(path)?;
    let plaintext = decrypt(&envelope, password)?;
    write_atomic(path, &plaintext)?;
    info!(path = %path.display(), "Decrypted store");
    Ok(true)
}

fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), CatalogError> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| CatalogError::Io(e.error))?;
    Ok(())
}
