use crate::config::VaultConfig;
use crate::error::{Error, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ring::rand::{SecureRandom, SystemRandom};
use std::fs;
use std::io::Write as _;
use std::path::Path;

const KEY_SIZE: usize = 32;
const NONCE_SIZE: usize = 12;
#[cfg(unix)]
const KEY_FILE_MODE: u32 = 0o600;

/// AEAD encryption/decryption of at-rest secrets with a single master key
/// (4.B). The wire format is `base64(nonce || ciphertext || tag)`, a single
/// blob with no key-version prefix; associated data is always empty.
#[derive(Clone)]
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    /// Build a vault from configuration: use the configured key if present,
    /// otherwise read (or create, on first start) the key file.
    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        let key_bytes = match &config.key_base64 {
            Some(b64) => decode_key(b64)?,
            None => load_or_provision_key_file(&config.key_file)?,
        };
        Self::from_key_bytes(&key_bytes)
    }

    pub fn from_key_bytes(key_bytes: &[u8]) -> Result<Self> {
        if key_bytes.len() != KEY_SIZE {
            return Err(Error::Cryptographic(format!(
                "master key must be {KEY_SIZE} bytes, got {}",
                key_bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        Ok(Self { cipher: Aes256Gcm::new(key) })
    }

    /// Encrypt `plaintext`, returning `base64(nonce || ciphertext || tag)`.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let rng = SystemRandom::new();
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rng.fill(&mut nonce_bytes)
            .map_err(|_| Error::Cryptographic("failed to generate nonce".to_string()))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| Error::Cryptographic("encryption failed".to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypt a blob produced by `encrypt`. Returns `ErrAuth`-equivalent
    /// (`Error::Cryptographic`) when the key differs or the blob is
    /// tampered — this is the sole signal the vault gives for key mismatch.
    pub fn decrypt(&self, blob: &str) -> Result<String> {
        let raw = BASE64
            .decode(blob)
            .map_err(|e| Error::Cryptographic(format!("invalid base64: {e}")))?;
        if raw.len() < NONCE_SIZE {
            return Err(Error::Cryptographic("ciphertext too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::Cryptographic("decryption failed: wrong key or tampered data".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|e| Error::Cryptographic(format!("decrypted data is not valid utf-8: {e}")))
    }
}

fn decode_key(b64: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(b64.trim())
        .map_err(|e| Error::Cryptographic(format!("TOKEN_ENCRYPTION_KEY is not valid base64: {e}")))
}

/// Read the master key file if present; otherwise generate 32 random bytes,
/// write them to a mode-0600 file, and return them. Subsequent starts read
/// the same file.
fn load_or_provision_key_file(path: &str) -> Result<Vec<u8>> {
    let path = Path::new(path);

    if path.exists() {
        let contents = fs::read_to_string(path)?;
        return decode_key(contents.trim());
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let rng = SystemRandom::new();
    let mut key = [0u8; KEY_SIZE];
    rng.fill(&mut key)
        .map_err(|_| Error::Cryptographic("failed to generate master key".to_string()))?;
    let encoded = BASE64.encode(key);

    let mut file = open_key_file(path)?;
    file.write_all(encoded.as_bytes())?;

    tracing::info!(path = %path.display(), "provisioned a new master key");
    Ok(key.to_vec())
}

#[cfg(unix)]
fn open_key_file(path: &Path) -> Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(KEY_FILE_MODE)
        .open(path)
        .map_err(Error::from)
}

#[cfg(not(unix))]
fn open_key_file(path: &Path) -> Result<fs::File> {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(Error::from)
}
