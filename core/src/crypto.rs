use crate::{Error, KdfParams, Result};
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHasher};
use chacha20poly1305::{
    ChaCha20Poly1305, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use rand::RngCore;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Symmetric key for the object store. Deriving it is the caller's business;
/// the helpers here cover the password flow used by the CLI.
pub struct MasterKey {
    key: Vec<u8>,
}

impl MasterKey {
    pub fn derive_from_password(password: &str, params: &KdfParams) -> Result<Self> {
        let argon2 = Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            argon2::Params::new(params.memory, params.iterations, params.parallelism, None)
                .map_err(|e| Error::Encryption(e.to_string()))?,
        );

        let salt = SaltString::encode_b64(&params.salt)
            .map_err(|e| Error::Encryption(e.to_string()))?;

        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| Error::Encryption(e.to_string()))?;

        let hash = password_hash
            .hash
            .ok_or_else(|| Error::Encryption("KDF produced no output".to_string()))?;
        if hash.len() < KEY_LEN {
            return Err(Error::Encryption("KDF output too short".to_string()));
        }
        Ok(Self {
            key: hash.as_bytes()[..KEY_LEN].to_vec(),
        })
    }

    pub fn generate() -> Self {
        let mut key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    pub fn from_bytes(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(Error::Encryption(format!("Key must be {} bytes", KEY_LEN)));
        }
        Ok(Self { key: key.to_vec() })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

pub struct Encryptor {
    cipher: ChaCha20Poly1305,
}

impl Encryptor {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(Error::Encryption(format!("Key must be {} bytes", KEY_LEN)));
        }

        let key = Key::from_slice(key);
        let cipher = ChaCha20Poly1305::new(key);
        Ok(Self { cipher })
    }

    /// Output layout: 12-byte nonce followed by ciphertext and tag.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| Error::Encryption(e.to_string()))?;

        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::Encryption("Ciphertext too short".to_string()));
        }

        let (nonce_bytes, encrypted) = ciphertext.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, encrypted)
            .map_err(|e| Error::Encryption(e.to_string()))
    }

    /// Length of `encrypt(plaintext)` for a plaintext of `len` bytes.
    pub fn sealed_len(len: usize) -> usize {
        NONCE_LEN + len + TAG_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encryption_roundtrip() {
        let key = MasterKey::generate();
        let encryptor = Encryptor::new(key.as_bytes()).unwrap();

        let plaintext = b"Hello, Reprise!";
        let ciphertext = encryptor.encrypt(plaintext).unwrap();
        assert_eq!(ciphertext.len(), Encryptor::sealed_len(plaintext.len()));

        let decrypted = encryptor.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext.to_vec(), decrypted);
    }

    #[test]
    fn test_wrong_key_fails() {
        let a = Encryptor::new(MasterKey::generate().as_bytes()).unwrap();
        let b = Encryptor::new(MasterKey::generate().as_bytes()).unwrap();
        let ciphertext = a.encrypt(b"secret").unwrap();
        assert!(b.decrypt(&ciphertext).is_err());
    }

    #[test]
    fn test_password_derivation_is_deterministic() {
        let params = KdfParams {
            memory: 1024,
            ..KdfParams::default()
        };
        let a = MasterKey::derive_from_password("pass", &params).unwrap();
        let b = MasterKey::derive_from_password("pass", &params).unwrap();
        let c = MasterKey::derive_from_password("other", &params).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
        assert_eq!(a.as_bytes().len(), KEY_LEN);
    }
}
