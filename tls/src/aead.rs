//! Authenticated encryption with associated data.

use crate::{
    nonce::Nonce,
    suite::{CipherSuite, TAG_LENGTH},
    Error,
};
use aes_gcm::Aes128Gcm;
use chacha20poly1305::ChaCha20Poly1305;

/// A keyed AEAD.
pub trait Aead: Send + Sync + 'static {
    /// Length of the tag appended to every ciphertext.
    fn tag_length(&self) -> usize;

    /// Encrypt `plaintext` and authenticate it (and `aad`), returning the ciphertext with the tag
    /// appended.
    fn encrypt(&self, nonce: &Nonce, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, Error>;

    /// Authenticate `ciphertext` (and `aad`) and decrypt it.
    fn decrypt(&self, nonce: &Nonce, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, Error>;
}

/// The AEAD of a [CipherSuite].
///
/// `ChaCha20Poly1305` does not implement `Debug`, so neither does this.
#[derive(Clone)]
pub enum Cipher {
    Aes128Gcm(Box<Aes128Gcm>),
    ChaCha20Poly1305(Box<ChaCha20Poly1305>),
}

impl Cipher {
    /// Initialize the AEAD of `suite` with `key`.
    pub fn new(suite: CipherSuite, key: &[u8]) -> Result<Self, Error> {
        if key.len() != suite.key_length() {
            return Err(Error::InvalidKeyLength(key.len()));
        }
        let cipher = match suite {
            CipherSuite::Aes128GcmSha256 => Self::Aes128Gcm(Box::new(
                <Aes128Gcm as aes_gcm::KeyInit>::new_from_slice(key)
                    .map_err(|_| Error::InvalidKeyLength(key.len()))?,
            )),
            CipherSuite::ChaCha20Poly1305Sha256 => Self::ChaCha20Poly1305(Box::new(
                <ChaCha20Poly1305 as chacha20poly1305::KeyInit>::new_from_slice(key)
                    .map_err(|_| Error::InvalidKeyLength(key.len()))?,
            )),
        };
        Ok(cipher)
    }
}

impl Aead for Cipher {
    fn tag_length(&self) -> usize {
        TAG_LENGTH
    }

    fn encrypt(&self, nonce: &Nonce, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            Self::Aes128Gcm(cipher) => aes_gcm::aead::Aead::encrypt(
                cipher.as_ref(),
                aes_gcm::Nonce::from_slice(nonce),
                aes_gcm::aead::Payload {
                    msg: plaintext,
                    aad,
                },
            ),
            Self::ChaCha20Poly1305(cipher) => chacha20poly1305::aead::Aead::encrypt(
                cipher.as_ref(),
                chacha20poly1305::Nonce::from_slice(nonce),
                chacha20poly1305::aead::Payload {
                    msg: plaintext,
                    aad,
                },
            ),
        }
        .map_err(|_| Error::EncryptionFailed)
    }

    fn decrypt(&self, nonce: &Nonce, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            Self::Aes128Gcm(cipher) => aes_gcm::aead::Aead::decrypt(
                cipher.as_ref(),
                aes_gcm::Nonce::from_slice(nonce),
                aes_gcm::aead::Payload {
                    msg: ciphertext,
                    aad,
                },
            ),
            Self::ChaCha20Poly1305(cipher) => chacha20poly1305::aead::Aead::decrypt(
                cipher.as_ref(),
                chacha20poly1305::Nonce::from_slice(nonce),
                chacha20poly1305::aead::Payload {
                    msg: ciphertext,
                    aad,
                },
            ),
        }
        .map_err(|_| Error::DecryptionFailed)
    }
}
