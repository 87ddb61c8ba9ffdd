//! Encryption transforms for the store file
//!
//! The store treats encryption as an opaque two-sided transform behind the
//! [`Cipher`] trait. Two backends exist:
//! - [`SealedCipher`]: built in, Argon2id + ChaCha20-Poly1305
//! - [`GpgCipher`]: shells out to `gpg` in symmetric mode

mod gpg;
mod sealed;

pub use gpg::{classify_failure, GpgCipher};
pub use sealed::{KdfParams, SealedCipher, MAGIC};

use std::fmt;
use thiserror::Error;
use zeroize::Zeroizing;

/// Failures of the encryption transform
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("wrong passphrase")]
    WrongPassphrase,

    #[error("encrypted data is corrupted: {0}")]
    Corrupted(String),

    #[error("data is not an encrypted store")]
    NotCiphertext,

    #[error("passphrase must not contain a newline")]
    InvalidPassphrase,

    #[error("encryption backend failed: {0}")]
    Unknown(String),
}

/// A session passphrase. Wiped from memory when dropped.
#[derive(Clone)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    /// Wrap a passphrase. Newlines are rejected because the gpg backend
    /// delivers the passphrase as a single line.
    pub fn new(passphrase: impl Into<String>) -> Result<Self, CryptoError> {
        let passphrase = Zeroizing::new(passphrase.into());
        if passphrase.contains('\n') || passphrase.contains('\r') {
            return Err(CryptoError::InvalidPassphrase);
        }
        Ok(Self(passphrase))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(***)")
    }
}

/// Two-sided encryption transform
pub trait Cipher {
    fn encrypt(&self, passphrase: &Passphrase, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;
    fn decrypt(&self, passphrase: &Passphrase, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

impl<C: Cipher + ?Sized> Cipher for Box<C> {
    fn encrypt(&self, passphrase: &Passphrase, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        (**self).encrypt(passphrase, plaintext)
    }

    fn decrypt(&self, passphrase: &Passphrase, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        (**self).decrypt(passphrase, ciphertext)
    }
}
