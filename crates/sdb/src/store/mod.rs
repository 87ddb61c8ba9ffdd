//! Encrypted record store
//!
//! A transaction reads the store, decrypts and decodes it, hands the records
//! to a callback, then encrypts the result into the temp file, re-reads and
//! decrypts that to check it matches, and only then renames it into place.
//! The store file is never written in place.

pub mod atomic;

pub use atomic::{backup_path, tmp_path, AtomicReplace, Phase};

use crate::codec;
use crate::crypto::{Cipher, Passphrase};
use crate::record::{is_unique, RecordSet};
use anyhow::{bail, Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Reasons a transaction refuses to commit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("You have two identical records. Refusing to store them.")]
    DuplicateRecords,

    #[error("Transaction produced no bytes. Refusing to blank the store.")]
    EmptyResult,

    #[error("Store is locked by another transaction ({}). Try again.", .0.display())]
    Locked(PathBuf),

    #[error("Written store failed verification: {0}")]
    VerificationFailed(String),
}

/// The record store at one path, opened with one passphrase
pub struct Store<C> {
    path: PathBuf,
    cipher: C,
    passphrase: Passphrase,
}

impl<C: Cipher> Store<C> {
    pub fn new(path: impl Into<PathBuf>, cipher: C, passphrase: Passphrase) -> Self {
        Self {
            path: path.into(),
            cipher,
            passphrase,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the records without taking the lock. A missing store is empty.
    pub fn read(&self) -> Result<RecordSet> {
        match fs::read(&self.path) {
            Ok(ciphertext) => Ok(self.open(&ciphertext)?.1),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", self.path.display())),
        }
    }

    /// Decrypt and decode, returning the plaintext alongside the records
    fn open(&self, ciphertext: &[u8]) -> Result<(Vec<u8>, RecordSet)> {
        let plaintext = self.cipher.decrypt(&self.passphrase, ciphertext)?;
        let records = codec::decode(&plaintext)?;
        Ok((plaintext, records))
    }

    /// Apply `f` to the stored records and atomically commit what it returns.
    ///
    /// Any error, from `f` or from any step after it, leaves the store file
    /// exactly as it was and removes the temp file.
    pub fn transact<F>(&self, f: F) -> Result<RecordSet>
    where
        F: FnOnce(RecordSet) -> Result<RecordSet>,
    {
        let mut tx = AtomicReplace::begin(&self.path)?;

        let (old_plaintext, records) = match tx.previous() {
            Some(ciphertext) => {
                let (plaintext, records) = self.open(ciphertext)?;
                (Some(plaintext), records)
            }
            None => (None, Vec::new()),
        };
        debug!(records = records.len(), "store opened for transaction");

        let candidate = f(records)?;
        if !is_unique(&candidate) {
            bail!(TransactionError::DuplicateRecords);
        }

        let plaintext = codec::encode(&candidate);
        let ciphertext = self.cipher.encrypt(&self.passphrase, &plaintext)?;
        tx.write_all(&ciphertext)?;
        tx.seal()?;

        tx.verify(|written| {
            let (_, reread) = self
                .open(written)
                .map_err(|e| TransactionError::VerificationFailed(e.to_string()))?;
            if reread != candidate {
                bail!(TransactionError::VerificationFailed(
                    "decrypted content differs from what was written".to_string()
                ));
            }
            Ok(())
        })?;

        let changed = old_plaintext.as_deref() != Some(plaintext.as_slice());
        tx.commit(changed)?;
        info!(records = candidate.len(), changed, "store committed");
        Ok(candidate)
    }
}
