//! Built-in store cipher
//!
//! Layout of a sealed file:
//!
//! ```text
//! magic "SDBSEAL1" | m_cost u32le | t_cost u32le | p_cost u32le
//!   | salt[16] | key_check[32] | nonce[12] | ciphertext+tag
//! ```
//!
//! Argon2id stretches the passphrase into 64 bytes: the first half keys
//! ChaCha20-Poly1305, the second half is stored as `key_check`. A mismatching
//! check means the passphrase is wrong; a matching check with a failing tag
//! means the file was damaged. The whole header is authenticated as AAD.

use super::{Cipher, CryptoError, Passphrase};
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

pub const MAGIC: &[u8; 8] = b"SDBSEAL1";

const SALT_LEN: usize = 16;
const CHECK_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = MAGIC.len() + 12 + SALT_LEN + CHECK_LEN + NONCE_LEN;

// Refuse to honour absurd costs read from a damaged header
const MAX_M_COST: u32 = 1024 * 1024;
const MAX_T_COST: u32 = 64;
const MAX_P_COST: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            m_cost: 19 * 1024,
            t_cost: 2,
            p_cost: 1,
        }
    }
}

impl KdfParams {
    /// Cheapest parameters Argon2 accepts. Only for tests.
    #[cfg(test)]
    pub(crate) fn fast() -> Self {
        Self {
            m_cost: 8,
            t_cost: 1,
            p_cost: 1,
        }
    }
}

/// Argon2id + ChaCha20-Poly1305 container
#[derive(Debug, Clone, Default)]
pub struct SealedCipher {
    params: KdfParams,
}

impl SealedCipher {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    #[cfg(test)]
    pub(crate) fn fast() -> Self {
        Self::new(KdfParams::fast())
    }
}

fn derive(
    passphrase: &Passphrase,
    salt: &[u8],
    params: KdfParams,
) -> Result<Zeroizing<[u8; 64]>, CryptoError> {
    let argon_params = Params::new(params.m_cost, params.t_cost, params.p_cost, Some(64))
        .map_err(|e| CryptoError::Corrupted(format!("invalid key derivation parameters: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
    let mut out = Zeroizing::new([0u8; 64]);
    argon2
        .hash_password_into(passphrase.expose().as_bytes(), salt, &mut out[..])
        .map_err(|e| CryptoError::Unknown(format!("key derivation failed: {e}")))?;
    Ok(out)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

fn same(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl Cipher for SealedCipher {
    fn encrypt(&self, passphrase: &Passphrase, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let derived = derive(passphrase, &salt, self.params)?;

        let mut out = Vec::with_capacity(HEADER_LEN + plaintext.len() + 16);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.params.m_cost.to_le_bytes());
        out.extend_from_slice(&self.params.t_cost.to_le_bytes());
        out.extend_from_slice(&self.params.p_cost.to_le_bytes());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&derived[32..]);
        out.extend_from_slice(&nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&derived[..32]));
        let sealed = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &out,
                },
            )
            .map_err(|e| CryptoError::Unknown(format!("encryption failed: {e}")))?;
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, passphrase: &Passphrase, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < MAGIC.len() || &ciphertext[..MAGIC.len()] != MAGIC {
            return Err(CryptoError::NotCiphertext);
        }
        if ciphertext.len() < HEADER_LEN {
            return Err(CryptoError::Corrupted("truncated header".to_string()));
        }

        let (header, body) = ciphertext.split_at(HEADER_LEN);
        let params = KdfParams {
            m_cost: read_u32(header, 8),
            t_cost: read_u32(header, 12),
            p_cost: read_u32(header, 16),
        };
        if params.m_cost > MAX_M_COST || params.t_cost > MAX_T_COST || params.p_cost > MAX_P_COST {
            return Err(CryptoError::Corrupted(
                "implausible key derivation parameters".to_string(),
            ));
        }

        let salt_at = 20;
        let check_at = salt_at + SALT_LEN;
        let nonce_at = check_at + CHECK_LEN;
        let salt = &header[salt_at..check_at];
        let check = &header[check_at..nonce_at];
        let nonce = &header[nonce_at..HEADER_LEN];

        let derived = derive(passphrase, salt, params)?;
        if !same(&derived[32..], check) {
            return Err(CryptoError::WrongPassphrase);
        }

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&derived[..32]));
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: body,
                    aad: header,
                },
            )
            .map_err(|_| CryptoError::Corrupted("authentication tag mismatch".to_string()))
    }
}
