//! Dumping the store in portable formats

use crate::codec;
use crate::crypto::Passphrase;
use crate::record::Record;
use age::secrecy::Secret;
use anyhow::{Context, Result};
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// The decrypted store body, one record per line
    Raw,
    /// A JSON array of record objects
    Json,
    /// ASCII-armored age file protected by a passphrase
    Age,
}

/// Serialize `records` as `format`. `passphrase` is only used for age.
pub fn export(records: &[Record], format: ExportFormat, passphrase: &Passphrase) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Raw => Ok(codec::encode(records)),
        ExportFormat::Json => {
            let mut out = serde_json::to_vec_pretty(records)?;
            out.push(b'\n');
            Ok(out)
        }
        ExportFormat::Age => seal_age(&codec::encode(records), passphrase),
    }
}

fn seal_age(plaintext: &[u8], passphrase: &Passphrase) -> Result<Vec<u8>> {
    let encryptor = age::Encryptor::with_user_passphrase(Secret::new(passphrase.expose().to_owned()));

    let mut encrypted = vec![];
    let armored = age::armor::ArmoredWriter::wrap_output(&mut encrypted, age::armor::Format::AsciiArmor)
        .context("Failed to start armored output")?;
    let mut writer = encryptor
        .wrap_output(armored)
        .context("Failed to start age encryption")?;
    writer.write_all(plaintext)?;
    writer
        .finish()
        .and_then(|armor| armor.finish())
        .context("Failed to finish age export")?;
    Ok(encrypted)
}
