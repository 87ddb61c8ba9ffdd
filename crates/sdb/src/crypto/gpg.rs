//! gpg symmetric-mode backend
//!
//! The passphrase goes in on file descriptor 0 as one newline-terminated
//! line, immediately followed by the payload on the same stream. Errors are
//! recognised from gpg's stderr.

use super::{Cipher, CryptoError, Passphrase};
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::debug;

const ENCRYPT_ARGS: &[&str] = &[
    "-c",
    "--passphrase-fd",
    "0",
    "--batch",
    "--pinentry-mode",
    "loopback",
    "--armor",
    "--cipher-algo",
    "AES",
    "--digest-algo",
    "SHA256",
];

const DECRYPT_ARGS: &[&str] = &[
    "-d",
    "--passphrase-fd",
    "0",
    "--batch",
    "--pinentry-mode",
    "loopback",
];

#[derive(Debug, Clone)]
pub struct GpgCipher {
    program: String,
}

impl Default for GpgCipher {
    fn default() -> Self {
        Self::new("gpg")
    }
}

impl GpgCipher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str], passphrase: &Passphrase, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CryptoError::Unknown(format!("failed to run {}: {}", self.program, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CryptoError::Unknown("gpg stdin unavailable".to_string()))?;

        // Feed stdin while draining stdout/stderr so neither pipe can fill up
        let (output, written) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || -> std::io::Result<()> {
                stdin.write_all(passphrase.expose().as_bytes())?;
                stdin.write_all(b"\n")?;
                stdin.write_all(data)?;
                Ok(())
            });
            let output = child.wait_with_output();
            (output, writer.join())
        });

        let output =
            output.map_err(|e| CryptoError::Unknown(format!("failed to wait for gpg: {e}")))?;
        if !output.status.success() {
            debug!(code = ?output.status.code(), "gpg failed");
            return Err(classify_failure(output.status.code(), &output.stderr));
        }
        match written {
            Ok(Ok(())) => Ok(output.stdout),
            Ok(Err(e)) => Err(CryptoError::Unknown(format!("failed to feed gpg: {e}"))),
            Err(_) => Err(CryptoError::Unknown("gpg writer panicked".to_string())),
        }
    }
}

impl Cipher for GpgCipher {
    fn encrypt(&self, passphrase: &Passphrase, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.run(ENCRYPT_ARGS, passphrase, plaintext)
    }

    fn decrypt(&self, passphrase: &Passphrase, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.run(DECRYPT_ARGS, passphrase, ciphertext)
    }
}

/// Map a failed gpg run to a typed error using its exit code and stderr
pub fn classify_failure(code: Option<i32>, stderr: &[u8]) -> CryptoError {
    let message = String::from_utf8_lossy(stderr).to_lowercase();
    let first_line = String::from_utf8_lossy(stderr)
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .to_string();

    if code == Some(2) {
        if message.contains("decryption failed: bad key")
            || message.contains("decryption failed: bad session key")
        {
            return CryptoError::WrongPassphrase;
        }
        if message.contains("crc error;")
            || message.contains("zlib inflate problem: invalid distance")
            || message.contains("decryption failed: invalid packet")
            || message.contains("invalid packet")
        {
            return CryptoError::Corrupted(first_line);
        }
        if message.contains("no valid openpgp data found") {
            return CryptoError::NotCiphertext;
        }
    }

    CryptoError::Unknown(match code {
        Some(code) => format!("gpg exited with {code}: {first_line}"),
        None => format!("gpg killed by signal: {first_line}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_bad_key() {
        let err = classify_failure(
            Some(2),
            b"gpg: AES encrypted data\ngpg: encrypted with 1 passphrase\ngpg: decryption failed: Bad session key\n",
        );
        assert_eq!(err, CryptoError::WrongPassphrase);
        assert_eq!(
            classify_failure(Some(2), b"gpg: decryption failed: bad key\n"),
            CryptoError::WrongPassphrase
        );
    }

    #[test]
    fn test_classify_corruption() {
        for stderr in [
            &b"gpg: CRC error; 0A1B2C - 3D4E5F\n"[..],
            b"gpg: [don't know]: invalid packet (ctb=2d)\n",
            b"gpg: fatal: zlib inflate problem: invalid distance too far back\n",
            b"gpg: decryption failed: invalid packet\n",
        ] {
            assert!(matches!(
                classify_failure(Some(2), stderr),
                CryptoError::Corrupted(_)
            ));
        }
    }

    #[test]
    fn test_classify_not_ciphertext() {
        assert_eq!(
            classify_failure(Some(2), b"gpg: no valid OpenPGP data found.\n"),
            CryptoError::NotCiphertext
        );
    }

    #[test]
    fn test_classify_unknown() {
        // the known messages only count with gpg's "error" exit code
        assert!(matches!(
            classify_failure(Some(1), b"gpg: decryption failed: bad key\n"),
            CryptoError::Unknown(_)
        ));
        assert!(matches!(
            classify_failure(Some(2), b"gpg: something new\n"),
            CryptoError::Unknown(_)
        ));
        assert!(matches!(classify_failure(None, b""), CryptoError::Unknown(_)));
    }

    #[test]
    fn test_missing_program() {
        let cipher = GpgCipher::new("/nonexistent/gpg-for-sdb-tests");
        let err = cipher
            .encrypt(&Passphrase::new("foo").unwrap(), b"data")
            .unwrap_err();
        assert!(matches!(err, CryptoError::Unknown(_)));
    }

    #[test]
    #[ignore = "requires a gpg binary"]
    fn test_gpg_round_trip() {
        let cipher = GpgCipher::default();
        let key = Passphrase::new("foo").unwrap();
        let sealed = cipher.encrypt(&key, b"asdfasdf").unwrap();
        assert_eq!(cipher.decrypt(&key, &sealed).unwrap(), b"asdfasdf");
        assert_eq!(
            cipher.decrypt(&Passphrase::new("fo").unwrap(), &sealed).unwrap_err(),
            CryptoError::WrongPassphrase
        );
        assert_eq!(
            cipher.decrypt(&key, b"definitely not pgp").unwrap_err(),
            CryptoError::NotCiphertext
        );
    }
}
