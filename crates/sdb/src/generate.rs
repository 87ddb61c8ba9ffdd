//! Random password generation

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use thiserror::Error;

pub const ALPHANUMERIC: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Alphanumerics plus ASCII punctuation
pub const EVERYTHING: &str = concat!(
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789",
    "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~"
);

/// Entropy of passwords generated on the user's behalf
pub const DEFAULT_ENTROPY_BITS: u32 = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error("That's impossible, you can't make a {length} character password containing {requirements:?} with only {charset:?}!")]
    Impossible {
        requirements: String,
        charset: String,
        length: usize,
    },

    #[error("Need at least two distinct characters to choose from")]
    CharsetTooSmall,
}

fn alphabet(charset: &str) -> Result<Vec<char>, GenerateError> {
    let mut chars: Vec<char> = charset.chars().collect();
    chars.sort_unstable();
    chars.dedup();
    if chars.len() < 2 {
        return Err(GenerateError::CharsetTooSmall);
    }
    Ok(chars)
}

fn draw(chars: &[char], length: usize) -> String {
    let mut rng = OsRng;
    (0..length)
        .filter_map(|_| chars.choose(&mut rng).copied())
        .collect()
}

/// `length` characters drawn uniformly from `charset`
pub fn gen_password(charset: &str, length: usize) -> Result<String, GenerateError> {
    Ok(draw(&alphabet(charset)?, length))
}

/// Like [`gen_password`], redrawing until every character of
/// `requirements` occurs at least once
pub fn gen_password_require(
    requirements: &str,
    charset: &str,
    length: usize,
) -> Result<String, GenerateError> {
    let chars = alphabet(charset)?;
    let possible = requirements.chars().count() <= length
        && requirements.chars().all(|c| chars.contains(&c));
    if !possible {
        return Err(GenerateError::Impossible {
            requirements: requirements.to_string(),
            charset: charset.to_string(),
            length,
        });
    }
    loop {
        let password = draw(&chars, length);
        if requirements.chars().all(|c| password.contains(c)) {
            return Ok(password);
        }
    }
}

/// Characters needed from `charset` to reach `bits` of entropy
pub fn length_for_entropy(bits: u32, charset: &str) -> Result<usize, GenerateError> {
    let per_char = (alphabet(charset)?.len() as f64).log2();
    Ok((f64::from(bits) / per_char).ceil() as usize)
}

/// A password from `charset` with at least `bits` of entropy
pub fn gen_password_entropy(bits: u32, charset: &str) -> Result<String, GenerateError> {
    gen_password(charset, length_for_entropy(bits, charset)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gen_password() {
        let password = gen_password(ALPHANUMERIC, 10).unwrap();
        assert_eq!(password.len(), 10);
        assert!(password.chars().all(|c| ALPHANUMERIC.contains(c)));
        assert_eq!(gen_password(ALPHANUMERIC, 0).unwrap(), "");
    }

    #[test]
    fn test_passwords_differ() {
        assert_ne!(
            gen_password(ALPHANUMERIC, 32).unwrap(),
            gen_password(ALPHANUMERIC, 32).unwrap()
        );
    }

    #[test]
    fn test_entropy_length() {
        // log2(62) is about 5.95
        assert_eq!(length_for_entropy(128, ALPHANUMERIC).unwrap(), 22);
        assert_eq!(length_for_entropy(1, "ab").unwrap(), 1);
        assert_eq!(length_for_entropy(8, "01").unwrap(), 8);
        assert_eq!(gen_password_entropy(128, ALPHANUMERIC).unwrap().len(), 22);
    }

    #[test]
    fn test_everything_is_a_superset() {
        assert!(ALPHANUMERIC.chars().all(|c| EVERYTHING.contains(c)));
        assert!(EVERYTHING.contains('~'));
        assert_eq!(EVERYTHING.len(), 62 + 32);
    }

    #[test]
    fn test_requirements_are_met() {
        for _ in 0..20 {
            let password = gen_password_require("a1", "abc123", 4).unwrap();
            assert!(password.contains('a') && password.contains('1'));
        }
    }

    #[test]
    fn test_impossible_requirements() {
        assert!(matches!(
            gen_password_require("!", ALPHANUMERIC, 10),
            Err(GenerateError::Impossible { .. })
        ));
        assert!(matches!(
            gen_password_require("abc", ALPHANUMERIC, 2),
            Err(GenerateError::Impossible { .. })
        ));
    }

    #[test]
    fn test_degenerate_charset() {
        assert_eq!(gen_password("", 5), Err(GenerateError::CharsetTooSmall));
        assert_eq!(gen_password("aaaa", 5), Err(GenerateError::CharsetTooSmall));
    }
}
