//! Identifier normalization.

use core_runtime::config::MatchingConfig;

/// Brings identifiers from both systems to one comparable form.
///
/// - uppercase
/// - drop everything that is not an ASCII letter or digit
/// - all-numeric codes (optionally ending in an `X` check character) lose
///   their leading zeros, unless that would leave fewer than
///   `min_numeric_length` characters
///
/// With normalization disabled values are only trimmed and uppercased.
#[derive(Debug, Clone)]
pub struct Normalizer {
    enabled: bool,
    min_numeric_length: usize,
}

impl Normalizer {
    pub fn new(enabled: bool, min_numeric_length: usize) -> Self {
        Self {
            enabled,
            min_numeric_length,
        }
    }

    pub fn from_config(config: &MatchingConfig) -> Self {
        Self::new(config.normalize, config.min_numeric_length)
    }

    /// `None` when nothing comparable is left.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let upper = raw.trim().to_uppercase();
        if !self.enabled {
            return (!upper.is_empty()).then_some(upper);
        }

        let cleaned: String = upper.chars().filter(char::is_ascii_alphanumeric).collect();
        if cleaned.is_empty() {
            return None;
        }

        if !is_numeric_code(&cleaned) {
            return Some(cleaned);
        }

        let stripped = cleaned.trim_start_matches('0');
        if stripped.len() >= self.min_numeric_length {
            Some(stripped.to_string())
        } else {
            Some(cleaned)
        }
    }
}

/// Digits, optionally followed by a single `X` check character.
fn is_numeric_code(value: &str) -> bool {
    let body = value.strip_suffix('X').unwrap_or(value);
    !body.is_empty() && body.bytes().all(|b| b.is_ascii_digit())
}
