//! License key generation.
//!
//! Generated keys have the form `PREFIX-XXXXX-XXXXX-XXXXX-XXXXX-XXXXX`:
//!
//! - Configurable prefix (e.g., "SPK", "PRO")
//! - Configurable number of segments and segment length
//! - Drawn uniformly from a thread-local CSPRNG
//! - Excludes ambiguous characters (0, O, I, L, 1) for readability
//!
//! Keys are opaque tokens to the rest of the system. The only property the
//! engine relies on is unpredictability: the configured shape must carry at
//! least [`MIN_ENTROPY_BITS`] bits, which [`LicenseKeyConfig::validate`]
//! enforces. Uniqueness is still enforced by the store on insert.
//!
//! # Example
//!
//! ```rust
//! use spectre::license_key::{generate_license_key, LicenseKeyConfig};
//!
//! let config = LicenseKeyConfig::default();
//! let key = generate_license_key(&config);
//! assert!(key.starts_with("SPK-"));
//! assert_eq!(key.split('-').count(), 6);
//! ```

use rand::Rng;

use crate::config::LicenseConfig;
use crate::errors::{LicenseError, LicenseResult};

/// Character set for license key generation.
/// Excludes ambiguous characters: 0, O, I, L, 1
const LICENSE_KEY_CHARSET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTUVWXYZ";

/// Minimum entropy a generated key must carry.
pub const MIN_ENTROPY_BITS: f64 = 122.0;

/// Produces fresh license keys.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Configuration for license key generation.
#[derive(Debug, Clone)]
pub struct LicenseKeyConfig {
    /// Prefix for the license key (e.g., "SPK")
    pub prefix: String,
    /// Number of segments after the prefix
    pub segments: u8,
    /// Length of each segment
    pub segment_length: u8,
}

impl Default for LicenseKeyConfig {
    fn default() -> Self {
        Self {
            prefix: "SPK".to_string(),
            segments: 5,
            segment_length: 5,
        }
    }
}

impl From<&LicenseConfig> for LicenseKeyConfig {
    fn from(config: &LicenseConfig) -> Self {
        Self {
            prefix: config.key_prefix.clone(),
            segments: config.key_segments,
            segment_length: config.key_segment_length,
        }
    }
}

impl LicenseKeyConfig {
    /// Bits of entropy in the random part of a generated key.
    pub fn entropy_bits(&self) -> f64 {
        let symbols = self.segments as f64 * self.segment_length as f64;
        symbols * (LICENSE_KEY_CHARSET.len() as f64).log2()
    }

    /// Check the key shape is usable: a short alphanumeric prefix and enough
    /// random symbols to reach [`MIN_ENTROPY_BITS`].
    pub fn validate(&self) -> LicenseResult<()> {
        if self.prefix.is_empty()
            || self.prefix.len() > 16
            || !self.prefix.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(LicenseError::ConfigError(
                "license.key_prefix must be 1-16 ASCII letters or digits".to_string(),
            ));
        }
        if self.segments == 0 || self.segment_length == 0 {
            return Err(LicenseError::ConfigError(
                "license.key_segments and license.key_segment_length must be greater than 0"
                    .to_string(),
            ));
        }
        let bits = self.entropy_bits();
        if bits < MIN_ENTROPY_BITS {
            return Err(LicenseError::ConfigError(format!(
                "license key shape carries {bits:.1} bits of entropy, at least {MIN_ENTROPY_BITS} required"
            )));
        }
        let total_len =
            self.prefix.len() + self.segments as usize * (self.segment_length as usize + 1);
        if total_len > 128 {
            return Err(LicenseError::ConfigError(format!(
                "generated license keys would be {total_len} characters long (max 128)"
            )));
        }
        Ok(())
    }
}

/// Generate a single segment of random characters.
fn generate_segment(length: u8) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..LICENSE_KEY_CHARSET.len());
            LICENSE_KEY_CHARSET[idx] as char
        })
        .collect()
}

/// Generate a license key with the given configuration.
pub fn generate_license_key(config: &LicenseKeyConfig) -> String {
    let segments: Vec<String> = (0..config.segments)
        .map(|_| generate_segment(config.segment_length))
        .collect();

    format!("{}-{}", config.prefix, segments.join("-"))
}

/// [`KeyGenerator`] backed by the thread-local CSPRNG.
#[derive(Debug, Clone, Default)]
pub struct RandomKeyGenerator {
    config: LicenseKeyConfig,
}

impl RandomKeyGenerator {
    pub fn new(config: LicenseKeyConfig) -> LicenseResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }
}

impl KeyGenerator for RandomKeyGenerator {
    fn generate(&self) -> String {
        generate_license_key(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches_generated_format(key: &str, config: &LicenseKeyConfig) -> bool {
        let parts: Vec<&str> = key.split('-').collect();

        if parts.len() != 1 + config.segments as usize || parts[0] != config.prefix {
            return false;
        }

        parts[1..].iter().all(|segment| {
            segment.len() == config.segment_length as usize
                && segment.bytes().all(|b| LICENSE_KEY_CHARSET.contains(&b))
        })
    }

    #[test]
    fn generate_key_has_correct_format() {
        let config = LicenseKeyConfig::default();
        let key = generate_license_key(&config);

        assert!(key.starts_with("SPK-"));

        let parts: Vec<&str> = key.split('-').collect();
        assert_eq!(parts.len(), 6); // prefix + 5 segments
        for segment in &parts[1..] {
            assert_eq!(segment.len(), 5);
        }
    }

    #[test]
    fn generate_key_excludes_ambiguous_characters() {
        let config = LicenseKeyConfig::default();
        for _ in 0..100 {
            let key = generate_license_key(&config);
            let parts: Vec<&str> = key.split('-').collect();
            for segment in &parts[1..] {
                for ambiguous in ['0', 'O', 'I', 'L', '1'] {
                    assert!(
                        !segment.contains(ambiguous),
                        "Segment contains '{}': {}",
                        ambiguous,
                        segment
                    );
                }
            }
        }
    }

    #[test]
    fn default_shape_meets_entropy_floor() {
        let config = LicenseKeyConfig::default();
        assert!(config.entropy_bits() >= MIN_ENTROPY_BITS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn short_shapes_are_rejected() {
        let config = LicenseKeyConfig {
            prefix: "LIC".to_string(),
            segments: 4,
            segment_length: 4,
        };
        assert!(config.entropy_bits() < MIN_ENTROPY_BITS);
        assert!(matches!(
            config.validate(),
            Err(LicenseError::ConfigError(_))
        ));
        assert!(RandomKeyGenerator::new(config).is_err());
    }

    #[test]
    fn bad_prefix_is_rejected() {
        let config = LicenseKeyConfig {
            prefix: "BAD PREFIX".to_string(),
            ..LicenseKeyConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn generated_key_matches_its_format() {
        let config = LicenseKeyConfig::default();
        let key = generate_license_key(&config);
        assert!(matches_generated_format(&key, &config));
    }

    #[test]
    fn format_check_rejects_foreign_keys() {
        let config = LicenseKeyConfig::default();
        assert!(!matches_generated_format("WRONG-A2B3C-C4D5E-E6F7G-G8H9J-K2M3N", &config));
        assert!(!matches_generated_format("SPK-A2B3C-C4D5E", &config));
        assert!(!matches_generated_format("SPK-AOOOO-C4D5E-E6F7G-G8H9J-K2M3N", &config));
        assert!(!matches_generated_format("3f2a9c0d41e84b7aa1c2d3e4f5a6b7c8", &config));
    }

    #[test]
    fn generated_keys_are_unique() {
        let generator = RandomKeyGenerator::default();
        let mut keys = std::collections::HashSet::new();
        for _ in 0..1000 {
            let key = generator.generate();
            assert!(keys.insert(key.clone()), "Duplicate key generated: {}", key);
        }
    }
}
