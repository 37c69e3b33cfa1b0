//! Dotted metric name utilities and validation.
//!
//! A metric name is a dot-separated path (`five_sec.int_8742.x1`). Names
//! ending with the separator denote directories (`five_sec.int_8742.`).

use regex::Regex;

use crate::config::ValidatorConfig;
use crate::error::{Error, Result};

/// Separator between path levels.
pub const LEVEL_SEPARATOR: char = '.';

/// Returns whether `name` denotes a directory (trailing separator).
#[must_use]
pub fn is_dir(name: &str) -> bool {
    name.ends_with(LEVEL_SEPARATOR)
}

/// Splits a name into its path levels.
///
/// The trailing separator of a directory name does not produce an empty
/// level: `"a.b."` splits to `["a", "b"]`.
#[must_use]
pub fn split_levels(name: &str) -> Vec<&str> {
    let trimmed = name.strip_suffix(LEVEL_SEPARATOR).unwrap_or(name);
    trimmed.split(LEVEL_SEPARATOR).collect()
}

/// Returns the last path level of a name.
///
/// `"a.b.c"` and `"a.b.c."` both yield `"c"`.
#[must_use]
pub fn last_level(name: &str) -> &str {
    let trimmed = name.strip_suffix(LEVEL_SEPARATOR).unwrap_or(name);
    trimmed
        .rsplit(LEVEL_SEPARATOR)
        .next()
        .unwrap_or(trimmed)
}

/// Returns the full name of the parent directory, or `""` for a top-level
/// name. Parent names keep their trailing separator.
#[must_use]
pub fn parent_name(name: &str) -> &str {
    let trimmed = name.strip_suffix(LEVEL_SEPARATOR).unwrap_or(name);
    match trimmed.rfind(LEVEL_SEPARATOR) {
        Some(idx) => &name[..=idx],
        None => "",
    }
}

/// Validates inbound metric names before they touch the namespace.
///
/// Rejections are values, not errors: the ingestion path drops invalid
/// names silently by design.
#[derive(Debug)]
pub struct MetricValidator {
    pattern: Regex,
    min_length: usize,
    max_length: usize,
    min_levels: usize,
    max_levels: usize,
}

impl MetricValidator {
    /// Builds a validator from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Precondition`] if the configured name pattern is
    /// not a valid regular expression.
    pub fn new(config: &ValidatorConfig) -> Result<Self> {
        let pattern = Regex::new(&config.name_pattern)
            .map_err(|e| Error::precondition(format!("invalid metric name pattern: {e}")))?;
        Ok(Self {
            pattern,
            min_length: config.min_length,
            max_length: config.max_length,
            min_levels: config.min_levels,
            max_levels: config.max_levels,
        })
    }

    /// Checks a metric (or, when `allow_dirs`, directory) name.
    #[must_use]
    pub fn validate(&self, name: &str, allow_dirs: bool) -> bool {
        if name.is_empty() {
            return false;
        }
        let dir = is_dir(name);
        if dir && !allow_dirs {
            return false;
        }
        if (!dir && name.len() < self.min_length) || name.len() > self.max_length {
            return false;
        }
        if name.starts_with(LEVEL_SEPARATOR) || name.contains("..") {
            return false;
        }
        let levels = split_levels(name).len();
        if (!dir && levels < self.min_levels) || levels > self.max_levels {
            return false;
        }
        self.pattern.is_match(name)
    }
}

impl Default for MetricValidator {
    fn default() -> Self {
        // The default pattern is a compile-time constant and always valid.
        Self::new(&ValidatorConfig::default()).expect("default validator config is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_levels_drops_trailing_separator() {
        assert_eq!(split_levels("a.b.c"), vec!["a", "b", "c"]);
        assert_eq!(split_levels("a.b."), vec!["a", "b"]);
        assert_eq!(split_levels("a"), vec!["a"]);
    }

    #[test]
    fn test_last_level_and_parent() {
        assert_eq!(last_level("five_sec.int_8742.x1"), "x1");
        assert_eq!(last_level("five_sec.int_8742."), "int_8742");
        assert_eq!(parent_name("five_sec.int_8742.x1"), "five_sec.int_8742.");
        assert_eq!(parent_name("five_sec.int_8742."), "five_sec.");
        assert_eq!(parent_name("five_sec."), "");
        assert_eq!(parent_name("five_sec"), "");
    }

    #[test]
    fn test_validator_accepts_plain_names() {
        let validator = MetricValidator::default();
        assert!(validator.validate("five_sec.int_8742.x1", false));
        assert!(validator.validate("one_min.market-front-ugr.e2", false));
    }

    #[test]
    fn test_validator_rejects_malformed_names() {
        let validator = MetricValidator::default();
        assert!(!validator.validate("", false));
        assert!(!validator.validate(".leading.dot", false));
        assert!(!validator.validate("double..dot", false));
        assert!(!validator.validate("has space.x", false));
        // A directory is only valid where directories are allowed.
        assert!(!validator.validate("five_sec.int_8742.", false));
        assert!(validator.validate("five_sec.int_8742.", true));
    }

    #[test]
    fn test_validator_enforces_level_bounds() {
        let config = ValidatorConfig {
            min_levels: 3,
            max_levels: 4,
            ..ValidatorConfig::default()
        };
        let validator = MetricValidator::new(&config).expect("config");
        assert!(!validator.validate("one_min.too_short", false));
        assert!(validator.validate("one_min.just.right", false));
        assert!(!validator.validate("one_min.way.too.deep.now", false));
        // Directories are exempt from the minimum (a parent of a valid
        // metric is always a valid directory).
        assert!(validator.validate("one_min.", true));
    }
}
