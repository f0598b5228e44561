//! Textual signature detection.
//!
//! Matching is purely textual. Occurrences inside comments or string
//! literals count as matches.

use crate::cache;
use crate::config::Signature;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PatternError {
    #[error("invalid regex signature '{pattern}': {source}")]
    Invalid {
        pattern: String,
        source: regex::Error,
    },

    #[error("regex signature '{pattern}' has no capture group")]
    MissingGroup { pattern: String },

    #[error("{replacement} replacement cannot be used with a {signature} signature")]
    IncompatibleRule {
        signature: &'static str,
        replacement: &'static str,
    },
}

/// Result of running a signature over a source snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Detection {
    pub present: bool,
    /// Distinct values of capture group 1, sorted. Empty for literals.
    pub captures: Vec<String>,
}

impl Detection {
    fn absent() -> Self {
        Self::default()
    }
}

/// Check whether `signature` occurs in `source`.
pub fn detect(source: &str, signature: &Signature) -> Result<Detection, PatternError> {
    match signature {
        Signature::Literal { text } => Ok(Detection {
            present: !text.is_empty() && source.contains(text.as_str()),
            captures: Vec::new(),
        }),
        Signature::Regex { pattern } => {
            let re = cache::get_or_compile(pattern).map_err(|source| PatternError::Invalid {
                pattern: pattern.clone(),
                source,
            })?;
            if re.captures_len() < 2 {
                return Err(PatternError::MissingGroup {
                    pattern: pattern.clone(),
                });
            }

            let captures: BTreeSet<&str> = re
                .captures_iter(source)
                .filter_map(|caps| caps.get(1))
                .map(|m| m.as_str())
                .collect();
            if captures.is_empty() {
                return Ok(Detection::absent());
            }
            Ok(Detection {
                present: true,
                captures: captures.into_iter().map(str::to_string).collect(),
            })
        }
    }
}
