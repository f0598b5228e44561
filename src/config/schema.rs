use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

/// Placeholder substituted with a captured value in capture templates.
pub const VALUE_PLACEHOLDER: &str = "{value}";

#[derive(Debug, Deserialize, Default, Clone)]
pub struct FixConfig {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub fixes: Vec<FixDefinition>,
}

impl FixConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.fixes.is_empty() {
            issues.push(ValidationIssue::EmptyFixList);
        }

        let mut seen = HashSet::new();
        for fix in &self.fixes {
            if fix.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    fix_id: None,
                    field: "id",
                });
            } else if !seen.insert(fix.id.as_str()) {
                issues.push(ValidationIssue::DuplicateId {
                    fix_id: fix.id.clone(),
                });
            }
            if fix.module.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    fix_id: Some(fix.id.clone()),
                    field: "module",
                });
            } else if fix.module.split('.').any(|part| part.trim().is_empty()) {
                issues.push(ValidationIssue::InvalidCombo {
                    fix_id: Some(fix.id.clone()),
                    message: format!("module '{}' is not a dotted module name", fix.module),
                });
            }

            match &fix.signature {
                Signature::Literal { text } => {
                    if text.is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            fix_id: Some(fix.id.clone()),
                            field: "signature.text",
                        });
                    }
                }
                Signature::Regex { pattern } => {
                    if pattern.trim().is_empty() {
                        issues.push(ValidationIssue::MissingField {
                            fix_id: Some(fix.id.clone()),
                            field: "signature.pattern",
                        });
                    } else {
                        match crate::cache::get_or_compile(pattern) {
                            Ok(re) if re.captures_len() < 2 => {
                                issues.push(ValidationIssue::InvalidPattern {
                                    fix_id: fix.id.clone(),
                                    message: "regex signature needs a capture group".to_string(),
                                });
                            }
                            Ok(_) => {}
                            Err(e) => issues.push(ValidationIssue::InvalidPattern {
                                fix_id: fix.id.clone(),
                                message: e.to_string(),
                            }),
                        }
                    }
                }
            }

            match (&fix.replacement, &fix.signature) {
                (Replacement::Line { text }, Signature::Literal { text: search })
                | (Replacement::Text { text }, Signature::Literal { text: search }) => {
                    if !search.is_empty() && text.contains(search.as_str()) {
                        issues.push(ValidationIssue::InvalidCombo {
                            fix_id: Some(fix.id.clone()),
                            message: "replacement text still contains the signature".to_string(),
                        });
                    }
                    if matches!(fix.replacement, Replacement::Line { .. })
                        && (search.contains('\n') || search.contains('\r'))
                    {
                        issues.push(ValidationIssue::InvalidCombo {
                            fix_id: Some(fix.id.clone()),
                            message: "line replacement needs a single-line signature".to_string(),
                        });
                    }
                }
                (Replacement::Line { .. }, Signature::Regex { .. })
                | (Replacement::Text { .. }, Signature::Regex { .. }) => {
                    issues.push(ValidationIssue::InvalidCombo {
                        fix_id: Some(fix.id.clone()),
                        message: "line/text replacement requires a literal signature".to_string(),
                    });
                }
                (Replacement::Capture { from, to, .. }, Signature::Regex { .. }) => {
                    if !from.contains(VALUE_PLACEHOLDER) {
                        issues.push(ValidationIssue::InvalidCombo {
                            fix_id: Some(fix.id.clone()),
                            message: format!("replacement.from must contain {VALUE_PLACEHOLDER}"),
                        });
                    }
                    if !to.contains(VALUE_PLACEHOLDER) {
                        issues.push(ValidationIssue::InvalidCombo {
                            fix_id: Some(fix.id.clone()),
                            message: format!("replacement.to must contain {VALUE_PLACEHOLDER}"),
                        });
                    }
                }
                (Replacement::Capture { .. }, Signature::Literal { .. }) => {
                    issues.push(ValidationIssue::InvalidCombo {
                        fix_id: Some(fix.id.clone()),
                        message: "capture replacement requires a regex signature".to_string(),
                    });
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Directories modules are resolved against, in order.
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,
    /// Keep a `<file>.orig` copy of every file before its first rewrite.
    #[serde(default)]
    pub backup: bool,
}

/// One known incompatibility and its remedy.
#[derive(Debug, Deserialize, Clone)]
pub struct FixDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Dotted module name, e.g. `diffusers.utils.outputs`.
    pub module: String,
    pub signature: Signature,
    pub replacement: Replacement,
}

impl FixDefinition {
    /// Human-readable name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Detection pattern for a deprecated construct.
///
/// Detection always asks "is the deprecated construct still present",
/// never "is the new construct missing".
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Signature {
    /// Exact substring.
    Literal { text: String },
    /// Regular expression; capture group 1 is the parameter value.
    Regex { pattern: String },
}

impl Signature {
    pub fn kind(&self) -> &'static str {
        match self {
            Signature::Literal { .. } => "literal",
            Signature::Regex { .. } => "regex",
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Replacement {
    /// Replace every line that is exactly the signature.
    Line { text: String },
    /// Replace every occurrence of the signature.
    Text { text: String },
    /// Rewrite `from` into `to` for each distinct captured value.
    Capture {
        from: String,
        to: String,
        #[serde(default)]
        derive: Derive,
    },
}

impl Replacement {
    pub fn kind(&self) -> &'static str {
        match self {
            Replacement::Line { .. } => "line",
            Replacement::Text { .. } => "text",
            Replacement::Capture { .. } => "capture",
        }
    }
}

/// How the replacement value is derived from a captured value.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Derive {
    #[default]
    Identity,
    /// Boolean inversion: `x` becomes `not x`, `not x` becomes `x`.
    Negate,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyFixList,
    MissingField {
        fix_id: Option<String>,
        field: &'static str,
    },
    DuplicateId {
        fix_id: String,
    },
    InvalidPattern {
        fix_id: String,
        message: String,
    },
    InvalidCombo {
        fix_id: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyFixList => write!(f, "fix set contains no fixes"),
            ValidationIssue::MissingField { fix_id, field } => match fix_id {
                Some(id) => write!(f, "fix '{id}' missing required field '{field}'"),
                None => write!(f, "fix missing required field '{field}'"),
            },
            ValidationIssue::DuplicateId { fix_id } => {
                write!(f, "fix id '{fix_id}' is defined more than once")
            }
            ValidationIssue::InvalidPattern { fix_id, message } => {
                write!(f, "fix '{fix_id}' has an invalid regex signature: {message}")
            }
            ValidationIssue::InvalidCombo { fix_id, message } => match fix_id {
                Some(id) => write!(f, "fix '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid fix configuration: {message}"),
            },
        }
    }
}
