pub mod loader;
pub mod schema;

pub use loader::{builtin_fix_set, load_from_path, load_from_str, ConfigError, BUILTIN_FIXES};
pub use schema::{
    Derive, FixConfig, FixDefinition, Metadata, Replacement, Signature, ValidationError,
    ValidationIssue, VALUE_PLACEHOLDER,
};
