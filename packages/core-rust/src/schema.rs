//! JSON schema validation for request inputs.
//!
//! Schemas are compiled once (draft 7) with the process-wide format registry
//! and produce a [`ValidationReport`] whose serialized form is safe to return
//! to clients.

use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use jsonschema::{Draft, JSONSchema};
use parking_lot::RwLock;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

/// A string format check: returns `true` when the value conforms.
pub type FormatFn = fn(&str) -> bool;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid schema: {message}")]
    Compile { message: String },
}

// ---------------------------------------------------------------------------
// Format registry
// ---------------------------------------------------------------------------

type Registry = Vec<(&'static str, FormatFn)>;

fn registry() -> &'static RwLock<Registry> {
    static FORMATS: OnceLock<RwLock<Registry>> = OnceLock::new();
    FORMATS.get_or_init(|| RwLock::new(builtin_formats()))
}

/// Registers (or replaces) a named string format for every validator
/// compiled afterwards.
///
/// Checks are plain functions; a non-capturing closure coerces to one.
pub fn add_format(name: &'static str, check: FormatFn) {
    let mut formats = registry().write();
    formats.retain(|(existing, _)| *existing != name);
    formats.push((name, check));
}

fn builtin_formats() -> Registry {
    vec![
        ("date", is_date as FormatFn),
        ("nonEmptyOrBlank", is_non_empty_or_blank),
        ("numberString", is_number_string),
        ("booleanString", is_boolean_string),
        ("email", is_email),
    ]
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m-%d-%Y",
    "%m/%d/%Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%b %d %Y",
    "%B %d, %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%a %b %d %H:%M:%S UTC %Y",
    "%a %b %d %Y %H:%M:%S",
];

/// Anything that reads as a calendar date or a timestamp.
#[must_use]
pub fn is_date(value: &str) -> bool {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value).is_ok()
        || DateTime::parse_from_rfc2822(value).is_ok()
        || DATE_FORMATS
            .iter()
            .any(|fmt| NaiveDate::parse_from_str(value, fmt).is_ok())
        || DATETIME_FORMATS
            .iter()
            .any(|fmt| NaiveDateTime::parse_from_str(value, fmt).is_ok())
}

/// A string with something to read.
#[must_use]
pub fn is_non_empty_or_blank(value: &str) -> bool {
    !value.trim().is_empty()
}

/// A string that parses as a number. Blank strings count as zero.
#[must_use]
pub fn is_number_string(value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() {
        return true;
    }
    let (digits, radix) = match value.get(..2) {
        Some("0x" | "0X") => (&value[2..], 16),
        Some("0o" | "0O") => (&value[2..], 8),
        Some("0b" | "0B") => (&value[2..], 2),
        _ => {
            let unsigned = value.trim_start_matches(['+', '-']);
            return unsigned == "Infinity"
                || value
                    .parse::<f64>()
                    .is_ok_and(|n| n.is_finite());
        }
    };
    u128::from_str_radix(digits, radix).is_ok()
}

/// Exactly `"true"` or `"false"`.
#[must_use]
pub fn is_boolean_string(value: &str) -> bool {
    matches!(value, "true" | "false")
}

fn email_regex() -> Option<&'static Regex> {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| {
            Regex::new(
                r#"^(([^<>()\[\]\\.,;:\s@"]+(\.[^<>()\[\]\\.,;:\s@"]+)*)|(".+"))@((\[[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\])|(([a-zA-Z\-0-9]+\.)+[a-zA-Z]{2,}))$"#,
            )
            .ok()
        })
        .as_ref()
}

/// A practical RFC 2822 address check.
#[must_use]
pub fn is_email(value: &str) -> bool {
    email_regex().is_some_and(|re| re.is_match(value))
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// One schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub message: String,
    /// JSON pointer to the offending value, empty for the root.
    #[serde(rename = "dataPath")]
    pub data_path: String,
    /// Location inside the schema. Diagnostic only, never serialized.
    #[serde(skip)]
    pub schema_path: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.data_path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.data_path, self.message)
        }
    }
}

/// Outcome of validating one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    /// First violation, if any.
    pub error: Option<ValidationIssue>,
    pub errors: Vec<ValidationIssue>,
    /// Schema references that could not be resolved.
    pub missing: Vec<String>,
}

impl ValidationReport {
    fn from_issues(errors: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            error: errors.first().cloned(),
            errors,
            missing: Vec::new(),
        }
    }

    /// Client-safe JSON form of the report.
    #[must_use]
    pub fn to_detail(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// SchemaValidator
// ---------------------------------------------------------------------------

/// A compiled schema. Cheap to clone.
#[derive(Clone)]
pub struct SchemaValidator {
    compiled: Arc<JSONSchema>,
}

impl SchemaValidator {
    /// Compiles `schema` with the formats registered so far.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Compile`] if `schema` is not a valid draft 7 schema.
    pub fn compile(schema: &Value) -> Result<Self, SchemaError> {
        let mut options = JSONSchema::options();
        options.with_draft(Draft::Draft7);
        for &(name, check) in registry().read().iter() {
            options.with_format(name, check);
        }
        let compiled = options.compile(schema).map_err(|err| SchemaError::Compile {
            message: err.to_string(),
        })?;
        Ok(Self {
            compiled: Arc::new(compiled),
        })
    }

    #[must_use]
    pub fn is_valid(&self, instance: &Value) -> bool {
        self.compiled.is_valid(instance)
    }

    /// Validates `instance`, collecting every violation.
    #[must_use]
    pub fn validate(&self, instance: &Value) -> ValidationReport {
        let issues = match self.compiled.validate(instance) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|err| ValidationIssue {
                    message: err.to_string(),
                    data_path: err.instance_path.to_string(),
                    schema_path: err.schema_path.to_string(),
                })
                .collect(),
        };
        ValidationReport::from_issues(issues)
    }
}

impl fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
