//! Action catalog and invocation types.
//!
//! An [`ActionSpec`] is the immutable catalog entry for one privileged
//! program. [`ActionRequest`] and [`ActionResult`] are the per-invocation
//! input and output of the broker.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Type of a single action argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgumentType {
    String,
    Integer,
    Boolean,
    Number,
    StringList,
}

impl ArgumentType {
    /// Check whether a JSON value has this type.
    ///
    /// `Number` accepts integers as well; `Integer` rejects fractional
    /// numbers even when they are whole (`1.0`).
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ArgumentType::String => value.is_string(),
            ArgumentType::Integer => value.is_i64() || value.is_u64(),
            ArgumentType::Boolean => value.is_boolean(),
            ArgumentType::Number => value.is_number(),
            ArgumentType::StringList => value
                .as_array()
                .map(|items| items.iter().all(Value::is_string))
                .unwrap_or(false),
        }
    }
}

impl fmt::Display for ArgumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgumentType::String => write!(f, "string"),
            ArgumentType::Integer => write!(f, "integer"),
            ArgumentType::Boolean => write!(f, "boolean"),
            ArgumentType::Number => write!(f, "number"),
            ArgumentType::StringList => write!(f, "string_list"),
        }
    }
}

/// How the broker treats an action's stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    /// Decode stdout as a response frame when it starts with the frame magic,
    /// otherwise pass it through as text.
    #[default]
    Auto,
    /// Stdout must be a response frame; anything else fails the invocation.
    Frame,
}

/// A regular expression that must match a whole string value.
///
/// The source text is kept for display and serialization; matching uses an
/// anchored copy so `abc` never matches `xabcx`.
#[derive(Clone)]
pub struct ArgumentPattern {
    source: String,
    anchored: Regex,
}

impl ArgumentPattern {
    /// Compile a pattern.
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        let anchored = Regex::new(&format!("^(?:{source})$"))?;
        Ok(Self {
            source: source.to_string(),
            anchored,
        })
    }

    /// Whether `value` matches the pattern in full.
    pub fn is_match(&self, value: &str) -> bool {
        self.anchored.is_match(value)
    }

    /// The pattern as written in the manifest.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for ArgumentPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ArgumentPattern").field(&self.source).finish()
    }
}

impl PartialEq for ArgumentPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for ArgumentPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for ArgumentPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        ArgumentPattern::new(&source).map_err(serde::de::Error::custom)
    }
}

/// Schema entry for one named argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArgumentSpec {
    /// Argument name (key in the request's argument map).
    pub name: String,

    /// Expected value type.
    #[serde(rename = "type")]
    pub arg_type: ArgumentType,

    /// Whether the argument must be present. Defaults to `true`.
    #[serde(default = "default_required")]
    pub required: bool,

    /// Pattern every string value (or list element) must match in full.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<ArgumentPattern>,

    /// Enumeration of accepted values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,

    /// Maximum string length in characters, or list length in elements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    /// Minimum numeric value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Maximum numeric value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_required() -> bool {
    true
}

impl ArgumentSpec {
    /// Create a required argument with no extra constraints.
    pub fn new(name: impl Into<String>, arg_type: ArgumentType) -> Self {
        Self {
            name: name.into(),
            arg_type,
            required: true,
            pattern: None,
            allowed_values: None,
            max_length: None,
            min: None,
            max: None,
            description: None,
        }
    }

    /// Mark the argument optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Attach a full-match pattern.
    pub fn with_pattern(mut self, pattern: ArgumentPattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    /// Restrict to an enumeration of values.
    pub fn with_allowed_values(mut self, allowed: Vec<Value>) -> Self {
        self.allowed_values = Some(allowed);
        self
    }

    /// Cap string or list length.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }
}

/// Immutable catalog entry for a privileged action program.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSpec {
    /// Unique action name.
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Absolute path of the program to execute.
    pub executable_path: PathBuf,

    /// Ordered argument schema.
    pub argument_schema: Vec<ArgumentSpec>,

    /// Wall-clock limit for one invocation.
    #[serde(serialize_with = "serialize_secs")]
    pub timeout: Duration,

    /// Whether the program runs through the escalation helper.
    pub privileged: bool,

    /// Whether invocations of this action are serialized.
    pub exclusive: bool,

    /// Expected shape of stdout.
    pub response: ResponseFormat,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl ActionSpec {
    /// Find the schema entry for an argument name.
    pub fn argument(&self, name: &str) -> Option<&ArgumentSpec> {
        self.argument_schema.iter().find(|a| a.name == name)
    }
}

/// A named, parameterized request from the unprivileged caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, Value>,
}

impl ActionRequest {
    pub fn new(name: impl Into<String>, arguments: BTreeMap<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Outcome of one dispatched invocation.
///
/// A nonzero `exit_status` is data for the caller, not a broker error.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    /// Action that produced this result.
    pub action: String,
    /// Program exit status; `128 + signal` if it was killed by a signal.
    pub exit_status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Decoded response frame, if the program wrote one.
    pub decoded_payload: Option<Value>,
    pub timed_out: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    /// When the program was launched (after any serialization wait).
    pub started_at: DateTime<Utc>,
    /// When the program was reaped.
    pub finished_at: DateTime<Utc>,
}

impl ActionResult {
    /// Whether the program reported success by convention.
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_status == 0
    }

    /// Lossy UTF-8 view of stdout.
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Lossy UTF-8 view of stderr.
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Wall-clock run time in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}
