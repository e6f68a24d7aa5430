//! Field access and typed scalar comparison over JSON records.
//!
//! Records are JSON objects. Fields are addressed with dot notation
//! (`customer.address.city`). Group keys and min/max folds work on
//! [`Scalar`]s, which carry the type-appropriate equality the group
//! definition asks for: numbers compare numerically, strings exactly,
//! dates by instant, and `null` only equals `null`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A record flowing through the engine: a JSON object of field → value.
pub type Record = Value;

/// Largest integer magnitude rendered back to JSON as an integer.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Declared type of a group field, selecting the equality used for breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Use the value's natural JSON type.
    #[default]
    Any,
    /// Numbers, including numeric strings.
    Numeric,
    /// Exact string comparison; numbers and booleans are stringified.
    String,
    /// Instants parsed from RFC 3339, `YYYY-MM-DD[ HH:MM:SS]` or epoch millis.
    Date,
}

/// Gets a field from a JSON record, supporting dot notation for nested fields.
#[must_use]
pub fn get_field<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = record;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Extracts a number from a JSON value. Only JSON numbers qualify.
#[must_use]
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Renders an accumulated `f64` back to JSON, keeping integral values integral.
#[must_use]
pub fn number_to_json(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_EXACT_INTEGER {
        Value::from(value as i64)
    } else {
        serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

/// Name of a JSON value's type, used in error messages.
#[must_use]
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Short description of a JSON value (`string "abc"`), used in error messages.
#[must_use]
pub fn describe(value: &Value) -> String {
    let mut text = value.to_string();
    if text.len() > 40 {
        let cut = (0..=40).rev().find(|&i| text.is_char_boundary(i)).unwrap_or(0);
        text.truncate(cut);
        text.push_str("...");
    }
    format!("{} {text}", json_type_name(value))
}

/// A typed scalar used as a group-key component and by min/max folds.
#[derive(Debug, Clone)]
pub enum Scalar {
    /// Missing or null value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer that fits `i64`.
    Int(i64),
    /// Integer above `i64::MAX`.
    UInt(u64),
    /// Any other JSON number. Integral values in `i64`/`u64` range are
    /// normalized onto [`Scalar::Int`]/[`Scalar::UInt`] by [`Scalar::number`].
    Number(f64),
    /// String, also the fallback for arrays and objects.
    String(String),
    /// Instant in milliseconds since the Unix epoch.
    Date(i64),
}

impl Scalar {
    /// Converts a JSON value according to the declared field type.
    ///
    /// Values that do not fit the declared type keep their natural JSON type,
    /// so they still compare unequal to every well-typed value.
    #[must_use]
    pub fn from_json(value: &Value, field_type: FieldType) -> Self {
        match (field_type, value) {
            (_, Value::Null) => Self::Null,
            (FieldType::Numeric, Value::String(s)) => {
                Self::parse_number(s.trim()).unwrap_or_else(|| Self::String(s.clone()))
            }
            (FieldType::String, Value::Number(n)) => Self::String(n.to_string()),
            (FieldType::String, Value::Bool(b)) => Self::String(b.to_string()),
            (FieldType::Date, Value::String(s)) => {
                parse_date_millis(s).map_or_else(|| Self::String(s.clone()), Self::Date)
            }
            (FieldType::Date, Value::Number(n)) => {
                n.as_i64().map_or_else(|| Self::natural(value), Self::Date)
            }
            _ => Self::natural(value),
        }
    }

    /// Converts a JSON value using its natural type.
    #[must_use]
    pub fn natural(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::from_number(n),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(_) | Value::Object(_) => Self::String(value.to_string()),
        }
    }

    /// Builds a numeric scalar from an `f64`, keeping integral values exact.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn number(value: f64) -> Self {
        if value.fract() == 0.0 {
            if (I64_MIN..I64_BOUND).contains(&value) {
                return Self::Int(value as i64);
            }
            if (I64_BOUND..U64_BOUND).contains(&value) {
                return Self::UInt(value as u64);
            }
        }
        Self::Number(value)
    }

    fn from_number(n: &serde_json::Number) -> Self {
        if let Some(i) = n.as_i64() {
            Self::Int(i)
        } else if let Some(u) = n.as_u64() {
            Self::UInt(u)
        } else {
            Self::number(n.as_f64().unwrap_or(f64::NAN))
        }
    }

    fn parse_number(text: &str) -> Option<Self> {
        if let Ok(i) = text.parse::<i64>() {
            return Some(Self::Int(i));
        }
        if let Ok(u) = text.parse::<u64>() {
            return Some(Self::UInt(u));
        }
        text.parse::<f64>().ok().map(Self::number)
    }

    fn numeric(&self) -> Option<Numeric> {
        match self {
            Self::Int(i) => Some(Numeric::Int(*i)),
            Self::UInt(u) => Some(match i64::try_from(*u) {
                Ok(i) => Numeric::Int(i),
                Err(_) => Numeric::UInt(*u),
            }),
            Self::Number(f) => Some(match Self::number(*f) {
                Self::Int(i) => Numeric::Int(i),
                Self::UInt(u) => Numeric::UInt(u),
                _ => Numeric::Float(*f),
            }),
            _ => None,
        }
    }

    /// Returns true for [`Scalar::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::UInt(_) | Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Date(_) => "date",
        }
    }

    /// Orders two scalars of the same type. Returns `None` across types.
    #[must_use]
    pub fn try_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::String(a), Self::String(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            _ => Some(self.numeric()?.compare(&other.numeric()?)),
        }
    }

    /// Renders the scalar as JSON. Dates become RFC 3339 strings.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::UInt(u) => Value::from(*u),
            Self::Number(n) => number_to_json(*n),
            Self::String(s) => Value::String(s.clone()),
            Self::Date(ms) => DateTime::<Utc>::from_timestamp_millis(*ms).map_or_else(
                || Value::from(*ms),
                |dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ),
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::UInt(_) | Self::Number(_) => 2,
            Self::String(_) => 3,
            Self::Date(_) => 4,
        }
    }
}

const I64_MIN: f64 = -9_223_372_036_854_775_808.0;
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;
const U64_BOUND: f64 = 18_446_744_073_709_551_616.0;

/// Canonical numeric form: one representation per numeric value.
#[derive(Debug, Clone, Copy)]
enum Numeric {
    Int(i64),
    UInt(u64),
    /// Non-integral or out of integer range.
    Float(f64),
}

impl Numeric {
    /// Exact ordering across representations.
    #[allow(clippy::cast_precision_loss)]
    fn compare(&self, other: &Self) -> Ordering {
        match (*self, *other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(&b),
            (Self::UInt(a), Self::UInt(b)) => a.cmp(&b),
            (Self::Int(_), Self::UInt(_)) => Ordering::Less,
            (Self::UInt(_), Self::Int(_)) => Ordering::Greater,
            // A float here is never integral within integer range, so the
            // rounding of the integer side cannot flip the order.
            (Self::Int(a), Self::Float(b)) => (a as f64).total_cmp(&b),
            (Self::UInt(a), Self::Float(b)) => (a as f64).total_cmp(&b),
            (Self::Float(a), Self::Int(b)) => a.total_cmp(&(b as f64)),
            (Self::Float(a), Self::UInt(b)) => a.total_cmp(&(b as f64)),
            (Self::Float(a), Self::Float(b)) => canonical_float(a).total_cmp(&canonical_float(b)),
        }
    }

    fn hash_into<H: Hasher>(&self, state: &mut H) {
        match *self {
            Self::Int(i) => (0u8, i).hash(state),
            Self::UInt(u) => (1u8, u).hash(state),
            Self::Float(f) => (2u8, canonical_float(f).to_bits()).hash(state),
        }
    }
}

/// Collapses every NaN onto one bit pattern. `-0.0` never gets here: it is
/// integral and normalizes to `Int(0)`.
fn canonical_float(value: f64) -> f64 {
    if value.is_nan() {
        f64::NAN
    } else {
        value
    }
}

fn parse_date_millis(text: &str) -> Option<i64> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            _ => match (self.numeric(), other.numeric()) {
                (Some(a), Some(b)) => a.compare(&b) == Ordering::Equal,
                _ => false,
            },
        }
    }
}

impl Eq for Scalar {}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.tag().hash(state);
        match self {
            Self::Null => {}
            Self::Bool(b) => b.hash(state),
            Self::Int(_) | Self::UInt(_) | Self::Number(_) => {
                if let Some(n) = self.numeric() {
                    n.hash_into(state);
                }
            }
            Self::String(s) => s.hash(state),
            Self::Date(ms) => ms.hash(state),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json() {
            Value::String(s) => f.write_str(&s),
            other => write!(f, "{other}"),
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(|v| Self::natural(&v))
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::number(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for Scalar {
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or(Self::UInt(value), Self::Int)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}
