use std::hash::{Hash, Hasher};

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};

/// Epoch values at or above this magnitude are treated as milliseconds.
pub const MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// One row, keyed by column name in table column order.
pub type Row = IndexMap<String, Value>;

/// Semantic type of a column, derived from the store's type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Bool,
    Integer,
    Float,
    /// Exact numerics; carried as their decimal text, never through a float.
    Decimal,
    Text,
    Timestamp,
    Other,
}

impl ColumnKind {
    pub fn from_udt_name(udt_name: &str) -> Self {
        match udt_name {
            "bool" => ColumnKind::Bool,
            "int2" | "int4" | "int8" | "oid" => ColumnKind::Integer,
            "float4" | "float8" => ColumnKind::Float,
            "numeric" => ColumnKind::Decimal,
            "text" | "varchar" | "bpchar" | "name" | "citext" | "uuid" | "date" | "time" => {
                ColumnKind::Text
            }
            "timestamp" | "timestamptz" => ColumnKind::Timestamp,
            _ => ColumnKind::Other,
        }
    }
}

/// A single cell. The variant set is closed so formatting and coercion
/// rules are checked exhaustively.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(String),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Converts a JSON cell into a `Value`, using the column kind to decide
    /// how strings and numbers should be read. Never fails: anything that
    /// cannot be coerced is kept as text and left for the store to reject.
    pub fn from_json(json: &serde_json::Value, kind: ColumnKind) -> Self {
        use serde_json::Value as Json;

        match (json, kind) {
            (Json::Null, _) => Value::Null,
            (Json::Bool(b), ColumnKind::Text) => Value::Text(b.to_string()),
            (Json::Bool(b), _) => Value::Bool(*b),
            (Json::Number(n), ColumnKind::Timestamp) => match n.as_i64() {
                Some(i) => normalize_epoch(i).map(Value::Timestamp).unwrap_or(Value::Int(i)),
                None => n
                    .as_f64()
                    .and_then(normalize_epoch_f64)
                    .map(Value::Timestamp)
                    .unwrap_or(Value::Null),
            },
            (Json::Number(n), ColumnKind::Text) => Value::Text(n.to_string()),
            (Json::Number(n), ColumnKind::Decimal) => Value::Decimal(n.to_string()),
            (Json::Number(n), ColumnKind::Float) => {
                n.as_f64().map(Value::Float).unwrap_or(Value::Null)
            }
            (Json::Number(n), _) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            (Json::String(s), ColumnKind::Timestamp) => parse_timestamp(s)
                .map(Value::Timestamp)
                .unwrap_or_else(|| Value::Text(s.clone())),
            (Json::String(s), ColumnKind::Integer) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .unwrap_or_else(|_| Value::Text(s.clone())),
            (Json::String(s), ColumnKind::Float) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .unwrap_or_else(|_| Value::Text(s.clone())),
            (Json::String(s), ColumnKind::Decimal) if is_decimal_literal(s.trim()) => {
                Value::Decimal(s.trim().to_string())
            }
            (Json::String(s), ColumnKind::Bool) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" => Value::Bool(true),
                "false" | "f" => Value::Bool(false),
                _ => Value::Text(s.clone()),
            },
            (Json::String(s), _) => Value::Text(s.clone()),
            (other, _) => Value::Text(other.to_string()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Decimal(s) | Value::Text(s) => s.hash(state),
            Value::Timestamp(t) => t.hash(state),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Value::Float(_) => serializer.serialize_none(),
            // Browsers read JSON numbers as doubles; keep the digits as text.
            Value::Decimal(s) | Value::Text(s) => serializer.serialize_str(s),
            Value::Timestamp(t) => {
                serializer.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Micros, true))
            }
        }
    }
}

/// Renders a value as a SQL literal for a VALUES clause.
///
/// Only single quotes are escaped (by doubling). Backslashes and other
/// characters pass through untouched.
pub fn format_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string().to_uppercase(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_nan() => "NULL".to_string(),
        Value::Float(f) if f.is_infinite() => {
            if f.is_sign_positive() {
                "'Infinity'".to_string()
            } else {
                "'-Infinity'".to_string()
            }
        }
        Value::Float(f) => f.to_string(),
        Value::Decimal(s) if is_decimal_literal(s) => s.clone(),
        Value::Decimal(s) | Value::Text(s) => quote_text(s),
        Value::Timestamp(t) => quote_text(&t.to_rfc3339_opts(SecondsFormat::Micros, true)),
    }
}

/// True for plain decimal text: optional sign, digits with at most one
/// point, optional exponent.
pub fn is_decimal_literal(s: &str) -> bool {
    let s = s.strip_prefix(['-', '+']).unwrap_or(s);
    let (mantissa, exponent) = match s.find(['e', 'E']) {
        Some(at) => (&s[..at], Some(&s[at + 1..])),
        None => (s, None),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    let mantissa_ok =
        (!whole.is_empty() || !fraction.is_empty()) && digits(whole) && digits(fraction);
    let exponent_ok = exponent.is_none_or(|e| {
        let e = e.strip_prefix(['-', '+']).unwrap_or(e);
        !e.is_empty() && digits(e)
    });
    mantissa_ok && exponent_ok
}

fn quote_text(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Double-quotes an identifier so mixed-case names like `CreatedAt` survive.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

pub fn normalize_epoch(epoch: i64) -> Option<DateTime<Utc>> {
    if epoch.checked_abs().map_or(true, |abs| abs >= MILLIS_THRESHOLD) {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    }
}

pub fn normalize_epoch_f64(epoch: f64) -> Option<DateTime<Utc>> {
    if !epoch.is_finite() {
        return None;
    }
    let micros = if epoch.abs() >= MILLIS_THRESHOLD as f64 {
        epoch * 1_000.0
    } else {
        epoch * 1_000_000.0
    };
    if micros.abs() >= i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_micros(micros.round() as i64)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // timestamptz rendered by the store with a short offset, e.g. +00
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
