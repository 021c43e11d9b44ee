//! Runtime value types for Skript.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Length of one game tick.
pub const TICK: Duration = Duration::from_millis(50);

/// A runtime value in Skript.
///
/// Absence is modelled with `Option<Value>` rather than a dedicated variant;
/// lists are `Vec<Value>`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean value.
    Boolean(bool),
    /// Numeric value (all numbers are f64 in Skript).
    Number(f64),
    /// Text/string value.
    Text(String),
    /// A span of time.
    Timespan(Duration),
    /// A host object such as a player, identified by type and id.
    Object(ObjectRef),
}

/// Handle to a value owned by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub type_name: Arc<str>,
    pub id: Arc<str>,
}

impl ObjectRef {
    pub fn new(type_name: &str, id: &str) -> Self {
        Self {
            type_name: Arc::from(type_name),
            id: Arc::from(id),
        }
    }
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn object(type_name: &str, id: &str) -> Self {
        Self::Object(ObjectRef::new(type_name, id))
    }

    /// Code name of the type this value belongs to.
    pub fn type_name(&self) -> &str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "string",
            Self::Timespan(_) => "timespan",
            Self::Object(o) => &o.type_name,
        }
    }

    /// Convert to boolean (truthiness).
    #[must_use]
    pub fn as_boolean(&self) -> bool {
        match self {
            Self::Boolean(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::Text(s) => !s.is_empty(),
            Self::Timespan(d) => !d.is_zero(),
            Self::Object(_) => true,
        }
    }

    /// Convert to number.
    #[must_use]
    pub fn as_number(&self) -> f64 {
        match self {
            Self::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse().unwrap_or(0.0),
            Self::Timespan(d) => d.as_secs_f64(),
            Self::Object(_) => 0.0,
        }
    }

    /// Convert to text.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Boolean(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::Text(s) => s.clone(),
            Self::Timespan(d) => format_timespan(*d),
            Self::Object(o) => o.id.to_string(),
        }
    }

    /// Check equality with another value.
    #[must_use]
    pub fn equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => (a - b).abs() < f64::EPSILON,
            (Self::Text(a), Self::Text(b)) => a.eq_ignore_ascii_case(b),
            (Self::Timespan(a), Self::Timespan(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => {
                a.type_name == b.type_name && a.id.eq_ignore_ascii_case(&b.id)
            }
            // Cross-type: try numeric comparison
            (Self::Number(_), Self::Text(_)) | (Self::Text(_), Self::Number(_)) => {
                (self.as_number() - other.as_number()).abs() < f64::EPSILON
            }
            // Players compare equal to their name
            (Self::Object(o), Self::Text(s)) | (Self::Text(s), Self::Object(o)) => {
                o.id.eq_ignore_ascii_case(s)
            }
            _ => false,
        }
    }

    /// Ordering for values that have one. Text is compared case-insensitively.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.partial_cmp(b),
            (Self::Timespan(a), Self::Timespan(b)) => Some(a.cmp(b)),
            (Self::Text(a), Self::Text(b)) => Some(a.to_lowercase().cmp(&b.to_lowercase())),
            _ if self.equals(other) => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// `self + other` for types with arithmetic.
    pub fn add(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => Some(Self::Number(a + b)),
            (Self::Timespan(a), Self::Timespan(b)) => Some(Self::Timespan(*a + *b)),
            _ => None,
        }
    }

    /// `self - other` for types with arithmetic. Timespans saturate at zero.
    pub fn subtract(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => Some(Self::Number(a - b)),
            (Self::Timespan(a), Self::Timespan(b)) => Some(Self::Timespan(a.saturating_sub(*b))),
            _ => None,
        }
    }

    /// Additive identity for the type of `self`, if it has arithmetic.
    pub fn zero_like(&self) -> Option<Self> {
        match self {
            Self::Number(_) => Some(Self::Number(0.0)),
            Self::Timespan(_) => Some(Self::Timespan(Duration::ZERO)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Duration> for Value {
    fn from(d: Duration) -> Self {
        Self::Timespan(d)
    }
}

/// Format a number for display, avoiding unnecessary decimals.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Format a duration using the largest unit that divides it evenly.
pub fn format_timespan(d: Duration) -> String {
    const UNITS: [(&str, u128); 4] = [
        ("day", 86_400_000),
        ("hour", 3_600_000),
        ("minute", 60_000),
        ("second", 1_000),
    ];
    let millis = d.as_millis();
    if millis == 0 {
        return "0 seconds".to_string();
    }
    for (name, size) in UNITS {
        if millis % size == 0 {
            let amount = millis / size;
            return format!("{amount} {name}{}", if amount == 1 { "" } else { "s" });
        }
    }
    format!("{} seconds", format_number(d.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_conversion() {
        assert!(!Value::Boolean(false).as_boolean());
        assert!(Value::Boolean(true).as_boolean());
        assert!(!Value::Number(0.0).as_boolean());
        assert!(Value::Number(1.0).as_boolean());
        assert!(!Value::Text(String::new()).as_boolean());
        assert!(Value::Text("hello".to_string()).as_boolean());
    }

    #[test]
    fn test_number_conversion() {
        assert!((Value::Boolean(true).as_number() - 1.0).abs() < f64::EPSILON);
        assert!((Value::Number(42.0).as_number() - 42.0).abs() < f64::EPSILON);
        assert!((Value::Text("3.15".to_string()).as_number() - 3.15).abs() < f64::EPSILON);
    }

    #[test]
    fn test_equality() {
        assert!(Value::Number(42.0).equals(&Value::Number(42.0)));
        assert!(Value::Text("Hello".to_string()).equals(&Value::Text("hello".to_string())));
        assert!(Value::Number(42.0).equals(&Value::Text("42".to_string())));
        assert!(Value::object("player", "Notch").equals(&Value::text("notch")));
        assert!(!Value::object("player", "Notch").equals(&Value::object("entity", "Notch")));
    }

    #[test]
    fn test_number_format() {
        assert_eq!(Value::Number(42.0).as_text(), "42");
        assert_eq!(Value::Number(-1.5).as_text(), "-1.5");
    }

    #[test]
    fn test_timespan_format() {
        assert_eq!(format_timespan(Duration::from_secs(1)), "1 second");
        assert_eq!(format_timespan(Duration::from_secs(120)), "2 minutes");
        assert_eq!(format_timespan(TICK), "0.05 seconds");
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(
            Value::Number(2.0).add(&Value::Number(3.0)),
            Some(Value::Number(5.0))
        );
        assert_eq!(
            Value::Timespan(TICK).subtract(&Value::Timespan(Duration::from_secs(1))),
            Some(Value::Timespan(Duration::ZERO))
        );
        assert_eq!(Value::text("a").add(&Value::Number(1.0)), None);
    }
}
