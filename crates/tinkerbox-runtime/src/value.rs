//! Values exchanged between the host and a computer's interpreter
//!
//! The interpreter is opaque to the runtime, so everything that crosses the
//! boundary (event parameters, yielded values, globals, peripheral call
//! results) is expressed with this small owned value type.

use std::fmt;
use std::sync::Arc;

/// A value passed into or out of an interpreter state
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absence of a value
    Nil,
    /// Boolean
    Boolean(bool),
    /// Integer number
    Integer(i64),
    /// Floating point number
    Number(f64),
    /// UTF-8 string. Reader pieces become chunk source as its bytes.
    Str(String),
    /// Ordered key/value table
    Table(Vec<(Value, Value)>),
    /// A loaded chunk, as produced by a loader
    Function(Arc<Chunk>),
}

/// A compiled (or at least fully read) chunk of source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk name as shown in error messages
    pub name: String,
    /// Raw source bytes, exactly as supplied
    pub source: Vec<u8>,
}

impl Value {
    /// Create a string value
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Is this value nil?
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Borrow the string contents, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get the integer contents, accepting integral numbers as well
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    /// Get the boolean contents
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Interpreter truthiness: everything except nil and false
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Name of the value's type, as scripts would see it
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) | Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Integer(i as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Number(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Table(entries) => write!(f, "table({})", entries.len()),
            Value::Function(chunk) => write!(f, "function: {}", chunk.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Integer(0).is_truthy());
        assert!(Value::str("").is_truthy());
    }

    #[test]
    fn test_as_integer_accepts_integral_numbers() {
        assert_eq!(Value::Number(3.0).as_integer(), Some(3));
        assert_eq!(Value::Number(3.5).as_integer(), None);
        assert_eq!(Value::str("3").as_integer(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::str("key").to_string(), "key");
        assert_eq!(Value::Integer(7).to_string(), "7");
        assert_eq!(Value::Nil.to_string(), "nil");
    }
}
