//! Script values and variables

use core::fmt;

/// A dynamically typed script value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ScriptValue {
    #[default]
    Empty,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ScriptValue {
    #[inline]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Empty value or empty text
    #[inline]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) => text.is_empty(),
            _ => false,
        }
    }

    /// Integer view; floats and float-looking text truncate toward zero
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Empty => None,
            Self::Integer(n) => Some(*n),
            Self::Float(f) => Some(f.trunc() as i64),
            Self::Text(text) => match parse_number(text)? {
                Number::Integer(n) => Some(n),
                Number::Float(f) => Some(f.trunc() as i64),
            },
        }
    }

    /// Float view; integers convert
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Empty => None,
            Self::Integer(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            Self::Text(text) => match parse_number(text)? {
                Number::Integer(n) => Some(n as f64),
                Number::Float(f) => Some(f),
            },
        }
    }

    /// Check if the value is a number or numeric text
    #[inline]
    pub fn is_numeric(&self) -> bool {
        match self {
            Self::Integer(_) | Self::Float(_) => true,
            Self::Text(text) => parse_number(text).is_some(),
            Self::Empty => false,
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Integer(n) => write!(f, "{}", n),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<i64> for ScriptValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for ScriptValue {
    fn from(n: i32) -> Self {
        Self::Integer(n as i64)
    }
}

impl From<f64> for ScriptValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for ScriptValue {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for ScriptValue {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Integer(i64),
    Float(f64),
}

/// Decimal, `0x` hex (optionally signed) or float; surrounding whitespace ignored
fn parse_number(text: &str) -> Option<Number> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let (negative, digits) = match text.as_bytes()[0] {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        if !hex.starts_with(|c: char| c.is_ascii_hexdigit()) {
            return None;
        }
        let magnitude = u64::from_str_radix(hex, 16).ok()? as i64;
        return Some(Number::Integer(if negative { magnitude.wrapping_neg() } else { magnitude }));
    }
    if let Ok(n) = text.parse::<i64>() {
        return Some(Number::Integer(n));
    }
    // Reject words Rust's float parser accepts ("inf", "NaN")
    if !digits.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
        return None;
    }
    text.parse::<f64>().ok().map(Number::Float)
}

/// A named script variable
///
/// `capacity` is the number of bytes reserved for native code writing a
/// string through this variable.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Variable {
    name: String,
    value: ScriptValue,
    capacity: usize,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<ScriptValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            capacity: 0,
        }
    }

    /// Reserve room for at least `bytes` bytes of native output
    pub fn with_capacity(mut self, bytes: usize) -> Self {
        self.capacity = bytes;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> &ScriptValue {
        &self.value
    }

    #[inline]
    pub fn set(&mut self, value: impl Into<ScriptValue>) {
        self.value = value.into();
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
