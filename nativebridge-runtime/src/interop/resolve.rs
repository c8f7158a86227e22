//! Type token resolution
//!
//! Turns script-supplied type names such as `"Int"`, `"UInt*"`, `"Str"` or
//! `"DoubleP"` into argument descriptors. Matching is case-insensitive.

use super::abi::CallConvention;
use super::types::{ArgKind, ArgumentDescriptor};

/// Result of scanning one token, before fallback is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    Known(ArgKind),
    Blank,
    Unknown,
}

#[derive(Debug, Clone, Copy)]
struct Scan {
    keyword: Keyword,
    is_unsigned: bool,
    by_address: bool,
}

impl Scan {
    fn descriptor(self, kind: ArgKind) -> ArgumentDescriptor {
        ArgumentDescriptor::new(kind)
            .unsigned(self.is_unsigned)
            .by_address(self.by_address)
    }
}

fn scan(token: &str) -> Scan {
    let mut text = token.trim();
    let mut is_unsigned = false;
    let mut by_address = false;

    if let Some(rest) = text.strip_prefix(['U', 'u']) {
        is_unsigned = true;
        text = rest;
    }
    if let Some(rest) = text.strip_suffix(['*', 'p', 'P']) {
        by_address = true;
        text = rest.trim_end();
    }

    let keyword = match text.to_ascii_lowercase().as_str() {
        "" => Keyword::Blank,
        "int" => Keyword::Known(ArgKind::Int32),
        "int64" => Keyword::Known(ArgKind::Int64),
        "short" => Keyword::Known(ArgKind::Int16),
        "char" => Keyword::Known(ArgKind::Int8),
        "float" => Keyword::Known(ArgKind::Float32),
        "double" => Keyword::Known(ArgKind::Float64),
        "str" => Keyword::Known(ArgKind::NativeString),
        "ptr" => Keyword::Known(ArgKind::Ptr),
        _ => Keyword::Unknown,
    };

    Scan {
        keyword,
        is_unsigned,
        by_address,
    }
}

/// Resolve a single type token
///
/// A token whose keyword is empty after stripping the modifiers resolves to
/// `Int32`.
pub fn resolve(token: &str) -> Result<ArgumentDescriptor, ResolveError> {
    let scanned = scan(token);
    match scanned.keyword {
        Keyword::Known(kind) => Ok(scanned.descriptor(kind)),
        Keyword::Blank => Ok(scanned.descriptor(ArgKind::Int32)),
        Keyword::Unknown => Err(ResolveError::Invalid(token.to_owned())),
    }
}

/// Resolve a token with a second source to fall back on
///
/// Used when the type token comes from a script variable: `primary` is the
/// variable's contents and `alternate` its name. A blank or unrecognised
/// primary defers to the alternate; a blank alternate yields `Default` with
/// both modifier flags cleared.
pub fn resolve_with_fallback(
    primary: &str,
    alternate: Option<&str>,
) -> Result<ArgumentDescriptor, ResolveError> {
    let first = scan(primary);
    match (first.keyword, alternate) {
        (Keyword::Known(kind), _) => Ok(first.descriptor(kind)),
        (Keyword::Blank, None) => Ok(first.descriptor(ArgKind::Int32)),
        (Keyword::Unknown, None) => Err(ResolveError::Invalid(primary.to_owned())),
        (_, Some(alternate)) => {
            let second = scan(alternate);
            match second.keyword {
                Keyword::Known(kind) => Ok(second.descriptor(kind)),
                Keyword::Blank => Ok(ArgumentDescriptor::new(ArgKind::Default)),
                Keyword::Unknown => Err(ResolveError::Invalid(alternate.to_owned())),
            }
        }
    }
}

/// Resolve a return-type token, honouring a leading `CDecl` keyword
///
/// `"CDecl"` alone selects the caller-cleans convention with an `Int32`
/// return. The alternate source is only consulted when no convention keyword
/// was present.
pub fn resolve_return(
    primary: &str,
    alternate: Option<&str>,
) -> Result<(CallConvention, ArgumentDescriptor), ResolveError> {
    match strip_cdecl(primary) {
        Some(rest) => Ok((CallConvention::CDecl, resolve(rest)?)),
        None => Ok((
            CallConvention::StdCall,
            resolve_with_fallback(primary, alternate)?,
        )),
    }
}

fn strip_cdecl(token: &str) -> Option<&str> {
    let text = token.trim_start();
    let head = text.get(..5)?;
    if !head.eq_ignore_ascii_case("cdecl") {
        return None;
    }
    let rest = &text[5..];
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest)
    } else {
        None
    }
}

/// Type token resolution errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    Invalid(String),
}

impl core::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Invalid(token) => write!(f, "Invalid type token '{}'", token),
        }
    }
}

impl std::error::Error for ResolveError {}
