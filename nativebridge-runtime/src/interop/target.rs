//! Call target resolution
//!
//! A target is a raw address, a bare symbol searched across the default
//! libraries, or `library!symbol` / `library\symbol`.

use core::ffi::c_void;

use once_cell::sync::OnceCell;

use super::library::{Library, LoadError, SymbolSource};
use crate::logging;

/// Default libraries searched for bare symbols, in order
#[cfg(windows)]
pub const DEFAULT_LIBRARIES: &[&str] = &["user32", "kernel32", "comctl32", "gdi32"];

/// Default libraries searched for bare symbols, in order; the running
/// program image is always searched first
#[cfg(all(unix, any(target_os = "macos", target_os = "ios")))]
pub const DEFAULT_LIBRARIES: &[&str] = &["libc.dylib", "libm.dylib"];

#[cfg(all(unix, not(any(target_os = "macos", target_os = "ios"))))]
pub const DEFAULT_LIBRARIES: &[&str] = &["libc.so.6", "libm.so.6"];

#[cfg(not(any(unix, windows)))]
pub const DEFAULT_LIBRARIES: &[&str] = &[];

/// Suffix appended on the single retry after a failed lookup
pub const DEFAULT_SYMBOL_SUFFIX: char = 'W';

/// A resolved address plus the library loaded to provide it, if any
///
/// Dropping this unloads an on-demand library; call `keep_loaded` to leave
/// it mapped for the rest of the process.
#[derive(Debug)]
pub struct ResolvedTarget {
    pub address: *const c_void,
    pub loaded: Option<Library>,
}

impl ResolvedTarget {
    #[inline]
    pub fn address(address: *const c_void) -> Self {
        Self {
            address,
            loaded: None,
        }
    }

    /// Leak the on-demand library so the address stays valid
    pub fn keep_loaded(mut self) -> *const c_void {
        if let Some(library) = self.loaded.take() {
            core::mem::forget(library);
        }
        self.address
    }
}

/// Resolves target text to callable addresses
pub struct TargetResolver {
    default_names: Vec<String>,
    defaults: OnceCell<Vec<Library>>,
    suffix: Option<char>,
}

impl TargetResolver {
    /// Resolver over the platform default library list
    pub fn new() -> Self {
        Self::with_libraries(
            DEFAULT_LIBRARIES.iter().map(|s| s.to_string()).collect(),
            Some(DEFAULT_SYMBOL_SUFFIX),
        )
    }

    pub fn with_libraries(default_names: Vec<String>, suffix: Option<char>) -> Self {
        Self {
            default_names,
            defaults: OnceCell::new(),
            suffix,
        }
    }

    #[inline]
    pub fn suffix(&self) -> Option<char> {
        self.suffix
    }

    /// Default libraries, opened on first use; ones that fail to open are skipped
    fn defaults(&self) -> &[Library] {
        self.defaults.get_or_init(|| {
            let mut libraries = Vec::with_capacity(self.default_names.len() + 1);
            #[cfg(unix)]
            if let Ok(process) = Library::process() {
                libraries.push(process);
            }
            for name in &self.default_names {
                match Library::resident(name).map(Ok).unwrap_or_else(|| Library::load(name)) {
                    Ok(library) => libraries.push(library),
                    Err(err) => logging::debug!(
                        target: "interop::target",
                        library = %name,
                        error = %err,
                        "default library unavailable"
                    ),
                }
            }
            libraries
        })
    }

    /// Resolve target text
    pub fn resolve(&self, text: &str) -> Result<ResolvedTarget, TargetError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TargetError::InvalidSpec(text.to_owned()));
        }
        if let Some(address) = parse_address(text) {
            return Ok(ResolvedTarget::address(address as *const c_void));
        }

        match split_qualified(text) {
            Some((library, symbol)) => self.resolve_qualified(library, symbol),
            None => {
                let sources: Vec<&dyn SymbolSource> =
                    self.defaults().iter().map(|l| l as &dyn SymbolSource).collect();
                lookup_with_suffix(&sources, text, self.suffix)
                    .map(ResolvedTarget::address)
                    .ok_or_else(|| TargetError::SymbolNotFound {
                        symbol: text.to_owned(),
                        library: None,
                    })
            }
        }
    }

    fn resolve_qualified(&self, library: &str, symbol: &str) -> Result<ResolvedTarget, TargetError> {
        if library.is_empty() || symbol.is_empty() {
            return Err(TargetError::InvalidSpec(format!("{}!{}", library, symbol)));
        }

        let (handle, on_demand) = match Library::resident(library) {
            Some(resident) => (resident, false),
            None => {
                let loaded = Library::load(library).map_err(|source| TargetError::LibraryNotFound {
                    library: library.to_owned(),
                    source,
                })?;
                (loaded, true)
            }
        };

        let address = lookup_with_suffix(&[&handle as &dyn SymbolSource], symbol, self.suffix)
            .ok_or_else(|| TargetError::SymbolNotFound {
                symbol: symbol.to_owned(),
                library: Some(library.to_owned()),
            })?;

        // A resident handle only borrowed a reference; dropping it here is balanced.
        Ok(ResolvedTarget {
            address,
            loaded: on_demand.then_some(handle),
        })
    }
}

impl Default for TargetResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a decimal or `0x` hex address; zero is not an address
pub fn parse_address(text: &str) -> Option<usize> {
    let text = text.trim();
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok()?,
        None if text.bytes().all(|b| b.is_ascii_digit()) => text.parse().ok()?,
        None => return None,
    };
    (value != 0).then_some(value)
}

/// Split `library!symbol` or `library\symbol` at the last separator
pub fn split_qualified(text: &str) -> Option<(&str, &str)> {
    let at = text.rfind(['!', '\\'])?;
    Some((&text[..at], &text[at + 1..]))
}

/// Search `sources` in order for `symbol`, then once more with `suffix` appended
pub fn lookup_with_suffix(
    sources: &[&dyn SymbolSource],
    symbol: &str,
    suffix: Option<char>,
) -> Option<*const c_void> {
    let find = |name: &str| sources.iter().find_map(|source| source.lookup(name));

    find(symbol).or_else(|| {
        let suffix = suffix?;
        let mut retry = String::with_capacity(symbol.len() + suffix.len_utf8());
        retry.push_str(symbol);
        retry.push(suffix);
        find(&retry)
    })
}

/// Target resolution errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    InvalidSpec(String),
    LibraryNotFound { library: String, source: LoadError },
    SymbolNotFound { symbol: String, library: Option<String> },
}

impl core::fmt::Display for TargetError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidSpec(text) => write!(f, "Invalid call target '{}'", text),
            Self::LibraryNotFound { library, source } => {
                write!(f, "Cannot load library '{}': {}", library, source)
            }
            Self::SymbolNotFound {
                symbol,
                library: Some(library),
            } => write!(f, "Symbol '{}' not found in '{}'", symbol, library),
            Self::SymbolNotFound {
                symbol,
                library: None,
            } => write!(f, "Symbol '{}' not found in default libraries", symbol),
        }
    }
}

impl std::error::Error for TargetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::LibraryNotFound { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeSource {
        name: &'static str,
        symbols: HashMap<&'static str, usize>,
    }

    impl FakeSource {
        fn new(name: &'static str, symbols: &[(&'static str, usize)]) -> Self {
            Self {
                name,
                symbols: symbols.iter().copied().collect(),
            }
        }
    }

    impl SymbolSource for FakeSource {
        fn source_name(&self) -> &str {
            self.name
        }

        fn lookup(&self, symbol: &str) -> Option<*const c_void> {
            self.symbols.get(symbol).map(|&a| a as *const c_void)
        }
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("4096"), Some(4096));
        assert_eq!(parse_address("0x1000"), Some(0x1000));
        assert_eq!(parse_address(" 0XfF "), Some(0xff));
        assert_eq!(parse_address("0"), None);
        assert_eq!(parse_address("MessageBox"), None);
        assert_eq!(parse_address("0xZZ"), None);
    }

    #[test]
    fn test_split_last_separator_wins() {
        assert_eq!(split_qualified("user32!MessageBox"), Some(("user32", "MessageBox")));
        assert_eq!(
            split_qualified("C:\\dir\\my.dll\\Func"),
            Some(("C:\\dir\\my.dll", "Func"))
        );
        assert_eq!(split_qualified("abs"), None);
    }

    #[test]
    fn test_search_order() {
        let first = FakeSource::new("first", &[("shared", 0x10)]);
        let second = FakeSource::new("second", &[("shared", 0x20), ("only", 0x30)]);
        let sources: Vec<&dyn SymbolSource> = vec![&first, &second];

        assert_eq!(lookup_with_suffix(&sources, "shared", None), Some(0x10 as *const c_void));
        assert_eq!(lookup_with_suffix(&sources, "only", None), Some(0x30 as *const c_void));
    }

    #[test]
    fn test_suffix_retry() {
        let lib = FakeSource::new("user", &[("MessageBoxW", 0x40)]);
        let sources: Vec<&dyn SymbolSource> = vec![&lib];

        assert_eq!(
            lookup_with_suffix(&sources, "MessageBox", Some('W')),
            Some(0x40 as *const c_void)
        );
        assert_eq!(lookup_with_suffix(&sources, "MessageBox", None), None);
        // Only one retry: no "MessageBoxWW"
        assert_eq!(lookup_with_suffix(&sources, "MessageBoxW", Some('W')), Some(0x40 as *const c_void));
        assert_eq!(lookup_with_suffix(&sources, "Other", Some('W')), None);
    }

    #[test]
    fn test_bare_name_preferred_over_suffix() {
        let a = FakeSource::new("a", &[("FuncW", 0x1)]);
        let b = FakeSource::new("b", &[("Func", 0x2)]);
        let sources: Vec<&dyn SymbolSource> = vec![&a, &b];
        assert_eq!(lookup_with_suffix(&sources, "Func", Some('W')), Some(0x2 as *const c_void));
    }

    #[test]
    fn test_numeric_target() {
        let resolver = TargetResolver::with_libraries(Vec::new(), None);
        let target = resolver.resolve("0x1234").unwrap();
        assert_eq!(target.address as usize, 0x1234);
        assert!(target.loaded.is_none());
    }

    #[test]
    fn test_invalid_specs() {
        let resolver = TargetResolver::with_libraries(Vec::new(), None);
        assert!(matches!(resolver.resolve(""), Err(TargetError::InvalidSpec(_))));
        assert!(matches!(resolver.resolve("lib!"), Err(TargetError::InvalidSpec(_))));
        assert!(matches!(resolver.resolve("!sym"), Err(TargetError::InvalidSpec(_))));
    }

    #[test]
    fn test_missing_library() {
        let resolver = TargetResolver::with_libraries(Vec::new(), None);
        let err = resolver.resolve("no_such_library_xyz!f").unwrap_err();
        assert!(matches!(err, TargetError::LibraryNotFound { .. }));
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_default_libraries_find_libc() {
        let resolver = TargetResolver::new();
        let target = resolver.resolve("strlen").unwrap();
        assert!(!target.address.is_null());
        assert!(target.loaded.is_none());
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_qualified_resident_library() {
        let resolver = TargetResolver::new();
        let target = resolver.resolve("libc.so.6!strlen").unwrap();
        assert!(!target.address.is_null());
        // libc is always mapped, so nothing was loaded on demand
        assert!(target.loaded.is_none());
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_unknown_symbol() {
        let resolver = TargetResolver::new();
        let err = resolver.resolve("definitely_not_a_symbol_42").unwrap_err();
        assert!(matches!(err, TargetError::SymbolNotFound { library: None, .. }));
    }
}
