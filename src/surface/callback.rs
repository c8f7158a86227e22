//! Trampoline registration
//!
//! Trampolines are owned by the bridge and keyed by their native address,
//! which is the only handle a script ever sees.

use nativebridge_runtime::{CallConvention, ExecutionMode, Trampoline};
use tracing::{debug, info};

use super::Bridge;
use crate::errors::BridgeError;

/// Mode and convention selected by an options string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrampolineOptions {
    pub mode: ExecutionMode,
    pub convention: CallConvention,
}

impl TrampolineOptions {
    /// Apply the words of `options` on top of `defaults`
    ///
    /// `Fast`/`F` and `CDecl`/`C` are recognised case-insensitively; other
    /// words are ignored.
    pub fn parse(options: &str, defaults: TrampolineOptions) -> Self {
        options
            .split_whitespace()
            .fold(defaults, |mut acc, word| {
                if word.eq_ignore_ascii_case("fast") || word.eq_ignore_ascii_case("f") {
                    acc.mode = ExecutionMode::Fast;
                } else if word.eq_ignore_ascii_case("cdecl") || word.eq_ignore_ascii_case("c") {
                    acc.convention = CallConvention::CDecl;
                }
                acc
            })
    }
}

impl Bridge {
    /// Create a native-callable address bound to a script function
    ///
    /// `param_count` defaults to the function's formal parameter count and
    /// `tag` to the returned address.
    pub fn register_trampoline(
        &self,
        function_name: &str,
        options: &str,
        param_count: Option<usize>,
        tag: Option<i64>,
    ) -> Result<usize, BridgeError> {
        let function = self
            .engine
            .function(function_name)
            .ok_or_else(|| BridgeError::UnknownFunction(function_name.to_owned()))?;
        let options = TrampolineOptions::parse(options, self.callback_defaults);

        let trampoline = Trampoline::create(
            &self.engine,
            function,
            param_count,
            options.convention,
            options.mode,
            tag,
        )?;
        let address = trampoline.address();
        info!(
            target: "surface",
            function = function_name,
            address = format_args!("{:#x}", address),
            mode = options.mode.name(),
            convention = options.convention.name(),
            "trampoline registered"
        );
        self.trampolines.insert(address, trampoline);
        Ok(address)
    }

    /// Release the trampoline at `address`
    ///
    /// Native code must no longer call the address.
    pub fn free_trampoline(&self, address: usize) -> Result<(), BridgeError> {
        let (_, trampoline) = self
            .trampolines
            .remove(&address)
            .ok_or(BridgeError::UnknownTrampoline(address))?;
        debug!(target: "surface", address = format_args!("{:#x}", address), "freeing trampoline");
        trampoline.release();
        Ok(())
    }

    /// Number of trampolines currently registered
    #[inline]
    pub fn trampoline_count(&self) -> usize {
        self.trampolines.len()
    }
}
