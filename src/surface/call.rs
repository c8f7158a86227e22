//! Outbound calls
//!
//! Everything that can be rejected (types, values, the target) is checked
//! before the native transition, so a failed call has no partial effects.

use core::ffi::{c_char, c_void};

use nativebridge_runtime::interop::{
    from_native, last_native_error, read_c_string, record_marshaling_error, resolve_return,
    resolve_with_fallback, to_native, CallError, ResolvedTarget, StringArg,
};
use nativebridge_runtime::{invoke, ArgKind, ArgumentDescriptor, CallConvention, CallOutcome, CallSpec, ScriptValue};
use smallvec::SmallVec;
use tracing::debug;

use super::{Bridge, CallResult, CallStatus, Param};

/// One argument ready for the native call
struct Staged {
    descriptor: ArgumentDescriptor,
    /// Backing storage of a `Str` argument
    buffer: Option<StringArg>,
}

impl Bridge {
    /// Call a native function described by a script's parameter list
    ///
    /// `params` holds type/value pairs, optionally followed by a return type
    /// token (which may start with `CDecl`). The target is an address or a
    /// `symbol` / `library!symbol` name.
    ///
    /// # Safety
    /// The declared types must match what the target reads and writes.
    /// Hardware faults inside the callee are caught and reported, but a
    /// callee that corrupts memory through a mismatched signature is not.
    pub unsafe fn call(&self, target: impl Into<ScriptValue>, params: &mut [Param<'_>]) -> CallResult {
        let target = target.into();
        let split = params.len() - params.len() % 2;
        let (args, ret) = params.split_at_mut(split);

        let (convention, return_descriptor) = match ret.first() {
            Some(param) => {
                let (primary, alternate) = param.type_token();
                match resolve_return(&primary, alternate) {
                    Ok(resolved) => resolved,
                    Err(err) => {
                        debug!(target: "surface", error = %err, "invalid return type");
                        return CallResult::failed(CallStatus::InvalidType, ScriptValue::Integer(0));
                    }
                }
            }
            None => (CallConvention::default(), ArgumentDescriptor::new(ArgKind::Int32)),
        };
        let zero = zero_value(&return_descriptor);

        let mut staged: SmallVec<[Staged; 8]> = SmallVec::with_capacity(args.len() / 2);
        for (index, pair) in args.chunks_exact(2).enumerate() {
            match stage(&pair[0], &pair[1], index) {
                Ok(argument) => staged.push(argument),
                Err(status) => return CallResult::failed(status, zero),
            }
        }

        let resolved = match self.resolve_target(&target) {
            Ok(resolved) => resolved,
            Err(status) => return CallResult::failed(status, zero),
        };

        let mut spec = CallSpec::new(resolved.address)
            .convention(convention)
            .returns(return_descriptor);
        spec.arguments = staged.iter().map(|s| s.descriptor).collect();

        let outcome = invoke(&mut spec);
        let last_error = last_native_error();

        let (status, value) = match outcome {
            Ok(CallOutcome::Value(value)) => (CallStatus::Success, Some(value)),
            Ok(CallOutcome::StackImbalance { delta, value }) => {
                (CallStatus::StackImbalance(delta), Some(value))
            }
            Ok(CallOutcome::NativeFault(code)) => (CallStatus::NativeFault(code), None),
            Err(CallError::NullTarget) => (CallStatus::InvalidTarget, None),
            Err(CallError::UnsupportedArchitecture) => (CallStatus::Unsupported, None),
        };

        let value = match value {
            Some(native) => {
                write_back(args, &staged, &spec.arguments);
                from_native(&native)
            }
            None => zero,
        };

        if self.unload_on_demand {
            drop(resolved);
        } else {
            resolved.keep_loaded();
        }

        if !status.is_success() {
            debug!(target: "surface", %status, last_error, "native call reported a problem");
        }
        CallResult {
            value,
            status,
            last_error,
        }
    }

    fn resolve_target(&self, target: &ScriptValue) -> Result<ResolvedTarget, CallStatus> {
        match target {
            ScriptValue::Integer(0) => Err(CallStatus::InvalidTarget),
            ScriptValue::Integer(address) => {
                Ok(ResolvedTarget::address(*address as usize as *const c_void))
            }
            ScriptValue::Text(text) => self.resolver.resolve(text).map_err(|err| {
                debug!(target: "surface", error = %err, "cannot resolve call target");
                CallStatus::from(&err)
            }),
            ScriptValue::Float(_) | ScriptValue::Empty => Err(CallStatus::InvalidTarget),
        }
    }
}

/// Resolve one type/value pair; `index` counts from zero
fn stage(type_param: &Param<'_>, value_param: &Param<'_>, index: usize) -> Result<Staged, CallStatus> {
    let (primary, alternate) = type_param.type_token();
    let mut descriptor = resolve_with_fallback(&primary, alternate).map_err(|err| {
        debug!(target: "surface", argument = index + 1, error = %err, "invalid argument type");
        CallStatus::InvalidType
    })?;

    let value = value_param.value();
    let literal_address = !value_param.is_var() && matches!(value, ScriptValue::Integer(_));
    if descriptor.kind == ArgKind::NativeString && !literal_address {
        let capacity = match value_param {
            Param::Var(var) => var.capacity(),
            Param::Value(_) => 0,
        };
        let mut buffer = StringArg::new(&value.to_string(), capacity);
        descriptor.set_ptr(buffer.as_mut_ptr());
        return Ok(Staged {
            descriptor,
            buffer: Some(buffer),
        });
    }

    if let Err(err) = to_native(&mut descriptor, value) {
        if !descriptor.by_address {
            record_marshaling_error();
            debug!(target: "surface", argument = index + 1, error = %err, "cannot marshal argument");
            return Err(CallStatus::NotNumeric { argument: index + 1 });
        }
        // Output-only argument; its starting value does not matter
        descriptor.set_int(0);
    }
    Ok(Staged {
        descriptor,
        buffer: None,
    })
}

/// Copy by-address results and string buffers back into variables
///
/// # Safety
/// By-address `Str` payloads must still point to NUL-terminated strings.
unsafe fn write_back(args: &mut [Param<'_>], staged: &[Staged], after: &[ArgumentDescriptor]) {
    for ((pair, staged), descriptor) in args.chunks_exact_mut(2).zip(staged).zip(after) {
        let Param::Var(var) = &mut pair[1] else {
            continue;
        };
        match (&staged.buffer, descriptor.by_address) {
            (Some(buffer), false) => var.set(buffer.read()),
            (Some(_), true) => var.set(read_c_string(descriptor.ptr_value() as *const c_char)),
            (None, true) => var.set(from_native(&descriptor.native_value())),
            (None, false) => {}
        }
    }
}

/// Best-effort value when no call result exists
fn zero_value(descriptor: &ArgumentDescriptor) -> ScriptValue {
    match descriptor.kind {
        ArgKind::NativeString => ScriptValue::Text(String::new()),
        ArgKind::Float32 | ArgKind::Float64 => ScriptValue::Float(0.0),
        _ => ScriptValue::Integer(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nativebridge_runtime::Variable;

    #[test]
    fn test_stage_numeric_text() {
        let staged = stage(&Param::from("Short"), &Param::from("0x7FFF"), 0).unwrap();
        assert_eq!(staged.descriptor.kind, ArgKind::Int16);
        assert_eq!(staged.descriptor.int_value(), 0x7FFF);
        assert!(staged.buffer.is_none());
    }

    #[test]
    fn test_stage_not_numeric_reports_position() {
        let err = stage(&Param::from("Int"), &Param::from("twelve"), 2).err();
        assert_eq!(err.map(|s| s.to_string()), Some("-5:3".to_string()));
    }

    #[test]
    fn test_stage_by_address_output_ignores_text() {
        let staged = stage(&Param::from("IntP"), &Param::from("junk"), 0).unwrap();
        assert!(staged.descriptor.by_address);
        assert_eq!(staged.descriptor.int_value(), 0);
    }

    #[test]
    fn test_stage_string_buffer_capacity() {
        let mut var = Variable::new("buf", "hi").with_capacity(64);
        let staged = stage(&Param::from("Str"), &Param::Var(&mut var), 0).unwrap();
        let buffer = staged.buffer.as_ref().unwrap();
        assert_eq!(buffer.capacity(), 64);
        assert_eq!(buffer.read(), "hi");
    }

    #[test]
    fn test_stage_literal_integer_string_is_address() {
        let staged = stage(&Param::from("Str"), &Param::from(0x1000i64), 0).unwrap();
        assert!(staged.buffer.is_none());
        assert_eq!(staged.descriptor.ptr_value() as usize, 0x1000);
    }

    #[test]
    fn test_variable_type_token_falls_back_to_name() {
        let mut var = Variable::new("Double", "");
        let staged = stage(&Param::Var(&mut var), &Param::from(1.5), 0).unwrap();
        assert_eq!(staged.descriptor.kind, ArgKind::Float64);
    }

    #[test]
    fn test_zero_value_per_kind() {
        assert_eq!(zero_value(&ArgumentDescriptor::new(ArgKind::NativeString)), ScriptValue::text(""));
        assert_eq!(zero_value(&ArgumentDescriptor::new(ArgKind::Float32)), ScriptValue::Float(0.0));
        assert_eq!(zero_value(&ArgumentDescriptor::new(ArgKind::Int64)), ScriptValue::Integer(0));
    }
}
