//! Native call path tests
//!
//! Callees are `extern "C"` functions in this test binary, called with the
//! CDecl convention so the same tests hold on every supported target.

use super::*;
use core::ffi::{c_char, c_void};
use crate::script::ScriptValue;

// Test helpers
extern "C" fn add_i32(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

extern "C" fn mul_f64(a: f64, b: f64) -> f64 {
    a * b
}

extern "C" fn half_f32(a: f32) -> f32 {
    a / 2.0
}

extern "C" fn echo_i64(a: i64) -> i64 {
    a
}

extern "C" fn echo_u8_as_i32(a: i32) -> i32 {
    a
}

extern "C" fn mixed(a: i32, b: f64, c: i64, d: f32) -> f64 {
    a as f64 + b + c as f64 + d as f64
}

extern "C" fn sum_ten(
    a: i64, b: i64, c: i64, d: i64, e: i64,
    f: i64, g: i64, h: i64, i: i64, j: i64,
) -> i64 {
    a + 2 * b + 3 * c + 4 * d + 5 * e + 6 * f + 7 * g + 8 * h + 9 * i + 10 * j
}

extern "C" fn increment(p: *mut i32) -> i32 {
    unsafe {
        *p += 1;
        *p
    }
}

extern "C" fn store_double(p: *mut f64) {
    unsafe { *p = 6.25 }
}

extern "C" fn store_short(p: *mut i16) {
    unsafe { *p = -2 }
}

extern "C" fn strlen_c(s: *const c_char) -> usize {
    unsafe { std::ffi::CStr::from_ptr(s).to_bytes().len() }
}

extern "C" fn fill_buffer(s: *mut u8) {
    let text = b"written";
    unsafe {
        core::ptr::copy_nonoverlapping(text.as_ptr(), s, text.len());
        *s.add(text.len()) = 0;
    }
}

extern "C" fn read_unmapped(p: *const i32) -> i32 {
    unsafe { core::ptr::read_volatile(p) }
}

extern "C" fn no_args() -> i32 {
    42
}

extern "C" fn set_errno_value() -> i32 {
    #[cfg(unix)]
    {
        // SAFETY: writes a nonexistent fd; fails with EBADF.
        unsafe { libc::write(-1, core::ptr::null(), 0) };
    }
    -1
}

fn addr(f: usize) -> *const c_void {
    f as *const c_void
}

fn spec(f: usize) -> CallSpec {
    CallSpec::new(addr(f)).convention(CallConvention::CDecl)
}

fn value_of(outcome: Result<CallOutcome, CallError>) -> NativeValue {
    match outcome.expect("call failed") {
        CallOutcome::Value(v) => v,
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn test_arg_kind_sizes() {
    assert_eq!(ArgKind::Int8.size(), 1);
    assert_eq!(ArgKind::Int16.size(), 2);
    assert_eq!(ArgKind::Int32.size(), 4);
    assert_eq!(ArgKind::Default.size(), 4);
    assert_eq!(ArgKind::Int64.size(), 8);
    assert_eq!(ArgKind::Float32.size(), 4);
    assert_eq!(ArgKind::Float64.size(), 8);
    assert_eq!(ArgKind::Ptr.size(), core::mem::size_of::<usize>());
}

#[test]
fn test_payload_native_representation() {
    let d = ArgumentDescriptor::new(ArgKind::Int8).with_int(-1);
    assert_eq!(d.payload.bits(), 0xFF);
    assert_eq!(d.int_value(), -1);
    assert_eq!(d.unsigned(true).int_value(), 255);

    let d = ArgumentDescriptor::new(ArgKind::Int16).unsigned(true).with_int(-1);
    assert_eq!(d.int_value(), 0xFFFF);

    let d = ArgumentDescriptor::new(ArgKind::Float32).with_float(1.5);
    assert_eq!(d.payload.bits(), 1.5f32.to_bits() as u64);
    assert_eq!(d.float_value(), 1.5);

    let d = ArgumentDescriptor::new(ArgKind::Int32).with_float(-3.9);
    assert_eq!(d.int_value(), -3);
}

#[test]
fn test_unsigned_int64_keeps_bits() {
    let d = ArgumentDescriptor::new(ArgKind::Int64).unsigned(true).with_int(-1);
    assert_eq!(d.int_value() as u64, u64::MAX);
}

#[test]
fn test_slot_classification() {
    let mut d = ArgumentDescriptor::new(ArgKind::Int32).with_int(-5);
    assert_eq!(NativeSlot::from_descriptor(&mut d), NativeSlot::Word(-5i64 as u64));

    let mut d = ArgumentDescriptor::new(ArgKind::Int32).unsigned(true).with_int(-5);
    assert_eq!(NativeSlot::from_descriptor(&mut d), NativeSlot::Word(0xFFFF_FFFB));

    let mut d = ArgumentDescriptor::new(ArgKind::Int64).with_int(7);
    assert_eq!(NativeSlot::from_descriptor(&mut d), NativeSlot::Wide(7));

    let mut d = ArgumentDescriptor::new(ArgKind::Float64).with_float(0.5);
    assert_eq!(NativeSlot::from_descriptor(&mut d), NativeSlot::Float64(0.5f64.to_bits()));

    let mut d = ArgumentDescriptor::new(ArgKind::Float32).by_address(true);
    let expected = d.payload_address() as usize as u64;
    assert_eq!(NativeSlot::from_descriptor(&mut d), NativeSlot::Word(expected));
}

#[test]
fn test_marshal_script_values() {
    let mut d = ArgumentDescriptor::new(ArgKind::Int32);
    to_native(&mut d, &ScriptValue::text("0x10")).unwrap();
    assert_eq!(d.int_value(), 16);

    to_native(&mut d, &ScriptValue::Empty).unwrap();
    assert_eq!(d.int_value(), 0);

    assert_eq!(
        to_native(&mut d, &ScriptValue::text("abc")),
        Err(MarshalError::NotNumeric("abc".to_string()))
    );

    let mut d = ArgumentDescriptor::new(ArgKind::Float64);
    to_native(&mut d, &ScriptValue::from(3)).unwrap();
    assert_eq!(d.float_value(), 3.0);
}

#[test]
fn test_string_arg_buffer() {
    let mut s = StringArg::new("abc", 16);
    assert_eq!(s.capacity(), 16);
    assert_eq!(s.read(), "abc");
    fill_buffer(s.as_mut_ptr() as *mut u8);
    assert_eq!(s.read(), "written");
}

#[test]
fn test_value_to_result() {
    assert_eq!(value_to_result(Some(&ScriptValue::Float(-1.5))), Some(u32::MAX));
    assert_eq!(value_to_result(Some(&ScriptValue::text(" 12 "))), Some(12));
    assert_eq!(value_to_result(Some(&ScriptValue::text("x"))), None);
    assert_eq!(value_to_result(None), None);
}

#[test]
fn test_null_target() {
    let mut s = CallSpec::new(core::ptr::null());
    assert_eq!(unsafe { invoke(&mut s) }.unwrap_err(), CallError::NullTarget);
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64"))]
mod native {
    use super::*;

    #[test]
    fn test_no_args() {
        let mut s = spec(no_args as *const () as usize);
        assert_eq!(value_of(unsafe { invoke(&mut s) }).as_i64(), 42);
    }

    #[test]
    fn test_int_args() {
        let mut s = spec(add_i32 as *const () as usize)
            .arg(ArgumentDescriptor::new(ArgKind::Int32).with_int(40))
            .arg(ArgumentDescriptor::new(ArgKind::Int32).with_int(2));
        assert_eq!(value_of(unsafe { invoke(&mut s) }).as_i64(), 42);
    }

    #[test]
    fn test_unsigned_return_zero_extends() {
        let mut s = spec(add_i32 as *const () as usize)
            .arg(ArgumentDescriptor::new(ArgKind::Int32).with_int(-2))
            .arg(ArgumentDescriptor::new(ArgKind::Int32).with_int(1))
            .returns(ArgumentDescriptor::new(ArgKind::Int32).unsigned(true));
        assert_eq!(value_of(unsafe { invoke(&mut s) }).as_i64(), 0xFFFF_FFFF);
    }

    #[test]
    fn test_narrow_return_truncates() {
        let mut s = spec(echo_u8_as_i32 as *const () as usize)
            .arg(ArgumentDescriptor::new(ArgKind::Int32).with_int(0x1FF))
            .returns(ArgumentDescriptor::new(ArgKind::Int8));
        assert_eq!(value_of(unsafe { invoke(&mut s) }).as_i64(), -1);

        let mut s = spec(echo_u8_as_i32 as *const () as usize)
            .arg(ArgumentDescriptor::new(ArgKind::Int32).with_int(0x1FF))
            .returns(ArgumentDescriptor::new(ArgKind::Int8).unsigned(true));
        assert_eq!(value_of(unsafe { invoke(&mut s) }).as_i64(), 255);
    }

    #[test]
    fn test_int64_round_trip() {
        let mut s = spec(echo_i64 as *const () as usize)
            .arg(ArgumentDescriptor::new(ArgKind::Int64).with_int(-0x1234_5678_9ABC))
            .returns(ArgumentDescriptor::new(ArgKind::Int64));
        assert_eq!(value_of(unsafe { invoke(&mut s) }).as_i64(), -0x1234_5678_9ABC);
    }

    #[test]
    fn test_double_args_and_return() {
        let mut s = spec(mul_f64 as *const () as usize)
            .arg(ArgumentDescriptor::new(ArgKind::Float64).with_float(1.5))
            .arg(ArgumentDescriptor::new(ArgKind::Float64).with_float(4.0))
            .returns(ArgumentDescriptor::new(ArgKind::Float64));
        assert_eq!(value_of(unsafe { invoke(&mut s) }).as_f64(), 6.0);
    }

    #[test]
    fn test_float_return() {
        let mut s = spec(half_f32 as *const () as usize)
            .arg(ArgumentDescriptor::new(ArgKind::Float32).with_float(5.0))
            .returns(ArgumentDescriptor::new(ArgKind::Float32));
        assert_eq!(value_of(unsafe { invoke(&mut s) }).as_f64(), 2.5);
    }

    #[test]
    fn test_mixed_kinds() {
        let mut s = spec(mixed as *const () as usize)
            .arg(ArgumentDescriptor::new(ArgKind::Int32).with_int(1))
            .arg(ArgumentDescriptor::new(ArgKind::Float64).with_float(0.5))
            .arg(ArgumentDescriptor::new(ArgKind::Int64).with_int(1 << 40))
            .arg(ArgumentDescriptor::new(ArgKind::Float32).with_float(0.25))
            .returns(ArgumentDescriptor::new(ArgKind::Float64));
        let expected = 1.0 + 0.5 + (1u64 << 40) as f64 + 0.25;
        assert_eq!(value_of(unsafe { invoke(&mut s) }).as_f64(), expected);
    }

    #[test]
    fn test_stack_spilled_args_keep_order() {
        let mut s = spec(sum_ten as *const () as usize).returns(ArgumentDescriptor::new(ArgKind::Int64));
        for i in 1..=10 {
            s = s.arg(ArgumentDescriptor::new(ArgKind::Int64).with_int(i));
        }
        let expected: i64 = (1..=10).map(|i| i * i).sum();
        assert_eq!(value_of(unsafe { invoke(&mut s) }).as_i64(), expected);
    }

    #[test]
    fn test_by_address_writeback() {
        let mut s = spec(increment as *const () as usize)
            .arg(ArgumentDescriptor::new(ArgKind::Int32).by_address(true).with_int(41));
        assert_eq!(value_of(unsafe { invoke(&mut s) }).as_i64(), 42);
        assert_eq!(s.arguments[0].int_value(), 42);
    }

    #[test]
    fn test_by_address_native_width() {
        let mut s = spec(store_double as *const () as usize)
            .arg(ArgumentDescriptor::new(ArgKind::Float64).by_address(true));
        unsafe { invoke(&mut s) }.unwrap();
        assert_eq!(s.arguments[0].float_value(), 6.25);

        let mut s = spec(store_short as *const () as usize)
            .arg(ArgumentDescriptor::new(ArgKind::Int16).unsigned(true).by_address(true));
        unsafe { invoke(&mut s) }.unwrap();
        assert_eq!(s.arguments[0].int_value(), 0xFFFE);
    }

    #[test]
    fn test_string_argument() {
        let mut text = StringArg::new("hello", 0);
        let mut s = spec(strlen_c as *const () as usize)
            .arg(ArgumentDescriptor::new(ArgKind::NativeString).with_ptr(text.as_mut_ptr()))
            .returns(ArgumentDescriptor::new(ArgKind::Ptr));
        assert_eq!(value_of(unsafe { invoke(&mut s) }).as_i64(), 5);
    }

    #[test]
    fn test_fault_is_reported() {
        let mut s = spec(read_unmapped as *const () as usize).arg(ArgumentDescriptor::new(ArgKind::Ptr).with_int(16));
        let before = stats().native_faults;
        let outcome = unsafe { invoke(&mut s) }.unwrap();
        assert_eq!(outcome.fault_code(), Some(guard::ACCESS_VIOLATION));
        assert!(outcome.value().is_none());
        assert!(stats().native_faults > before);

        // Engine still usable afterwards
        let mut s = spec(no_args as *const () as usize);
        assert_eq!(value_of(unsafe { invoke(&mut s) }).as_i64(), 42);
    }

    #[test]
    fn test_call_to_unmapped_address() {
        let mut s = CallSpec::new(0x10 as *const c_void).convention(CallConvention::CDecl);
        let outcome = unsafe { invoke(&mut s) }.unwrap();
        assert!(outcome.fault_code().is_some());
    }

    #[test]
    fn test_cdecl_never_imbalanced() {
        // Extra arguments are harmless when the caller cleans up
        let mut s = spec(add_i32 as *const () as usize);
        for i in 0..6 {
            s = s.arg(ArgumentDescriptor::new(ArgKind::Int32).with_int(i));
        }
        assert!(matches!(unsafe { invoke(&mut s) }.unwrap(), CallOutcome::Value(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_last_native_error_captured() {
        let mut s = spec(set_errno_value as *const () as usize);
        unsafe { invoke(&mut s) }.unwrap();
        assert_eq!(last_native_error(), libc::EBADF as u32);
    }
}

#[cfg(target_arch = "x86")]
mod stdcall {
    use super::*;

    extern "stdcall" fn two_args(a: i32, b: i32) -> i32 {
        a - b
    }

    #[test]
    fn test_balanced_stdcall() {
        let mut s = CallSpec::new(addr(two_args as *const () as usize))
            .arg(ArgumentDescriptor::new(ArgKind::Int32).with_int(10))
            .arg(ArgumentDescriptor::new(ArgKind::Int32).with_int(3));
        assert_eq!(value_of(unsafe { invoke(&mut s) }).as_i64(), 7);
    }

    #[test]
    fn test_too_many_args_is_positive_delta() {
        let mut s = CallSpec::new(addr(two_args as *const () as usize));
        for i in 0..4 {
            s = s.arg(ArgumentDescriptor::new(ArgKind::Int32).with_int(i));
        }
        match unsafe { invoke(&mut s) }.unwrap() {
            CallOutcome::StackImbalance { delta, value } => {
                assert_eq!(delta, 2);
                assert_eq!(value.as_i64(), -1);
            }
            other => panic!("expected imbalance, got {:?}", other),
        }
    }

    #[test]
    fn test_too_few_args_is_negative_delta() {
        let mut s = CallSpec::new(addr(two_args as *const () as usize))
            .arg(ArgumentDescriptor::new(ArgKind::Int32).with_int(1));
        match unsafe { invoke(&mut s) }.unwrap() {
            CallOutcome::StackImbalance { delta, .. } => assert_eq!(delta, -1),
            other => panic!("expected imbalance, got {:?}", other),
        }
    }

    #[test]
    fn test_cdecl_callee_reports_no_imbalance() {
        let mut s = CallSpec::new(addr(add_i32 as *const () as usize))
            .convention(CallConvention::CDecl)
            .arg(ArgumentDescriptor::new(ArgKind::Int32).with_int(1))
            .arg(ArgumentDescriptor::new(ArgKind::Int32).with_int(2))
            .arg(ArgumentDescriptor::new(ArgKind::Int32).with_int(3));
        assert!(matches!(unsafe { invoke(&mut s) }.unwrap(), CallOutcome::Value(_)));
    }
}
