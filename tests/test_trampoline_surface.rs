//! Trampolines registered through the bridge, called from native code
//! and through `Bridge::call` itself

#![cfg(any(target_arch = "x86", target_arch = "x86_64"))]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nativebridge::runtime::interop::stats;
use nativebridge::{Bridge, BridgeError, CallStatus, Param, ScriptEngine, ScriptFunction, ScriptValue};

/// Collects values seen inside script bodies
#[derive(Default)]
struct Recorder(Mutex<Vec<(i64, i64, i64)>>);

impl Recorder {
    fn push(&self, entry: (i64, i64, i64)) {
        self.0.lock().unwrap().push(entry);
    }

    fn take(&self) -> Vec<(i64, i64, i64)> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

fn int(value: ScriptValue) -> i64 {
    value.as_integer().unwrap_or(-1)
}

fn call_address(bridge: &Bridge, address: usize, args: &[i64], ret: &str) -> nativebridge::CallResult {
    let mut params: Vec<Param<'_>> = Vec::new();
    for &arg in args {
        params.push(Param::from("Ptr"));
        params.push(Param::from(arg));
    }
    params.push(Param::from(ret));
    unsafe { bridge.call(address as i64, &mut params) }
}

#[test]
fn test_declared_count_uses_defaults_for_the_rest() {
    let recorder = Arc::new(Recorder::default());
    let engine = Arc::new(ScriptEngine::new());
    let seen = Arc::clone(&recorder);
    engine.define(
        ScriptFunction::builder("F")
            .param("a")
            .param("b")
            .param_default("c", 9)
            .body(move |frame| {
                seen.push((int(frame.get("a")), int(frame.get("b")), int(frame.get("c"))));
                Some(ScriptValue::Integer(int(frame.get("a")) * 100 + int(frame.get("b"))))
            }),
    );
    let bridge = Bridge::new(engine);

    let address = bridge.register_trampoline("F", "CDecl", Some(2), None).unwrap();
    let result = call_address(&bridge, address, &[5, 7], "CDecl UInt");

    assert_eq!(result.status, CallStatus::Success);
    assert_eq!(result.value, ScriptValue::Integer(507));
    assert_eq!(recorder.take(), vec![(5, 7, 9)]);
}

#[test]
fn test_direct_native_invocation() {
    let engine = Arc::new(ScriptEngine::new());
    engine.define(
        ScriptFunction::builder("Triple")
            .param("x")
            .body(|frame| Some(ScriptValue::Integer(int(frame.get("x")) * 3))),
    );
    let bridge = Bridge::new(engine);
    let address = bridge.register_trampoline("triple", "Fast C", None, None).unwrap();

    let f: extern "C" fn(isize) -> u32 = unsafe { std::mem::transmute(address) };
    assert_eq!(f(14), 42);
    assert_eq!(f(-1), (-3i32) as u32);
}

#[test]
fn test_tag_defaults_to_address() {
    let engine = Arc::new(ScriptEngine::new());
    engine.define(
        ScriptFunction::builder("Tagged")
            .param("x")
            .body(|frame| frame.tag().map(ScriptValue::Integer)),
    );
    let bridge = Bridge::new(engine);

    let address = bridge.register_trampoline("Tagged", "C", None, None).unwrap();
    let result = call_address(&bridge, address, &[0], "CDecl UInt");
    assert_eq!(result.value, ScriptValue::Integer(address as u32 as i64));

    let address = bridge.register_trampoline("Tagged", "C", None, Some(77)).unwrap();
    let result = call_address(&bridge, address, &[0], "CDecl Int");
    assert_eq!(result.value, ScriptValue::Integer(77));
}

#[test]
fn test_nested_trampolines_keep_their_own_parameters() {
    static INNER: AtomicUsize = AtomicUsize::new(0);
    static CORRUPTED: AtomicBool = AtomicBool::new(false);

    let engine = Arc::new(ScriptEngine::new());
    engine.define(
        ScriptFunction::builder("Walk")
            .param("n")
            .param("marker")
            .body(|frame| {
                let n = int(frame.get("n"));
                let marker = int(frame.get("marker"));
                if n > 0 {
                    let inner: extern "C" fn(isize, isize) -> u32 =
                        unsafe { std::mem::transmute(INNER.load(Ordering::SeqCst)) };
                    inner((n - 1) as isize, (marker + 10) as isize);
                }
                if int(frame.get("n")) != n || int(frame.get("marker")) != marker {
                    CORRUPTED.store(true, Ordering::SeqCst);
                }
                Some(ScriptValue::Integer(n * 1000 + marker))
            }),
    );
    let bridge = Bridge::new(engine);

    let outer = bridge.register_trampoline("Walk", "C", None, None).unwrap();
    let inner = bridge.register_trampoline("Walk", "Fast C", None, None).unwrap();
    INNER.store(inner, Ordering::SeqCst);

    let result = call_address(&bridge, outer, &[3, 1], "CDecl Int");
    assert_eq!(result.value, ScriptValue::Integer(3001));
    assert!(!CORRUPTED.load(Ordering::SeqCst));
}

#[test]
fn test_registration_errors() {
    let engine = Arc::new(ScriptEngine::new());
    engine.define(ScriptFunction::builder("Builtin").builtin().body(|_| None));
    engine.define(ScriptFunction::builder("Out").param_by_ref("x").body(|_| None));
    engine.define(ScriptFunction::builder("Two").param("a").param("b").body(|_| None));
    let bridge = Bridge::new(engine);

    assert!(matches!(
        bridge.register_trampoline("Builtin", "", None, None),
        Err(BridgeError::Trampoline(_))
    ));
    assert!(matches!(
        bridge.register_trampoline("Out", "", None, None),
        Err(BridgeError::Trampoline(_))
    ));
    assert!(matches!(
        bridge.register_trampoline("Two", "", Some(3), None),
        Err(BridgeError::Trampoline(_))
    ));
    assert!(matches!(
        bridge.register_trampoline("Nope", "", None, None),
        Err(BridgeError::UnknownFunction(_))
    ));
    assert_eq!(bridge.trampoline_count(), 0);
}

#[test]
fn test_free_trampoline() {
    let engine = Arc::new(ScriptEngine::new());
    engine.define(ScriptFunction::builder("Noop").param("x").body(|_| None));
    let bridge = Bridge::new(engine);

    let address = bridge.register_trampoline("Noop", "", None, None).unwrap();
    assert_eq!(bridge.trampoline_count(), 1);
    assert!(stats().trampolines_live >= 1);

    bridge.free_trampoline(address).unwrap();
    assert_eq!(bridge.trampoline_count(), 0);
    assert!(matches!(
        bridge.free_trampoline(address),
        Err(BridgeError::UnknownTrampoline(a)) if a == address
    ));
}

#[test]
fn test_no_result_maps_to_zero() {
    let engine = Arc::new(ScriptEngine::new());
    engine.define(ScriptFunction::builder("Quiet").param("x").body(|_| Some(ScriptValue::text("n/a"))));
    let bridge = Bridge::new(engine);

    let address = bridge.register_trampoline("Quiet", "C", None, None).unwrap();
    let result = call_address(&bridge, address, &[1], "CDecl UInt");
    assert_eq!(result.value, ScriptValue::Integer(0));
}
