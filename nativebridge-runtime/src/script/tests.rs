//! Engine behaviour: direct calls, thread table, ambient state

use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn adder() -> ScriptFunction {
    ScriptFunction::builder("Add")
        .param("a")
        .param_default("b", 10)
        .body(|frame| {
            let a = frame.get("a").as_integer().unwrap_or(0);
            let b = frame.get("b").as_integer().unwrap_or(0);
            Some(ScriptValue::Integer(a + b))
        })
}

#[test]
fn test_call_function_with_defaults() {
    let engine = ScriptEngine::new();
    engine.define(adder());

    let result = engine
        .call_function("add", vec![ScriptValue::from(5)])
        .unwrap();
    assert_eq!(result, Some(ScriptValue::Integer(15)));

    let result = engine
        .call_function("ADD", vec![ScriptValue::from(5), ScriptValue::from(1)])
        .unwrap();
    assert_eq!(result, Some(ScriptValue::Integer(6)));
}

#[test]
fn test_builder_records_formals() {
    let function = ScriptFunction::builder("Out")
        .param("a")
        .param_default("b", 10)
        .param_by_ref("c")
        .body(|_| None);

    assert_eq!(
        function.params(),
        &[
            FormalParam { name: "a".to_string(), default: None, by_ref: false },
            FormalParam { name: "b".to_string(), default: Some(ScriptValue::from(10)), by_ref: false },
            FormalParam { name: "c".to_string(), default: None, by_ref: true },
        ]
    );
    assert_eq!(function.mandatory_count(), 2);
    assert!(function.has_by_ref_params());
}

#[test]
fn test_call_function_errors() {
    let engine = ScriptEngine::new();
    engine.define(adder());

    assert_eq!(
        engine.call_function("missing", Vec::new()),
        Err(EngineError::UnknownFunction("missing".to_string()))
    );
    assert!(matches!(
        engine.call_function("add", vec![1.into(), 2.into(), 3.into()]),
        Err(EngineError::TooManyArguments { expected: 2, got: 3, .. })
    ));
}

#[test]
fn test_recursion_keeps_locals() {
    let engine = ScriptEngine::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    engine.define(
        ScriptFunction::builder("Fact")
            .param("n")
            .local("keep")
            .body(move |frame| {
                seen.fetch_add(1, Ordering::SeqCst);
                let n = frame.get("n").as_integer().unwrap_or(0);
                frame.set("keep", n);
                if n <= 1 {
                    return Some(ScriptValue::Integer(1));
                }
                let inner = frame
                    .engine()
                    .call_function("fact", vec![ScriptValue::Integer(n - 1)])
                    .ok()
                    .flatten()
                    .and_then(|v| v.as_integer())
                    .unwrap_or(0);
                // Outer invocation's values are back after the nested call
                assert_eq!(frame.get("n"), ScriptValue::Integer(n));
                assert_eq!(frame.get("keep"), ScriptValue::Integer(n));
                Some(ScriptValue::Integer(n * inner))
            }),
    );

    let result = engine.call_function("Fact", vec![5.into()]).unwrap();
    assert_eq!(result, Some(ScriptValue::Integer(120)));
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(engine.function("fact").unwrap().instances(), 0);
}

#[test]
fn test_thread_ceiling() {
    let engine = ScriptEngine::with_max_threads(2);
    let first = engine.begin_thread().expect("first thread");
    let second = engine.begin_thread().expect("second thread");
    assert_eq!(engine.active_threads(), 2);
    assert!(engine.begin_thread().is_none());
    assert_ne!(first.id(), second.id());

    drop(second);
    assert_eq!(engine.active_threads(), 1);
    assert!(engine.begin_thread().is_some());
    drop(first);
    assert_eq!(engine.active_threads(), 0);
}

#[test]
fn test_thread_discards_ambient_changes() {
    let engine = ScriptEngine::new();
    engine.set_error_level(7);
    {
        let _thread = engine.begin_thread().unwrap();
        assert_eq!(engine.error_level(), ScriptValue::Integer(7));
        engine.set_error_level("changed");
    }
    assert_eq!(engine.error_level(), ScriptValue::Integer(7));
}

#[test]
fn test_resume_restores_pause() {
    let engine = ScriptEngine::new();
    engine.set_paused(true);
    {
        let _resumed = engine.resume_current();
        assert!(!engine.is_paused());
    }
    assert!(engine.is_paused());

    engine.set_paused(false);
    {
        let _resumed = engine.resume_current();
    }
    assert!(!engine.is_paused());
}

#[test]
fn test_event_info_mirror() {
    let engine = ScriptEngine::new();
    {
        let _mirror = engine.mirror_event_info(1234);
        assert_eq!(engine.event_info(), 1234);
        {
            let _inner = engine.mirror_event_info(99);
            assert_eq!(engine.event_info(), 99);
        }
        assert_eq!(engine.event_info(), 1234);
    }
    assert_eq!(engine.event_info(), 0);
}

#[test]
fn test_execution_lock_is_reentrant() {
    let engine = ScriptEngine::new();
    let _outer = engine.lock();
    let _inner = engine.lock();
}

#[test]
fn test_foreign_thread_waits_for_lock() {
    let engine = Arc::new(ScriptEngine::new());
    engine.define(adder());
    let guard = engine.lock();

    let worker = {
        let engine = Arc::clone(&engine);
        std::thread::spawn(move || engine.call_function("add", vec![1.into()]))
    };
    std::thread::sleep(std::time::Duration::from_millis(20));
    assert!(!worker.is_finished());
    drop(guard);

    let result = worker.join().unwrap().unwrap();
    assert_eq!(result, Some(ScriptValue::Integer(11)));
}
