//! Re-entrancy / context manager
//!
//! Every invocation of a function writes the same storage block. When an
//! invocation starts while another is still running (recursion, or a
//! callback arriving in the middle of the function), the running one's
//! values are saved first and put back when the inner one finishes.

use super::function::ScriptFunction;
use super::value::ScriptValue;

/// Restores a function's storage when dropped, including during unwinding
struct LocalsBackup<'a> {
    function: &'a ScriptFunction,
    saved: Option<Vec<ScriptValue>>,
}

impl<'a> LocalsBackup<'a> {
    fn capture(function: &'a ScriptFunction) -> Self {
        let saved = (function.instances() > 0).then(|| function.take_storage());
        Self { function, saved }
    }
}

impl Drop for LocalsBackup<'_> {
    fn drop(&mut self) {
        self.function.clear_storage();
        if let Some(saved) = self.saved.take() {
            self.function.restore_storage(saved);
        }
    }
}

/// Run `body` as one invocation of `function` with `args` bound
///
/// Storage is always cleared afterwards and any outer invocation's values
/// are restored, whether `body` returns or panics.
pub fn with_isolated_locals<R>(
    function: &ScriptFunction,
    args: Vec<ScriptValue>,
    body: impl FnOnce() -> R,
) -> R {
    let _backup = LocalsBackup::capture(function);
    let _instance = function.enter();
    function.bind(args);
    body()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn counter() -> ScriptFunction {
        ScriptFunction::builder("counter")
            .param("a")
            .param_default("b", 9)
            .local("scratch")
            .body(|_| None)
    }

    #[test]
    fn test_binds_and_clears() {
        let f = counter();
        let seen = with_isolated_locals(&f, vec![ScriptValue::from(1)], || {
            (f.read_slot(0), f.read_slot(1), f.instances())
        });
        assert_eq!(seen, (ScriptValue::from(1), ScriptValue::from(9), 1));
        assert_eq!(f.read_slot(0), ScriptValue::Empty);
        assert_eq!(f.instances(), 0);
    }

    #[test]
    fn test_outer_values_survive_inner_call() {
        let f = counter();
        with_isolated_locals(&f, vec![ScriptValue::from(1), ScriptValue::from(2)], || {
            f.write_slot(2, ScriptValue::from("outer"));
            with_isolated_locals(&f, vec![ScriptValue::from(100)], || {
                assert_eq!(f.read_slot(0), ScriptValue::from(100));
                assert_eq!(f.read_slot(2), ScriptValue::Empty);
                f.write_slot(2, ScriptValue::from("inner"));
            });
            assert_eq!(f.read_slot(0), ScriptValue::from(1));
            assert_eq!(f.read_slot(1), ScriptValue::from(2));
            assert_eq!(f.read_slot(2), ScriptValue::from("outer"));
        });
    }

    #[test]
    fn test_restores_on_panic() {
        let f = counter();
        with_isolated_locals(&f, vec![ScriptValue::from(5)], || {
            let result = catch_unwind(AssertUnwindSafe(|| {
                with_isolated_locals(&f, vec![ScriptValue::from(6)], || panic!("body failed"));
            }));
            assert!(result.is_err());
            assert_eq!(f.read_slot(0), ScriptValue::from(5));
            assert_eq!(f.instances(), 1);
        });
        assert_eq!(f.instances(), 0);
    }
}
