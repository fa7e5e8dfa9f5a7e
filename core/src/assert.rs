//! Process-wide assertion callback.
//!
//! Failures on the runtime's hot paths are reported here instead of being
//! propagated as errors: the offending call returns its sentinel (invalid
//! handle, `false`, `None`) and the host application decides, through the
//! installed callback, whether a violation should abort.
//!
//! The default callback logs through [`log::error!`] and panics in debug
//! builds only.

use crate::threads::RwSpinLock;
use std::cell::RefCell;

/// What the callback wants the failing call site to do.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AssertResponse {
    /// Carry on; the caller returns its sentinel value.
    Continue,
    /// Panic at the call site.
    Break,
}

/// Context handed to the assertion callback.
#[derive(Debug)]
pub struct AssertInfo<'a> {
    pub message: &'a str,
    pub file: &'a str,
    pub line: u32,
}

pub type AssertCallback = fn(&AssertInfo<'_>) -> AssertResponse;

fn default_callback(info: &AssertInfo<'_>) -> AssertResponse {
    log::error!(
        "assertion failed at {}:{}: {}",
        info.file,
        info.line,
        info.message
    );
    if cfg!(debug_assertions) {
        AssertResponse::Break
    } else {
        AssertResponse::Continue
    }
}

static CALLBACK: RwSpinLock<AssertCallback> = RwSpinLock::new(default_callback);

thread_local! {
    static CATCHERS: RefCell<Vec<Vec<String>>> = RefCell::new(Vec::new());
}

/// Installs a new process-wide assertion callback, returning the previous one.
pub fn set_assert_callback(callback: AssertCallback) -> AssertCallback {
    std::mem::replace(&mut *CALLBACK.write(), callback)
}

/// Reports an assertion failure. Called by the `ke_assert!`/`ke_verify!`
/// macros; prefer those at call sites.
pub fn report_failure(message: &str, file: &str, line: u32) {
    let caught = CATCHERS.with(|catchers| {
        if let Some(top) = catchers.borrow_mut().last_mut() {
            top.push(message.to_owned());
            true
        } else {
            false
        }
    });
    if caught {
        return;
    }

    let info = AssertInfo {
        message,
        file,
        line,
    };
    let response = (*CALLBACK.read())(&info);
    if response == AssertResponse::Break {
        panic!("assertion failed at {}:{}: {}", file, line, message);
    }
}

/// Captures assertion failures raised on the current thread for the guard's
/// lifetime, instead of routing them to the process-wide callback.
///
/// Used by tests that exercise failure paths on purpose.
pub struct ScopedAssertCatcher;

impl ScopedAssertCatcher {
    pub fn new() -> Self {
        CATCHERS.with(|catchers| catchers.borrow_mut().push(Vec::new()));
        ScopedAssertCatcher
    }

    /// Messages caught so far by this catcher.
    pub fn caught(&self) -> Vec<String> {
        CATCHERS.with(|catchers| catchers.borrow().last().cloned().unwrap_or_default())
    }

    pub fn caught_count(&self) -> usize {
        CATCHERS.with(|catchers| catchers.borrow().last().map_or(0, Vec::len))
    }
}

impl Default for ScopedAssertCatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScopedAssertCatcher {
    fn drop(&mut self) {
        CATCHERS.with(|catchers| {
            catchers.borrow_mut().pop();
        });
    }
}

/// Reports through the assertion callback when the condition does not hold.
#[macro_export]
macro_rules! ke_assert {
    ($cond:expr) => {
        if !$cond {
            $crate::assert::report_failure(stringify!($cond), file!(), line!());
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::assert::report_failure(&format!($($arg)+), file!(), line!());
        }
    };
}

/// Like [`ke_assert!`], but usable as an expression: evaluates to the
/// condition so failure paths can early-out.
#[macro_export]
macro_rules! ke_verify {
    ($cond:expr) => {{
        let ok = $cond;
        if !ok {
            $crate::assert::report_failure(stringify!($cond), file!(), line!());
        }
        ok
    }};
    ($cond:expr, $($arg:tt)+) => {{
        let ok = $cond;
        if !ok {
            $crate::assert::report_failure(&format!($($arg)+), file!(), line!());
        }
        ok
    }};
}

/// Early-returns the given value when the condition does not hold, reporting
/// through the assertion callback.
#[macro_export]
macro_rules! verify_or_return {
    ($cond:expr, $ret:expr) => {
        if !$crate::ke_verify!($cond) {
            return $ret;
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catcher_captures_failures() {
        let catcher = ScopedAssertCatcher::new();
        ke_assert!(1 + 1 == 3);
        assert_eq!(catcher.caught_count(), 1);
        assert!(catcher.caught()[0].contains("1 + 1 == 3"));
    }

    #[test]
    fn verify_reports_and_returns_condition() {
        let catcher = ScopedAssertCatcher::new();
        assert!(ke_verify!(true));
        assert!(!ke_verify!(false, "custom message {}", 42));
        assert_eq!(catcher.caught(), vec!["custom message 42".to_owned()]);
    }

    #[test]
    fn catchers_nest() {
        let outer = ScopedAssertCatcher::new();
        {
            let inner = ScopedAssertCatcher::new();
            ke_assert!(false, "inner only");
            assert_eq!(inner.caught_count(), 1);
        }
        assert_eq!(outer.caught_count(), 0);
    }
}
