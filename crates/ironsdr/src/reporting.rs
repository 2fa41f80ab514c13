// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Error reporting and log-handler plumbing.
//!
//! Failures travel through [`crate::Result`]; this module additionally keeps
//! the last human-readable failure message per thread (retrievable with
//! [`last_error_message`]) and forwards every report to an optional
//! process-wide handler installed with [`register_log_handler`]. Library
//! logging itself goes through the `log` facade.

use crate::error::Error;
use parking_lot::RwLock;
use std::cell::RefCell;

/// Severity passed to a registered log handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLevel {
    Error,
    Warning,
    Info,
    Debug,
}

/// Process-wide log handler callback.
pub type LogHandler = fn(level: ReportLevel, message: &str);

static LOG_HANDLER: RwLock<Option<LogHandler>> = RwLock::new(None);

thread_local! {
    static LAST_ERROR: RefCell<String> = RefCell::new(String::new());
}

/// Install a process-wide handler that receives every reported message.
/// Passing `None` removes the current handler.
pub fn register_log_handler(handler: Option<LogHandler>) {
    *LOG_HANDLER.write() = handler;
}

/// The last failure message reported on the calling thread.
#[must_use]
pub fn last_error_message() -> String {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Record a failure: remembers the message for [`last_error_message`],
/// emits a `log` record and forwards to the registered handler.
/// Returns the error so call sites can `return Err(report_error(...))`.
pub fn report_error(err: Error) -> Error {
    let message = err.to_string();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message.clone());
    log::error!("{}", message);
    if let Some(handler) = *LOG_HANDLER.read() {
        handler(ReportLevel::Error, &message);
    }
    err
}

/// Forward a non-error message to the registered handler and the `log` facade.
pub fn report(level: ReportLevel, message: &str) {
    match level {
        ReportLevel::Error => log::error!("{}", message),
        ReportLevel::Warning => log::warn!("{}", message),
        ReportLevel::Info => log::info!("{}", message),
        ReportLevel::Debug => log::debug!("{}", message),
    }
    if let Some(handler) = *LOG_HANDLER.read() {
        handler(level, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_error_is_thread_local() {
        let _ = report_error(Error::Busy);
        assert!(last_error_message().contains("busy"));

        let other = std::thread::spawn(last_error_message)
            .join()
            .expect("thread join should succeed");
        assert!(other.is_empty());
    }

    #[test]
    fn test_report_error_returns_same_error() {
        let err = report_error(Error::TimedOut);
        assert!(matches!(err, Error::TimedOut));
        assert_eq!(last_error_message(), "Operation timed out");
    }
}
