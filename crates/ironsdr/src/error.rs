// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 ironwave.io

//! Crate-wide error type.
//!
//! Every fallible operation in the driver returns [`Result`]. Variants map
//! one-to-one onto the failure classes the hardware stack can produce, so
//! callers can branch on them without string matching.

/// Driver error.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Caller errors
    // ========================================================================
    /// Caller passed a null, out-of-range or otherwise unusable argument.
    /// Nothing was mutated.
    InvalidArgument(String),
    /// Declarative configuration failed validation. Carries one message per
    /// offending field; the last-applied configuration is unchanged.
    InvalidConfiguration(Vec<String>),

    // ========================================================================
    // Transport errors
    // ========================================================================
    /// Control or bulk pipe I/O failed.
    Transport(String),
    /// A pipe operation did not complete within its deadline.
    TimedOut,
    /// Generic I/O error with underlying cause (file operations).
    Io(std::io::Error),

    // ========================================================================
    // State errors
    // ========================================================================
    /// Operation requires the module to be idle, but a stream is running.
    Busy,
    /// Feature unavailable on the detected chip or board revision.
    NotSupported(String),
    /// Tx submission arrived after its scheduled timestamp. Non-fatal;
    /// carries the number of samples the submission was late by.
    TimestampMissed(u64),

    // ========================================================================
    // Resource errors
    // ========================================================================
    /// Memory pool or FIFO is at its hard cap.
    Exhausted,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InvalidConfiguration(errors) => {
                write!(f, "Invalid configuration: {}", errors.join("; "))
            }
            Error::Transport(msg) => write!(f, "Transport failure: {}", msg),
            Error::TimedOut => write!(f, "Operation timed out"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Busy => write!(f, "Device is busy: stop streaming first"),
            Error::NotSupported(msg) => write!(f, "{}", msg),
            Error::TimestampMissed(late) => {
                write!(f, "Tx timestamp already passed ({} samples late)", late)
            }
            Error::Exhausted => write!(f, "Resource exhausted"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenient alias for API results using the crate [`Error`] type.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_field_errors() {
        let err = Error::InvalidConfiguration(vec![
            "Rx ch0 sample rate out of range".to_string(),
            "Tx ch1 LPF bandwidth out of range".to_string(),
        ]);
        let text = err.to_string();
        assert!(text.contains("sample rate out of range"));
        assert!(text.contains("LPF bandwidth out of range"));
    }

    #[test]
    fn test_io_source_preserved() {
        let inner = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Error::from(inner);
        assert!(std::error::Error::source(&err).is_some());
    }
}
