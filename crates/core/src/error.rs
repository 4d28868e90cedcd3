//! Error types for the Shale dataset engine
//!
//! `ShaleError` is the unified error type across all crates. Every failure a
//! blob walk or an update plan can produce maps to exactly one variant, so
//! callers can match on the shape of the failure rather than parse messages.
//!
//! ## Classification
//!
//! - **Retryable**: transport-level failures (`Io`) and listener failures —
//!   the same plan may succeed on a later attempt.
//! - **Terminal**: malformed or unsupported blobs, schema divergence, and
//!   origin-tag mismatches — retrying the same bytes cannot succeed.

use thiserror::Error;

/// Result alias used throughout Shale.
pub type ShaleResult<T> = Result<T, ShaleError>;

/// Unified error type for all Shale operations.
#[derive(Debug, Error)]
pub enum ShaleError {
    /// The blob stream is structurally invalid: truncation, bad magic, an
    /// over-long varint, or a body length that disagrees with its header.
    #[error("malformed blob: {reason}")]
    MalformedBlob {
        /// What was wrong with the stream.
        reason: String,
    },

    /// The blob header declares a format version outside the accepted range.
    #[error("unsupported blob format version {version} (accepted {min}..={max})")]
    UnsupportedVersion {
        /// Version found in the header.
        version: u32,
        /// Lowest accepted version.
        min: u32,
        /// Highest accepted version.
        max: u32,
    },

    /// A delta carried a schema that is structurally incompatible with the
    /// schema registered for the same type name.
    #[error("schema mismatch for type `{type_name}`: {reason}")]
    SchemaMismatch {
        /// The type whose schemas diverged.
        type_name: String,
        /// How they diverged.
        reason: String,
    },

    /// A delta's origin randomized tag does not match the engine's current
    /// randomized tag: the delta was not produced from this state.
    #[error("delta origin tag {actual:#018x} does not match engine tag {expected:#018x}")]
    WrongOrigin {
        /// The engine's current randomized tag.
        expected: u64,
        /// The origin tag carried by the delta header.
        actual: u64,
    },

    /// The update plan intersects the failed-transition tracker while
    /// double-snapshot recovery is enabled; rejected before any I/O.
    #[error("update plan to version {version} contains a known failing transition")]
    KnownFailingTransition {
        /// The plan's destination version.
        version: u64,
    },

    /// Underlying file or mapping failure.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// An ordinal or bit offset read past the populated range.
    #[error("index {index} out of range (max {max})")]
    OutOfRange {
        /// The offending index.
        index: u64,
        /// The largest valid index.
        max: u64,
    },

    /// Delta application against populated type states is not implemented;
    /// mapped segments cannot be mutated in place.
    #[error("delta application is not supported in {mode} memory mode")]
    DeltaUnsupported {
        /// Label of the active memory mode.
        mode: &'static str,
    },

    /// A refresh listener returned an error; the transition is treated as
    /// failed because the listener may have observed or produced bad state.
    #[error("refresh listener failed: {reason}")]
    ListenerFailure {
        /// The listener's error, flattened to text.
        reason: String,
    },

    /// A prior transition failed after the engine began mutating; updates
    /// are refused until a fresh snapshot succeeds.
    #[error("state engine poisoned by a failed transition; a fresh snapshot is required")]
    EnginePoisoned,
}

impl ShaleError {
    /// Shorthand for a [`ShaleError::MalformedBlob`].
    pub fn malformed(reason: impl Into<String>) -> Self {
        ShaleError::MalformedBlob {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same operation could plausibly succeed.
    ///
    /// Transport failures and listener failures are transient; structural
    /// failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShaleError::Io(_) | ShaleError::ListenerFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_shorthand() {
        let err = ShaleError::malformed("truncated header");
        assert!(matches!(err, ShaleError::MalformedBlob { .. }));
        assert_eq!(err.to_string(), "malformed blob: truncated header");
    }

    #[test]
    fn test_retryable_classification() {
        let io = ShaleError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(io.is_retryable());

        let listener = ShaleError::ListenerFailure {
            reason: "index rebuild".into(),
        };
        assert!(listener.is_retryable());

        let malformed = ShaleError::malformed("bad varint");
        assert!(!malformed.is_retryable());

        let origin = ShaleError::WrongOrigin {
            expected: 0xAA,
            actual: 0xBB,
        };
        assert!(!origin.is_retryable());
    }

    #[test]
    fn test_wrong_origin_display_includes_both_tags() {
        let err = ShaleError::WrongOrigin {
            expected: 0xAA,
            actual: 0xBB,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x00000000000000bb"));
        assert!(msg.contains("0x00000000000000aa"));
    }
}
