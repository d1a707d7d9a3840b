//! # Error Types
//!
//! Error handling for the object codec.
//!
//! This module defines every failure the reader and writer can report, from
//! low-level I/O errors to security gate denials.
//!
//! ## Error Categories
//! - **Stream framing**: bad header, unknown or misordered tokens
//! - **Resource exhaustion**: DoS budget, handle table or frame limits exceeded
//! - **Version mismatch**: stream descriptor disagrees with the local type
//! - **Permission denied**: the security gate refused a type
//! - **Type resolution**: the injected resolver could not supply a type
//! - **Invariant violation**: an atomic constructor rejected its fields
//! - **Illegal reference**: dangling, unshared or self-referential handles
//!
//! ## Propagation
//! Framing and exhaustion errors are fatal: the reader closes its byte source
//! and refuses further reads. Object-level errors only fail the object being
//! built; the stream stays aligned through the discard path.
//!
//! ## Example Usage
//! ```rust
//! use object_wire::error::{CodecError, ErrorKind};
//!
//! let err = CodecError::ResourceExhaustion("array of 1 GiB".into());
//! assert_eq!(err.kind(), ErrorKind::ResourceExhaustion);
//! assert!(err.is_fatal());
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Stream framing messages
    pub const ERR_BAD_MAGIC: &str = "invalid stream magic";
    pub const ERR_BAD_VERSION: &str = "unsupported stream version";
    pub const ERR_NESTED_RESET: &str = "reset token inside a nested value";
    pub const ERR_NEGATIVE_LENGTH: &str = "negative length prefix";
    pub const ERR_UNEXPECTED_END_BLOCK: &str = "unexpected end of block data";
    pub const ERR_BLOCK_UNDERFLOW: &str = "custom routine read past its block data";
    pub const ERR_FIELD_ORDER: &str = "reference field precedes primitive field";
    pub const ERR_DUPLICATE_FIELD: &str = "duplicate field name in descriptor";

    /// Resource messages
    pub const ERR_BUDGET_EXCEEDED: &str = "allocation budget exceeded";
    pub const ERR_HANDLE_LIMIT: &str = "handle table limit exceeded";
    pub const ERR_DEPTH_LIMIT: &str = "maximum nesting depth exceeded";
    pub const ERR_FRAME_LIMIT: &str = "maximum pending object count exceeded";

    /// Reference messages
    pub const ERR_UNSHARED_REUSE: &str = "unshared value referenced twice";
    pub const ERR_SELF_SUPERCLASS: &str = "class descriptor is its own superclass";

    /// Construction messages
    pub const ERR_NO_BUILDER: &str = "type has no atomic constructor";
    pub const ERR_NO_INSTANCE: &str = "type has no public no-argument constructor";
}

/// Coarse error taxonomy used for propagation decisions and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    StreamFraming,
    ResourceExhaustion,
    VersionMismatch,
    PermissionDenied,
    TypeResolution,
    InvariantViolation,
    IllegalReference,
    WriteAborted,
    StreamClosed,
    Config,
}

// CodecError is the primary error type for every codec operation
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Stream framing error: {0}")]
    StreamFraming(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhaustion(String),

    #[error("Version mismatch for {class}: stream {stream:#x}, local {local:#x}")]
    VersionMismatch {
        class: String,
        stream: i64,
        local: i64,
    },

    #[error("Incompatible class: {0}")]
    IncompatibleClass(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Type resolution failed: {0}")]
    TypeResolution(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Illegal reference: {0}")]
    IllegalReference(String),

    #[error("Write aborted by sender: {0}")]
    WriteAborted(String),

    #[error("Stream closed")]
    StreamClosed,

    #[error("Fatal: {0}")]
    Fatal(Box<CodecError>),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl CodecError {
    /// Category of this error; `Fatal` reports the kind of its cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::Io(_) => ErrorKind::Io,
            CodecError::StreamFraming(_) => ErrorKind::StreamFraming,
            CodecError::ResourceExhaustion(_) => ErrorKind::ResourceExhaustion,
            CodecError::VersionMismatch { .. } | CodecError::IncompatibleClass(_) => {
                ErrorKind::VersionMismatch
            }
            CodecError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            CodecError::TypeResolution(_) => ErrorKind::TypeResolution,
            CodecError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            CodecError::IllegalReference(_) => ErrorKind::IllegalReference,
            CodecError::WriteAborted(_) => ErrorKind::WriteAborted,
            CodecError::StreamClosed => ErrorKind::StreamClosed,
            CodecError::Fatal(inner) => inner.kind(),
            CodecError::ConfigError(_) => ErrorKind::Config,
        }
    }

    /// Whether this error leaves byte-position bookkeeping untrustworthy.
    ///
    /// Fatal errors close the reader's byte source.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CodecError::Io(_)
                | CodecError::StreamFraming(_)
                | CodecError::ResourceExhaustion(_)
                | CodecError::IllegalReference(_)
                | CodecError::StreamClosed
                | CodecError::Fatal(_)
        )
    }

    /// Promote an object-level error to a stream-fatal one.
    pub fn escalate(self) -> CodecError {
        if self.is_fatal() {
            self
        } else {
            CodecError::Fatal(Box::new(self))
        }
    }

    /// Produce an equivalent error; recorded descriptor failures are
    /// reported once per object that uses the descriptor.
    pub fn duplicate(&self) -> CodecError {
        match self {
            CodecError::Io(e) => CodecError::Io(io::Error::new(e.kind(), e.to_string())),
            CodecError::StreamFraming(m) => CodecError::StreamFraming(m.clone()),
            CodecError::ResourceExhaustion(m) => CodecError::ResourceExhaustion(m.clone()),
            CodecError::VersionMismatch {
                class,
                stream,
                local,
            } => CodecError::VersionMismatch {
                class: class.clone(),
                stream: *stream,
                local: *local,
            },
            CodecError::IncompatibleClass(m) => CodecError::IncompatibleClass(m.clone()),
            CodecError::PermissionDenied(m) => CodecError::PermissionDenied(m.clone()),
            CodecError::TypeResolution(m) => CodecError::TypeResolution(m.clone()),
            CodecError::InvariantViolation(m) => CodecError::InvariantViolation(m.clone()),
            CodecError::IllegalReference(m) => CodecError::IllegalReference(m.clone()),
            CodecError::WriteAborted(m) => CodecError::WriteAborted(m.clone()),
            CodecError::StreamClosed => CodecError::StreamClosed,
            CodecError::Fatal(inner) => CodecError::Fatal(Box::new(inner.duplicate())),
            CodecError::ConfigError(m) => CodecError::ConfigError(m.clone()),
        }
    }
}

/// Type alias for Results using CodecError
pub type Result<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(CodecError::StreamFraming("x".into()).is_fatal());
        assert!(CodecError::ResourceExhaustion("x".into()).is_fatal());
        assert!(CodecError::IllegalReference("x".into()).is_fatal());
        assert!(!CodecError::InvariantViolation("x".into()).is_fatal());
        assert!(!CodecError::TypeResolution("x".into()).is_fatal());
        assert!(!CodecError::PermissionDenied("x".into()).is_fatal());
    }

    #[test]
    fn test_escalate_keeps_kind() {
        let err = CodecError::InvariantViolation("bad".into()).escalate();
        assert!(err.is_fatal());
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);

        let already = CodecError::StreamClosed.escalate();
        assert!(matches!(already, CodecError::StreamClosed));
    }

    #[test]
    fn test_version_mismatch_display() {
        let err = CodecError::VersionMismatch {
            class: "demo.Point".into(),
            stream: 1,
            local: 2,
        };
        assert_eq!(
            err.to_string(),
            "Version mismatch for demo.Point: stream 0x1, local 0x2"
        );
        assert_eq!(err.kind(), ErrorKind::VersionMismatch);
    }

    #[test]
    fn test_duplicate_io() {
        let err = CodecError::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        let copy = err.duplicate();
        assert_eq!(copy.kind(), ErrorKind::Io);
        assert_eq!(copy.to_string(), err.to_string());
    }
}
