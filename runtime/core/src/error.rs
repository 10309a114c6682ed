//! The error representation carried inside trace event payloads.
//!
//! Events never hold live error objects; the message, classification tag,
//! and stacks are extracted when the event is emitted.

use std::fmt::Display;

use crate::stack::StackFrame;

/// Classification tag for errors that were not run through a classifier.
pub const KIND_UNCLASSIFIED: u64 = 0;

/// An error as recorded in an event payload.
///
/// Absence of an error is modeled as `Option<&TracedError>` at the emitter
/// seam. A present `panic_stack` marks the error as a panic.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TracedError {
    /// Human-readable message.
    pub message: String,

    /// Opaque classification tag, assigned by the caller's error
    /// classifier; [`KIND_UNCLASSIFIED`] if none ran.
    pub kind: u64,

    /// Resolved frames for where the error was recorded.
    pub stack: Vec<StackFrame>,

    /// Resolved frames of the panic site, if this error is a panic.
    pub panic_stack: Option<Vec<StackFrame>>,
}

impl TracedError {
    pub fn new<S: Into<String>>(message: S, kind: u64) -> Self {
        TracedError {
            message: message.into(),
            kind,
            stack: Vec::new(),
            panic_stack: None,
        }
    }

    pub fn with_stack(self, stack: Vec<StackFrame>) -> Self {
        Self { stack, ..self }
    }

    pub fn with_panic_stack(self, panic_stack: Vec<StackFrame>) -> Self {
        Self {
            panic_stack: Some(panic_stack),
            ..self
        }
    }

    pub fn is_panic(&self) -> bool {
        self.panic_stack.is_some()
    }

    /// Records an arbitrary displayable error, unclassified.
    pub fn from_display<E: Display>(err: &E) -> Self {
        TracedError::new(err.to_string(), KIND_UNCLASSIFIED)
    }
}

impl Display for TracedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<&anyhow::Error> for TracedError {
    fn from(err: &anyhow::Error) -> Self {
        // The full chain, "outer: inner" formatted.
        TracedError::new(format!("{err:#}"), KIND_UNCLASSIFIED)
    }
}

impl From<&(dyn std::error::Error + 'static)> for TracedError {
    fn from(err: &(dyn std::error::Error + 'static)) -> Self {
        TracedError::new(err.to_string(), KIND_UNCLASSIFIED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_marker() {
        let err = TracedError::new("boom", 3);
        assert!(!err.is_panic());

        let err = err.with_panic_stack(vec![StackFrame {
            function: "handler".into(),
            file: "svc.rs".into(),
            line: 10,
        }]);
        assert!(err.is_panic());
    }

    #[test]
    fn from_anyhow_includes_chain() {
        let inner = anyhow::anyhow!("inner cause");
        let outer = inner.context("outer context");
        let traced = TracedError::from(&outer);
        assert!(traced.message.contains("outer context"));
        assert!(traced.message.contains("inner cause"));
        assert_eq!(traced.kind, KIND_UNCLASSIFIED);
    }
}
