//! Call stack capture for trace events.
//!
//! Stacks are captured eagerly at emit time as raw program counters, since
//! an event may outlive the context that produced it. Symbol resolution is
//! deferred to [`format`], which is only invoked for error payloads.

use std::ffi::c_void;

/// A captured call stack: raw program counters, innermost frame first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stack {
    pub pcs: Vec<u64>,
}

impl Stack {
    pub fn empty() -> Self {
        Stack { pcs: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.pcs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pcs.len()
    }
}

/// A resolved stack frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackFrame {
    pub function: String,
    pub file: String,
    pub line: u32,
}

/// Captures the current call stack, skipping `skip` frames beyond this
/// function itself and recording at most `max_depth` program counters.
pub fn capture(skip: usize, max_depth: usize) -> Stack {
    let mut pcs = Vec::with_capacity(max_depth.min(32));
    let mut remaining_skip = skip + 1; // also skip the capture frame itself

    backtrace::trace(|frame| {
        if remaining_skip > 0 {
            remaining_skip -= 1;
            return true;
        }
        pcs.push(frame.ip() as usize as u64);
        pcs.len() < max_depth
    });

    Stack { pcs }
}

/// Resolves a captured stack into (function, file, line) frames.
///
/// Program counters that cannot be resolved produce frames with empty
/// names; the frame count always matches the capture depth.
pub fn format(stack: &Stack) -> Vec<StackFrame> {
    let mut frames = Vec::with_capacity(stack.pcs.len());

    for &pc in &stack.pcs {
        let mut frame = StackFrame::default();
        backtrace::resolve(pc as usize as *mut c_void, |symbol| {
            if frame.function.is_empty() {
                if let Some(name) = symbol.name() {
                    frame.function = name.to_string();
                }
                if let Some(file) = symbol.filename() {
                    frame.file = file.to_string_lossy().into_owned();
                }
                if let Some(line) = symbol.lineno() {
                    frame.line = line;
                }
            }
        });
        frames.push(frame);
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_respects_max_depth() {
        let stack = capture(0, 4);
        assert!(stack.len() <= 4);
    }

    #[test]
    fn capture_produces_frames() {
        let stack = capture(0, 64);
        assert!(!stack.is_empty());
    }

    #[test]
    fn format_preserves_depth() {
        let stack = capture(0, 8);
        let frames = format(&stack);
        assert_eq!(frames.len(), stack.len());
    }

    #[test]
    fn format_of_empty_stack_is_empty() {
        assert!(format(&Stack::empty()).is_empty());
    }
}
