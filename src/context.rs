//! Runtime dependency tracking.
//!
//! Evaluating a computed signal's function pushes a frame onto a thread-local
//! stack. Every tracked read (`get`, `with`) records the signal it read in the
//! innermost frame, so the computed signal learns its dependencies from what
//! its function actually reads rather than from a declared list.
//!
//! Frames nest when an evaluation reads a dirty computed signal, which is then
//! evaluated live in a frame of its own.

use crate::base::{AnySignal, SignalId};
use std::cell::RefCell;
use std::rc::Weak;

/// A signal read during an evaluation.
pub(crate) struct TrackedRead {
    pub id: SignalId,
    pub source: Weak<dyn AnySignal>,
}

pub(crate) struct Evaluation<R> {
    pub value: R,
    /// Signals read, in first-read order. Empty when the frame did not record.
    pub reads: Vec<TrackedRead>,
}

struct Frame {
    owner: Option<SignalId>,
    recording: bool,
    reads: Vec<TrackedRead>,
}

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Pops the frame if the evaluation unwinds.
struct FrameGuard {
    armed: bool,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if self.armed {
            FRAMES.with(|frames| {
                frames.borrow_mut().pop();
            });
        }
    }
}

/// Run `f` inside a new frame.
///
/// `owner` is the computed signal being evaluated; reads of it are skipped.
/// When `recording` is false the frame still shields outer frames from the
/// reads made by `f`.
pub(crate) fn evaluate<R>(
    owner: Option<SignalId>,
    recording: bool,
    f: impl FnOnce() -> R,
) -> Evaluation<R> {
    FRAMES.with(|frames| {
        frames.borrow_mut().push(Frame {
            owner,
            recording,
            reads: Vec::new(),
        });
    });
    let mut guard = FrameGuard { armed: true };

    let value = f();

    guard.armed = false;
    let reads = FRAMES
        .with(|frames| frames.borrow_mut().pop())
        .map(|frame| frame.reads)
        .unwrap_or_default();
    Evaluation { value, reads }
}

/// Record a read of `id` in the innermost frame, if any.
///
/// `source` is only called when the read is actually recorded.
pub(crate) fn record_read(id: SignalId, source: impl FnOnce() -> Weak<dyn AnySignal>) {
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        let Some(frame) = frames.last_mut() else {
            return;
        };
        if frame.owner == Some(id) {
            tracing::warn!(signal = %id, "computed signal reads itself; self-dependency ignored");
            return;
        }
        if !frame.recording || frame.reads.iter().any(|read| read.id == id) {
            return;
        }
        frame.reads.push(TrackedRead {
            id,
            source: source(),
        });
    });
}

/// Run `f` without recording any of its reads as dependencies.
///
/// ```rust,no_run
/// use signal_graph::prelude::*;
///
/// let a = Signal::new(1);
/// let b = Signal::new(10);
/// // Changes to `b` never recompute `sum`.
/// let sum = Computed::new({
///     let (a, b) = (a.clone(), b.clone());
///     move || a.get() + untracked(|| b.get())
/// })
/// .unwrap();
/// ```
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    evaluate(None, false, f).value
}

/// Whether a recording evaluation is in progress on this thread.
pub fn is_tracking() -> bool {
    FRAMES.with(|frames| frames.borrow().last().is_some_and(|frame| frame.recording))
}
