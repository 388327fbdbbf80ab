// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! One-shot fan-in counter shared by [`crate::Grove`] and [`crate::Forest`]
//! (spec.md §4.5/§4.6 "Join primitive").
//!
//! A `Join<Op>` enforces "one outstanding async phase at a time" (I4) across
//! `N` child completions, invoking the registered callback exactly once,
//! after the last child reports in (O3). Firing a child completion for a
//! phase other than the one currently in flight, or starting a phase while
//! one is already outstanding, is a programming error and panics in debug
//! builds (spec.md §7 "Programming errors").

use std::fmt::Debug;

/// A one-shot fan-in join over `N` children, tagged by operation `Op`.
///
/// `Op` distinguishes phases (open / compact-IO / checkpoint / …) so that a
/// completion arriving for the wrong phase is an assertion failure, not a
/// silent hang (spec.md §4.6).
pub struct Join<Op> {
    state: Option<State<Op>>,
}

struct State<Op> {
    op: Op,
    pending: usize,
    callback: Box<dyn FnOnce(Op) + Send>,
}

impl<Op: Copy + Eq + Debug + Send + 'static> Join<Op> {
    /// Creates an idle join with no phase in flight.
    pub fn new() -> Self {
        Self { state: None }
    }

    /// Returns `true` if a phase is currently outstanding.
    pub fn is_pending(&self) -> bool {
        self.state.is_some()
    }

    /// Starts a new phase expecting exactly `pending` child completions.
    ///
    /// # Panics
    ///
    /// Panics if a phase is already outstanding (I4) or if `pending == 0`
    /// (a phase with zero children should invoke its callback directly
    /// rather than going through the join).
    pub fn start(&mut self, op: Op, pending: usize, callback: impl FnOnce(Op) + Send + 'static) {
        assert!(
            self.state.is_none(),
            "Join::start called while phase {:?} is still outstanding",
            self.state.as_ref().map(|s| s.op)
        );
        assert!(pending > 0, "Join::start requires at least one child");

        self.state = Some(State {
            op,
            pending,
            callback: Box::new(callback),
        });
    }

    /// Records one child completion for `op`.
    ///
    /// Once every child has reported in, clears the join and invokes the
    /// registered callback exactly once (O3).
    ///
    /// # Panics
    ///
    /// Panics if no phase is outstanding, if `op` doesn't match the phase
    /// that was started, or if more completions arrive than were declared.
    pub fn child_done(&mut self, op: Op) {
        let finished = {
            let state = self
                .state
                .as_mut()
                .unwrap_or_else(|| panic!("Join::child_done({op:?}) with no phase outstanding"));

            assert_eq!(
                state.op, op,
                "Join::child_done called for the wrong phase (in flight: {:?}, got: {op:?})",
                state.op
            );

            state.pending = state
                .pending
                .checked_sub(1)
                .unwrap_or_else(|| panic!("Join::child_done({op:?}) fired more times than declared"));

            state.pending == 0
        };

        if finished {
            let state = self.state.take().expect("checked above");
            (state.callback)(state.op);
        }
    }
}

impl<Op: Copy + Eq + Debug + Send + 'static> Default for Join<Op> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Open,
        Checkpoint,
    }

    #[test]
    fn fires_once_after_all_children() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut join = Join::new();

        let fired2 = fired.clone();
        join.start(Op::Open, 3, move |op| {
            assert_eq!(op, Op::Open);
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        join.child_done(Op::Open);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        join.child_done(Op::Open);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        join.child_done(Op::Open);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!join.is_pending());
    }

    #[test]
    #[should_panic(expected = "still outstanding")]
    fn second_start_before_completion_panics() {
        let mut join: Join<Op> = Join::new();
        join.start(Op::Open, 1, |_| {});
        join.start(Op::Checkpoint, 1, |_| {});
    }

    #[test]
    #[should_panic(expected = "wrong phase")]
    fn wrong_phase_completion_panics() {
        let mut join = Join::new();
        join.start(Op::Open, 1, |_| {});
        join.child_done(Op::Checkpoint);
    }

    #[test]
    fn can_restart_after_completion() {
        let mut join = Join::new();
        join.start(Op::Open, 1, |_| {});
        join.child_done(Op::Open);
        join.start(Op::Checkpoint, 2, |_| {});
        join.child_done(Op::Checkpoint);
        assert!(join.is_pending());
        join.child_done(Op::Checkpoint);
        assert!(!join.is_pending());
    }
}
