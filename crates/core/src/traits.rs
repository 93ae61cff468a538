//! The state machine trait runners drive.

use crate::{Action, Event};
use std::time::Duration;

/// A synchronous, deterministic event processor.
///
/// Implementations mutate themselves but perform no I/O; the same state and
/// event sequence always produces the same actions. Runners call
/// [`StateMachine::set_time`] before each `handle` so timeout decisions are
/// part of the deterministic input.
pub trait StateMachine {
    fn handle(&mut self, event: Event) -> Vec<Action>;

    fn set_time(&mut self, now: Duration);
}
