//! Core traits for protocol state machines.

use crate::{Action, HandlerContext};
use btcsim_types::NodeIndex;

/// A state machine that processes events.
///
/// Every protocol is implemented as a state machine that is:
///
/// - **Synchronous**: handlers run to completion, nothing blocks
/// - **Deterministic**: same state + context + event = same actions
/// - **Isolated**: mutates only itself and the append-only ledger; all
///   interaction with other nodes goes through returned [`Action`]s
pub trait StateMachine {
    /// The closed set of events this machine accepts.
    type Event;

    /// Process an event, returning actions for the runner to perform.
    fn handle(&mut self, ctx: &mut HandlerContext<'_>, event: Self::Event) -> Vec<Action>;
}

/// Population bootstrap by cloning a configured prototype.
pub trait Prototype: Sized {
    /// Deep-copy this instance for `node`, giving it its own identity and
    /// its own copies of every owned container.
    fn clone_for(&self, node: NodeIndex) -> Self;
}
