//! Outputs of protocol handlers.

use crate::{Event, Message};
use btcsim_types::{BlockId, NodeIndex};
use std::time::Duration;

/// Something a handler asks the runner to do.
///
/// Handlers never touch another node directly; they return actions and the
/// runner carries them out after the handler has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    // ═══════════════════════════════════════════════════════════════════════
    // Network
    // ═══════════════════════════════════════════════════════════════════════
    /// Send a message through the transport. The transport decides latency
    /// and loss, and turns delivery into a future event on `to`.
    Send { to: NodeIndex, message: Message },

    // ═══════════════════════════════════════════════════════════════════════
    // Timers
    // ═══════════════════════════════════════════════════════════════════════
    /// Deliver `event` to the same node after `delay`. Timers cannot be
    /// cancelled.
    SetTimer { delay: Duration, event: Event },

    // ═══════════════════════════════════════════════════════════════════════
    // Notifications
    // ═══════════════════════════════════════════════════════════════════════
    /// This node mined `block`.
    EmitBlockMined { block: BlockId },

    /// This node linked `block` into its blockchain for the first time.
    EmitBlockLinked { block: BlockId },

    /// This node's believed-longest chain switched to another fork.
    EmitReorg { old_tip: BlockId, new_tip: BlockId },

    /// A link to `peer` was registered on this node.
    EmitConnectionOpened { peer: NodeIndex, outgoing: bool },

    /// The link to `peer` was removed from this node.
    EmitConnectionClosed { peer: NodeIndex },
}

impl Action {
    /// Build a `Send` action.
    pub fn send(to: NodeIndex, message: impl Into<Message>) -> Self {
        Action::Send {
            to,
            message: message.into(),
        }
    }

    /// Build a `SetTimer` action.
    pub fn timer(delay: Duration, event: impl Into<Event>) -> Self {
        Action::SetTimer {
            delay,
            event: event.into(),
        }
    }

    /// Get a human-readable name for this action type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Action::Send { .. } => "Send",
            Action::SetTimer { .. } => "SetTimer",
            Action::EmitBlockMined { .. } => "EmitBlockMined",
            Action::EmitBlockLinked { .. } => "EmitBlockLinked",
            Action::EmitReorg { .. } => "EmitReorg",
            Action::EmitConnectionOpened { .. } => "EmitConnectionOpened",
            Action::EmitConnectionClosed { .. } => "EmitConnectionClosed",
        }
    }
}
