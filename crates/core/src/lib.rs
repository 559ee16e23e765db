//! Core types for the Bitcoin network simulator.
//!
//! This crate provides the vocabulary shared by the protocols and the runner:
//!
//! - [`Event`]: Everything that can be delivered to a node, one closed enum
//!   per protocol ([`GossipEvent`], [`TopologyEvent`])
//! - [`Message`]: Wire messages, one closed enum per protocol
//! - [`Action`]: All possible outputs from a protocol handler
//! - [`HandlerContext`]: The simulation context lent to a handler
//! - [`StateMachine`] / [`Prototype`]: The traits every protocol implements
//!
//! # Architecture
//!
//! ```text
//! EventQueue → (node, Event) → StateMachine::handle(ctx, event) → Vec<Action>
//!                                                                     │
//!        ┌────────────────────────────────────────────────────────────┘
//!        ├─ Send { to, message }   → transport → future MessageReceived event
//!        ├─ SetTimer { delay, .. } → future event on the same node
//!        └─ Emit*                  → observer notifications
//! ```
//!
//! Handlers are synchronous and deterministic: the same state, context and
//! event always produce the same actions. Cross-node interaction happens only
//! through `Send` actions, never through shared mutable state.

mod action;
mod context;
mod event;
mod message;
mod traits;

pub use action::Action;
pub use context::HandlerContext;
pub use event::{Event, GossipEvent, ProtocolId, TopologyEvent};
pub use message::{GossipMessage, Message, TopologyMessage};
pub use traits::{Prototype, StateMachine};
