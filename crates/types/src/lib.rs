//! Core types for the Bitcoin network simulator.
//!
//! Blocks and transactions are immutable value records that live in
//! append-only arenas owned by a [`Ledger`]. Every other crate refers to
//! them by identifier ([`BlockId`], [`TxId`]) and resolves identifiers
//! through the ledger, so there is no global state and no ownership cycle
//! between parents and children.

mod block;
mod identifiers;
mod ledger;
mod transaction;

pub use block::Block;
pub use identifiers::{BlockHeight, BlockId, NodeIndex, TxId};
pub use ledger::{Ancestors, BlockStore, Ledger, TransactionStore};
pub use transaction::Transaction;
