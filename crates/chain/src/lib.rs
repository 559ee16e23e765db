//! Per-node blockchain view.
//!
//! A [`Blockchain`] tracks every fork tip a node knows about, picks the
//! longest one as canonical, and keeps the set of transactions included in
//! the canonical chain up to date across reorganizations.
//!
//! Blocks themselves live in the shared [`BlockStore`](btcsim_types::BlockStore);
//! the blockchain only records which of them this node has linked, so every
//! operation that walks the block graph takes the store as a parameter.

mod blockchain;

pub use blockchain::{Blockchain, ForkTip};
