//! Transaction type.

use crate::TxId;
use std::time::Duration;

/// An opaque transaction: identity plus creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transaction {
    pub id: TxId,
    pub timestamp: Duration,
}
