//! Governance escrow ledger.
//!
//! Depositors lock a fungible token into the escrow and can release it
//! later. Every change to a custodied balance is checkpointed, so the
//! balance of any account can be read back as of an earlier block level,
//! which is what governance uses to weigh votes at a proposal snapshot.
//!
//! * [`checkpoint`]: per-account append-only balance history and the
//!   floor lookup over it.
//! * [`ledger`]: custodied balances, deposit/withdraw bookkeeping and
//!   state snapshots.
//! * [`runtime`]: runs entrypoints as all-or-nothing operation groups
//!   against a [`transfer::TokenLedger`].
//! * [`transfer`]: the batch transfer instruction and an in-memory token.
//! * [`view`]: receivers for historical balance queries.

pub mod checkpoint;
pub mod config;
pub mod ledger;
pub mod runtime;
pub mod transfer;
pub mod view;

mod error;

pub use checkpoint::{Checkpoint, CheckpointStore, CheckpointWrite};
pub use config::EscrowConfig;
pub use error::{EscrowError, TransferError};
pub use ledger::{EscrowState, LedgerSnapshot, SnapshotMetadata};
pub use runtime::{CallContext, Escrow};
pub use transfer::{InMemoryToken, TokenLedger, TransferBatch, TransferTx};
pub use view::{PriorBalance, PriorBalanceSink, Viewer};

pub type AccountId = String;
pub type Amount = u64;
pub type BlockHeight = u64;
pub type TokenId = u64;
