//! Per-account balance history.
//!
//! Every account owns an append-only vector of [`Checkpoint`]s ordered by
//! `from_block`. The vector length is the checkpoint count, so the next
//! write slot is always `len()`. Writes within a single block collapse into
//! one entry and writes that carry no new balance are dropped, which keeps
//! storage proportional to the number of real balance changes rather than
//! to the number of blocks.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EscrowError;
use crate::{AccountId, Amount, BlockHeight};

/// Balance of an account as of `from_block` (inclusive) until the next
/// checkpoint.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub from_block: BlockHeight,
    pub balance: Amount,
}

/// Outcome of [`CheckpointStore::record`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointWrite {
    /// A new checkpoint was pushed at the end of the history.
    Appended,
    /// The latest checkpoint shared the height and was replaced in place.
    Overwritten,
    /// The balance did not change; nothing was written.
    Unchanged,
}

/// Length and latest entry of one account's history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct HistoryTail {
    len: usize,
    last: Option<Checkpoint>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointStore {
    histories: BTreeMap<AccountId, Vec<Checkpoint>>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `new_balance` for `account` at `height`.
    ///
    /// Heights passed for one account must be non-decreasing; the caller
    /// guarantees this because heights come from the executing block.
    pub fn record(
        &mut self,
        account: &AccountId,
        height: BlockHeight,
        new_balance: Amount,
    ) -> CheckpointWrite {
        let history = self.histories.entry(account.clone()).or_default();
        let entry = Checkpoint {
            from_block: height,
            balance: new_balance,
        };

        let outcome = match history.last_mut() {
            None => {
                history.push(entry);
                CheckpointWrite::Appended
            }
            Some(last) if last.from_block == height => {
                *last = entry;
                CheckpointWrite::Overwritten
            }
            Some(last) if last.balance == new_balance => CheckpointWrite::Unchanged,
            Some(_) => {
                history.push(entry);
                CheckpointWrite::Appended
            }
        };

        debug!(
            account = %account,
            height,
            balance = new_balance,
            count = history.len(),
            ?outcome,
            "checkpoint write"
        );
        outcome
    }

    /// Number of checkpoints recorded for `account`.
    pub fn num_checkpoints(&self, account: &AccountId) -> usize {
        self.histories.get(account).map_or(0, Vec::len)
    }

    pub fn checkpoint(&self, account: &AccountId, index: usize) -> Option<Checkpoint> {
        self.histories
            .get(account)
            .and_then(|history| history.get(index))
            .copied()
    }

    /// Full history of `account`, oldest first.
    pub fn history(&self, account: &AccountId) -> &[Checkpoint] {
        self.histories
            .get(account)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AccountId, &[Checkpoint])> {
        self.histories
            .iter()
            .map(|(account, history)| (account, history.as_slice()))
    }

    /// Balance of `account` as of `height`, with `current` being the height
    /// of the executing block. The current block is still being written, so
    /// only strictly earlier heights are answered.
    pub fn query(
        &self,
        account: &AccountId,
        height: BlockHeight,
        current: BlockHeight,
    ) -> Result<Amount, EscrowError> {
        if height >= current {
            return Err(EscrowError::HeightNotFinalized {
                requested: height,
                current,
            });
        }
        Ok(self.balance_at(account, height))
    }

    /// Balance of `account` as of `height` without the finality check.
    pub fn balance_at(&self, account: &AccountId, height: BlockHeight) -> Amount {
        floor_balance(self.history(account), height)
    }

    pub(crate) fn tail(&self, account: &AccountId) -> Option<HistoryTail> {
        self.histories.get(account).map(|history| HistoryTail {
            len: history.len(),
            last: history.last().copied(),
        })
    }

    /// Undo every `record` for `account` since `tail` was taken.
    ///
    /// `record` only replaces the latest entry or appends, so truncating to
    /// the old length and putting the old latest entry back is exact.
    pub(crate) fn rewind(&mut self, account: &AccountId, tail: Option<HistoryTail>) {
        let Some(tail) = tail else {
            self.histories.remove(account);
            return;
        };
        if let Some(history) = self.histories.get_mut(account) {
            history.truncate(tail.len);
            if let (Some(slot), Some(last)) = (history.last_mut(), tail.last) {
                *slot = last;
            }
        }
    }
}

/// Balance of the last checkpoint with `from_block <= height`, or zero when
/// the history starts after `height`.
fn floor_balance(history: &[Checkpoint], height: BlockHeight) -> Amount {
    let (Some(first), Some(last)) = (history.first(), history.last()) else {
        return 0;
    };
    if last.from_block <= height {
        return last.balance;
    }
    if first.from_block > height {
        return 0;
    }

    // Ceiling midpoint: a two-element window always moves `lower` up or
    // `upper` down, so the loop terminates.
    let mut lower = 0;
    let mut upper = history.len() - 1;
    while upper > lower {
        let center = upper - (upper - lower) / 2;
        let checkpoint = history[center];
        match checkpoint.from_block.cmp(&height) {
            Ordering::Equal => return checkpoint.balance,
            Ordering::Less => lower = center,
            Ordering::Greater => upper = center - 1,
        }
    }
    history[lower].balance
}
