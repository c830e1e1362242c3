use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::checkpoint::{Checkpoint, CheckpointStore, CheckpointWrite, HistoryTail};
use crate::config::EscrowConfig;
use crate::error::EscrowError;
use crate::transfer::TransferBatch;
use crate::{AccountId, Amount, BlockHeight};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    /// Level of the last committed operation.
    pub level: BlockHeight,
    /// Number of committed operations.
    pub operations: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub balances: BTreeMap<AccountId, Amount>,
    pub checkpoints: BTreeMap<AccountId, Vec<Checkpoint>>,
    pub state_root: [u8; 32],
}

impl LedgerSnapshot {
    pub fn state_root_hex(&self) -> String {
        hex::encode(self.state_root)
    }
}

/// One account's balance and history tail before an operation touched it.
#[derive(Clone, Debug)]
pub(crate) struct AccountMark {
    account: AccountId,
    balance: Option<Amount>,
    history: Option<HistoryTail>,
}

/// Custodied balances plus their checkpoint history.
///
/// Entrypoints mutate the state and hand back the transfer batch that must
/// succeed for the mutation to stand; committing or restoring the state
/// around that batch is the job of [`crate::runtime::Escrow`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EscrowState {
    pub config: EscrowConfig,
    pub meta: SnapshotMetadata,
    balances: BTreeMap<AccountId, Amount>,
    checkpoints: CheckpointStore,
}

impl EscrowState {
    pub fn new(config: EscrowConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Current custodied balance; unseen accounts read as zero.
    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    /// Current custodied balance, registering `account` with a zero balance
    /// if it has never been seen.
    pub fn get_balance(&mut self, account: &AccountId) -> Amount {
        *self.balances.entry(account.clone()).or_insert(0)
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&AccountId, Amount)> {
        self.balances.iter().map(|(account, balance)| (account, *balance))
    }

    /// Take `amount` into custody for `account` at `level`.
    pub fn deposit(
        &mut self,
        account: &AccountId,
        amount: Amount,
        level: BlockHeight,
    ) -> Result<TransferBatch, EscrowError> {
        let batch = TransferBatch::single(
            account.clone(),
            self.config.escrow_address.clone(),
            self.config.token_id,
            amount,
        );

        let balance = self.balances.entry(account.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| EscrowError::BalanceOverflow {
                account: account.clone(),
            })?;
        let new_balance = *balance;

        self.write_checkpoint(account, level, new_balance);
        Ok(batch)
    }

    /// Release `amount` from custody back to `account` at `level`.
    ///
    /// The balance check runs before anything is touched, so a rejected
    /// release leaves balances and checkpoints as they were.
    pub fn withdraw(
        &mut self,
        account: &AccountId,
        amount: Amount,
        level: BlockHeight,
    ) -> Result<TransferBatch, EscrowError> {
        let available = self.balance_of(account);
        if available < amount {
            return Err(EscrowError::InsufficientBalance {
                account: account.clone(),
                requested: amount,
                available,
            });
        }

        let batch = TransferBatch::single(
            self.config.escrow_address.clone(),
            account.clone(),
            self.config.token_id,
            amount,
        );

        let new_balance = available - amount;
        self.balances.insert(account.clone(), new_balance);
        self.write_checkpoint(account, level, new_balance);
        Ok(batch)
    }

    /// Balance of `account` at `level`, answered only for levels strictly
    /// below `current`.
    pub fn prior_balance(
        &self,
        account: &AccountId,
        level: BlockHeight,
        current: BlockHeight,
    ) -> Result<Amount, EscrowError> {
        self.checkpoints.query(account, level, current)
    }

    pub(crate) fn mark(&self, account: &AccountId) -> AccountMark {
        AccountMark {
            account: account.clone(),
            balance: self.balances.get(account).copied(),
            history: self.checkpoints.tail(account),
        }
    }

    /// Put the marked account back the way it was; other accounts are untouched.
    pub(crate) fn restore(&mut self, mark: AccountMark) {
        match mark.balance {
            Some(balance) => {
                self.balances.insert(mark.account.clone(), balance);
            }
            None => {
                self.balances.remove(&mark.account);
            }
        }
        self.checkpoints.rewind(&mark.account, mark.history);
    }

    pub(crate) fn commit(&mut self, level: BlockHeight) {
        self.meta.level = level;
        self.meta.operations += 1;
    }

    fn write_checkpoint(
        &mut self,
        account: &AccountId,
        level: BlockHeight,
        new_balance: Amount,
    ) -> CheckpointWrite {
        let outcome = self.checkpoints.record(account, level, new_balance);
        debug!(account = %account, level, new_balance, ?outcome, "balance updated");
        outcome
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let checkpoints = self
            .checkpoints
            .iter()
            .map(|(account, history)| (account.clone(), history.to_vec()))
            .collect();
        LedgerSnapshot {
            meta: self.meta.clone(),
            balances: self.balances.clone(),
            checkpoints,
            state_root: self.state_root(),
        }
    }

    pub fn state_root(&self) -> [u8; 32] {
        compute_state_root(&self.balances, &self.checkpoints)
    }

    /// Check a previously published root against the current contents.
    pub fn verify_root(&self, expected: &[u8; 32]) -> bool {
        &self.state_root() == expected
    }
}

fn compute_state_root(
    balances: &BTreeMap<AccountId, Amount>,
    checkpoints: &CheckpointStore,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    for (account, balance) in balances {
        let mut hasher = Sha256::new();
        hasher.update(b"balance");
        hasher.update((account.len() as u64).to_le_bytes());
        hasher.update(account.as_bytes());
        hasher.update(balance.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    for (account, history) in checkpoints.iter() {
        for (index, checkpoint) in history.iter().enumerate() {
            let mut hasher = Sha256::new();
            hasher.update(b"checkpoint");
            hasher.update((account.len() as u64).to_le_bytes());
            hasher.update(account.as_bytes());
            hasher.update((index as u64).to_le_bytes());
            hasher.update(checkpoint.from_block.to_le_bytes());
            hasher.update(checkpoint.balance.to_le_bytes());
            leaves.push(hasher.finalize().into());
        }
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"escrow-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity((leaves.len() + 1) / 2);
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}
