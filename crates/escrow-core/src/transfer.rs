use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TransferError;
use crate::{AccountId, Amount, TokenId};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferTx {
    pub to: AccountId,
    pub token_id: TokenId,
    pub amount: Amount,
}

/// Batch transfer instruction: move every `txs` entry out of `from`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferBatch {
    pub from: AccountId,
    pub txs: Vec<TransferTx>,
}

impl TransferBatch {
    /// The single-entry batch the escrow emits for every custody move.
    pub fn single(from: AccountId, to: AccountId, token_id: TokenId, amount: Amount) -> Self {
        Self {
            from,
            txs: vec![TransferTx {
                to,
                token_id,
                amount,
            }],
        }
    }

    pub fn total_amount(&self) -> Amount {
        self.txs.iter().map(|tx| tx.amount).sum()
    }
}

/// External token contract that moves custody between accounts.
///
/// A call to [`TokenLedger::transfer`] must either apply every batch or
/// none of them.
pub trait TokenLedger {
    fn contract_address(&self) -> &AccountId;

    fn transfer(&mut self, batches: &[TransferBatch]) -> Result<(), TransferError>;
}

/// Multi-token balance table living in memory.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct InMemoryToken {
    address: AccountId,
    ledgers: BTreeMap<TokenId, BTreeMap<AccountId, Amount>>,
}

impl InMemoryToken {
    pub fn new(address: impl Into<AccountId>, token_ids: Vec<TokenId>) -> Self {
        Self {
            address: address.into(),
            ledgers: token_ids
                .into_iter()
                .map(|token_id| (token_id, BTreeMap::new()))
                .collect(),
        }
    }

    pub fn balance_of(&self, owner: &AccountId, token_id: TokenId) -> Amount {
        self.ledgers
            .get(&token_id)
            .and_then(|ledger| ledger.get(owner))
            .copied()
            .unwrap_or(0)
    }

    pub fn mint(
        &mut self,
        to: &AccountId,
        token_id: TokenId,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let balance = self.ledger_mut(token_id)?.entry(to.clone()).or_insert(0);
        *balance = balance.checked_add(amount).ok_or(TransferError::Overflow)?;
        Ok(())
    }

    fn ledger_mut(
        &mut self,
        token_id: TokenId,
    ) -> Result<&mut BTreeMap<AccountId, Amount>, TransferError> {
        self.ledgers
            .get_mut(&token_id)
            .ok_or(TransferError::UnknownToken(token_id))
    }

    fn staged_balance(
        &self,
        staged: &BTreeMap<(TokenId, AccountId), Amount>,
        key: &(TokenId, AccountId),
    ) -> Result<Amount, TransferError> {
        if let Some(balance) = staged.get(key) {
            return Ok(*balance);
        }
        let ledger = self
            .ledgers
            .get(&key.0)
            .ok_or(TransferError::UnknownToken(key.0))?;
        Ok(ledger.get(&key.1).copied().unwrap_or(0))
    }
}

impl TokenLedger for InMemoryToken {
    fn contract_address(&self) -> &AccountId {
        &self.address
    }

    /// Every leg is checked against staged balances first; the tables are
    /// only written once the whole call is known to succeed.
    fn transfer(&mut self, batches: &[TransferBatch]) -> Result<(), TransferError> {
        let mut staged: BTreeMap<(TokenId, AccountId), Amount> = BTreeMap::new();
        for batch in batches {
            for tx in &batch.txs {
                let debit = (tx.token_id, batch.from.clone());
                let available = self.staged_balance(&staged, &debit)?;
                if available < tx.amount {
                    return Err(TransferError::InsufficientFunds {
                        owner: batch.from.clone(),
                        token_id: tx.token_id,
                        requested: tx.amount,
                        available,
                    });
                }
                staged.insert(debit, available - tx.amount);

                let credit = (tx.token_id, tx.to.clone());
                let credited = self.staged_balance(&staged, &credit)?;
                staged.insert(
                    credit,
                    credited.checked_add(tx.amount).ok_or(TransferError::Overflow)?,
                );
            }
        }

        for ((token_id, owner), balance) in staged {
            self.ledger_mut(token_id)?.insert(owner, balance);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_moves_balance_between_owners() {
        let mut token = InMemoryToken::new("token", vec![0]);
        token.mint(&"alice".into(), 0, 1_000).unwrap();
        token
            .transfer(&[TransferBatch::single(
                "alice".into(),
                "escrow".into(),
                0,
                400,
            )])
            .unwrap();
        assert_eq!(token.balance_of(&"alice".into(), 0), 600);
        assert_eq!(token.balance_of(&"escrow".into(), 0), 400);
    }

    #[test]
    fn failed_batch_rolls_back_earlier_batches() {
        let mut token = InMemoryToken::new("token", vec![0]);
        token.mint(&"alice".into(), 0, 100).unwrap();
        let err = token
            .transfer(&[
                TransferBatch::single("alice".into(), "bob".into(), 0, 60),
                TransferBatch::single("alice".into(), "bob".into(), 0, 60),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::InsufficientFunds { available: 40, .. }
        ));
        assert_eq!(token.balance_of(&"alice".into(), 0), 100);
        assert_eq!(token.balance_of(&"bob".into(), 0), 0);
    }

    #[test]
    fn unknown_token_in_later_batch_applies_nothing() {
        let mut token = InMemoryToken::new("token", vec![0]);
        token.mint(&"alice".into(), 0, 100).unwrap();
        let before = token.clone();
        let err = token
            .transfer(&[
                TransferBatch::single("alice".into(), "bob".into(), 0, 10),
                TransferBatch::single("alice".into(), "bob".into(), 9, 10),
            ])
            .unwrap_err();
        assert_eq!(err, TransferError::UnknownToken(9));
        assert_eq!(token, before);
    }

    #[test]
    fn credit_earlier_in_call_funds_later_debit() {
        let mut token = InMemoryToken::new("token", vec![0]);
        token.mint(&"alice".into(), 0, 50).unwrap();
        token
            .transfer(&[
                TransferBatch::single("alice".into(), "bob".into(), 0, 50),
                TransferBatch::single("bob".into(), "carol".into(), 0, 30),
            ])
            .unwrap();
        assert_eq!(token.balance_of(&"alice".into(), 0), 0);
        assert_eq!(token.balance_of(&"bob".into(), 0), 20);
        assert_eq!(token.balance_of(&"carol".into(), 0), 30);
    }

    #[test]
    fn unknown_token_is_rejected() {
        let mut token = InMemoryToken::new("token", vec![0]);
        assert_eq!(
            token.mint(&"alice".into(), 7, 1),
            Err(TransferError::UnknownToken(7))
        );
    }
}
