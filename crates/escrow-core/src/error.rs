use thiserror::Error;

use crate::{AccountId, Amount, BlockHeight, TokenId};

/// Canonical error type exposed by the escrow ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EscrowError {
    /// A release asked for more than the account has in custody.
    #[error("insufficient escrowed balance for {account}: requested {requested}, available {available}")]
    InsufficientBalance {
        account: AccountId,
        requested: Amount,
        available: Amount,
    },

    /// Historical queries must target a height strictly below the current one.
    #[error("block level {requested} is not finalized yet (current level {current})")]
    HeightNotFinalized {
        requested: BlockHeight,
        current: BlockHeight,
    },

    /// Crediting the account would overflow the balance counter.
    #[error("escrowed balance overflow for {account}")]
    BalanceOverflow { account: AccountId },

    /// An operation was submitted with a level below the last executed one.
    #[error("block level moved backwards: last executed {last}, got {requested}")]
    LevelRegressed {
        last: BlockHeight,
        requested: BlockHeight,
    },

    /// The token collaborator is not the contract the escrow was configured with.
    #[error("token contract mismatch: configured {configured}, got {actual}")]
    TokenMismatch {
        configured: AccountId,
        actual: AccountId,
    },

    /// The custody transfer was rejected; the whole operation is rolled back.
    #[error("custody transfer failed: {0}")]
    Transfer(#[from] TransferError),
}

impl EscrowError {
    /// Short, stable tag for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            EscrowError::InsufficientBalance { .. } => "LOW_BALANCE",
            EscrowError::HeightNotFinalized { .. } => "BLOCK_LEVEL_TOO_SOON",
            EscrowError::BalanceOverflow { .. } => "BALANCE_OVERFLOW",
            EscrowError::LevelRegressed { .. } => "LEVEL_REGRESSED",
            EscrowError::TokenMismatch { .. } => "TOKEN_MISMATCH",
            EscrowError::Transfer(_) => "TRANSFER_FAILED",
        }
    }
}

/// Failures reported by a [`TokenLedger`](crate::transfer::TokenLedger).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("insufficient funds for {owner} (token {token_id}): requested {requested}, available {available}")]
    InsufficientFunds {
        owner: AccountId,
        token_id: TokenId,
        requested: Amount,
        available: Amount,
    },

    #[error("unknown token id {0}")]
    UnknownToken(TokenId),

    #[error("token balance overflow")]
    Overflow,
}
