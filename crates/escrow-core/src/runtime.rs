//! Operation-group execution.
//!
//! Each entrypoint runs against the escrow state, queues the custody
//! transfer it depends on, and only then hands the queue to the token
//! contract. If the token contract rejects the batch, the sender's balance
//! and checkpoint history are restored to what they were before the
//! entrypoint ran, so callers never observe a balance or checkpoint that is
//! not backed by a completed transfer.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::EscrowError;
use crate::ledger::EscrowState;
use crate::transfer::{TokenLedger, TransferBatch};
use crate::view::{PriorBalance, PriorBalanceSink};
use crate::{AccountId, Amount, BlockHeight};

/// Implicit call parameters: who is calling and at which block.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallContext {
    pub sender: AccountId,
    pub level: BlockHeight,
}

impl CallContext {
    pub fn new(sender: impl Into<AccountId>, level: BlockHeight) -> Self {
        Self {
            sender: sender.into(),
            level,
        }
    }
}

pub struct Escrow<T: TokenLedger> {
    state: EscrowState,
    token: T,
}

impl<T: TokenLedger> Escrow<T> {
    /// Wire `state` to its token contract. The collaborator must be the
    /// contract named in the escrow's configuration.
    pub fn new(state: EscrowState, token: T) -> Result<Self, EscrowError> {
        if token.contract_address() != &state.config.token_contract {
            return Err(EscrowError::TokenMismatch {
                configured: state.config.token_contract.clone(),
                actual: token.contract_address().clone(),
            });
        }
        Ok(Self { state, token })
    }

    pub fn state(&self) -> &EscrowState {
        &self.state
    }

    pub fn token(&self) -> &T {
        &self.token
    }

    pub fn token_mut(&mut self) -> &mut T {
        &mut self.token
    }

    pub fn into_parts(self) -> (EscrowState, T) {
        (self.state, self.token)
    }

    /// Lock `value` tokens of the sender into custody.
    pub fn escrow(&mut self, ctx: &CallContext, value: Amount) -> Result<(), EscrowError> {
        self.execute(ctx, |state| state.deposit(&ctx.sender, value, ctx.level))?;
        info!(sender = %ctx.sender, level = ctx.level, value, "escrowed");
        Ok(())
    }

    /// Return `value` custodied tokens to the sender.
    pub fn release(&mut self, ctx: &CallContext, value: Amount) -> Result<(), EscrowError> {
        self.execute(ctx, |state| state.withdraw(&ctx.sender, value, ctx.level))?;
        info!(sender = %ctx.sender, level = ctx.level, value, "released");
        Ok(())
    }

    /// Current custodied balance of `address`.
    pub fn get_balance(&mut self, address: &AccountId) -> Amount {
        self.state.get_balance(address)
    }

    /// Deliver the balance of `address` as of `level` to `sink`. The level
    /// must be strictly below the caller's current level.
    pub fn get_prior_balance(
        &self,
        ctx: &CallContext,
        address: &AccountId,
        level: BlockHeight,
        sink: &mut impl PriorBalanceSink,
    ) -> Result<(), EscrowError> {
        let result = self.state.prior_balance(address, level, ctx.level)?;
        sink.deliver(PriorBalance {
            address: address.clone(),
            level,
            result,
        });
        Ok(())
    }

    fn execute<F>(&mut self, ctx: &CallContext, entrypoint: F) -> Result<(), EscrowError>
    where
        F: FnOnce(&mut EscrowState) -> Result<TransferBatch, EscrowError>,
    {
        if ctx.level < self.state.meta.level {
            return Err(EscrowError::LevelRegressed {
                last: self.state.meta.level,
                requested: ctx.level,
            });
        }

        // Entrypoints only touch the sender's balance and history.
        let mark = self.state.mark(&ctx.sender);
        let outcome = entrypoint(&mut self.state).and_then(|batch| {
            debug!(
                from = %batch.from,
                token = %self.token.contract_address(),
                amount = batch.total_amount(),
                "submitting custody transfer"
            );
            self.token
                .transfer(std::slice::from_ref(&batch))
                .map_err(EscrowError::from)
        });

        match outcome {
            Ok(()) => {
                self.state.commit(ctx.level);
                Ok(())
            }
            Err(err) => {
                self.state.restore(mark);
                warn!(
                    sender = %ctx.sender,
                    level = ctx.level,
                    code = err.code(),
                    "operation rolled back: {err}"
                );
                Err(err)
            }
        }
    }
}
