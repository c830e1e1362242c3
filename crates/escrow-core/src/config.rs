use serde::{Deserialize, Serialize};

use crate::{AccountId, TokenId};

/// Static wiring of an escrow instance. Fixed for the escrow's lifetime.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscrowConfig {
    /// Account that holds custodied tokens.
    #[serde(default = "default_escrow_address")]
    pub escrow_address: AccountId,
    /// Token contract receiving the transfer instructions.
    #[serde(default = "default_token_contract")]
    pub token_contract: AccountId,
    #[serde(default)]
    pub token_id: TokenId,
}

fn default_escrow_address() -> AccountId {
    "escrow".to_string()
}

fn default_token_contract() -> AccountId {
    "token".to_string()
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            escrow_address: default_escrow_address(),
            token_contract: default_token_contract(),
            token_id: 0,
        }
    }
}
