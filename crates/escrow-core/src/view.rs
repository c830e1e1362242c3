use serde::{Deserialize, Serialize};

use crate::{AccountId, Amount, BlockHeight};

/// Answer to a historical balance query.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriorBalance {
    pub address: AccountId,
    pub level: BlockHeight,
    pub result: Amount,
}

/// Receiver supplied by the caller of a historical query.
pub trait PriorBalanceSink {
    fn deliver(&mut self, view: PriorBalance);
}

/// Sink that keeps the most recently delivered answer.
#[derive(Clone, Debug, Default)]
pub struct Viewer {
    last: Option<PriorBalance>,
}

impl Viewer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&PriorBalance> {
        self.last.as_ref()
    }

    /// Balance carried by the last answer, if any.
    pub fn last_result(&self) -> Option<Amount> {
        self.last.as_ref().map(|view| view.result)
    }
}

impl PriorBalanceSink for Viewer {
    fn deliver(&mut self, view: PriorBalance) {
        self.last = Some(view);
    }
}

impl<F> PriorBalanceSink for F
where
    F: FnMut(PriorBalance),
{
    fn deliver(&mut self, view: PriorBalance) {
        self(view)
    }
}
