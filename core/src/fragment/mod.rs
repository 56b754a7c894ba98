// Fragments: discrete units of value routed independently
//
// Fragments are produced upstream by splitting a user total. Only the routing
// engine mutates them afterwards (remix counter, metadata hash).

pub mod amount;
pub mod split;

pub use amount::{Amount, AmountError, AMOUNT_DECIMALS};
pub use split::{split_amount, split_amount_with_rng, SplitError, DEFAULT_SPLIT_PARTS};

use rand::RngCore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    /// Unique fragment identifier
    pub id: String,
    /// Hash of the transaction this fragment was split from
    pub tx_hash: String,
    /// Token the amount is denominated in
    pub token_type: String,
    pub amount: Amount,
    /// Block height at which the fragment was created
    pub timestamp: u64,
    /// Content hash of the stored routing plan, set once routed
    pub metadata_hash: Option<String>,
    pub is_dummy: bool,
    /// Number of forced remixes applied so far
    pub remix_count: u32,
}

impl Fragment {
    pub fn new(
        id: impl Into<String>,
        tx_hash: impl Into<String>,
        token_type: impl Into<String>,
        amount: Amount,
        timestamp: u64,
    ) -> Self {
        Self {
            id: id.into(),
            tx_hash: tx_hash.into(),
            token_type: token_type.into(),
            amount,
            timestamp,
            metadata_hash: None,
            is_dummy: false,
            remix_count: 0,
        }
    }

    /// Build one fragment per amount, all tied to the same transaction
    pub fn from_split(
        tx_hash: &str,
        token_type: &str,
        amounts: &[Amount],
        block_height: u64,
    ) -> Vec<Fragment> {
        amounts
            .iter()
            .map(|amount| Fragment::new(random_hex(16), tx_hash, token_type, *amount, block_height))
            .collect()
    }

    /// Blocks elapsed since creation
    pub fn age(&self, current_block_height: u64) -> u64 {
        current_block_height.saturating_sub(self.timestamp)
    }

    pub fn is_routed(&self) -> bool {
        self.metadata_hash.is_some()
    }
}

/// Hex string of `len` random bytes
pub(crate) fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_new_is_unrouted() {
        let fragment = Fragment::new("f1", "0xabc", "ETH", Amount::ZERO, 10);
        assert!(!fragment.is_routed());
        assert!(!fragment.is_dummy);
        assert_eq!(fragment.remix_count, 0);
    }

    #[test]
    fn test_fragment_age_saturates() {
        let fragment = Fragment::new("f1", "0xabc", "ETH", Amount::ZERO, 500);
        assert_eq!(fragment.age(650), 150);
        assert_eq!(fragment.age(100), 0);
    }

    #[test]
    fn test_from_split_unique_ids() {
        let amounts = vec![Amount::from_base_units(1), Amount::from_base_units(2)];
        let fragments = Fragment::from_split("0xabc", "ETH", &amounts, 3);
        assert_eq!(fragments.len(), 2);
        assert_ne!(fragments[0].id, fragments[1].id);
        assert_eq!(fragments[0].id.len(), 32);
        assert_eq!(fragments[1].amount, amounts[1]);
    }
}
