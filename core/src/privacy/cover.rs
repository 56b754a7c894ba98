// Cover Fragments: dummy fragments routed alongside real ones
//
// Dummies look like ordinary fragments to every relay: random id, random
// transaction hash, the parent's token type. They carry no value.

use crate::fragment::{random_hex, Amount, Fragment};
use crate::policy::SecurityPolicy;
use rand::Rng;
use std::ops::RangeInclusive;
use std::sync::Arc;

/// How many dummies a single injection produces
pub const DUMMIES_PER_INJECTION: RangeInclusive<usize> = 1..=3;

pub struct DummyFactory {
    policy: Arc<SecurityPolicy>,
}

impl DummyFactory {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        Self { policy }
    }

    /// Roll whether a real fragment gets dummies this time
    ///
    /// Dummies themselves never trigger further injection.
    pub fn should_inject(&self, fragment: &Fragment) -> bool {
        !fragment.is_dummy && rand::thread_rng().gen_bool(self.policy.dummy_fragment_ratio)
    }

    /// Synthesize 1–3 dummies for `parent`
    pub fn synthesize(&self, parent: &Fragment, block_height: u64) -> Vec<Fragment> {
        let count = rand::thread_rng().gen_range(DUMMIES_PER_INJECTION);
        (0..count).map(|_| self.dummy(parent, block_height)).collect()
    }

    fn dummy(&self, parent: &Fragment, block_height: u64) -> Fragment {
        let mut fragment = Fragment::new(
            random_hex(16),
            format!("0x{}", random_hex(32)),
            parent.token_type.clone(),
            Amount::ZERO,
            block_height,
        );
        fragment.is_dummy = true;
        fragment
    }
}
