// Transmission Scheduling: per-hop delays, jitter and cover flags
//
// Every hop shares one base delay drawn from the batch window. On top of it
// each hop adds an exponentially distributed component scaled by (1 + U),
// U uniform in [-jitter, jitter], which can only lengthen the delay since
// jitter < 1.

use crate::policy::SecurityPolicy;
use crate::routing::path::{Path, Schedule};
use rand::Rng;
use rand_distr::{Distribution, Exp};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub struct TransmissionScheduler {
    policy: Arc<SecurityPolicy>,
}

impl TransmissionScheduler {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        Self { policy }
    }

    /// Build a schedule for `path` at the current wall-clock time
    pub fn schedule(&self, path: &Path) -> Schedule {
        self.schedule_at(path, unix_now())
    }

    /// Build a schedule for `path` as of `now` (unix seconds)
    pub fn schedule_at(&self, path: &Path, now: u64) -> Schedule {
        let mut rng = rand::thread_rng();
        let policy = &self.policy;
        let hops = path.len();
        let jitter_bound = policy.timing_jitter;

        let base_delay = rng.gen_range(policy.min_batch_window..=policy.max_batch_window);
        // Mean is validated positive, so the rate is finite and > 0.
        let exp = Exp::new(1.0 / policy.exp_delay_mean_secs).ok();

        let mut delays = Vec::with_capacity(hops);
        let mut cover_traffic = Vec::with_capacity(hops);
        let mut jitter = Vec::with_capacity(hops);

        for _ in 0..hops {
            let component = exp.as_ref().map(|d| d.sample(&mut rng)).unwrap_or(0.0);
            let scale = 1.0 + uniform_symmetric(&mut rng, jitter_bound);
            delays.push(base_delay + (component * scale).max(0.0) as u64);

            cover_traffic.push(rng.gen_bool(policy.cover_traffic_ratio));
            jitter.push(uniform_symmetric(&mut rng, jitter_bound));
        }

        Schedule {
            path_id: path.fragment_id.clone(),
            base_delay,
            delays,
            cover_traffic,
            batch_id: self.batch_id_at(now, &mut rng),
            jitter,
        }
    }

    /// Batch identifier for `now`
    ///
    /// The bucket width is drawn anew on every call, so two fragments
    /// scheduled in the same second may land in different batches.
    fn batch_id_at<R: Rng + ?Sized>(&self, now: u64, rng: &mut R) -> String {
        let window = rng.gen_range(self.policy.min_batch_window..=self.policy.max_batch_window);
        format!("batch_{}", now / window.max(1))
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }
}

fn uniform_symmetric<R: Rng + ?Sized>(rng: &mut R, bound: f64) -> f64 {
    if bound <= 0.0 {
        return 0.0;
    }
    rng.gen_range(-bound..=bound)
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
