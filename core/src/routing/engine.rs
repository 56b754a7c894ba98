//! Routing Engine: drives a fragment through its lifecycle
//!
//! Lifecycle for every real fragment:
//! 1. **RemixCheck**: a never-remixed fragment older than `forced_remix_blocks`
//!    is remixed once before anything else happens
//! 2. **PathBuilt**: random length in policy bounds, relays drawn from an
//!    overlaid directory snapshot and committed in the connection ledger
//! 3. **Encrypted / Scheduled**: onion layers and per-hop release schedule
//! 4. **DummyInjected**: with probability `dummy_fragment_ratio`, 1-3 dummy
//!    fragments are routed first; dummies never inject again
//! 5. **Persisted / MarkedOnChain**: plan stored, content hash recorded on chain
//!
//! Failures go to the failure handler, whose verdict is the call's outcome.
//!
//! A routed fragment keeps one connection slot per hop, plus the slots of its
//! dummies, until `release_fragment` is called for it.

use crate::fragment::Fragment;
use crate::metrics::{AnonymityMetrics, MetricsSink, NoopMetrics};
use crate::policy::{PolicyError, SecurityPolicy};
use crate::privacy::timing::unix_now;
use crate::privacy::{DummyFactory, OnionEncryptor, TransmissionScheduler};
use crate::relay::{ConnectionLedger, PathDiversityTracker, Relay, RelaySelector};
use crate::routing::path::{Path, Schedule};
use crate::routing::RoutingError;
use crate::services::{FailureHandler, Ledger, PlanStore, RelayDirectory};
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RoutingEngine {
    policy: Arc<SecurityPolicy>,
    history: Arc<PathDiversityTracker>,
    connections: ConnectionLedger,
    /// Relay ids holding a slot for each routed fragment, one entry per slot
    held: DashMap<String, Vec<String>>,
    selector: RelaySelector,
    encryptor: OnionEncryptor,
    scheduler: TransmissionScheduler,
    dummies: DummyFactory,
    directory: Arc<dyn RelayDirectory>,
    store: Arc<dyn PlanStore>,
    ledger: Arc<dyn Ledger>,
    failures: Arc<dyn FailureHandler>,
    metrics: Arc<dyn MetricsSink>,
}

impl RoutingEngine {
    /// Create an engine over the given collaborators
    ///
    /// The policy is validated here so no route call sees an inconsistent one.
    pub fn new(
        policy: SecurityPolicy,
        directory: Arc<dyn RelayDirectory>,
        store: Arc<dyn PlanStore>,
        ledger: Arc<dyn Ledger>,
        failures: Arc<dyn FailureHandler>,
    ) -> Result<Self, PolicyError> {
        policy.validate()?;
        let policy = Arc::new(policy);
        let history = Arc::new(PathDiversityTracker::new());

        Ok(Self {
            selector: RelaySelector::new(policy.clone(), history.clone()),
            encryptor: OnionEncryptor::new(),
            scheduler: TransmissionScheduler::new(policy.clone()),
            dummies: DummyFactory::new(policy.clone()),
            connections: ConnectionLedger::new(),
            held: DashMap::new(),
            policy,
            history,
            directory,
            store,
            ledger,
            failures,
            metrics: Arc::new(NoopMetrics),
        })
    }

    /// Replace the default no-op metrics sink
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn history(&self) -> &PathDiversityTracker {
        &self.history
    }

    pub fn connections(&self) -> &ConnectionLedger {
        &self.connections
    }

    /// Route a single fragment; `true` when it was persisted and marked on chain
    pub async fn route_fragment(&self, fragment: &mut Fragment) -> bool {
        match self.route_real(fragment).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Routing failed for fragment {}: {}", fragment.id, e);
                self.failures.handle_failure(fragment, &e).await
            }
        }
    }

    /// Route distinct fragments concurrently, at most `parallelism` at a time
    ///
    /// Outcomes are returned in input order.
    pub async fn route_all(&self, fragments: &mut [Fragment], parallelism: usize) -> Vec<bool> {
        let mut outcomes: Vec<(usize, bool)> = stream::iter(fragments.iter_mut().enumerate())
            .map(|(index, fragment)| async move { (index, self.route_fragment(fragment).await) })
            .buffer_unordered(parallelism.max(1))
            .collect()
            .await;
        outcomes.sort_unstable_by_key(|(index, _)| *index);
        outcomes.into_iter().map(|(_, ok)| ok).collect()
    }

    /// Give back every connection slot a routed fragment holds
    ///
    /// Called by the transport layer once the fragment has been transmitted.
    /// Returns the number of slots released; zero for an unknown fragment or
    /// one already released.
    pub fn release_fragment(&self, fragment_id: &str) -> usize {
        match self.held.remove(fragment_id) {
            Some((_, relay_ids)) => {
                self.connections
                    .release_all(relay_ids.iter().map(String::as_str));
                debug!(
                    "Released {} slot(s) held by fragment {}",
                    relay_ids.len(),
                    fragment_id
                );
                relay_ids.len()
            }
            None => 0,
        }
    }

    /// Relay ids currently holding a slot for `fragment_id`
    pub fn held_relays(&self, fragment_id: &str) -> Vec<String> {
        self.held
            .get(fragment_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Number of routed fragments whose slots are still held
    pub fn held_fragments(&self) -> usize {
        self.held.len()
    }

    pub fn anonymity_score(&self) -> AnonymityMetrics {
        self.metrics.snapshot()
    }

    async fn route_real(&self, fragment: &mut Fragment) -> Result<(), RoutingError> {
        let (path, schedule, block_height) = self.prepare(fragment).await?;

        let dummy_slots = if self.dummies.should_inject(fragment) {
            self.inject_dummies(fragment, block_height).await
        } else {
            Vec::new()
        };

        match self.commit_or_release(fragment, &path, &schedule).await {
            Ok(()) => {
                let mut slots: Vec<String> = path.relay_ids().map(str::to_string).collect();
                slots.extend(dummy_slots);
                self.held.entry(fragment.id.clone()).or_default().extend(slots);
                Ok(())
            }
            Err(e) => {
                // Dummies only travel alongside a routed parent.
                self.connections
                    .release_all(dummy_slots.iter().map(String::as_str));
                Err(e)
            }
        }
    }

    /// Route dummies for `parent`; their failures never fail the parent
    ///
    /// Returns the relay ids of the slots the routed dummies hold.
    async fn inject_dummies(&self, parent: &Fragment, block_height: u64) -> Vec<String> {
        let dummies = self.dummies.synthesize(parent, block_height);
        debug!(
            "Injecting {} dummy fragment(s) for {}",
            dummies.len(),
            parent.id
        );
        let mut slots = Vec::new();
        for mut dummy in dummies {
            match self.route_dummy(&mut dummy).await {
                Ok(relay_ids) => slots.extend(relay_ids),
                Err(e) => {
                    warn!("Dummy fragment {} failed: {}", dummy.id, e);
                    self.failures.handle_failure(&dummy, &e).await;
                }
            }
        }
        slots
    }

    async fn route_dummy(&self, dummy: &mut Fragment) -> Result<Vec<String>, RoutingError> {
        let (path, schedule, _) = self.prepare(dummy).await?;
        self.commit_or_release(dummy, &path, &schedule).await?;
        Ok(path.relay_ids().map(str::to_string).collect())
    }

    /// Remix check, path construction, encryption and scheduling
    ///
    /// On success the path's relays hold a committed connection slot.
    async fn prepare(&self, fragment: &mut Fragment) -> Result<(Path, Schedule, u64), RoutingError> {
        let block_height = self.ledger.current_block_height().await?;
        self.remix_if_stale(fragment, block_height);

        let hops = rand::thread_rng()
            .gen_range(self.policy.min_path_length..=self.policy.max_path_length);
        let listed = self.directory.list_available_relays().await?;
        let snapshot: Vec<Relay> = listed
            .iter()
            .map(|relay| self.connections.overlay(relay))
            .collect();

        // Commit against the directory's own counts; the ledger adds its share.
        let relays: Vec<Relay> = self
            .selector
            .select(&snapshot, hops)?
            .iter()
            .filter_map(|chosen| listed.iter().find(|r| r.id == chosen.id).cloned())
            .collect();
        self.connections
            .try_commit_all(&relays, self.policy.max_relay_connections)
            .map_err(RoutingError::RelaySaturated)?;
        debug!("Selected {} relays for fragment {}", relays.len(), fragment.id);

        let mut path = Path::new(
            fragment.id.clone(),
            relays,
            unix_now(),
            self.policy.path_ttl_secs,
        );
        match self.seal_and_schedule(&mut path) {
            Ok(schedule) => Ok((path, schedule, block_height)),
            Err(e) => {
                self.release_path(&path);
                Err(e)
            }
        }
    }

    fn release_path(&self, path: &Path) {
        self.connections.release_all(path.relay_ids());
    }

    fn remix_if_stale(&self, fragment: &mut Fragment, block_height: u64) {
        // Bounded: the condition no longer holds once remix_count is 1.
        while fragment.remix_count == 0
            && fragment.age(block_height) > self.policy.forced_remix_blocks
        {
            fragment.remix_count += 1;
            debug!(
                "Forced remix of fragment {} (age {} blocks)",
                fragment.id,
                fragment.age(block_height)
            );
        }
    }

    fn seal_and_schedule(&self, path: &mut Path) -> Result<Schedule, RoutingError> {
        path.onion_layers = self.encryptor.build_layers(path)?;
        path.check_invariants(&self.policy)
            .map_err(RoutingError::PolicyViolation)?;
        debug!(
            "Built {} onion layers for fragment {}",
            path.onion_layers.len(),
            path.fragment_id
        );

        let schedule = self.scheduler.schedule(path);
        if !schedule.is_consistent(path.len()) {
            return Err(RoutingError::PolicyViolation(format!(
                "schedule for {} does not match {} hops",
                path.fragment_id,
                path.len()
            )));
        }
        debug!(
            "Scheduled fragment {} in {} (base delay {}s)",
            path.fragment_id, schedule.batch_id, schedule.base_delay
        );
        Ok(schedule)
    }

    async fn commit_or_release(
        &self,
        fragment: &mut Fragment,
        path: &Path,
        schedule: &Schedule,
    ) -> Result<(), RoutingError> {
        let result = self.commit(fragment, path, schedule).await;
        if result.is_err() {
            self.release_path(path);
        }
        result
    }

    /// Persist, mark on chain, then record history and metrics
    async fn commit(
        &self,
        fragment: &mut Fragment,
        path: &Path,
        schedule: &Schedule,
    ) -> Result<(), RoutingError> {
        let content_hash = self.store.store(fragment, path, schedule).await?;
        fragment.metadata_hash = Some(content_hash.clone());

        let receipt = self.ledger.mark_routed(&fragment.id, &content_hash).await?;
        if !receipt.is_success() {
            warn!(
                "Ledger rejected mark for fragment {} at block {}",
                fragment.id, receipt.block_height
            );
            return Err(RoutingError::OnChain(format!(
                "mark_routed for {} was not successful",
                fragment.id
            )));
        }

        self.history.record_path(path.relay_ids(), &fragment.id);
        self.metrics.update(path, schedule);
        info!(
            "Routed {}fragment {} over {} hops (plan {})",
            if fragment.is_dummy { "dummy " } else { "" },
            fragment.id,
            path.len(),
            content_hash
        );
        Ok(())
    }
}
