//! Monitoring engine
//!
//! Owns the target registry, the live target states and the result store.
//! Every probe result passes through [`Engine::record`], which evaluates it
//! against the target's state, persists result, state and transition, and
//! publishes the transition to subscribers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info, instrument, trace};

use crate::ProbeResult;
use crate::actors::messages::TransitionEvent;
use crate::config::EngineConfig;
use crate::evaluator::{StateEvaluator, TargetState, Transition};
use crate::registry::TargetRegistry;
use crate::storage::{HistoryQuery, ResultStore, RetryPolicy, StorageResult, UptimeStats};
use crate::target::{Target, TargetFilter};

const EVENT_CAPACITY: usize = 256;

type StateCell = Arc<Mutex<TargetState>>;

pub struct Engine {
    config: EngineConfig,
    registry: TargetRegistry,
    store: Arc<dyn ResultStore>,
    evaluator: StateEvaluator,

    /// One async mutex per target, held across evaluate + persist
    states: RwLock<HashMap<String, StateCell>>,

    events: broadcast::Sender<TransitionEvent>,
    retry: RetryPolicy,
}

impl Engine {
    /// Build the engine and restore the persisted target states
    #[instrument(skip_all)]
    pub async fn open(
        config: EngineConfig,
        targets: Vec<Target>,
        store: Arc<dyn ResultStore>,
    ) -> StorageResult<Self> {
        let registry = TargetRegistry::new(&config);
        registry.replace_all(targets);

        let states: HashMap<String, StateCell> = store
            .load_states()
            .await?
            .into_iter()
            .filter(|state| registry.contains(&state.target_id))
            .map(|state| (state.target_id.clone(), Arc::new(Mutex::new(state))))
            .collect();
        info!("restored {} target states", states.len());

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let retry = RetryPolicy::new(config.store_retries, config.store_backoff());

        Ok(Self {
            evaluator: StateEvaluator::new(config.clone()),
            config,
            registry,
            store,
            states: RwLock::new(states),
            events,
            retry,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &TargetRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    fn state_cell(&self, target_id: &str) -> StateCell {
        if let Some(cell) = self
            .states
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(target_id)
        {
            return cell.clone();
        }

        self.states
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(target_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TargetState::new(target_id))))
            .clone()
    }

    /// Drop the live state of every target that is no longer registered
    fn prune_states(&self) {
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        let before = states.len();
        states.retain(|target_id, _| self.registry.contains(target_id));
        if states.len() < before {
            debug!("dropped {} stale target states", before - states.len());
        }
    }

    /// Evaluate and persist one probe result.
    ///
    /// Results for targets that are no longer registered are discarded. A
    /// write that still fails after the retry budget is logged and dropped;
    /// the in-memory state keeps the sample.
    pub async fn record(&self, result: ProbeResult) -> Option<Transition> {
        let Some(target) = self.registry.get(&result.target_id) else {
            debug!("discarding result for unknown target {}", result.target_id);
            return None;
        };

        let cell = self.state_cell(&target.id);
        let mut state = cell.lock().await;

        let transition = self.evaluator.evaluate(&mut state, &target, &result);
        trace!("{}: recorded {}", target.id, result.outcome);

        if let Err(e) = self
            .retry
            .run("append_result", || self.store.append_result(&result))
            .await
        {
            error!("dropping result of {}: {e}", target.id);
        }

        if let Some(transition) = &transition {
            if let Err(e) = self
                .retry
                .run("append_transition", || self.store.append_transition(transition))
                .await
            {
                error!("dropping transition of {}: {e}", target.id);
            }
        }

        if let Err(e) = self
            .retry
            .run("upsert_state", || self.store.upsert_state(&state))
            .await
        {
            error!("state of {} not persisted: {e}", target.id);
        }

        if let Some(transition) = &transition {
            // no subscribers is fine
            let _ = self.events.send(TransitionEvent::new(target, transition));
        }

        transition
    }

    /// Current state of a registered target; `None` for unknown ids
    pub async fn get_latest_status(&self, target_id: &str) -> Option<TargetState> {
        if !self.registry.contains(target_id) {
            return None;
        }
        let cell = self.state_cell(target_id);
        let state = cell.lock().await.clone();
        Some(state)
    }

    /// Results of a target within `[start, end]`, oldest first
    pub async fn get_history(
        &self,
        target_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<ProbeResult>> {
        self.store
            .query_history(HistoryQuery::new(target_id, start, end))
            .await
    }

    pub fn list_targets(&self, filter: &TargetFilter) -> Vec<Target> {
        self.registry.list(filter)
    }

    pub async fn get_transitions(
        &self,
        target_id: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<Transition>> {
        self.store.query_transitions(target_id, since).await
    }

    pub async fn uptime(
        &self,
        target_id: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<UptimeStats> {
        self.store.calculate_uptime(target_id, since).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.events.subscribe()
    }

    /// Replace the target set. Takes effect on the next scheduler tick;
    /// in-flight probes of removed targets are discarded when they finish.
    /// A removed target that comes back later starts from `unknown`.
    pub fn reload_targets(&self, targets: Vec<Target>) {
        self.registry.replace_all(targets);
        self.prune_states();
    }

    pub fn add_target(&self, target: Target) {
        self.registry.add(target);
    }

    pub fn remove_target(&self, target_id: &str) -> Option<Target> {
        let removed = self.registry.remove(target_id)?;
        self.states
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(target_id);
        Some(removed)
    }

    /// Disabled targets stop being scheduled; their history is kept
    pub fn set_enabled(&self, target_id: &str, enabled: bool) -> bool {
        self.registry.set_enabled(target_id, enabled)
    }

    /// Apply the retention policy
    pub async fn cleanup(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        self.store.cleanup_before(before).await
    }

    pub async fn close(&self) -> StorageResult<()> {
        self.store.close().await
    }
}
