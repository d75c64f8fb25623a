//! SchedulerActor - drives the fast and slow check classes
//!
//! ## Message Flow
//!
//! ```text
//! Fast/slow tick → take_due → probe tasks (semaphore) → Engine::record → TransitionEvent
//!     ↑
//!     └─── Commands (RunNow, Shutdown)
//! ```
//!
//! Every batch runs as its own task so the two classes never wait for each
//! other. A class whose previous batch is still running skips its tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::ProbeResult;
use crate::clock::Clock;
use crate::engine::Engine;
use crate::error::MonitorError;
use crate::probe::ProberSet;
use crate::target::CheckClass;

use super::messages::{SchedulerCommand, TickReport};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Clears the running flag of a class when its batch ends, even on panic
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Dispatches due targets to their probers under a shared concurrency limit
pub struct Scheduler {
    engine: Arc<Engine>,
    probers: ProberSet,
    clock: Arc<dyn Clock>,
    permits: Arc<Semaphore>,
    running_fast: AtomicBool,
    running_slow: AtomicBool,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, probers: ProberSet, clock: Arc<dyn Clock>) -> Self {
        let permits = Arc::new(Semaphore::new(engine.config().concurrency_limit()));
        Self {
            engine,
            probers,
            clock,
            permits,
            running_fast: AtomicBool::new(false),
            running_slow: AtomicBool::new(false),
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn running(&self, class: CheckClass) -> &AtomicBool {
        match class {
            CheckClass::Fast => &self.running_fast,
            CheckClass::Slow => &self.running_slow,
        }
    }

    /// Probe every due target of `class` and wait for all of them.
    ///
    /// Each probe task records its own result as soon as it finishes, so a
    /// slow target never delays the evaluation of the others.
    #[instrument(skip(self))]
    pub async fn run_tick(&self, class: CheckClass) -> Result<TickReport, MonitorError> {
        let running = self.running(class);
        if running.swap(true, Ordering::AcqRel) {
            return Err(MonitorError::SchedulerOverrun(class));
        }
        let _guard = RunningGuard(running);

        let due = self.engine.registry().take_due(class, self.clock.now());
        if due.is_empty() {
            trace!("no {class} targets due");
            return Ok(TickReport::default());
        }
        debug!("dispatching {} {class} probes", due.len());

        let mut report = TickReport {
            dispatched: due.len(),
            ..Default::default()
        };
        let mut tasks = JoinSet::new();
        let mut task_targets = HashMap::with_capacity(due.len());

        for target in due {
            let engine = self.engine.clone();
            let prober = self.probers.for_target(&target);
            let permits = self.permits.clone();
            let clock = self.clock.clone();
            let target_id = target.id.clone();

            let handle = tasks.spawn(async move {
                // the semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                let result = prober.probe(&target, clock.now()).await;
                let succeeded = result.outcome.is_success();
                let transition = engine.record(result).await;
                (succeeded, transition.is_some())
            });
            task_targets.insert(handle.id(), target_id);
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((succeeded, transitioned)) => {
                    if succeeded {
                        report.succeeded += 1;
                    } else {
                        report.failed += 1;
                    }
                    report.transitions += usize::from(transitioned);
                }
                Err(e) => {
                    report.failed += 1;
                    report.panicked += 1;

                    let Some(target_id) = task_targets.get(&e.id()) else {
                        error!("probe task failed: {e}");
                        continue;
                    };
                    error!("probe task of {target_id} failed: {e}");

                    let failure = MonitorError::protocol(format!("probe task failed: {e}"));
                    let result =
                        ProbeResult::failure(target_id.clone(), self.clock.now(), &failure);
                    if self.engine.record(result).await.is_some() {
                        report.transitions += 1;
                    }
                }
            }
        }

        debug!(
            "{class} batch done: {} ok, {} failed, {} transitions",
            report.succeeded, report.failed, report.transitions
        );
        Ok(report)
    }
}

/// Actor owning the interval timers of both check classes
pub struct SchedulerActor {
    scheduler: Arc<Scheduler>,

    command_rx: mpsc::Receiver<SchedulerCommand>,

    /// In-flight batches; awaited on shutdown
    batches: JoinSet<()>,

    /// Results older than this are deleted daily
    retention: Option<chrono::Duration>,
}

impl SchedulerActor {
    pub fn new(
        scheduler: Arc<Scheduler>,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        retention_days: Option<u32>,
    ) -> Self {
        Self {
            scheduler,
            command_rx,
            batches: JoinSet::new(),
            retention: retention_days.map(|days| chrono::Duration::days(days as i64)),
        }
    }

    fn start_batch(
        &mut self,
        class: CheckClass,
        respond_to: Option<oneshot::Sender<Result<TickReport, MonitorError>>>,
    ) {
        let scheduler = self.scheduler.clone();
        self.batches.spawn(async move {
            let outcome = scheduler.run_tick(class).await;
            if let Err(e @ MonitorError::SchedulerOverrun(_)) = &outcome {
                warn!("{e}");
            }
            if let Some(respond_to) = respond_to {
                let _ = respond_to.send(outcome);
            }
        });
    }

    async fn run_cleanup(&self) {
        let Some(retention) = self.retention else {
            return;
        };
        let before = self.scheduler.clock.now() - retention;

        match self.scheduler.engine.cleanup(before).await {
            Ok(deleted) => info!("retention cleanup removed {deleted} results"),
            Err(e) => error!("retention cleanup failed: {e}"),
        }
    }

    /// Run the actor's main loop until Shutdown or until every handle is dropped
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        let config = self.scheduler.engine.config().clone();
        info!(
            "starting scheduler (fast every {:?}, slow every {:?}, {} concurrent probes)",
            config.interval(CheckClass::Fast),
            config.interval(CheckClass::Slow),
            config.concurrency_limit()
        );

        let mut fast = interval(config.interval(CheckClass::Fast));
        fast.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut slow = interval(config.interval(CheckClass::Slow));
        slow.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cleanup = interval(CLEANUP_INTERVAL);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = fast.tick() => self.start_batch(CheckClass::Fast, None),

                _ = slow.tick() => self.start_batch(CheckClass::Slow, None),

                _ = cleanup.tick(), if self.retention.is_some() => self.run_cleanup().await,

                Some(joined) = self.batches.join_next(), if !self.batches.is_empty() => {
                    if let Err(e) = joined {
                        error!("scheduler batch failed: {e}");
                    }
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(SchedulerCommand::RunNow { class, respond_to }) => {
                        debug!("received RunNow command for {class}");
                        self.start_batch(class, Some(respond_to));
                    }
                    Some(SchedulerCommand::Shutdown) => {
                        debug!("received shutdown command");
                        break;
                    }
                    None => {
                        warn!("command channel closed, shutting down");
                        break;
                    }
                },
            }
        }

        if !self.batches.is_empty() {
            info!("waiting for {} in-flight batches", self.batches.len());
        }
        while let Some(joined) = self.batches.join_next().await {
            if let Err(e) = joined {
                error!("scheduler batch failed: {e}");
            }
        }

        info!("scheduler stopped");
    }
}

/// Handle for controlling a SchedulerActor
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Spawn the scheduler actor and return its handle
    pub fn spawn(scheduler: Arc<Scheduler>, retention_days: Option<u32>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = SchedulerActor::new(scheduler, cmd_rx, retention_days);
        let task = tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            task,
        }
    }

    /// Run a batch of `class` now and wait for its report
    pub async fn run_now(&self, class: CheckClass) -> Result<TickReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::RunNow {
                class,
                respond_to: tx,
            })
            .await
            .context("failed to send RunNow command")?;

        let report = rx.await.context("failed to receive response")??;
        Ok(report)
    }

    /// Stop the timers and wait until in-flight batches have finished
    pub async fn shutdown(self) -> Result<()> {
        self.sender
            .send(SchedulerCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        self.task.await.context("scheduler task failed")?;
        Ok(())
    }
}
