use crate::completion::{completion_channel, CompletionReceiver, PacingMode, WaitOutcome};
use crate::config::WorkloadConfig;
use crate::distribution::TransactionDistribution;
use crate::error::WorkloadError;
use crate::idle_pool::IdlePool;
use crate::interval::Interval;
use crate::keygen::{build_generator, KeyDistribution, KeyGenerator};
use crate::tracker::TransactionTracker;
use crate::types::{RunWindow, TransactionMark, TransactionType};
use crate::worker::{WorkerFacade, WorkerTransport};
use futures_util::FutureExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one run: `Configured -> Running -> Draining -> Done`.
/// `set_up` moves any non-running state back to `Configured`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    Configured,
    Running,
    Draining,
    Done,
}

impl ManagerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerState::Configured => "configured",
            ManagerState::Running => "running",
            ManagerState::Draining => "draining",
            ManagerState::Done => "done",
        }
    }
}

/// Per-run emission statistics, cleared by `set_up`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    /// Dispatches per transaction type.
    pub dispatched: BTreeMap<TransactionType, u64>,
    /// How often each seller id was targeted.
    pub seller_hits: BTreeMap<u64, u64>,
    /// Ticks skipped because the draw matched no table row.
    pub no_match_ticks: u64,
    /// Customer sessions still waiting for a free customer when the run
    /// closed the pool. Dispatched but never submitted.
    pub abandoned_sessions: u64,
}

impl RunStats {
    pub fn total_dispatched(&self) -> u64 {
        self.dispatched.values().sum()
    }

    /// Dispatches that reached the worker façade.
    pub fn total_submitted(&self) -> u64 {
        self.total_dispatched().saturating_sub(self.abandoned_sessions)
    }
}

/// Closed-loop emission engine.
///
/// One control task picks transaction types and targets, hands each one to
/// its own tokio task through the worker façade, and paces itself on the
/// completion channel: after warm-up it submits one transaction per
/// completion token, so outstanding work stays near `concurrency_level`.
pub struct WorkloadManager {
    config: WorkloadConfig,
    distribution: TransactionDistribution,
    facade: WorkerFacade,
    tracker: Arc<TransactionTracker>,
    seller_gen: Box<dyn KeyGenerator>,
    rng: StdRng,
    next_tid: u64,
    runs: u64,
    state: ManagerState,
    stats: RunStats,
    // Bumped by dispatch tasks, so it lives outside `stats`.
    abandoned: Arc<AtomicU64>,
    pool: Option<Arc<IdlePool>>,
    shutdown: CancellationToken,
}

impl WorkloadManager {
    /// Validate `config` and prepare the first run with its seller settings.
    ///
    /// Cancelling `shutdown` (target unreachable, operator interrupt)
    /// abandons the current run.
    pub fn new(
        config: WorkloadConfig,
        transport: Arc<dyn WorkerTransport>,
        tracker: Arc<TransactionTracker>,
        shutdown: CancellationToken,
    ) -> Result<Self, WorkloadError> {
        config.validate()?;
        let seller_gen = build_generator(
            config.seller_distribution,
            config.seller_range,
            &config.key_params(),
            derive_seed(config.seed, 0),
        )?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            distribution: config.transaction_distribution.clone(),
            facade: WorkerFacade::new(transport, Arc::clone(&tracker)),
            tracker,
            seller_gen,
            rng,
            next_tid: 1,
            runs: 0,
            state: ManagerState::Configured,
            stats: RunStats::default(),
            abandoned: Arc::new(AtomicU64::new(0)),
            pool: None,
            shutdown,
            config,
        })
    }

    /// Rebuild the seller key generator for the next run, hand the new
    /// seller population to the transport and clear per-run statistics and
    /// transaction records.
    pub fn set_up(
        &mut self,
        key_distribution: KeyDistribution,
        seller_range: Interval,
    ) -> Result<(), WorkloadError> {
        if self.state == ManagerState::Running {
            return Err(WorkloadError::InvalidState {
                action: "set up",
                state: self.state.as_str(),
            });
        }
        let seed = derive_seed(self.config.seed, self.runs);
        let seller_gen = build_generator(
            key_distribution,
            seller_range,
            &self.config.key_params(),
            seed,
        )?;
        self.facade.set_up_transport(seller_range, seed)?;
        self.seller_gen = seller_gen;
        self.config.seller_distribution = key_distribution;
        self.config.seller_range = seller_range;
        self.stats = RunStats::default();
        self.abandoned.store(0, Ordering::Relaxed);
        self.tracker.reset();
        self.state = ManagerState::Configured;
        tracing::info!(
            distribution = ?key_distribution,
            sellers_min = seller_range.min(),
            sellers_max = seller_range.max(),
            "workload set up"
        );
        Ok(())
    }

    /// Run the closed loop for `execution_time_ms` and return the window.
    ///
    /// Always yields a window once started, including when the shutdown
    /// token cuts the run short. In-flight transactions keep running after
    /// return and can still complete through the tracker.
    pub async fn run(&mut self) -> Result<RunWindow, WorkloadError> {
        if self.state != ManagerState::Configured {
            return Err(WorkloadError::InvalidState {
                action: "run",
                state: self.state.as_str(),
            });
        }

        let (sender, mut completions) = completion_channel();
        self.tracker.begin_run(sender);
        let pool = IdlePool::new(self.config.customer_range);
        self.pool = Some(Arc::clone(&pool));
        self.state = ManagerState::Running;

        let concurrency = self.config.concurrency_level;
        let start = SystemTime::now();
        let deadline = Instant::now() + self.config.execution_time();

        tracing::info!(
            concurrency,
            execution_time_ms = self.config.execution_time_ms,
            delay_ms = self.config.delay_between_requests_ms,
            pacing = ?self.config.pacing,
            transport = self.facade.transport_name(),
            "run starting"
        );

        let mut aborted_early = false;
        for _ in 0..concurrency {
            if self.shutdown.is_cancelled() {
                aborted_early = true;
                break;
            }
            self.submit_next(&pool);
        }
        tracing::debug!(dispatched = self.stats.total_dispatched(), "warm-up done");

        if !aborted_early {
            aborted_early = self.steady_state(&pool, &mut completions, deadline).await;
        }

        let finish = SystemTime::now();
        self.state = ManagerState::Draining;
        pool.close();
        self.tracker.end_run();
        self.runs += 1;
        self.state = ManagerState::Done;

        let window = RunWindow {
            start,
            finish,
            aborted_early,
        };
        if aborted_early {
            tracing::warn!(
                elapsed_ms = window.duration().as_millis() as u64,
                dispatched = self.stats.total_dispatched(),
                "run abandoned before deadline"
            );
        } else {
            tracing::info!(
                elapsed_ms = window.duration().as_millis() as u64,
                dispatched = self.stats.total_dispatched(),
                "run finished"
            );
        }
        Ok(window)
    }

    /// Returns true when the shutdown token ended the loop.
    async fn steady_state(
        &mut self,
        pool: &Arc<IdlePool>,
        completions: &mut CompletionReceiver,
        deadline: Instant,
    ) -> bool {
        let delay = self.config.delay_between_requests();
        let mode: PacingMode = self.config.pacing;
        let shutdown = self.shutdown.clone();

        while Instant::now() < deadline {
            if !self.submit_next(pool) {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return true,
                outcome = completions.wait_until(deadline, mode) => match outcome {
                    WaitOutcome::Completed => {}
                    WaitOutcome::DeadlineReached => return false,
                    WaitOutcome::Closed => {
                        tracing::warn!("completion channel closed mid-run");
                        return false;
                    }
                },
            }

            if !delay.is_zero() {
                let wake = (Instant::now() + delay).min(deadline);
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return true,
                    _ = tokio::time::sleep_until(wake) => {}
                }
            }
        }
        shutdown.is_cancelled()
    }

    /// Pick and dispatch one transaction. False on a no-match draw.
    fn submit_next(&mut self, pool: &Arc<IdlePool>) -> bool {
        let tx_type = self.distribution.pick_next(&mut self.rng);
        if tx_type == TransactionType::None {
            self.stats.no_match_ticks += 1;
            tracing::warn!("draw matched no distribution row; skipping tick");
            return false;
        }

        let tid = self.next_tid.to_string();
        self.next_tid += 1;
        *self.stats.dispatched.entry(tx_type).or_insert(0) += 1;
        let facade = self.facade.clone();

        match tx_type {
            TransactionType::CustomerSession => {
                let pool = Arc::clone(pool);
                let abandoned = Arc::clone(&self.abandoned);
                let task_tid = tid.clone();
                self.spawn_dispatch(tid, tx_type, 0, async move {
                    match pool.checkout().await {
                        Ok(lease) => facade.run_customer_transaction(lease, task_tid).await,
                        Err(e) => {
                            abandoned.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(tid = %task_tid, error = %e, "customer session dropped before checkout")
                        }
                    }
                });
            }
            TransactionType::QueryDashboard
            | TransactionType::PriceUpdate
            | TransactionType::UpdateProduct => {
                let seller_id = self.seller_gen.next_value();
                *self.stats.seller_hits.entry(seller_id).or_insert(0) += 1;
                let task_tid = tid.clone();
                self.spawn_dispatch(tid, tx_type, seller_id, async move {
                    facade
                        .run_seller_transaction(seller_id, task_tid, tx_type)
                        .await
                });
            }
            TransactionType::UpdateDelivery => {
                let task_tid = tid.clone();
                self.spawn_dispatch(tid, tx_type, 0, async move {
                    facade.run_delivery_transaction(task_tid).await
                });
            }
            TransactionType::None => unreachable!("handled above"),
        }
        true
    }

    /// Run `fut` on its own task. A panic inside it is logged and recorded
    /// as an abort so the loop and the pacing carry on.
    fn spawn_dispatch<F>(&self, tid: String, tx_type: TransactionType, actor_id: u64, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let tracker = Arc::clone(&self.tracker);
        tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
                tracing::error!(
                    tid = %tid,
                    tx_type = %tx_type,
                    thread = ?std::thread::current().id(),
                    panic = panic_message(panic.as_ref()),
                    "dispatch panicked"
                );
                let mark = TransactionMark::abort(tid, tx_type, actor_id, "dispatch");
                if !tracker.abort(mark.clone()) {
                    tracker.abort_unsubmitted(mark);
                }
            }
        });
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    /// Snapshot of the current run's statistics.
    pub fn stats(&self) -> RunStats {
        RunStats {
            abandoned_sessions: self.abandoned.load(Ordering::Relaxed),
            ..self.stats.clone()
        }
    }

    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<TransactionTracker> {
        &self.tracker
    }

    /// Idle pool of the current or most recent run.
    pub fn idle_pool(&self) -> Option<&Arc<IdlePool>> {
        self.pool.as_ref()
    }
}

fn derive_seed(base: Option<u64>, run: u64) -> Option<u64> {
    base.map(|s| s.wrapping_add(run.wrapping_mul(0x9E37_79B9_7F4A_7C15)))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
