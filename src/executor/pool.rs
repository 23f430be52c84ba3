//! Worker Pool Implementation
//!
//! Runs the ingestion pipeline while the node is Running. A distributor task
//! feeds active task kinds, in priority order, into a one-slot work queue;
//! workers take a kind, aggregate its ready batches and push each resulting
//! update to the sink, one rate-limiter permit per update.
//!
//! ## Responsibilities
//! - **Resizing**: growing spawns workers; shrinking is voluntary, a worker
//!   leaves between units when there are more workers than the target.
//! - **Cancellation**: the running flag is checked before every unit. A run
//!   generation is packed together with the live counter so workers of an
//!   old run can never disturb the count of a new one.
//! - **Configuration changes**: a watch channel carries an epoch counter.
//!   Bumping it wakes idle workers so they re-read the active kinds and the
//!   target. Permit waiters keep their reserved slot unless the limiter
//!   itself was replaced or the run ended.
//! - **Retry**: a sink timeout triggers one reconnect and a fresh attempt.

use super::aggregate::aggregate;
use super::limiter::RateLimiter;
use super::sink::SinkHandle;
use super::source::RecordSource;
use super::types::{PoolTargets, SinkUpdate, TaskKind};
use crate::bus::{Event, MessageBus};
use crate::state::FleetState;

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

/// How long a sweep with nothing eligible waits before looking again.
const IDLE_SWEEP_WAIT: Duration = Duration::from_millis(100);
/// Pause after a kind turned out to have no ready batches.
const EMPTY_KIND_BACKOFF: Duration = Duration::from_millis(50);

type WorkQueue = Arc<tokio::sync::Mutex<mpsc::Receiver<TaskKind>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    /// Part of the continuous run with this generation.
    Run(u64),
    /// A single synchronous pass outside any run.
    Once,
}

enum Gate {
    Proceed,
    /// Kind was deactivated; move on to the next kind.
    Skip,
    /// This worker must stop.
    Exit,
}

enum Permit {
    Granted,
    /// SET_RATE swapped the limiter; reserve again on the new one.
    Replaced,
    Cancelled,
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// Live worker count tagged with the run generation it belongs to.
///
/// Upper 32 bits hold the generation, lower 32 bits the count, so every
/// update can check the generation atomically.
struct Generation(AtomicU64);

impl Generation {
    fn pack(run: u64, live: usize) -> u64 {
        (run << 32) | (live as u64 & 0xffff_ffff)
    }

    fn unpack(word: u64) -> (u64, usize) {
        (word >> 32, (word & 0xffff_ffff) as usize)
    }

    fn run(&self) -> u64 {
        Self::unpack(self.0.load(Ordering::SeqCst)).0
    }

    fn live(&self) -> usize {
        Self::unpack(self.0.load(Ordering::SeqCst)).1
    }

    /// Starts a new generation with no workers.
    fn begin(&self) -> u64 {
        let run = (self.run() + 1) & 0xffff_ffff;
        self.0.store(Self::pack(run, 0), Ordering::SeqCst);
        run
    }

    fn update(&self, run: u64, f: impl Fn(usize) -> Option<usize>) -> Option<usize> {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |word| {
                let (current, live) = Self::unpack(word);
                if current != run {
                    return None;
                }
                f(live).map(|next| Self::pack(run, next))
            })
            .ok()
            .map(|previous| Self::unpack(previous).1)
    }

    fn add(&self, run: u64) -> bool {
        self.update(run, |live| Some(live + 1)).is_some()
    }

    fn zero(&self, run: u64) {
        self.update(run, |_| Some(0));
    }

    /// Removes one worker if the count is above `target`. Returns the new count.
    fn volunteer(&self, run: u64, target: usize) -> Option<usize> {
        self.update(run, |live| (live > target).then(|| live - 1))
            .map(|previous| previous - 1)
    }

    fn retire(&self, run: u64) {
        self.update(run, |live| Some(live.saturating_sub(1)));
    }
}

pub struct WorkerPool {
    state: Arc<FleetState>,
    bus: Arc<MessageBus>,
    sink: Arc<SinkHandle>,
    source: Arc<dyn RecordSource>,
    targets: Arc<PoolTargets>,
    running: AtomicBool,
    generation: Generation,
    limiter: RwLock<Arc<RateLimiter>>,
    epoch: watch::Sender<u64>,
    completed: AtomicU64,
    queue: Mutex<Option<WorkQueue>>,
    workers: tokio::sync::Mutex<JoinSet<()>>,
    next_worker_id: AtomicUsize,
}

impl WorkerPool {
    pub fn new(
        state: Arc<FleetState>,
        bus: Arc<MessageBus>,
        sink: Arc<SinkHandle>,
        source: Arc<dyn RecordSource>,
        targets: Arc<PoolTargets>,
    ) -> Arc<Self> {
        let limiter = Arc::new(RateLimiter::new(targets.rate()));
        let (epoch, _) = watch::channel(0);

        Arc::new(Self {
            state,
            bus,
            sink,
            source,
            targets,
            running: AtomicBool::new(false),
            generation: Generation(AtomicU64::new(0)),
            limiter: RwLock::new(limiter),
            epoch,
            completed: AtomicU64::new(0),
            queue: Mutex::new(None),
            workers: tokio::sync::Mutex::new(JoinSet::new()),
            next_worker_id: AtomicUsize::new(0),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn live_workers(&self) -> usize {
        self.generation.live()
    }

    pub fn targets(&self) -> &Arc<PoolTargets> {
        &self.targets
    }

    /// Returns and resets the number of units completed since the last call.
    pub fn take_completed(&self) -> u64 {
        self.completed.swap(0, Ordering::SeqCst)
    }

    /// Begins a continuous run. Returns false if one is already going.
    pub async fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let run = self.generation.begin();
        let (tx, rx) = mpsc::channel(1);
        let queue: WorkQueue = Arc::new(tokio::sync::Mutex::new(rx));
        *self.queue.lock() = Some(queue.clone());

        tracing::info!("Starting run {}", run);

        let pool = self.clone();
        tokio::spawn(async move {
            pool.distribute(run, tx).await;
        });

        self.grow(run, queue).await;
        true
    }

    /// Ends the current run. Workers finish their unit in flight and drain.
    pub fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.queue.lock().take();
        self.config_changed();
        tracing::info!("Stopping run {}", self.generation.run());
        true
    }

    /// Records a new worker target and, while running, moves toward it.
    pub async fn resize(self: &Arc<Self>, target: usize) {
        self.targets.set_workers(target);
        if !self.is_running() {
            return;
        }
        let Some(queue) = self.queue.lock().clone() else {
            return;
        };

        let run = self.generation.run();
        let live = self.generation.live();
        match target.cmp(&live) {
            std::cmp::Ordering::Greater => self.grow(run, queue).await,
            std::cmp::Ordering::Less => {
                tracing::debug!("Shrinking from {} to {} workers", live, target);
                self.config_changed();
            }
            std::cmp::Ordering::Equal => self.bus.emit(Event::WorkerCountAt(target)).await,
        }
    }

    /// Replaces the limiter and releases everyone waiting on the old one.
    pub fn set_rate(&self, rate: u64) {
        self.targets.set_rate(rate);
        *self.limiter.write() = Arc::new(RateLimiter::new(rate));
        self.config_changed();
    }

    pub fn config_changed(&self) {
        self.epoch.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
    }

    /// One synchronous pass over every active kind, outside any run.
    pub async fn run_once(&self) {
        let mut epoch = self.epoch.subscribe();
        epoch.borrow_and_update();

        for kind in TaskKind::ALL {
            if !self.state.is_active(kind) {
                continue;
            }
            self.process_kind(Pass::Once, kind, &mut epoch).await;
        }
    }

    /// Collects finished worker tasks. Returns how many were reaped.
    pub async fn reap(&self) -> usize {
        let mut workers = self.workers.lock().await;
        let mut reaped = 0;
        while let Some(result) = workers.try_join_next() {
            reaped += 1;
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!("Worker panicked: {}", e);
                }
            }
        }
        reaped
    }

    /// Waits until every spawned worker has exited. Only meaningful after
    /// [`WorkerPool::stop`].
    pub async fn wait_drained(&self) {
        let mut workers = self.workers.lock().await;
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                if e.is_panic() {
                    tracing::error!("Worker panicked: {}", e);
                }
            }
        }
    }

    async fn grow(self: &Arc<Self>, run: u64, queue: WorkQueue) {
        let target = self.targets.workers();
        let live = self.generation.live();
        if target <= live {
            return;
        }

        {
            let mut workers = self.workers.lock().await;
            for _ in live..target {
                if !self.generation.add(run) {
                    return;
                }
                let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
                let pool = self.clone();
                let queue = queue.clone();
                workers.spawn(async move {
                    pool.worker_loop(id, run, queue).await;
                });
            }
        }

        tracing::info!("Pool grew from {} to {} workers", live, target);
        self.bus.emit(Event::WorkerCountAt(target)).await;
    }

    async fn distribute(self: Arc<Self>, run: u64, tx: mpsc::Sender<TaskKind>) {
        let mut epoch = self.epoch.subscribe();
        epoch.borrow_and_update();

        'sweeps: loop {
            let mut fed = 0;
            for kind in TaskKind::ALL {
                if !self.still_current(Pass::Run(run)) {
                    break 'sweeps;
                }
                if !self.state.is_active(kind) {
                    continue;
                }
                tokio::select! {
                    sent = tx.send(kind) => {
                        if sent.is_err() {
                            break 'sweeps;
                        }
                        fed += 1;
                    }
                    _ = epoch.changed() => {}
                }
            }

            if fed == 0 {
                tokio::select! {
                    _ = epoch.changed() => {}
                    _ = tokio::time::sleep(IDLE_SWEEP_WAIT) => {}
                }
            }
        }

        tracing::debug!("Distributor for run {} stopped", run);
    }

    async fn worker_loop(&self, id: usize, run: u64, queue: WorkQueue) {
        let mut epoch = self.epoch.subscribe();
        epoch.borrow_and_update();
        tracing::debug!("Worker {} started (run {})", id, run);

        loop {
            if let Gate::Exit = self.gate(Pass::Run(run), None).await {
                break;
            }

            let next = tokio::select! {
                kind = async { queue.lock().await.recv().await } => kind,
                _ = epoch.changed() => continue,
            };

            let Some(kind) = next else {
                // Distributor is gone
                self.generation.retire(run);
                break;
            };

            if self.process_kind(Pass::Run(run), kind, &mut epoch).await == Flow::Exit {
                break;
            }
        }

        tracing::debug!("Worker {} stopped", id);
    }

    /// Checks run before each unit: running flag, then worker surplus, then
    /// whether the kind is still active.
    async fn gate(&self, pass: Pass, kind: Option<TaskKind>) -> Gate {
        if let Pass::Run(run) = pass {
            if !self.still_current(pass) {
                self.generation.zero(run);
                return Gate::Exit;
            }

            let target = self.targets.workers();
            if let Some(live) = self.generation.volunteer(run, target) {
                if live == target {
                    tracing::info!("Pool shrank to {} workers", target);
                    self.bus.emit(Event::WorkerCountAt(target)).await;
                }
                return Gate::Exit;
            }
        }

        match kind {
            Some(kind) if !self.state.is_active(kind) => Gate::Skip,
            _ => Gate::Proceed,
        }
    }

    fn still_current(&self, pass: Pass) -> bool {
        match pass {
            Pass::Once => true,
            Pass::Run(run) => self.is_running() && self.generation.run() == run,
        }
    }

    async fn process_kind(
        &self,
        pass: Pass,
        kind: TaskKind,
        epoch: &mut watch::Receiver<u64>,
    ) -> Flow {
        let batches = match self.source.ready_batches(kind).await {
            Ok(batches) => batches,
            Err(e) => {
                self.bus
                    .log(format!("reading {} records: {}", kind.collection(), e))
                    .await;
                return Flow::Continue;
            }
        };

        if batches.is_empty() {
            if let Pass::Run(_) = pass {
                tokio::select! {
                    _ = tokio::time::sleep(EMPTY_KIND_BACKOFF) => {}
                    _ = epoch.changed() => {}
                }
            }
            return Flow::Continue;
        }

        for batch in batches {
            let aggregation = aggregate(kind, &batch.lines);
            if let Some(first) = aggregation.problems.first() {
                self.bus
                    .log(format!(
                        "{}: skipped {} malformed record(s), first: {}",
                        batch.name,
                        aggregation.problems.len(),
                        first
                    ))
                    .await;
            }

            for update in &aggregation.updates {
                match self.gate(pass, Some(kind)).await {
                    Gate::Proceed => {}
                    Gate::Skip => {
                        tracing::debug!("{} deactivated, skipping the rest", kind.collection());
                        return Flow::Continue;
                    }
                    Gate::Exit => return Flow::Exit,
                }
                self.execute_unit(pass, update, epoch).await;
            }
        }

        Flow::Continue
    }

    /// Acquires a permit and applies one update, reconnecting once on timeout.
    async fn execute_unit(
        &self,
        pass: Pass,
        update: &SinkUpdate,
        epoch: &mut watch::Receiver<u64>,
    ) -> bool {
        let mut reconnected = false;

        loop {
            let limiter = self.limiter.read().clone();
            match self.await_permit(pass, &limiter, epoch).await {
                Permit::Granted => {}
                Permit::Replaced => continue,
                Permit::Cancelled => return false,
            }

            match self.sink.apply(update).await {
                Ok(()) => {
                    self.completed.fetch_add(1, Ordering::SeqCst);
                    return true;
                }
                Err(e) if e.is_recoverable() && !reconnected => {
                    reconnected = true;
                    tracing::warn!("Sink timeout on {}: {}", update.collection, e);
                    match self.sink.reconnect().await {
                        Ok(_) => self.bus.log("reconnected to sink").await,
                        Err(e) => {
                            self.bus.log(format!("reconnecting to sink: {}", e)).await;
                            return false;
                        }
                    }
                }
                Err(e) => {
                    self.bus
                        .log(format!("updating {}: {}", update.collection, e))
                        .await;
                    return false;
                }
            }
        }
    }

    /// Waits on the slot already reserved on `limiter`.
    ///
    /// Epoch bumps that leave the limiter and the run alone keep the same
    /// reservation; dropping it would push the next slot further out.
    async fn await_permit(
        &self,
        pass: Pass,
        limiter: &Arc<RateLimiter>,
        epoch: &mut watch::Receiver<u64>,
    ) -> Permit {
        let permit = limiter.acquire();
        tokio::pin!(permit);

        loop {
            tokio::select! {
                _ = &mut permit => return Permit::Granted,
                changed = epoch.changed() => {
                    if changed.is_err() || !self.still_current(pass) {
                        return Permit::Cancelled;
                    }
                    if !Arc::ptr_eq(limiter, &*self.limiter.read()) {
                        return Permit::Replaced;
                    }
                }
            }
        }
    }
}
