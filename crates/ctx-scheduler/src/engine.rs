//! Scheduling engine
//!
//! The engine owns every registered root expression, a deadline queue keyed
//! by each root's defer-until, and a single worker that sleeps until the
//! earliest deadline or an external wake-up. Registration, unregistration
//! and sensor pushes may arrive from any thread; they mutate the shared
//! state under one lock and wake the worker.

use ctx_core::events::SensorUpdatedData;
use ctx_core::{Evaluation, Expression, SensorAccess, SharedClock, SystemClock, Timestamp, TriState};
use ctx_eval::{EvalConfig, Evaluator};
use ctx_event_bus::EventBus;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::callback::{CallbackSink, Notification};
use crate::error::{SchedulerError, SchedulerResult};
use crate::queue::DeadlineQueue;
use crate::queued::{CallbackTargets, ExpressionStats, QueuedExpression};
use crate::store::{ExpressionStore, StoredExpression};

/// Tunables for the scheduling loop
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Requeue delay after an evaluation error
    pub error_retry: Duration,
    /// Shortest gap between two scheduled evaluations of one root
    pub min_requeue_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            error_retry: Duration::from_millis(5000),
            min_requeue_interval: Duration::from_millis(250),
        }
    }
}

/// Shared mutable state guarded by the engine lock
#[derive(Default)]
struct EngineState {
    queue: DeadlineQueue,
    expressions: HashMap<String, QueuedExpression>,
    /// Leaf id to the root it belongs to
    leaf_to_root: HashMap<String, String>,
    /// Roots currently being evaluated by the worker
    in_flight: HashSet<String>,
    /// In-flight roots that were pushed while evaluating
    dirty: HashSet<String>,
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    sensors: Arc<dyn SensorAccess>,
    clock: SharedClock,
    eval_config: EvalConfig,
    config: SchedulerConfig,
    sinks: Vec<Arc<dyn CallbackSink>>,
    store: Option<Arc<dyn ExpressionStore>>,
}

impl EngineBuilder {
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn eval_config(mut self, config: EvalConfig) -> Self {
        self.eval_config = config;
        self
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn CallbackSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn store(mut self, store: Arc<dyn ExpressionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Arc<Engine> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Engine {
            state: Mutex::new(EngineState::default()),
            evaluator: Evaluator::new(self.sensors.clone(), self.eval_config),
            sensors: self.sensors,
            clock: self.clock,
            config: self.config,
            sinks: RwLock::new(self.sinks),
            store: self.store,
            wake: Notify::new(),
            running: AtomicBool::new(false),
            shutdown_tx,
            next_generation: AtomicU64::new(0),
        })
    }
}

/// Engine that keeps registered expressions evaluated
pub struct Engine {
    state: Mutex<EngineState>,
    evaluator: Evaluator,
    sensors: Arc<dyn SensorAccess>,
    clock: SharedClock,
    config: SchedulerConfig,
    sinks: RwLock<Vec<Arc<dyn CallbackSink>>>,
    store: Option<Arc<dyn ExpressionStore>>,
    /// Wakes the worker after registration, pushes and manual clock moves
    wake: Notify,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    next_generation: AtomicU64,
}

impl Engine {
    /// Start building an engine around a sensor collaborator
    pub fn builder(sensors: Arc<dyn SensorAccess>) -> EngineBuilder {
        EngineBuilder {
            sensors,
            clock: Arc::new(SystemClock),
            eval_config: EvalConfig::default(),
            config: SchedulerConfig::default(),
            sinks: Vec::new(),
            store: None,
        }
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Add a callback sink
    pub fn add_sink(&self, sink: Arc<dyn CallbackSink>) {
        self.sinks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(sink);
    }

    /// Register a root expression under `id`
    ///
    /// Validates the tree, binds every local sensor leaf and queues the root
    /// for immediate evaluation. A failed binding rolls back the leaves
    /// bound so far and fails with [`SchedulerError::Setup`].
    pub fn register(
        &self,
        id: &str,
        expression: Expression,
        callbacks: CallbackTargets,
    ) -> SchedulerResult<()> {
        self.register_inner(id, expression, callbacks, true)
    }

    fn register_inner(
        &self,
        id: &str,
        expression: Expression,
        callbacks: CallbackTargets,
        persist: bool,
    ) -> SchedulerResult<()> {
        if id.is_empty() || id.contains('/') {
            return Err(SchedulerError::InvalidId(id.to_string()));
        }
        ctx_eval::validate(id, &expression).map_err(|source| {
            SchedulerError::InvalidExpression {
                id: id.to_string(),
                source,
            }
        })?;
        if self.state().expressions.contains_key(id) {
            return Err(SchedulerError::AlreadyRegistered(id.to_string()));
        }

        let leaves = expression.leaves(id);
        let mut bound: Vec<String> = Vec::new();
        for (leaf_id, leaf) in leaves.iter().filter(|(_, leaf)| !leaf.is_remote()) {
            if let Err(source) = self
                .sensors
                .register(leaf_id, &leaf.sensor_path(), &leaf.config)
            {
                warn!(expression_id = id, leaf_id = %leaf_id, error = %source, "Sensor setup failed");
                for done in &bound {
                    self.sensors.unregister(done);
                }
                return Err(SchedulerError::Setup {
                    id: id.to_string(),
                    source,
                });
            }
            bound.push(leaf_id.clone());
        }

        // Drop results an in-flight evaluation of an earlier registration left behind
        self.evaluator.forget(id);

        let now = self.now();
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.state();
            if state.expressions.contains_key(id) {
                drop(state);
                for done in &bound {
                    self.sensors.unregister(done);
                }
                return Err(SchedulerError::AlreadyRegistered(id.to_string()));
            }
            for (leaf_id, _) in &leaves {
                state.leaf_to_root.insert(leaf_id.clone(), id.to_string());
            }
            state.expressions.insert(
                id.to_string(),
                QueuedExpression::new(id, expression.clone(), callbacks.clone(), generation, bound),
            );
            state.queue.schedule(id, now);
        }
        self.wake.notify_one();

        info!(expression_id = id, leaves = leaves.len(), "Registered expression");

        if persist {
            if let Some(store) = &self.store {
                let stored = StoredExpression {
                    id: id.to_string(),
                    expression,
                    callbacks,
                };
                if let Err(e) = store.save(&stored) {
                    warn!(expression_id = id, error = %e, "Failed to persist expression");
                }
            }
        }
        Ok(())
    }

    /// Remove a registered expression and release its sensor bindings
    ///
    /// An evaluation already running for `id` completes, but its result is
    /// discarded.
    pub fn unregister(&self, id: &str) -> SchedulerResult<()> {
        let removed = {
            let mut state = self.state();
            let removed = state
                .expressions
                .remove(id)
                .ok_or_else(|| SchedulerError::NotFound(id.to_string()))?;
            state.queue.remove(id);
            state.dirty.remove(id);
            state.leaf_to_root.retain(|_, root| root.as_str() != id);
            removed
        };

        for leaf_id in &removed.local_leaves {
            self.sensors.unregister(leaf_id);
        }
        self.evaluator.forget(id);

        if let Some(store) = &self.store {
            if let Err(e) = store.delete(id) {
                warn!(expression_id = id, error = %e, "Failed to delete persisted expression");
            }
        }

        info!(expression_id = id, "Unregistered expression");
        Ok(())
    }

    /// Re-register everything the store holds
    ///
    /// Returns the number of restored expressions. Entries that fail to
    /// register are logged and skipped.
    pub fn restore(&self) -> SchedulerResult<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let mut restored = 0;
        for entry in store.load_registered()? {
            match self.register_inner(&entry.id, entry.expression, entry.callbacks, false) {
                Ok(()) => restored += 1,
                Err(e) => warn!(expression_id = %entry.id, error = %e, "Failed to restore expression"),
            }
        }
        info!(restored, "Restored expressions");
        Ok(restored)
    }

    /// Handle a sensor push for the given leaves
    ///
    /// Roots whose result is a value sequence or whose defer-until is not
    /// guaranteed are invalidated and moved to the front of the queue.
    /// Returns the number of roots pulled forward.
    pub fn notify<I, S>(&self, leaf_ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let now = self.now();
        let mut preempted = 0;
        {
            let mut state = self.state();
            let mut roots: Vec<String> = Vec::new();
            for leaf_id in leaf_ids {
                let leaf_id = leaf_id.as_ref();
                let Some(root) = state.leaf_to_root.get(leaf_id).cloned() else {
                    trace!(leaf_id, "Push for unknown leaf");
                    continue;
                };
                self.evaluator.invalidate_path(leaf_id);
                if !roots.contains(&root) {
                    roots.push(root);
                }
            }

            for root in roots {
                let Some(queued) = state.expressions.get(&root) else {
                    continue;
                };
                if !queued.preempted_by_push() {
                    trace!(expression_id = %root, "Push ignored; defer-until is guaranteed");
                    continue;
                }
                self.preempt(&mut state, &root, now);
                preempted += 1;
            }
        }

        if preempted > 0 {
            self.wake.notify_one();
        }
        preempted
    }

    /// Store a result pushed for a remote leaf and re-evaluate its root
    pub fn push_remote_result(&self, leaf_id: &str, result: Evaluation) -> SchedulerResult<()> {
        let now = self.now();
        {
            let mut state = self.state();
            let root = state
                .leaf_to_root
                .get(leaf_id)
                .cloned()
                .ok_or_else(|| SchedulerError::NotFound(leaf_id.to_string()))?;
            self.evaluator.push_remote(leaf_id, result);
            self.preempt(&mut state, &root, now);
        }
        self.wake.notify_one();
        Ok(())
    }

    fn preempt(&self, state: &mut EngineState, root: &str, now: Timestamp) {
        self.evaluator.invalidate(root);
        if state.in_flight.contains(root) {
            state.dirty.insert(root.to_string());
        } else {
            state.queue.schedule(root, now);
        }
        debug!(expression_id = root, "Preempted by push");
    }

    /// Evaluate every root whose deadline has passed
    ///
    /// Returns the number of evaluations performed. This is the worker's
    /// unit of work; tests drive it directly with a manual clock.
    pub fn run_due(&self) -> usize {
        let now = self.now();
        let mut evaluated = 0;
        loop {
            let next = self.state().queue.pop_due(now);
            let Some(id) = next else {
                break;
            };
            self.evaluate_one(&id, now);
            evaluated += 1;
        }
        evaluated
    }

    fn evaluate_one(&self, id: &str, now: Timestamp) {
        let (expression, generation) = {
            let mut state = self.state();
            let Some(queued) = state.expressions.get(id) else {
                return;
            };
            let job = (queued.expression.clone(), queued.generation);
            state.in_flight.insert(id.to_string());
            job
        };

        let started = Instant::now();
        let result = self.evaluator.evaluate(id, &expression, now);
        let elapsed = started.elapsed();

        let notification = {
            let mut state = self.state();
            state.in_flight.remove(id);
            let pushed = state.dirty.remove(id);

            let Some(queued) = state
                .expressions
                .get_mut(id)
                .filter(|q| q.generation == generation)
            else {
                debug!(expression_id = id, "Discarding result of unregistered expression");
                // The evaluation refilled the cache after unregister forgot it
                self.evaluator.forget(id);
                return;
            };

            queued.stats.evaluations += 1;
            queued.stats.total_eval_time += elapsed;
            queued.stats.last_evaluated = Some(now);

            let (deadline, notification) = match result {
                Ok(eval) => {
                    let changed = queued
                        .cached
                        .as_ref()
                        .map_or(true, |prev| prev.outcome.differs_from(&eval.outcome));
                    if eval.tri_state() == Some(TriState::True) {
                        queued.stats.true_count += 1;
                    }

                    let deadline = if pushed {
                        now
                    } else if eval.defer_until <= now {
                        now.plus(self.config.min_requeue_interval.max(Duration::from_millis(1)))
                    } else {
                        eval.defer_until
                    };

                    debug!(
                        expression_id = id,
                        defer_until = %eval.defer_until,
                        guaranteed = eval.defer_is_guaranteed,
                        changed,
                        "Evaluated expression"
                    );

                    let notification = changed.then(|| {
                        queued.stats.changes += 1;
                        Notification {
                            id: id.to_string(),
                            targets: queued.callbacks.targets_for(&eval.outcome),
                            outcome: eval.outcome.clone(),
                        }
                    });
                    queued.cached = Some(eval);
                    (deadline, notification)
                }
                Err(e) => {
                    queued.stats.errors += 1;
                    warn!(expression_id = id, error = %e, "Evaluation failed; keeping previous result");
                    let deadline = if pushed {
                        now
                    } else {
                        now.plus(self.config.error_retry)
                    };
                    (deadline, None)
                }
            };

            if pushed {
                // Cached nodes were computed from readings older than the push
                self.evaluator.invalidate(id);
            }
            state.queue.schedule(id, deadline);
            notification
        };

        if let Some(notification) = notification {
            let sinks = self.sinks.read().unwrap_or_else(|e| e.into_inner()).clone();
            debug!(expression_id = id, targets = ?notification.targets, "Delivering callback");
            for sink in sinks {
                sink.deliver(&notification);
            }
        }
    }

    /// Time until the earliest deadline, at least one millisecond
    ///
    /// None when nothing is queued or every root waits for a push.
    pub fn next_wait(&self) -> Option<Duration> {
        let deadline = self.state().queue.peek_deadline()?;
        if deadline.is_max() {
            return None;
        }
        Some(
            deadline
                .duration_since(self.now())
                .max(Duration::from_millis(1)),
        )
    }

    /// Earliest queued deadline
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.state().queue.peek_deadline()
    }

    /// Wake the worker, e.g. after moving a manual clock
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Start the worker loop
    ///
    /// Returns None if the worker is already running.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Engine already running");
            return None;
        }

        info!("Starting context engine");
        let engine = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        Some(tokio::spawn(async move {
            loop {
                let worker = Arc::clone(&engine);
                if let Err(e) = tokio::task::spawn_blocking(move || worker.run_due()).await {
                    error!(error = %e, "Evaluation pass panicked");
                }

                let wait = engine.next_wait();
                tokio::select! {
                    _ = engine.wake.notified() => {
                        trace!("Worker woken");
                    }
                    _ = async {
                        match wait {
                            Some(duration) => tokio::time::sleep(duration).await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {}
                    _ = shutdown_rx.recv() => {
                        info!("Received shutdown signal");
                        break;
                    }
                }
            }

            engine.running.store(false, Ordering::SeqCst);
            info!("Context engine stopped");
        }))
    }

    /// Forward `sensor_updated` events from the bus as push notifications
    pub fn attach_bus(self: &Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut updates = bus.subscribe_typed::<SensorUpdatedData>();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = updates.recv() => match update {
                        Ok(event) => {
                            trace!(path = %event.data.path, "Sensor update received");
                            engine.notify(&event.data.leaf_ids);
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Sensor update listener lagged by {} events", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("Event bus closed, detaching sensor updates");
                            break;
                        }
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }

    /// Stop the worker loop and bus listeners
    pub fn stop(&self) {
        info!("Stopping context engine");
        // No receivers just means nothing was started
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Most recent result of a registered expression
    pub fn result(&self, id: &str) -> Option<Evaluation> {
        self.state().expressions.get(id)?.cached.clone()
    }

    /// Running statistics of a registered expression
    pub fn stats(&self, id: &str) -> Option<ExpressionStats> {
        self.state().expressions.get(id).map(|q| q.stats.clone())
    }

    /// Deadline at which `id` is next evaluated
    pub fn deadline(&self, id: &str) -> Option<Timestamp> {
        self.state().queue.deadline_of(id)
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.state().expressions.contains_key(id)
    }

    /// Registered ids, sorted
    pub fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state().expressions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Root id a leaf belongs to
    pub fn root_of(&self, leaf_id: &str) -> Option<String> {
        self.state().leaf_to_root.get(leaf_id).cloned()
    }
}
