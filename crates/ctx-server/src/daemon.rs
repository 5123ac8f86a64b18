//! Wiring of the sensor store, event bus and engine from configuration

use anyhow::{Context, Result};
use ctx_config::Settings;
use ctx_core::SharedClock;
use ctx_event_bus::EventBus;
use ctx_scheduler::{BusSink, Engine, JsonFileStore, Notification};
use ctx_sensor_store::SensorStore;
use std::sync::Arc;
use tracing::{debug, info};

/// The running context daemon
pub struct ContextDaemon {
    /// Event bus for sensor updates and callback events
    pub bus: Arc<EventBus>,
    /// Reading buffer the engine's leaves bind to
    pub sensors: Arc<SensorStore>,
    pub engine: Arc<Engine>,
}

impl ContextDaemon {
    /// Build the daemon and register every configured expression
    ///
    /// With a store configured, persisted registrations are restored first
    /// and configured ids that were restored are left untouched. Sensors
    /// must be declared unless the configuration declares none.
    pub fn new(settings: &Settings, clock: SharedClock) -> Result<Self> {
        let bus = Arc::new(EventBus::new());

        let sensors = SensorStore::new(bus.clone());
        let sensors = if settings.sensors.is_empty() {
            sensors.accept_undeclared()
        } else {
            sensors
        };
        for declaration in &settings.sensors {
            sensors.declare(declaration.path.clone(), declaration.spec.clone());
        }
        let sensors = Arc::new(sensors);

        let mut builder = Engine::builder(sensors.clone())
            .clock(clock)
            .eval_config(settings.engine.eval_config())
            .config(settings.engine.scheduler_config())
            .sink(Arc::new(BusSink::new(bus.clone())))
            .sink(Arc::new(log_callback));
        if let Some(path) = &settings.engine.store_path {
            info!(path = ?path, "Persisting registrations");
            builder = builder.store(Arc::new(JsonFileStore::new(path)));
        }
        let engine = builder.build();

        engine.restore().context("restoring persisted expressions")?;

        for expr in &settings.expressions {
            if engine.is_registered(&expr.id) {
                debug!(expression_id = %expr.id, "Already restored");
                continue;
            }
            engine
                .register(&expr.id, expr.expression.clone(), expr.callbacks.clone())
                .with_context(|| format!("registering expression '{}'", expr.id))?;
        }

        info!(
            expressions = engine.registered_ids().len(),
            sensors = settings.sensors.len(),
            "Context daemon initialized"
        );
        Ok(Self {
            bus,
            sensors,
            engine,
        })
    }
}

fn log_callback(notification: &Notification) {
    match notification.state() {
        Some((state, timestamp)) => info!(
            expression_id = %notification.id,
            %state,
            %timestamp,
            targets = ?notification.targets,
            "Context changed"
        ),
        None => info!(
            expression_id = %notification.id,
            outcome = ?notification.outcome,
            targets = ?notification.targets,
            "Context value changed"
        ),
    }
}
