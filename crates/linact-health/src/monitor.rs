//! Link health monitor.
//!
//! Every tick samples resource pressure, checks the dispatcher's error
//! counter and drives the bounded reconnect state machine. Each step's
//! outcome is logged and published; the next tick runs regardless.

use std::sync::Arc;

use linact_commands::CommandDispatcher;
use linact_core::{EventBus, HealthConfig, HealthEvent, HealthReport};
use linact_transport::{Transport, TransportResult};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::resources::{ResourceSampler, ResourceUsage};
use crate::score::{HealthScore, ReconnectState};

const EVENT_SOURCE: &str = "health";

struct MonitorState {
    score: HealthScore,
    reconnect: ReconnectState,
    last_usage: ResourceUsage,
}

struct MonitorInner {
    config: HealthConfig,
    dispatcher: Arc<CommandDispatcher>,
    transport: Arc<dyn Transport>,
    address: String,
    bus: EventBus,
    sampler: Mutex<Box<dyn ResourceSampler>>,
    state: Mutex<MonitorState>,
    /// Serializes ticks and manual reconnects
    reconnecting: tokio::sync::Mutex<()>,
}

struct MonitorHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic health checker for one link.
pub struct LinkHealthMonitor {
    inner: Arc<MonitorInner>,
    worker: Mutex<Option<MonitorHandle>>,
}

impl LinkHealthMonitor {
    /// Create a monitor reconnecting `transport` to `address`.
    pub fn new(
        config: HealthConfig,
        dispatcher: Arc<CommandDispatcher>,
        address: impl Into<String>,
        sampler: Box<dyn ResourceSampler>,
        bus: EventBus,
    ) -> Self {
        let transport = dispatcher.transport().clone();
        let state = MonitorState {
            score: HealthScore::new(),
            reconnect: ReconnectState::new(config.max_reconnect_attempts),
            last_usage: ResourceUsage::default(),
        };
        Self {
            inner: Arc::new(MonitorInner {
                config,
                dispatcher,
                transport,
                address: address.into(),
                bus,
                sampler: Mutex::new(sampler),
                state: Mutex::new(state),
                reconnecting: tokio::sync::Mutex::new(()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Run one health check now.
    pub async fn tick(&self) -> HealthReport {
        self.inner.tick().await
    }

    /// Reconnect on operator request.
    ///
    /// Ignores the attempt budget. Success resets the attempt count, which
    /// re-arms automatic reconnects after exhaustion.
    pub async fn manual_reconnect(&self) -> TransportResult<()> {
        let inner = &self.inner;
        let _guard = inner.reconnecting.lock().await;
        info!(address = %inner.address, "Manual reconnect requested");
        match inner.transport.connect(&inner.address).await {
            Ok(()) => {
                inner.state.lock().reconnect.record_success();
                inner.link_restored();
                Ok(())
            }
            Err(e) => {
                warn!(address = %inner.address, error = %e, "Manual reconnect failed");
                Err(e)
            }
        }
    }

    /// Spawn the periodic task. The first check runs one interval from now.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let inner = self.inner.clone();
        let period = inner.config.tick_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                inner.tick().await;
            }
            debug!("Health monitor stopped");
        });
        *worker = Some(MonitorHandle { cancel, handle });
        info!(
            interval_secs = self.inner.config.tick_interval_secs,
            "Health monitor started"
        );
    }

    /// Stop the periodic task, waiting at most the dispatcher's join timeout.
    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return;
        };
        worker.cancel.cancel();
        let timeout = self.inner.dispatcher.join_timeout();
        match tokio::time::timeout(timeout, worker.handle).await {
            Ok(Ok(())) => info!("Health monitor stopped"),
            Ok(Err(e)) => warn!(error = %e, "Health monitor ended abnormally"),
            Err(_) => warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Health monitor did not stop in time"
            ),
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn score(&self) -> f64 {
        self.inner.state.lock().score.value()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.state.lock().reconnect.attempts()
    }

    /// Snapshot from the last sample and current counters.
    pub fn report(&self) -> HealthReport {
        self.inner.report()
    }
}

impl MonitorInner {
    async fn tick(&self) -> HealthReport {
        let _guard = self.reconnecting.lock().await;
        self.check_resources();
        self.check_errors();
        self.check_link().await;

        let report = self.report();
        debug!(
            score = report.score,
            connected = report.connected,
            error_count = report.error_count,
            "Health check complete"
        );
        self.bus
            .publish(EVENT_SOURCE, HealthEvent::Report(report.clone()));
        report
    }

    fn check_resources(&self) {
        let usage = self.sampler.lock().sample();
        let mut state = self.state.lock();
        state.last_usage = usage;
        if !usage.exceeds(
            self.config.cpu_threshold_percent,
            self.config.memory_threshold_percent,
        ) {
            return;
        }
        let score = state.score.penalize(self.config.penalty);
        drop(state);

        warn!(
            cpu_percent = usage.cpu_percent,
            memory_percent = usage.memory_percent,
            score,
            "High resource usage"
        );
        self.bus.publish(
            EVENT_SOURCE,
            HealthEvent::ResourceWarning {
                cpu_percent: usage.cpu_percent,
                memory_percent: usage.memory_percent,
                score,
            },
        );
    }

    fn check_errors(&self) {
        let error_count = self.dispatcher.error_count();
        if error_count <= self.config.error_threshold {
            return;
        }
        self.state.lock().score.penalize(self.config.penalty);
        warn!(
            error_count,
            threshold = self.config.error_threshold,
            "Error threshold exceeded, starting recovery"
        );
        self.bus
            .publish(EVENT_SOURCE, HealthEvent::RecoveryStarted { error_count });

        let stop_accepted = self.dispatcher.force_stop("health recovery");
        if !stop_accepted {
            warn!("Recovery STOP was not accepted by the dispatcher");
        }
        self.dispatcher.reset_errors();
        let score = self.state.lock().score.reward(self.config.recovery_bonus);

        info!(score, stop_accepted, "Recovery completed");
        self.bus.publish(
            EVENT_SOURCE,
            HealthEvent::RecoverySucceeded {
                score,
                stop_accepted,
            },
        );
    }

    async fn check_link(&self) {
        if self.transport.is_connected() {
            return;
        }

        let (can_attempt, attempts, max_attempts) = {
            let state = self.state.lock();
            (
                state.reconnect.can_attempt(),
                state.reconnect.attempts(),
                state.reconnect.max_attempts(),
            )
        };
        if !can_attempt {
            error!(
                address = %self.address,
                attempts,
                "Reconnect attempts exhausted, link stays down"
            );
            self.bus
                .publish(EVENT_SOURCE, HealthEvent::ReconnectExhausted { attempts });
            return;
        }

        match self.transport.connect(&self.address).await {
            Ok(()) => {
                self.state.lock().reconnect.record_success();
                self.link_restored();
            }
            Err(e) => {
                let attempt = self.state.lock().reconnect.record_failure();
                warn!(
                    address = %self.address,
                    attempt,
                    max_attempts,
                    error = %e,
                    "Reconnect failed"
                );
                self.bus.publish(
                    EVENT_SOURCE,
                    HealthEvent::ReconnectFailed {
                        attempt,
                        max_attempts,
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    fn link_restored(&self) {
        info!(address = %self.address, "Link restored");
        self.bus.publish(
            EVENT_SOURCE,
            HealthEvent::LinkRestored {
                address: self.address.clone(),
            },
        );
    }

    fn report(&self) -> HealthReport {
        let state = self.state.lock();
        HealthReport {
            score: state.score.value(),
            connected: self.transport.is_connected(),
            error_count: self.dispatcher.error_count(),
            reconnect_attempts: state.reconnect.attempts(),
            cpu_percent: state.last_usage.cpu_percent,
            memory_percent: state.last_usage.memory_percent,
        }
    }
}
