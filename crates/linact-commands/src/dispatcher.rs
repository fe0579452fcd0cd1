//! Command dispatcher.
//!
//! Accepts submissions behind a throttle, orders them in a priority queue
//! and drains the queue into the transport from one worker task. The
//! worker discards commands that waited longer than the staleness
//! threshold and re-queues failed sends at the retry priority while the
//! error counter allows it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use linact_core::{
    ActuatorCommand, CommandId, CommandPriority, DispatchEvent, DispatcherConfig, EventBus,
};
use linact_transport::Transport;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::{Command, CommandSource};
use crate::error::SubmitError;
use crate::queue::{DispatchQueue, QueueStats};
use crate::throttle::{ErrorCounter, ThrottleState};

const EVENT_SOURCE: &str = "dispatcher";

/// Dispatcher statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatcherStats {
    pub queue: QueueStats,
    pub accepted: u64,
    pub throttled: u64,
    pub sent: u64,
    pub failed: u64,
    pub retried: u64,
    pub abandoned: u64,
    pub discarded: u64,
    /// Current error counter
    pub error_count: u32,
}

/// Result of one worker step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Nothing left to send
    Idle,
    /// Handed to the transport
    Sent(CommandId),
    /// Send failed and a retry was queued
    Retried { failed: CommandId, retry: CommandId },
    /// Send failed and the command was given up
    Abandoned(CommandId),
}

#[derive(Debug, Default)]
struct Counters {
    accepted: u64,
    throttled: u64,
    sent: u64,
    failed: u64,
    retried: u64,
    abandoned: u64,
    discarded: u64,
}

struct DispatchState {
    queue: DispatchQueue,
    throttle: ThrottleState,
    errors: ErrorCounter,
    counters: Counters,
}

struct DispatcherInner {
    config: DispatcherConfig,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    state: Mutex<DispatchState>,
    closed: AtomicBool,
}

struct WorkerHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Priority command dispatcher.
pub struct CommandDispatcher {
    inner: Arc<DispatcherInner>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl CommandDispatcher {
    /// Create a dispatcher. The worker is not running until [`Self::start`].
    pub fn new(transport: Arc<dyn Transport>, bus: EventBus, config: DispatcherConfig) -> Self {
        let state = DispatchState {
            queue: DispatchQueue::new(),
            throttle: ThrottleState::new(config.throttle_interval()),
            errors: ErrorCounter::default(),
            counters: Counters::default(),
        };
        Self {
            inner: Arc::new(DispatcherInner {
                config,
                transport,
                bus,
                state: Mutex::new(state),
                closed: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Submit an operator command. Returns whether it was accepted.
    pub fn submit(&self, command: ActuatorCommand, priority: CommandPriority) -> bool {
        self.try_submit(command, priority).is_ok()
    }

    /// Submit an operator command, reporting why it was refused.
    pub fn try_submit(
        &self,
        command: ActuatorCommand,
        priority: CommandPriority,
    ) -> Result<CommandId, SubmitError> {
        self.try_submit_as(command, priority, CommandSource::Operator)
    }

    /// Submit a command on behalf of `source`.
    pub fn try_submit_as(
        &self,
        command: ActuatorCommand,
        priority: CommandPriority,
        source: CommandSource,
    ) -> Result<CommandId, SubmitError> {
        self.inner.submit(command, priority, source)
    }

    /// Submit STOP at the highest priority. Subject to the throttle like any
    /// other submission.
    pub fn force_stop(&self, reason: &str) -> bool {
        self.try_submit_as(
            ActuatorCommand::Stop,
            CommandPriority::Highest,
            CommandSource::system(reason),
        )
        .is_ok()
    }

    /// Run one worker step: evict stale commands at the head, then send the
    /// first fresh one.
    pub async fn process_next(&self) -> DispatchOutcome {
        self.inner.process_next().await
    }

    /// Spawn the worker. Does nothing if it is already running.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        self.inner.closed.store(false, Ordering::SeqCst);

        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.poll_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                inner.process_next().await;
            }
            debug!("Dispatcher worker stopped");
        });
        *worker = Some(WorkerHandle { cancel, handle });
        info!(
            poll_ms = self.inner.config.poll_interval_ms,
            "Dispatcher worker started"
        );
    }

    /// Stop the worker and refuse further submissions.
    ///
    /// Waits up to the configured join timeout; a worker that does not stop
    /// in time is left to finish on its own.
    pub async fn stop(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return;
        };
        worker.cancel.cancel();
        let timeout = self.inner.config.join_timeout();
        match tokio::time::timeout(timeout, worker.handle).await {
            Ok(Ok(())) => info!("Dispatcher stopped"),
            Ok(Err(e)) => warn!(error = %e, "Dispatcher worker ended abnormally"),
            Err(_) => warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Dispatcher worker did not stop in time"
            ),
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Wait until the queue is empty, polling at the worker interval.
    /// Returns `false` if `timeout` elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let poll = self.inner.config.poll_interval();
        tokio::time::timeout(timeout, async {
            while !self.inner.state.lock().queue.is_empty() {
                tokio::time::sleep(poll).await;
            }
        })
        .await
        .is_ok()
    }

    /// Send failures since the last reset.
    pub fn error_count(&self) -> u32 {
        self.inner.state.lock().errors.count()
    }

    /// Time of the most recent send failure.
    pub fn last_failure(&self) -> Option<Instant> {
        self.inner.state.lock().errors.last_failure()
    }

    /// Reset the error counter. Used by health recovery.
    pub fn reset_errors(&self) {
        let mut state = self.inner.state.lock();
        let previous = state.errors.count();
        state.errors.reset();
        info!(previous, "Error counter reset");
    }

    pub fn queue_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Bounded wait used when stopping background tasks.
    pub fn join_timeout(&self) -> Duration {
        self.inner.config.join_timeout()
    }

    /// Transport the dispatcher sends through.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn stats(&self) -> DispatcherStats {
        let state = self.inner.state.lock();
        let c = &state.counters;
        DispatcherStats {
            queue: state.queue.stats(),
            accepted: c.accepted,
            throttled: c.throttled,
            sent: c.sent,
            failed: c.failed,
            retried: c.retried,
            abandoned: c.abandoned,
            discarded: c.discarded,
            error_count: state.errors.count(),
        }
    }
}

impl DispatcherInner {
    fn submit(
        &self,
        command: ActuatorCommand,
        priority: CommandPriority,
        source: CommandSource,
    ) -> Result<CommandId, SubmitError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SubmitError::Closed);
        }
        if let Err(source) = self.transport.check_encodable(&command) {
            warn!(%command, error = %source, "Rejected unsupported command");
            return Err(SubmitError::Unsupported { command, source });
        }

        let now = Instant::now();
        let mut state = self.state.lock();
        if let Err(elapsed) = state.throttle.try_accept(now) {
            state.counters.throttled += 1;
            drop(state);
            let elapsed_ms = elapsed.as_millis() as u64;
            warn!(%command, %priority, elapsed_ms, "Submission throttled");
            self.bus
                .publish(EVENT_SOURCE, DispatchEvent::Throttled { command });
            return Err(SubmitError::Throttled { elapsed_ms });
        }

        let queued = Command::new(command, priority, source, now);
        let id = queued.id.clone();
        let event = DispatchEvent::Queued {
            id: id.clone(),
            command: queued.command.clone(),
            priority,
        };
        debug!(
            command = %queued.command,
            %priority,
            source = queued.source.type_name(),
            "Command queued"
        );
        state.queue.push(queued);
        state.counters.accepted += 1;
        drop(state);

        self.bus.publish(EVENT_SOURCE, event);
        Ok(id)
    }

    async fn process_next(&self) -> DispatchOutcome {
        let threshold = self.config.staleness_threshold();
        loop {
            let next = self.state.lock().queue.pop();
            let Some(command) = next else {
                return DispatchOutcome::Idle;
            };

            let now = Instant::now();
            if command.is_stale(now, threshold) {
                self.discard(command, now);
                continue;
            }
            return self.send(command).await;
        }
    }

    fn discard(&self, command: Command, now: Instant) {
        let age_ms = command.age(now).as_millis() as u64;
        self.state.lock().counters.discarded += 1;
        warn!(command = %command.command, id = %command.id, age_ms, "Discarded stale command");
        self.bus.publish(
            EVENT_SOURCE,
            DispatchEvent::StaleCommandDiscarded {
                id: command.id,
                command: command.command,
                age_ms,
            },
        );
    }

    async fn send(&self, command: Command) -> DispatchOutcome {
        match self.transport.send(&command.command).await {
            Ok(()) => {
                self.state.lock().counters.sent += 1;
                info!(command = %command.command, priority = %command.priority, "Command sent");
                self.bus.publish(
                    EVENT_SOURCE,
                    DispatchEvent::Sent {
                        id: command.id.clone(),
                        command: command.command,
                        priority: command.priority,
                    },
                );
                DispatchOutcome::Sent(command.id)
            }
            Err(e) => self.handle_failure(command, e.to_string()),
        }
    }

    fn handle_failure(&self, failed: Command, reason: String) -> DispatchOutcome {
        let now = Instant::now();
        let mut state = self.state.lock();
        let error_count = state.errors.record_failure(now);
        state.counters.failed += 1;

        error!(
            command = %failed.command,
            error_count,
            error = %reason,
            "Failed to send command"
        );
        let failed_event = DispatchEvent::SendFailed {
            id: failed.id.clone(),
            command: failed.command.clone(),
            error_count,
            reason,
        };

        if error_count <= self.config.max_retry_errors {
            let retry = failed.retry(self.config.retry_priority(), now);
            let retry_id = retry.id.clone();
            let retry_event = DispatchEvent::RetryScheduled {
                id: retry_id.clone(),
                retry_of: failed.id.clone(),
                command: retry.command.clone(),
                priority: retry.priority,
                error_count,
            };
            state.queue.push(retry);
            state.counters.retried += 1;
            drop(state);

            info!(
                command = %failed.command,
                priority = %self.config.retry_priority(),
                error_count,
                "Retry scheduled"
            );
            self.bus.publish(EVENT_SOURCE, failed_event);
            self.bus.publish(EVENT_SOURCE, retry_event);
            DispatchOutcome::Retried {
                failed: failed.id,
                retry: retry_id,
            }
        } else {
            state.counters.abandoned += 1;
            drop(state);

            error!(
                command = %failed.command,
                error_count,
                max = self.config.max_retry_errors,
                "Retry limit exceeded, command abandoned"
            );
            self.bus.publish(EVENT_SOURCE, failed_event);
            self.bus.publish(
                EVENT_SOURCE,
                DispatchEvent::RetryLimitExceeded {
                    id: failed.id.clone(),
                    command: failed.command,
                    error_count,
                },
            );
            DispatchOutcome::Abandoned(failed.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linact_core::{LinkEvent, WireMode};
    use linact_transport::mock::MockTransport;

    fn dispatcher(transport: &MockTransport) -> (CommandDispatcher, EventBus) {
        let bus = EventBus::new();
        let dispatcher = CommandDispatcher::new(
            Arc::new(transport.clone()),
            bus.clone(),
            DispatcherConfig::default(),
        );
        (dispatcher, bus)
    }

    async fn step() {
        tokio::time::advance(Duration::from_millis(100)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_and_send() {
        let transport = MockTransport::new();
        let (dispatcher, _bus) = dispatcher(&transport);

        assert!(dispatcher.submit(ActuatorCommand::Up, CommandPriority::Highest));
        assert_eq!(dispatcher.queue_len(), 1);

        let outcome = dispatcher.process_next().await;
        assert!(matches!(outcome, DispatchOutcome::Sent(_)));
        assert_eq!(transport.sent_commands(), vec![ActuatorCommand::Up]);
        assert_eq!(dispatcher.process_next().await, DispatchOutcome::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_command_does_not_consume_throttle() {
        let transport = MockTransport::with_mode(WireMode::Binary);
        let (dispatcher, _bus) = dispatcher(&transport);

        let err = dispatcher
            .try_submit(ActuatorCommand::PumpOn, CommandPriority::Highest)
            .unwrap_err();
        assert!(matches!(err, SubmitError::Unsupported { .. }));
        assert!(dispatcher
            .try_submit(ActuatorCommand::SetSpeed(1000), CommandPriority::Highest)
            .is_err());

        assert!(dispatcher.submit(ActuatorCommand::Stop, CommandPriority::Highest));
        assert_eq!(dispatcher.queue_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_submit_publishes_event() {
        let transport = MockTransport::new();
        let (dispatcher, bus) = dispatcher(&transport);
        let mut events = bus.subscribe();

        assert!(dispatcher.submit(ActuatorCommand::Up, CommandPriority::Highest));
        let err = dispatcher
            .try_submit(ActuatorCommand::Down, CommandPriority::Highest)
            .unwrap_err();
        assert!(matches!(err, SubmitError::Throttled { elapsed_ms: 0 }));
        assert_eq!(
            err.fault_kind(),
            Some(linact_core::FaultKind::SubmissionThrottled)
        );

        let received = events.drain();
        assert!(matches!(
            received.last(),
            Some(LinkEvent::Dispatch(DispatchEvent::Throttled {
                command: ActuatorCommand::Down
            }))
        ));
        assert_eq!(dispatcher.stats().throttled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_bypasses_throttle() {
        let transport = MockTransport::new();
        transport.fail_next_sends(1);
        let (dispatcher, _bus) = dispatcher(&transport);

        assert!(dispatcher.submit(ActuatorCommand::Down, CommandPriority::Normal));
        let outcome = dispatcher.process_next().await;
        assert!(matches!(outcome, DispatchOutcome::Retried { .. }));
        assert_eq!(dispatcher.queue_len(), 1);
        assert_eq!(dispatcher.stats().queue.by_priority, [0, 0, 0, 0, 1]);

        // Retry went in without touching the throttle window.
        assert!(!dispatcher.submit(ActuatorCommand::Up, CommandPriority::Highest));

        step().await;
        assert!(matches!(
            dispatcher.process_next().await,
            DispatchOutcome::Sent(_)
        ));
        assert_eq!(transport.sent_commands(), vec![ActuatorCommand::Down]);
        assert_eq!(dispatcher.error_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_after_stop_is_closed() {
        let transport = MockTransport::new();
        let (dispatcher, _bus) = dispatcher(&transport);
        dispatcher.start();
        assert!(dispatcher.is_running());

        dispatcher.stop().await;
        assert!(!dispatcher.is_running());
        assert!(matches!(
            dispatcher.try_submit(ActuatorCommand::Stop, CommandPriority::Highest),
            Err(SubmitError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_stop_is_throttled_like_any_submit() {
        let transport = MockTransport::new();
        let (dispatcher, _bus) = dispatcher(&transport);

        assert!(dispatcher.submit(ActuatorCommand::Up, CommandPriority::Low));
        assert!(!dispatcher.force_stop("recovery"));

        step().await;
        assert!(dispatcher.force_stop("recovery"));
        let outcome = dispatcher.process_next().await;
        assert!(matches!(outcome, DispatchOutcome::Sent(_)));
        assert_eq!(transport.sent_commands(), vec![ActuatorCommand::Stop]);
    }
}
