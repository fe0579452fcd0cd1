//! Link session: wires transport, router, dispatcher and health monitor.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use linact_commands::{CommandDispatcher, CommandSource, SubmitError};
use linact_core::{
    ActuatorCommand, CommandPriority, EventBus, InboundEventRouter, InboundFrame, LastReadings,
    LinkConfig,
};
use linact_health::{LinkHealthMonitor, ResourceSampler, SysinfoSampler};
use linact_transport::{resolve_port, serial_transport, Transport};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long shutdown waits for the final STOP to leave the queue.
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(500);

/// Point-in-time summary for the `status` console command.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub address: String,
    pub connected: bool,
    pub readings: LastReadings,
    pub health: linact_core::HealthReport,
    pub dispatcher: linact_commands::DispatcherStats,
}

/// A running link.
pub struct LinkSession {
    config: LinkConfig,
    address: String,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<CommandDispatcher>,
    monitor: LinkHealthMonitor,
    router: Arc<InboundEventRouter>,
    router_cancel: CancellationToken,
    router_task: JoinHandle<()>,
}

impl LinkSession {
    /// Open the configured serial port and start every background task.
    ///
    /// A failed initial connect is not fatal; the health monitor retries it.
    pub async fn open(config: LinkConfig, bus: EventBus) -> Self {
        let address = resolve_port(&config.transport.port);
        let (transport, frames) = serial_transport(&config.transport, bus.clone());
        let session = Self::start(
            config,
            address,
            bus,
            transport,
            frames,
            Box::new(SysinfoSampler::new()),
        );
        session.connect().await;
        session
    }

    /// Start the router, dispatcher and monitor over an existing transport.
    pub fn start(
        config: LinkConfig,
        address: String,
        bus: EventBus,
        transport: Arc<dyn Transport>,
        frames: mpsc::Receiver<InboundFrame>,
        sampler: Box<dyn ResourceSampler>,
    ) -> Self {
        let router = Arc::new(InboundEventRouter::new(bus.clone()));
        let router_cancel = CancellationToken::new();
        let router_task = router.clone().spawn(frames, router_cancel.clone());

        let dispatcher = Arc::new(CommandDispatcher::new(
            transport.clone(),
            bus.clone(),
            config.dispatcher.clone(),
        ));
        dispatcher.start();

        let monitor = LinkHealthMonitor::new(
            config.health.clone(),
            dispatcher.clone(),
            address.clone(),
            sampler,
            bus.clone(),
        );
        monitor.start();

        info!(
            address = %address,
            mode = %transport.wire_mode(),
            "Link session started"
        );
        Self {
            config,
            address,
            transport,
            dispatcher,
            monitor,
            router,
            router_cancel,
            router_task,
        }
    }

    async fn connect(&self) {
        if let Err(e) = self.transport.connect(&self.address).await {
            warn!(
                address = %self.address,
                error = %e,
                "Initial connect failed, health monitor will retry"
            );
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn submit(
        &self,
        command: ActuatorCommand,
        priority: CommandPriority,
    ) -> Result<String, SubmitError> {
        self.dispatcher.try_submit(command, priority)
    }

    pub async fn reconnect(&self) -> Result<()> {
        self.monitor.manual_reconnect().await?;
        Ok(())
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            address: self.address.clone(),
            connected: self.transport.is_connected(),
            readings: self.router.last_readings(),
            health: self.monitor.report(),
            dispatcher: self.dispatcher.stats(),
        }
    }

    /// Stop the motor and tear everything down.
    ///
    /// STOP is submitted first and given a short window to be sent; the
    /// background tasks are then stopped with bounded joins and the link
    /// is closed.
    pub async fn shutdown(self) {
        info!("Shutting down link session");
        if self.transport.is_connected() {
            self.submit_final_stop().await;
            if !self.dispatcher.drain(SHUTDOWN_DRAIN).await {
                warn!("Final STOP still queued at shutdown");
            }
        }

        self.monitor.stop().await;
        self.dispatcher.stop().await;
        self.transport.disconnect().await;

        self.router_cancel.cancel();
        let join_timeout = self.config.dispatcher.join_timeout();
        if tokio::time::timeout(join_timeout, self.router_task).await.is_err() {
            warn!("Inbound router did not stop in time");
        }
        info!("Link session closed");
    }

    async fn submit_final_stop(&self) {
        let submit = || {
            self.dispatcher.try_submit_as(
                ActuatorCommand::Stop,
                CommandPriority::Highest,
                CommandSource::system("shutdown"),
            )
        };
        match submit() {
            Ok(_) => {}
            Err(SubmitError::Throttled { .. }) => {
                tokio::time::sleep(self.config.dispatcher.throttle_interval()).await;
                if let Err(e) = submit() {
                    warn!(error = %e, "Final STOP rejected");
                }
            }
            Err(e) => warn!(error = %e, "Final STOP rejected"),
        }
    }
}
