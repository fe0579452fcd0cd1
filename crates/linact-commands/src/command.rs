//! Queued command records.

use std::time::Duration;

use linact_core::{ActuatorCommand, CommandId, CommandPriority};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// Who asked for a command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum CommandSource {
    /// Operator or application request
    #[default]
    Operator,
    /// Issued by the link layer itself (recovery, shutdown)
    System {
        /// Reason
        reason: String,
    },
    /// Re-queued after a failed send
    Retry {
        /// Id of the failed command
        retry_of: CommandId,
    },
}

impl CommandSource {
    pub fn system(reason: impl Into<String>) -> Self {
        CommandSource::System {
            reason: reason.into(),
        }
    }

    /// Get the source type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            CommandSource::Operator => "operator",
            CommandSource::System { .. } => "system",
            CommandSource::Retry { .. } => "retry",
        }
    }
}

/// A command waiting in the dispatch queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Unique id
    pub id: CommandId,
    /// What to send
    pub command: ActuatorCommand,
    /// Queue priority
    pub priority: CommandPriority,
    /// Time the command entered the queue
    pub submitted_at: Instant,
    /// Origin
    pub source: CommandSource,
}

impl Command {
    pub fn new(
        command: ActuatorCommand,
        priority: CommandPriority,
        source: CommandSource,
        submitted_at: Instant,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            command,
            priority,
            submitted_at,
            source,
        }
    }

    /// Fresh command carrying the same body, for re-queueing after a failure.
    ///
    /// The retry gets a new id and a new submit time, so it ages from the
    /// moment it is re-queued.
    pub fn retry(&self, priority: CommandPriority, now: Instant) -> Self {
        Self::new(
            self.command.clone(),
            priority,
            CommandSource::Retry {
                retry_of: self.id.clone(),
            },
            now,
        )
    }

    /// Time spent in the queue so far.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.submitted_at)
    }

    /// Whether the command is older than `threshold`.
    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        self.age(now) > threshold
    }

    /// Id of the command this one retries, if any.
    pub fn retry_of(&self) -> Option<&CommandId> {
        match &self.source {
            CommandSource::Retry { retry_of } => Some(retry_of),
            _ => None,
        }
    }
}
