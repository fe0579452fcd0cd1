//! Dispatch queue.
//!
//! Unbounded priority queue: lower priority value first, submission order
//! within a priority.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use linact_core::CommandPriority;
use serde::{Deserialize, Serialize};

use crate::command::Command;

/// Queue contents by priority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Total number of commands in queue
    pub total_count: usize,
    /// Count per priority, index 0 is priority 1
    pub by_priority: [usize; 5],
}

/// Heap entry.
#[derive(Debug, Clone)]
struct QueueItem {
    command: Command,
    /// Insertion order, for FIFO within one priority
    sequence: u64,
}

impl PartialEq for QueueItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueItem {}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest item: the lowest priority value and
        // then the lowest sequence must compare greatest.
        other
            .command
            .priority
            .value()
            .cmp(&self.command.priority.value())
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Priority queue of pending commands.
#[derive(Debug, Default)]
pub struct DispatchQueue {
    heap: BinaryHeap<QueueItem>,
    next_sequence: u64,
}

impl DispatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command behind every queued command of the same priority.
    pub fn push(&mut self, command: Command) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueueItem { command, sequence });
    }

    /// Remove the next command in dispatch order.
    pub fn pop(&mut self) -> Option<Command> {
        self.heap.pop().map(|item| item.command)
    }

    /// Next command in dispatch order.
    pub fn peek(&self) -> Option<&Command> {
        self.heap.peek().map(|item| &item.command)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every queued command, returning how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.heap.len();
        self.heap.clear();
        removed
    }

    pub fn stats(&self) -> QueueStats {
        let mut by_priority = [0usize; 5];
        for item in self.heap.iter() {
            let idx = (item.command.priority.value() as usize).saturating_sub(1);
            if let Some(slot) = by_priority.get_mut(idx) {
                *slot += 1;
            }
        }
        QueueStats {
            total_count: self.heap.len(),
            by_priority,
        }
    }

    /// Number of queued commands at `priority`.
    pub fn count_at(&self, priority: CommandPriority) -> usize {
        self.heap
            .iter()
            .filter(|item| item.command.priority == priority)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandSource;
    use linact_core::ActuatorCommand;
    use tokio::time::Instant;

    fn cmd(command: ActuatorCommand, priority: CommandPriority) -> Command {
        Command::new(command, priority, CommandSource::Operator, Instant::now())
    }

    #[tokio::test]
    async fn test_queue_priority() {
        let mut queue = DispatchQueue::new();
        queue.push(cmd(ActuatorCommand::Up, CommandPriority::Low));
        queue.push(cmd(ActuatorCommand::Stop, CommandPriority::Highest));
        queue.push(cmd(ActuatorCommand::Down, CommandPriority::Normal));

        assert_eq!(queue.pop().unwrap().command, ActuatorCommand::Stop);
        assert_eq!(queue.pop().unwrap().command, ActuatorCommand::Down);
        assert_eq!(queue.pop().unwrap().command, ActuatorCommand::Up);
        assert!(queue.pop().is_none());
    }

    #[tokio::test]
    async fn test_queue_fifo_within_priority() {
        let mut queue = DispatchQueue::new();
        for interval in [100, 200, 300, 400] {
            queue.push(cmd(ActuatorCommand::SetSpeed(interval), CommandPriority::Normal));
        }
        queue.push(cmd(ActuatorCommand::Auto, CommandPriority::High));

        let order: Vec<ActuatorCommand> = std::iter::from_fn(|| queue.pop())
            .map(|c| c.command)
            .collect();
        assert_eq!(
            order,
            vec![
                ActuatorCommand::Auto,
                ActuatorCommand::SetSpeed(100),
                ActuatorCommand::SetSpeed(200),
                ActuatorCommand::SetSpeed(300),
                ActuatorCommand::SetSpeed(400),
            ]
        );
    }

    #[tokio::test]
    async fn test_queue_stats() {
        let mut queue = DispatchQueue::new();
        queue.push(cmd(ActuatorCommand::Up, CommandPriority::Highest));
        queue.push(cmd(ActuatorCommand::Up, CommandPriority::Lowest));
        queue.push(cmd(ActuatorCommand::Down, CommandPriority::Lowest));

        let stats = queue.stats();
        assert_eq!(stats.total_count, 3);
        assert_eq!(stats.by_priority, [1, 0, 0, 0, 2]);
        assert_eq!(queue.count_at(CommandPriority::Lowest), 2);
        assert_eq!(queue.peek().unwrap().priority, CommandPriority::Highest);

        assert_eq!(queue.clear(), 3);
        assert!(queue.is_empty());
    }
}
