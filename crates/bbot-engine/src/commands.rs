//! Control commands.
//!
//! Commands arrive over a single-consumer channel, each carrying a
//! correlation id so the control plane can match responses. Every
//! command is idempotent: re-issuing one in the same state succeeds
//! without side effects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Command kinds accepted by a running engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Stop,
    Pause,
    Resume,
    /// Flatten positions that qualify for a time-based exit.
    TimeStop,
    /// Flatten everything and refuse new entries.
    PanicExit,
    /// Latch the kill switch.
    KillSwitch,
    /// Recover from ERROR, or reset a latched kill switch.
    Retry,
}

/// A command with its correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub kind: CommandKind,
    pub correlation_id: String,
    pub issued_at: DateTime<Utc>,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            correlation_id: Uuid::new_v4().to_string(),
            issued_at: Utc::now(),
        }
    }
}

/// Response to a processed command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
}

impl CommandResult {
    pub fn ok(command: &Command, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            correlation_id: command.correlation_id.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn failed(command: &Command, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            correlation_id: command.correlation_id.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Producer half handed to the control plane.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<(Command, mpsc::UnboundedSender<CommandResult>)>,
}

impl CommandSender {
    /// Send a command. The result arrives on the returned receiver once
    /// the engine has processed it.
    pub fn send(&self, command: Command) -> mpsc::UnboundedReceiver<CommandResult> {
        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let _ = self.tx.send((command, result_tx));
        result_rx
    }
}

/// Consumer half owned by the engine.
pub struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<(Command, mpsc::UnboundedSender<CommandResult>)>,
}

impl CommandReceiver {
    /// Drain without blocking.
    pub fn drain(&mut self) -> Vec<(Command, mpsc::UnboundedSender<CommandResult>)> {
        let mut commands = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            commands.push(item);
        }
        commands
    }
}

/// Build a connected command channel pair.
pub fn command_channel() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandSender { tx }, CommandReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_round_trip() {
        let (sender, mut receiver) = command_channel();
        let command = Command::new(CommandKind::Pause);
        let correlation = command.correlation_id.clone();
        let mut result_rx = sender.send(command);

        let drained = receiver.drain();
        assert_eq!(drained.len(), 1);
        let (received, result_tx) = &drained[0];
        assert_eq!(received.kind, CommandKind::Pause);
        result_tx
            .send(CommandResult::ok(received, "paused"))
            .unwrap();

        let result = result_rx.recv().await.unwrap();
        assert!(result.success);
        assert_eq!(result.correlation_id, correlation);
    }
}
