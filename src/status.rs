//! Run states and the status observer interface.
//!
//! Observers are the only coupling between a run and whatever presents it
//! (console, log file, a UI label).

use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Pipeline state. `Failed` is reached from any stage on a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunState {
    #[default]
    Idle,
    Loading,
    Validating,
    Fetching,
    Ranking,
    Exporting,
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Loading => "loading",
            RunState::Validating => "validating",
            RunState::Fetching => "fetching",
            RunState::Ranking => "ranking",
            RunState::Exporting => "exporting",
            RunState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Severity of a status message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
}

/// One human-readable progress message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub state: RunState,
    pub level: StatusLevel,
    pub message: String,
}

impl StatusUpdate {
    pub fn info(state: RunState, message: impl Into<String>) -> Self {
        Self {
            state,
            level: StatusLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(state: RunState, message: impl Into<String>) -> Self {
        Self {
            state,
            level: StatusLevel::Warning,
            message: message.into(),
        }
    }
}

/// Receives status messages from a running pipeline
pub trait StatusObserver: Send + Sync {
    fn on_status(&self, update: &StatusUpdate);
}

/// Forwards status messages to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl StatusObserver for LogObserver {
    fn on_status(&self, update: &StatusUpdate) {
        match update.level {
            StatusLevel::Info => info!("[{}] {}", update.state, update.message),
            StatusLevel::Warning => warn!("[{}] {}", update.state, update.message),
        }
    }
}

/// Pushes status messages into a channel for a separate consumer task.
/// A closed receiver drops messages silently.
impl StatusObserver for mpsc::UnboundedSender<StatusUpdate> {
    fn on_status(&self, update: &StatusUpdate) {
        let _ = self.send(update.clone());
    }
}

/// Keeps every status message in memory, for embedding applications that
/// render the log after the run.
#[derive(Debug, Default)]
pub struct CollectingObserver {
    updates: Mutex<Vec<StatusUpdate>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the messages received so far
    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.updates().into_iter().map(|u| u.message).collect()
    }
}

impl StatusObserver for CollectingObserver {
    fn on_status(&self, update: &StatusUpdate) {
        if let Ok(mut guard) = self.updates.lock() {
            guard.push(update.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_observer() {
        let observer = CollectingObserver::new();
        observer.on_status(&StatusUpdate::info(RunState::Ranking, "Ranking 3 records"));
        assert_eq!(observer.messages(), vec!["Ranking 3 records".to_string()]);
        assert_eq!(observer.updates()[0].state, RunState::Ranking);
    }

    #[test]
    fn test_run_state_display() {
        assert_eq!(RunState::Fetching.to_string(), "fetching");
        assert_eq!(RunState::default(), RunState::Idle);
    }

    #[tokio::test]
    async fn test_channel_observer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.on_status(&StatusUpdate::info(RunState::Loading, "Loading addresses.txt"));
        tx.on_status(&StatusUpdate::warning(RunState::Fetching, "batch 1 failed"));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.state, RunState::Loading);
        assert_eq!(first.level, StatusLevel::Info);

        let second = rx.recv().await.unwrap();
        assert_eq!(second.level, StatusLevel::Warning);
        assert_eq!(second.message, "batch 1 failed");
    }

    #[test]
    fn test_channel_observer_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel::<StatusUpdate>();
        drop(rx);
        tx.on_status(&StatusUpdate::info(RunState::Idle, "done"));
    }
}
