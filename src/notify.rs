use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Event, Lesson};

const CHANNEL_CAPACITY: usize = 256;

/// In-process broadcast hub, one channel per teacher. Every accepted mutation
/// is published here after it is journaled and applied.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a teacher's events. Creates the channel if needed.
    pub fn subscribe(&self, teacher_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(teacher_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Publish an event. No-op if nobody is listening.
    pub fn send(&self, teacher_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&teacher_id) {
            let _ = sender.send(event.clone());
        }
    }
}

/// Outbound notification delivery (email, push, ...). Strictly best-effort:
/// the engine fires these after a transition commits and never waits for,
/// retries, or rolls back on the outcome.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, kind: &'static str, lesson: Lesson) -> Result<(), String>;
}

/// Default delivery: a structured log line.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, kind: &'static str, lesson: Lesson) -> Result<(), String> {
        tracing::info!(lesson = %lesson.id, teacher = %lesson.teacher_id, "notify: {kind}");
        Ok(())
    }
}
