use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Removed,
}

/// One schedule write as seen by a calendar view: the date to refresh and
/// the entry that changed on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalendarChange {
    pub date: NaiveDate,
    pub entry_id: Ulid,
    pub kind: ChangeKind,
}

/// Broadcast hub for calendar changes. Every subscriber sees every date.
pub struct NotifyHub {
    sender: broadcast::Sender<CalendarChange>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CalendarChange> {
        self.sender.subscribe()
    }

    /// Publish a change. No-op if nobody is listening.
    pub fn send(&self, change: CalendarChange) {
        let _ = self.sender.send(change);
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
