use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::slots::SlotIndex;

/// Type of a committed, on-calendar event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Matrimony,
    Baptism,
    Confirmation,
    Memorial,
    Conversion,
    MassIntention,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Matrimony,
        EventKind::Baptism,
        EventKind::Confirmation,
        EventKind::Memorial,
        EventKind::Conversion,
        EventKind::MassIntention,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Matrimony => "Matrimony",
            EventKind::Baptism => "Baptism",
            EventKind::Confirmation => "Confirmation",
            EventKind::Memorial => "Memorial",
            EventKind::Conversion => "Conversion",
            EventKind::MassIntention => "MassIntention",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL.into_iter().find(|k| k.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type a member of the public may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingKind {
    Matrimony,
    Baptism,
    Confirmation,
    Funeral,
    MassIntention,
}

impl BookingKind {
    pub const ALL: [BookingKind; 5] = [
        BookingKind::Matrimony,
        BookingKind::Baptism,
        BookingKind::Confirmation,
        BookingKind::Funeral,
        BookingKind::MassIntention,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BookingKind::Matrimony => "Matrimony",
            BookingKind::Baptism => "Baptism",
            BookingKind::Confirmation => "Confirmation",
            BookingKind::Funeral => "Funeral",
            BookingKind::MassIntention => "MassIntention",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL.into_iter().find(|k| k.as_str().eq_ignore_ascii_case(s))
    }

    /// The calendar event an approved request of this kind becomes.
    pub fn scheduled_as(self) -> EventKind {
        match self {
            BookingKind::Matrimony => EventKind::Matrimony,
            BookingKind::Baptism => EventKind::Baptism,
            BookingKind::Confirmation => EventKind::Confirmation,
            BookingKind::Funeral => EventKind::Memorial,
            BookingKind::MassIntention => EventKind::MassIntention,
        }
    }
}

impl fmt::Display for BookingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "Pending",
            BookingStatus::Approved => "Approved",
            BookingStatus::Rejected => "Rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        [BookingStatus::Pending, BookingStatus::Approved, BookingStatus::Rejected]
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s))
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, BookingStatus::Pending)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed event occupying exactly one (date, slot).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: Ulid,
    pub kind: EventKind,
    pub date: NaiveDate,
    pub slot: SlotIndex,
    pub place: String,
    pub officiant: Option<String>,
    /// Set when the entry was created by approving a booking request.
    pub booking_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub id: Ulid,
    pub kind: BookingKind,
    pub venue: String,
    pub date: NaiveDate,
    pub slot: SlotIndex,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub status: BookingStatus,
    pub submitted_at: DateTime<Utc>,
    pub schedule_entry_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: Ulid,
    pub content: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// All entries of one calendar day, kept sorted by slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayState {
    pub date: NaiveDate,
    pub entries: Vec<ScheduleEntry>,
}

impl DayState {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn occupant(&self, slot: SlotIndex) -> Option<&ScheduleEntry> {
        self.entries
            .binary_search_by_key(&slot, |e| e.slot)
            .ok()
            .map(|pos| &self.entries[pos])
    }

    pub fn get(&self, id: Ulid) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn contains(&self, id: Ulid) -> bool {
        self.get(id).is_some()
    }

    /// Insert keeping slot order. Callers check the slot is free first.
    pub fn insert(&mut self, entry: ScheduleEntry) {
        debug_assert!(self.occupant(entry.slot).is_none(), "slot already occupied");
        let pos = self.entries.partition_point(|e| e.slot < entry.slot);
        self.entries.insert(pos, entry);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<ScheduleEntry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }
}

/// WAL record format. One record per committed state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ScheduleEntryCreated { entry: ScheduleEntry },
    ScheduleEntryUpdated { entry: ScheduleEntry },
    ScheduleEntryDeleted { id: Ulid },
    BookingSubmitted { booking: BookingRequest },
    BookingUpdated { booking: BookingRequest },
    /// Approval and promotion are a single record so replay can never see one without the other.
    BookingApproved { id: Ulid, entry: ScheduleEntry },
    BookingRejected { id: Ulid },
    AnnouncementPosted { announcement: Announcement },
    AnnouncementToggled { id: Ulid, active: bool },
    AnnouncementDeleted { id: Ulid },
}

// ── Operation inputs ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDraft {
    pub kind: EventKind,
    pub date: NaiveDate,
    pub slot: SlotIndex,
    pub place: String,
    pub officiant: Option<String>,
}

/// Partial update of a schedule entry. `officiant: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulePatch {
    pub kind: Option<EventKind>,
    pub date: Option<NaiveDate>,
    pub slot: Option<SlotIndex>,
    pub place: Option<String>,
    pub officiant: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDraft {
    pub kind: BookingKind,
    pub venue: String,
    pub date: NaiveDate,
    pub slot: SlotIndex,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

/// Partial update of a booking request. Date, slot and venue are schedule
/// fields and need the request to be pending; contact fields do not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingPatch {
    pub date: Option<NaiveDate>,
    pub slot: Option<SlotIndex>,
    pub venue: Option<String>,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<Option<String>>,
}

impl BookingPatch {
    pub fn touches_schedule(&self) -> bool {
        self.date.is_some() || self.slot.is_some() || self.venue.is_some()
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayViewItem {
    pub slot: SlotIndex,
    pub kind: EventKind,
    pub id: Ulid,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BookingSummary {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}
