use std::fmt;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Label format used at the HTTP boundary, e.g. `8:00 AM`.
pub const LABEL_FMT: &str = "%-I:%M %p";

/// Position of a slot within the day's grid. Slot 0 starts at opening time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SlotIndex(pub u16);

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One bookable time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    pub index: SlotIndex,
    pub start: NaiveTime,
}

impl TimeSlot {
    pub fn label(&self) -> String {
        self.start.format(LABEL_FMT).to_string()
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.start.format(LABEL_FMT))
    }
}

/// Produce the day's slots: the first at `open_hour`, then every
/// `interval_minutes`, up to and including one that lands on `close_hour`.
///
/// Degenerate input (zero interval, open after close, close past 23h)
/// yields no slots.
pub fn generate_slots(open_hour: u32, close_hour: u32, interval_minutes: u32) -> Vec<TimeSlot> {
    if interval_minutes == 0 || open_hour > close_hour || close_hour > 23 {
        return Vec::new();
    }
    let close = close_hour * 60;
    let mut slots = Vec::new();
    let mut minute = open_hour * 60;
    while minute <= close {
        let Some(start) = NaiveTime::from_hms_opt(minute / 60, minute % 60, 0) else {
            break;
        };
        slots.push(TimeSlot {
            index: SlotIndex(slots.len() as u16),
            start,
        });
        minute += interval_minutes;
    }
    slots
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridError {
    ZeroInterval,
    OpenAfterClose { open_hour: u32, close_hour: u32 },
    CloseOutOfRange(u32),
}

impl fmt::Display for GridError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GridError::ZeroInterval => write!(f, "slot interval must be at least one minute"),
            GridError::OpenAfterClose {
                open_hour,
                close_hour,
            } => write!(f, "opening hour {open_hour} is after closing hour {close_hour}"),
            GridError::CloseOutOfRange(hour) => {
                write!(f, "closing hour {hour} is outside 0..=23")
            }
        }
    }
}

impl std::error::Error for GridError {}

/// The closed set of valid times for any date. Every `time` value that enters
/// the system is resolved against this grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotGrid {
    open_hour: u32,
    close_hour: u32,
    interval_minutes: u32,
    slots: Vec<TimeSlot>,
}

impl Default for SlotGrid {
    /// 08:00 to 17:00 every 90 minutes.
    fn default() -> Self {
        Self::build(8, 17, 90)
    }
}

impl SlotGrid {
    pub fn new(open_hour: u32, close_hour: u32, interval_minutes: u32) -> Result<Self, GridError> {
        if interval_minutes == 0 {
            return Err(GridError::ZeroInterval);
        }
        if close_hour > 23 {
            return Err(GridError::CloseOutOfRange(close_hour));
        }
        if open_hour > close_hour {
            return Err(GridError::OpenAfterClose {
                open_hour,
                close_hour,
            });
        }
        Ok(Self::build(open_hour, close_hour, interval_minutes))
    }

    fn build(open_hour: u32, close_hour: u32, interval_minutes: u32) -> Self {
        Self {
            open_hour,
            close_hour,
            interval_minutes,
            slots: generate_slots(open_hour, close_hour, interval_minutes),
        }
    }

    pub fn slots(&self) -> &[TimeSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    pub fn hours(&self) -> (u32, u32) {
        (self.open_hour, self.close_hour)
    }

    pub fn slot(&self, index: SlotIndex) -> Option<TimeSlot> {
        self.slots.get(usize::from(index.0)).copied()
    }

    pub fn contains(&self, index: SlotIndex) -> bool {
        usize::from(index.0) < self.slots.len()
    }

    /// Display label for an index; falls back to `#n` for indices outside the grid.
    pub fn label(&self, index: SlotIndex) -> String {
        match self.slot(index) {
            Some(slot) => slot.label(),
            None => index.to_string(),
        }
    }

    /// Resolve a label to its slot. Accepts the canonical label and
    /// zero-padded or lowercase spellings of the same time (`08:00 am`).
    pub fn parse(&self, label: &str) -> Option<SlotIndex> {
        let label = label.trim();
        if let Some(slot) = self.slots.iter().find(|s| s.label() == label) {
            return Some(slot.index);
        }
        let time = NaiveTime::parse_from_str(&label.to_ascii_uppercase(), "%I:%M %p").ok()?;
        self.slots.iter().find(|s| s.start == time).map(|s| s.index)
    }
}
