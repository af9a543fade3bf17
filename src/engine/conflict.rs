use std::collections::BTreeSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::DayState;
use crate::slots::{SlotGrid, SlotIndex, TimeSlot};

use super::{Engine, EngineError};

pub(crate) fn validate_slot(grid: &SlotGrid, slot: SlotIndex) -> Result<(), EngineError> {
    if !grid.contains(slot) {
        return Err(EngineError::Validation(format!(
            "time {slot} is not one of the {} configured slots",
            grid.len()
        )));
    }
    Ok(())
}

/// Fail with `SlotConflict` if another entry holds `slot`. An entry never
/// conflicts with itself, so `ignore` lets an update stay in place.
pub(crate) fn check_slot_free(
    day: &DayState,
    slot: SlotIndex,
    ignore: Option<Ulid>,
    grid: &SlotGrid,
) -> Result<(), EngineError> {
    match day.occupant(slot) {
        Some(occupant) if Some(occupant.id) != ignore => Err(EngineError::SlotConflict {
            date: day.date,
            time: grid.label(slot),
            occupant: occupant.id,
        }),
        _ => Ok(()),
    }
}

impl Engine {
    /// True when no committed entry holds (date, slot). Pending requests
    /// do not count.
    pub async fn is_available(&self, date: NaiveDate, slot: SlotIndex) -> bool {
        match self.existing_day(date) {
            Some(day) => day.read().await.occupant(slot).is_none(),
            None => true,
        }
    }

    pub async fn taken_slots(&self, date: NaiveDate) -> BTreeSet<SlotIndex> {
        match self.existing_day(date) {
            Some(day) => day.read().await.entries.iter().map(|e| e.slot).collect(),
            None => BTreeSet::new(),
        }
    }

    /// Every slot of the grid with its availability on `date`.
    pub async fn slot_availability(&self, date: NaiveDate) -> Vec<(TimeSlot, bool)> {
        let taken = self.taken_slots(date).await;
        self.grid()
            .slots()
            .iter()
            .map(|slot| (*slot, !taken.contains(&slot.index)))
            .collect()
    }
}

/// Count and log a refused write. Other errors pass through untouched.
pub(crate) fn record_conflict(op: &'static str, err: &EngineError) {
    if let EngineError::SlotConflict { date, time, occupant } = err {
        metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL, "op" => op).increment(1);
        tracing::debug!("{op}: {date} {time} already held by {occupant}");
    }
}
