use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::ChangeKind;

use super::conflict::{check_slot_free, record_conflict, validate_slot};
use super::validate::{optional_text, required_text};
use super::{Engine, EngineError};

/// How many times a write chases an entry that moved to another day while it
/// was waiting for a lock.
const MAX_RELOCATE_ATTEMPTS: usize = 8;

fn apply_patch(current: &ScheduleEntry, patch: &SchedulePatch) -> ScheduleEntry {
    ScheduleEntry {
        id: current.id,
        kind: patch.kind.unwrap_or(current.kind),
        date: patch.date.unwrap_or(current.date),
        slot: patch.slot.unwrap_or(current.slot),
        place: patch.place.clone().unwrap_or_else(|| current.place.clone()),
        officiant: match &patch.officiant {
            Some(officiant) => officiant.clone(),
            None => current.officiant.clone(),
        },
        booking_id: current.booking_id,
    }
}

impl Engine {
    /// Entries ordered by (date, slot), optionally bounded by an inclusive
    /// date window.
    pub async fn list_schedule_entries(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<ScheduleEntry>, EngineError> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(EngineError::Validation(format!(
                    "window start {from} is after end {to}"
                )));
            }
            if (to - from).num_days() > MAX_QUERY_WINDOW_DAYS {
                return Err(EngineError::LimitExceeded("query window too wide"));
            }
        }

        let mut dates: Vec<NaiveDate> = self
            .days
            .iter()
            .map(|d| *d.key())
            .filter(|d| from.is_none_or(|f| *d >= f) && to.is_none_or(|t| *d <= t))
            .collect();
        dates.sort();

        let mut entries = Vec::new();
        for date in dates {
            if let Some(day) = self.existing_day(date) {
                entries.extend(day.read().await.entries.iter().cloned());
            }
        }
        Ok(entries)
    }

    pub async fn get_schedule_entry(&self, id: Ulid) -> Result<ScheduleEntry, EngineError> {
        for _ in 0..MAX_RELOCATE_ATTEMPTS {
            let date = self.entry_date(id).ok_or(EngineError::NotFound(id))?;
            let Some(day) = self.existing_day(date) else { continue };
            if let Some(entry) = day.read().await.get(id) {
                return Ok(entry.clone());
            }
        }
        Err(EngineError::NotFound(id))
    }

    /// Commit a staff-authored entry. Past dates are allowed so historical
    /// events can be recorded.
    pub async fn create_schedule_entry(
        &self,
        draft: ScheduleDraft,
    ) -> Result<ScheduleEntry, EngineError> {
        self.run_detached(|engine| async move { engine.create_schedule_entry_inner(draft).await })
            .await
    }

    async fn create_schedule_entry_inner(
        &self,
        draft: ScheduleDraft,
    ) -> Result<ScheduleEntry, EngineError> {
        validate_slot(self.grid(), draft.slot)?;
        let place = required_text("place", &draft.place, MAX_PLACE_LEN)?;
        let officiant = optional_text("officiant", draft.officiant.as_deref(), MAX_OFFICIANT_LEN)?;

        let _gate = self.commit_gate.read().await;
        let mut day = self.day(draft.date).write_owned().await;
        check_slot_free(&day, draft.slot, None, self.grid())
            .inspect_err(|e| record_conflict("create_schedule", e))?;

        let entry = ScheduleEntry {
            id: self.next_id(),
            kind: draft.kind,
            date: draft.date,
            slot: draft.slot,
            place,
            officiant,
            booking_id: None,
        };
        self.wal_append(&Event::ScheduleEntryCreated {
            entry: entry.clone(),
        })
        .await?;
        self.entry_dates.insert(entry.id, entry.date);
        day.insert(entry.clone());
        drop(day);

        self.publish(entry.date, entry.id, ChangeKind::Created);
        metrics::counter!(crate::observability::SCHEDULE_WRITES_TOTAL, "op" => "create").increment(1);
        tracing::info!(
            "scheduled {} {} on {} at {}",
            entry.kind,
            entry.id,
            entry.date,
            self.grid().label(entry.slot)
        );
        Ok(entry)
    }

    /// Partial update. Moving onto the entry's own slot is never a conflict;
    /// a patch that changes nothing is not logged.
    pub async fn update_schedule_entry(
        &self,
        id: Ulid,
        patch: SchedulePatch,
    ) -> Result<ScheduleEntry, EngineError> {
        self.run_detached(|engine| async move { engine.update_schedule_entry_inner(id, patch).await })
            .await
    }

    async fn update_schedule_entry_inner(
        &self,
        id: Ulid,
        patch: SchedulePatch,
    ) -> Result<ScheduleEntry, EngineError> {
        if let Some(slot) = patch.slot {
            validate_slot(self.grid(), slot)?;
        }
        let patch = SchedulePatch {
            place: patch
                .place
                .as_deref()
                .map(|p| required_text("place", p, MAX_PLACE_LEN))
                .transpose()?,
            officiant: patch
                .officiant
                .as_ref()
                .map(|o| optional_text("officiant", o.as_deref(), MAX_OFFICIANT_LEN))
                .transpose()?,
            ..patch
        };

        let _gate = self.commit_gate.read().await;
        for _ in 0..MAX_RELOCATE_ATTEMPTS {
            let old_date = self.entry_date(id).ok_or(EngineError::NotFound(id))?;
            let new_date = patch.date.unwrap_or(old_date);

            let updated = if new_date == old_date {
                let mut day = self.day(old_date).write_owned().await;
                let Some(current) = day.get(id).cloned() else { continue };
                let updated = apply_patch(&current, &patch);
                if updated == current {
                    return Ok(current);
                }
                check_slot_free(&day, updated.slot, Some(id), self.grid())
                    .inspect_err(|e| record_conflict("update_schedule", e))?;
                self.wal_append(&Event::ScheduleEntryUpdated {
                    entry: updated.clone(),
                })
                .await?;
                day.remove(id);
                day.insert(updated.clone());
                drop(day);
                self.publish(old_date, id, ChangeKind::Updated);
                updated
            } else {
                let (mut from, mut to) = self.write_two_days(old_date, new_date).await;
                let Some(current) = from.get(id).cloned() else { continue };
                let updated = apply_patch(&current, &patch);
                check_slot_free(&to, updated.slot, Some(id), self.grid())
                    .inspect_err(|e| record_conflict("update_schedule", e))?;
                self.wal_append(&Event::ScheduleEntryUpdated {
                    entry: updated.clone(),
                })
                .await?;
                from.remove(id);
                to.insert(updated.clone());
                self.entry_dates.insert(id, new_date);
                drop((from, to));
                self.publish(old_date, id, ChangeKind::Removed);
                self.publish(new_date, id, ChangeKind::Created);
                updated
            };

            metrics::counter!(crate::observability::SCHEDULE_WRITES_TOTAL, "op" => "update").increment(1);
            tracing::info!(
                "updated schedule entry {id}: {} on {} at {}",
                updated.kind,
                updated.date,
                self.grid().label(updated.slot)
            );
            return Ok(updated);
        }
        Err(EngineError::NotFound(id))
    }

    /// Remove an entry and free its slot. A booking it was promoted from
    /// keeps its Approved status.
    pub async fn delete_schedule_entry(&self, id: Ulid) -> Result<ScheduleEntry, EngineError> {
        self.run_detached(|engine| async move { engine.delete_schedule_entry_inner(id).await })
            .await
    }

    async fn delete_schedule_entry_inner(&self, id: Ulid) -> Result<ScheduleEntry, EngineError> {
        let _gate = self.commit_gate.read().await;
        for _ in 0..MAX_RELOCATE_ATTEMPTS {
            let date = self.entry_date(id).ok_or(EngineError::NotFound(id))?;
            let mut day = self.day(date).write_owned().await;
            if !day.contains(id) {
                continue;
            }
            self.wal_append(&Event::ScheduleEntryDeleted { id }).await?;
            let removed = day.remove(id).ok_or(EngineError::NotFound(id))?;
            self.entry_dates.remove(&id);
            drop(day);

            self.publish(date, id, ChangeKind::Removed);
            metrics::counter!(crate::observability::SCHEDULE_WRITES_TOTAL, "op" => "delete").increment(1);
            tracing::info!("deleted schedule entry {id} on {date}");
            return Ok(removed);
        }
        Err(EngineError::NotFound(id))
    }
}
