use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::Mutex;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::ChangeKind;

use super::conflict::{check_slot_free, record_conflict, validate_slot};
use super::validate;
use super::{Engine, EngineError};

/// What a staff `PUT` on a booking request asks for: a field edit or a
/// status decision, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingChange {
    Edit(BookingPatch),
    Decide(BookingStatus),
}

impl Engine {
    /// Accept a public booking request as Pending. The slot must not be held
    /// by a committed entry; other pending requests for it do not matter.
    pub async fn submit_booking(&self, draft: BookingDraft) -> Result<BookingRequest, EngineError> {
        self.run_detached(|engine| async move { engine.submit_booking_inner(draft).await })
            .await
    }

    async fn submit_booking_inner(&self, draft: BookingDraft) -> Result<BookingRequest, EngineError> {
        if !self.policy.accepting_bookings {
            tracing::debug!("booking refused: intake closed");
            return Err(EngineError::BookingsClosed);
        }
        validate_slot(self.grid(), draft.slot)?;
        let venue = validate::venue(&self.policy, &draft.venue)?;
        let name = validate::required_text("name", &draft.name, MAX_NAME_LEN)?;
        let phone = validate::phone(&draft.phone)?;
        let email = validate::email(draft.email.as_deref())?;
        validate::not_past(draft.date, self.today())?;
        if self.pending.load(Ordering::Acquire) >= self.policy.max_pending_bookings {
            return Err(EngineError::LimitExceeded("too many pending booking requests"));
        }

        let _gate = self.commit_gate.read().await;
        if let Some(day) = self.existing_day(draft.date) {
            check_slot_free(&*day.read().await, draft.slot, None, self.grid())
                .inspect_err(|e| record_conflict("submit_booking", e))?;
        }

        let booking = BookingRequest {
            id: self.next_id(),
            kind: draft.kind,
            venue,
            date: draft.date,
            slot: draft.slot,
            name,
            phone,
            email,
            status: BookingStatus::Pending,
            submitted_at: self.clock.now(),
            schedule_entry_id: None,
        };
        self.wal_append(&Event::BookingSubmitted {
            booking: booking.clone(),
        })
        .await?;
        self.bookings
            .insert(booking.id, Arc::new(Mutex::new(booking.clone())));
        self.pending.fetch_add(1, Ordering::AcqRel);

        metrics::counter!(crate::observability::BOOKINGS_SUBMITTED_TOTAL).increment(1);
        tracing::info!(
            "booking {} submitted: {} on {} at {}",
            booking.id,
            booking.kind,
            booking.date,
            self.grid().label(booking.slot)
        );
        Ok(booking)
    }

    /// Edit a request. Date, time and venue need it to be Pending; contact
    /// details can be corrected at any point.
    pub async fn update_booking(
        &self,
        id: Ulid,
        patch: BookingPatch,
    ) -> Result<BookingRequest, EngineError> {
        self.run_detached(|engine| async move { engine.update_booking_inner(id, patch).await })
            .await
    }

    async fn update_booking_inner(
        &self,
        id: Ulid,
        patch: BookingPatch,
    ) -> Result<BookingRequest, EngineError> {
        if let Some(slot) = patch.slot {
            validate_slot(self.grid(), slot)?;
        }
        let patch = BookingPatch {
            venue: patch
                .venue
                .as_deref()
                .map(|v| validate::venue(&self.policy, v))
                .transpose()?,
            name: patch
                .name
                .as_deref()
                .map(|n| validate::required_text("name", n, MAX_NAME_LEN))
                .transpose()?,
            phone: patch.phone.as_deref().map(validate::phone).transpose()?,
            email: patch
                .email
                .as_ref()
                .map(|e| validate::email(e.as_deref()))
                .transpose()?,
            ..patch
        };

        let _gate = self.commit_gate.read().await;
        let cell = self.booking_cell(id)?;
        let mut booking = cell.lock().await;
        if patch.touches_schedule() && booking.status.is_terminal() {
            return Err(EngineError::InvalidState {
                id,
                status: booking.status,
            });
        }

        let updated = BookingRequest {
            date: patch.date.unwrap_or(booking.date),
            slot: patch.slot.unwrap_or(booking.slot),
            venue: patch.venue.clone().unwrap_or_else(|| booking.venue.clone()),
            name: patch.name.clone().unwrap_or_else(|| booking.name.clone()),
            phone: patch.phone.clone().unwrap_or_else(|| booking.phone.clone()),
            email: match &patch.email {
                Some(email) => email.clone(),
                None => booking.email.clone(),
            },
            ..booking.clone()
        };
        if updated == *booking {
            return Ok(updated);
        }
        if (updated.date, updated.slot) != (booking.date, booking.slot) {
            validate::not_past(updated.date, self.today())?;
            if let Some(day) = self.existing_day(updated.date) {
                check_slot_free(&*day.read().await, updated.slot, None, self.grid())
                    .inspect_err(|e| record_conflict("update_booking", e))?;
            }
        }

        self.wal_append(&Event::BookingUpdated {
            booking: updated.clone(),
        })
        .await?;
        *booking = updated.clone();
        tracing::info!("booking {id} updated");
        Ok(updated)
    }

    /// Promote a Pending request into the schedule. The slot is re-checked
    /// under the day lock; on conflict the request stays Pending.
    pub async fn approve_booking(&self, id: Ulid) -> Result<BookingRequest, EngineError> {
        self.run_detached(|engine| async move { engine.approve_booking_inner(id).await })
            .await
    }

    async fn approve_booking_inner(&self, id: Ulid) -> Result<BookingRequest, EngineError> {
        let _gate = self.commit_gate.read().await;
        let cell = self.booking_cell(id)?;
        let mut booking = cell.lock().await;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidState {
                id,
                status: booking.status,
            });
        }

        let mut day = self.day(booking.date).write_owned().await;
        check_slot_free(&day, booking.slot, None, self.grid())
            .inspect_err(|e| record_conflict("approve_booking", e))?;

        let entry = ScheduleEntry {
            id: self.next_id(),
            kind: booking.kind.scheduled_as(),
            date: booking.date,
            slot: booking.slot,
            place: booking.venue.clone(),
            officiant: None,
            booking_id: Some(id),
        };
        self.wal_append(&Event::BookingApproved {
            id,
            entry: entry.clone(),
        })
        .await?;
        booking.status = BookingStatus::Approved;
        booking.schedule_entry_id = Some(entry.id);
        self.pending.fetch_sub(1, Ordering::AcqRel);
        self.entry_dates.insert(entry.id, entry.date);
        day.insert(entry.clone());
        drop(day);

        self.publish(entry.date, entry.id, ChangeKind::Created);
        metrics::counter!(crate::observability::BOOKING_DECISIONS_TOTAL, "outcome" => "approved")
            .increment(1);
        tracing::info!(
            "booking {id} approved as schedule entry {} on {} at {}",
            entry.id,
            entry.date,
            self.grid().label(entry.slot)
        );
        Ok(booking.clone())
    }

    /// Close a Pending request without touching the schedule.
    pub async fn reject_booking(&self, id: Ulid) -> Result<BookingRequest, EngineError> {
        self.run_detached(|engine| async move { engine.reject_booking_inner(id).await })
            .await
    }

    async fn reject_booking_inner(&self, id: Ulid) -> Result<BookingRequest, EngineError> {
        let _gate = self.commit_gate.read().await;
        let cell = self.booking_cell(id)?;
        let mut booking = cell.lock().await;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidState {
                id,
                status: booking.status,
            });
        }
        self.wal_append(&Event::BookingRejected { id }).await?;
        booking.status = BookingStatus::Rejected;
        self.pending.fetch_sub(1, Ordering::AcqRel);

        metrics::counter!(crate::observability::BOOKING_DECISIONS_TOTAL, "outcome" => "rejected")
            .increment(1);
        tracing::info!("booking {id} rejected");
        Ok(booking.clone())
    }

    pub async fn decide_booking(
        &self,
        id: Ulid,
        status: BookingStatus,
    ) -> Result<BookingRequest, EngineError> {
        match status {
            BookingStatus::Approved => self.approve_booking(id).await,
            BookingStatus::Rejected => self.reject_booking(id).await,
            BookingStatus::Pending => Err(EngineError::Validation(
                "status can only change to Approved or Rejected".into(),
            )),
        }
    }

    pub async fn change_booking(
        &self,
        id: Ulid,
        change: BookingChange,
    ) -> Result<BookingRequest, EngineError> {
        match change {
            BookingChange::Edit(patch) => self.update_booking(id, patch).await,
            BookingChange::Decide(status) => self.decide_booking(id, status).await,
        }
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<BookingRequest, EngineError> {
        let cell = self.booking_cell(id)?;
        let booking = cell.lock().await;
        Ok(booking.clone())
    }

    /// Requests in submission order, optionally filtered by status.
    pub async fn list_bookings(&self, status: Option<BookingStatus>) -> Vec<BookingRequest> {
        let cells: Vec<_> = self.bookings.iter().map(|b| b.value().clone()).collect();
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            let booking = cell.lock().await;
            if status.is_none_or(|s| booking.status == s) {
                out.push(booking.clone());
            }
        }
        out.sort_by_key(|b| b.id);
        out
    }

    pub async fn booking_summary(&self) -> BookingSummary {
        let cells: Vec<_> = self.bookings.iter().map(|b| b.value().clone()).collect();
        let mut summary = BookingSummary::default();
        for cell in cells {
            match cell.lock().await.status {
                BookingStatus::Pending => summary.pending += 1,
                BookingStatus::Approved => summary.approved += 1,
                BookingStatus::Rejected => summary.rejected += 1,
            }
        }
        summary
    }
}
