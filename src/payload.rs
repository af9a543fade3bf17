//! JSON shapes at the HTTP boundary and their conversion into engine inputs.
//!
//! Request bodies are deserialized leniently (every field optional) so that
//! a missing field is reported as a validation error naming that field,
//! rather than as a generic decode failure.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use ulid::Ulid;
use validator::Validate;

use crate::engine::{BookingChange, EngineError};
use crate::limits::*;
use crate::model::*;
use crate::slots::{SlotGrid, SlotIndex};

// `validator` length bounds are `u64`; mirror the `usize` limits for use in derive attributes.
const MAX_NAME_LEN_U64: u64 = MAX_NAME_LEN as u64;
const MAX_PHONE_LEN_U64: u64 = MAX_PHONE_LEN as u64;
const MAX_EMAIL_LEN_U64: u64 = MAX_EMAIL_LEN as u64;
const MAX_PLACE_LEN_U64: u64 = MAX_PLACE_LEN as u64;
const MAX_OFFICIANT_LEN_U64: u64 = MAX_OFFICIANT_LEN as u64;

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`).
fn double_option<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

fn required<T>(field: &str, value: Option<T>) -> Result<T, EngineError> {
    value.ok_or_else(|| EngineError::Validation(format!("{field} is required")))
}

/// Run a form's declared field rules, folding every failure into one
/// validation message.
fn check(form: &impl Validate) -> Result<(), EngineError> {
    form.validate().map_err(|errors| {
        let mut problems: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => message.to_string(),
                    None => format!("{field} is invalid"),
                })
            })
            .collect();
        problems.sort();
        EngineError::Validation(problems.join("; "))
    })
}

// ── Parsers ──────────────────────────────────────────────

pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::Validation(format!("{field} must be YYYY-MM-DD, got {value:?}")))
}

/// `YYYY-MM` to (year, month).
pub fn parse_month(value: &str) -> Result<(i32, u32), EngineError> {
    let invalid = || EngineError::Validation(format!("month must be YYYY-MM, got {value:?}"));
    let (year, month) = value.trim().split_once('-').ok_or_else(invalid)?;
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let month: u32 = month.parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
    Ok((year, month))
}

pub fn parse_id(value: &str) -> Result<Ulid, EngineError> {
    Ulid::from_string(value.trim())
        .map_err(|_| EngineError::Validation(format!("{value:?} is not a valid id")))
}

/// Resolve a time label against the grid. Anything off-grid is rejected.
pub fn parse_time(grid: &SlotGrid, value: &str) -> Result<SlotIndex, EngineError> {
    grid.parse(value).ok_or_else(|| {
        let labels: Vec<String> = grid.slots().iter().map(|s| s.label()).collect();
        EngineError::Validation(format!(
            "time {value:?} is not a bookable slot; expected one of {}",
            labels.join(", ")
        ))
    })
}

fn parse_event_kind(value: &str) -> Result<EventKind, EngineError> {
    EventKind::parse(value).ok_or_else(|| {
        let names: Vec<&str> = EventKind::ALL.iter().map(|k| k.as_str()).collect();
        EngineError::Validation(format!(
            "unknown event type {value:?}; expected one of {}",
            names.join(", ")
        ))
    })
}

fn parse_booking_kind(value: &str) -> Result<BookingKind, EngineError> {
    BookingKind::parse(value).ok_or_else(|| {
        let names: Vec<&str> = BookingKind::ALL.iter().map(|k| k.as_str()).collect();
        EngineError::Validation(format!(
            "unknown booking type {value:?}; expected one of {}",
            names.join(", ")
        ))
    })
}

pub fn parse_status(value: &str) -> Result<BookingStatus, EngineError> {
    BookingStatus::parse(value).ok_or_else(|| {
        EngineError::Validation(format!(
            "unknown status {value:?}; expected Pending, Approved or Rejected"
        ))
    })
}

// ── Schedule entries ─────────────────────────────────────

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ScheduleForm {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    #[validate(length(max = MAX_PLACE_LEN_U64, message = "place is too long"))]
    pub place: Option<String>,
    #[serde(default, alias = "priest", deserialize_with = "double_option")]
    #[validate(length(max = MAX_OFFICIANT_LEN_U64, message = "officiant is too long"))]
    pub officiant: Option<Option<String>>,
}

impl ScheduleForm {
    pub fn into_draft(self, grid: &SlotGrid) -> Result<ScheduleDraft, EngineError> {
        check(&self)?;
        Ok(ScheduleDraft {
            kind: parse_event_kind(&required("type", self.kind)?)?,
            date: parse_date("date", &required("date", self.date)?)?,
            slot: parse_time(grid, &required("time", self.time)?)?,
            place: required("place", self.place)?,
            officiant: self.officiant.flatten(),
        })
    }

    pub fn into_patch(self, grid: &SlotGrid) -> Result<SchedulePatch, EngineError> {
        check(&self)?;
        Ok(SchedulePatch {
            kind: self.kind.as_deref().map(parse_event_kind).transpose()?,
            date: self.date.as_deref().map(|d| parse_date("date", d)).transpose()?,
            slot: self.time.as_deref().map(|t| parse_time(grid, t)).transpose()?,
            place: self.place,
            officiant: self.officiant,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScheduleEntryView {
    pub id: Ulid,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub date: NaiveDate,
    pub time: String,
    pub place: String,
    pub officiant: Option<String>,
    pub booking_id: Option<Ulid>,
}

impl ScheduleEntryView {
    pub fn new(entry: ScheduleEntry, grid: &SlotGrid) -> Self {
        Self {
            id: entry.id,
            kind: entry.kind,
            date: entry.date,
            time: grid.label(entry.slot),
            place: entry.place,
            officiant: entry.officiant,
            booking_id: entry.booking_id,
        }
    }
}

// ── Booking requests ─────────────────────────────────────

#[derive(Debug, Default, Deserialize, Validate)]
pub struct BookingForm {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub venue: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    #[validate(length(max = MAX_NAME_LEN_U64, message = "name is too long"))]
    pub name: Option<String>,
    #[validate(length(max = MAX_PHONE_LEN_U64, message = "phone is too long"))]
    pub phone: Option<String>,
    #[validate(email(message = "email is not an address"))]
    #[validate(length(max = MAX_EMAIL_LEN_U64, message = "email is too long"))]
    pub email: Option<String>,
}

impl BookingForm {
    pub fn into_draft(self, grid: &SlotGrid) -> Result<BookingDraft, EngineError> {
        check(&self)?;
        Ok(BookingDraft {
            kind: parse_booking_kind(&required("type", self.kind)?)?,
            venue: required("venue", self.venue)?,
            date: parse_date("date", &required("date", self.date)?)?,
            slot: parse_time(grid, &required("time", self.time)?)?,
            name: required("name", self.name)?,
            phone: required("phone", self.phone)?,
            email: self.email,
        })
    }
}

/// Body of `PUT /api/bookings/{id}`: either `{"status": ...}` alone or a
/// set of field edits.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct BookingUpdate {
    pub status: Option<String>,
    pub venue: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    #[validate(length(max = MAX_NAME_LEN_U64, message = "name is too long"))]
    pub name: Option<String>,
    #[validate(length(max = MAX_PHONE_LEN_U64, message = "phone is too long"))]
    pub phone: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[validate(email(message = "email is not an address"))]
    #[validate(length(max = MAX_EMAIL_LEN_U64, message = "email is too long"))]
    pub email: Option<Option<String>>,
}

impl BookingUpdate {
    pub fn into_change(self, grid: &SlotGrid) -> Result<BookingChange, EngineError> {
        check(&self)?;
        let edits = self.venue.is_some()
            || self.date.is_some()
            || self.time.is_some()
            || self.name.is_some()
            || self.phone.is_some()
            || self.email.is_some();
        if let Some(status) = self.status {
            if edits {
                return Err(EngineError::Validation(
                    "status cannot be changed together with other fields".into(),
                ));
            }
            return Ok(BookingChange::Decide(parse_status(&status)?));
        }
        Ok(BookingChange::Edit(BookingPatch {
            date: self.date.as_deref().map(|d| parse_date("date", d)).transpose()?,
            slot: self.time.as_deref().map(|t| parse_time(grid, t)).transpose()?,
            venue: self.venue,
            name: self.name,
            phone: self.phone,
            email: self.email,
        }))
    }
}

#[derive(Debug, Deserialize)]
pub struct BookingQuery {
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BookingView {
    pub id: Ulid,
    #[serde(rename = "type")]
    pub kind: BookingKind,
    pub venue: String,
    pub date: NaiveDate,
    pub time: String,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub status: BookingStatus,
    pub submitted_at: DateTime<Utc>,
    pub schedule_entry_id: Option<Ulid>,
}

impl BookingView {
    pub fn new(booking: BookingRequest, grid: &SlotGrid) -> Self {
        Self {
            id: booking.id,
            kind: booking.kind,
            venue: booking.venue,
            date: booking.date,
            time: grid.label(booking.slot),
            name: booking.name,
            phone: booking.phone,
            email: booking.email,
            status: booking.status,
            submitted_at: booking.submitted_at,
            schedule_entry_id: booking.schedule_entry_id,
        }
    }
}

// ── Calendar ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SlotView {
    pub time: String,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct DayViewItemView {
    pub time: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub id: Ulid,
}

impl DayViewItemView {
    pub fn new(item: DayViewItem, grid: &SlotGrid) -> Self {
        Self {
            time: grid.label(item.slot),
            kind: item.kind,
            id: item.id,
        }
    }
}

// ── Announcements ────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AnnouncementForm {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnnouncementUpdate {
    #[serde(alias = "is_active")]
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct AnnouncementQuery {
    #[serde(default)]
    pub active: bool,
}
