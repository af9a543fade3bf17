mod announcements;
mod bookings;
mod calendar;
mod conflict;
mod error;
mod schedule;
mod validate;

pub use bookings::BookingChange;
pub use error::EngineError;

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::limits::MAX_PENDING_BOOKINGS;
use crate::model::*;
use crate::notify::{CalendarChange, ChangeKind, NotifyHub};
use crate::slots::SlotGrid;
use crate::wal::Wal;

pub type SharedDay = Arc<RwLock<DayState>>;
pub type SharedBooking = Arc<Mutex<BookingRequest>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch outcome.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<Pending>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, &batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes of a failed batch
    // never ride along with the next one.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

// ── Policy ──────────────────────────────────────────────

/// Facility-wide scheduling rules, fixed for the lifetime of an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingPolicy {
    pub grid: SlotGrid,
    /// Venues a member of the public may request.
    pub venues: Vec<String>,
    /// When false, new booking requests are refused with `BookingsClosed`.
    pub accepting_bookings: bool,
    /// Cap on requests awaiting a decision. Decided requests do not count.
    pub max_pending_bookings: usize,
}

pub const DEFAULT_VENUES: [&str; 3] = ["St. Joseph Cathedral", "Parish Hall", "Chapel"];

impl Default for SchedulingPolicy {
    fn default() -> Self {
        Self {
            grid: SlotGrid::default(),
            venues: DEFAULT_VENUES.iter().map(|v| v.to_string()).collect(),
            accepting_bookings: true,
            max_pending_bookings: MAX_PENDING_BOOKINGS,
        }
    }
}

// ── Replay ──────────────────────────────────────────────

/// Plain, unlocked state rebuilt from the log before the engine goes live.
#[derive(Default)]
struct Replay {
    days: BTreeMap<NaiveDate, DayState>,
    entry_dates: HashMap<Ulid, NaiveDate>,
    bookings: HashMap<Ulid, BookingRequest>,
    announcements: BTreeMap<Ulid, Announcement>,
}

impl Replay {
    fn insert_entry(&mut self, entry: ScheduleEntry) {
        let day = self
            .days
            .entry(entry.date)
            .or_insert_with(|| DayState::new(entry.date));
        if let Some(occupant) = day.occupant(entry.slot) {
            tracing::warn!(
                "replay: {} {} already held by {}, dropping {}",
                entry.date,
                entry.slot,
                occupant.id,
                entry.id
            );
            return;
        }
        self.entry_dates.insert(entry.id, entry.date);
        day.insert(entry);
    }

    fn remove_entry(&mut self, id: Ulid) {
        if let Some(date) = self.entry_dates.remove(&id)
            && let Some(day) = self.days.get_mut(&date)
        {
            day.remove(id);
        }
    }

    fn apply(&mut self, event: Event) {
        match event {
            Event::ScheduleEntryCreated { entry } => self.insert_entry(entry),
            Event::ScheduleEntryUpdated { entry } => {
                self.remove_entry(entry.id);
                self.insert_entry(entry);
            }
            Event::ScheduleEntryDeleted { id } => self.remove_entry(id),
            Event::BookingSubmitted { booking } | Event::BookingUpdated { booking } => {
                self.bookings.insert(booking.id, booking);
            }
            Event::BookingApproved { id, entry } => {
                if let Some(booking) = self.bookings.get_mut(&id) {
                    booking.status = BookingStatus::Approved;
                    booking.schedule_entry_id = Some(entry.id);
                }
                self.insert_entry(entry);
            }
            Event::BookingRejected { id } => {
                if let Some(booking) = self.bookings.get_mut(&id) {
                    booking.status = BookingStatus::Rejected;
                }
            }
            Event::AnnouncementPosted { announcement } => {
                self.announcements.insert(announcement.id, announcement);
            }
            Event::AnnouncementToggled { id, active } => {
                if let Some(a) = self.announcements.get_mut(&id) {
                    a.active = active;
                }
            }
            Event::AnnouncementDeleted { id } => {
                self.announcements.remove(&id);
            }
        }
    }
}

// ── Engine ──────────────────────────────────────────────

/// The scheduling core: schedule store, booking queue and announcements,
/// all backed by one write-ahead log. Clones are handles to the same state.
#[derive(Clone)]
pub struct Engine {
    state: Arc<EngineState>,
}

impl Deref for Engine {
    type Target = EngineState;

    fn deref(&self) -> &EngineState {
        &self.state
    }
}

/// State shared by every [`Engine`] handle.
///
/// Lock order is commit gate, then booking mutex, then day lock(s), with
/// two days always taken in ascending date order.
pub struct EngineState {
    days: DashMap<NaiveDate, SharedDay>,
    /// Reverse lookup: schedule entry id → date it sits on.
    entry_dates: DashMap<Ulid, NaiveDate>,
    bookings: DashMap<Ulid, SharedBooking>,
    /// Requests still awaiting a decision.
    pending: AtomicUsize,
    announcements: Mutex<BTreeMap<Ulid, Announcement>>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    policy: SchedulingPolicy,
    clock: Arc<dyn Clock>,
    /// Held shared by every mutation and exclusively by compaction, so a
    /// snapshot never misses an append that is still in flight.
    commit_gate: RwLock<()>,
    /// Monotonic so id order is creation order, even within a millisecond.
    ids: std::sync::Mutex<ulid::Generator>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        policy: SchedulingPolicy,
    ) -> io::Result<Self> {
        Self::with_clock(wal_path, notify, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        policy: SchedulingPolicy,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let replayed = events.len();
        let mut replay = Replay::default();
        for event in events {
            replay.apply(event);
        }

        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let Replay {
            days,
            entry_dates,
            bookings,
            announcements,
        } = replay;
        let pending = bookings
            .values()
            .filter(|b| b.status == BookingStatus::Pending)
            .count();
        tracing::info!(
            "replayed {replayed} events: {} schedule entries, {} booking requests, {} announcements",
            entry_dates.len(),
            bookings.len(),
            announcements.len()
        );

        let state = EngineState {
            days: days
                .into_iter()
                .map(|(date, day)| (date, Arc::new(RwLock::new(day))))
                .collect(),
            entry_dates: entry_dates.into_iter().collect(),
            bookings: bookings
                .into_iter()
                .map(|(id, b)| (id, Arc::new(Mutex::new(b))))
                .collect(),
            pending: AtomicUsize::new(pending),
            announcements: Mutex::new(announcements),
            wal_tx,
            notify,
            policy,
            clock,
            commit_gate: RwLock::new(()),
            ids: std::sync::Mutex::new(ulid::Generator::new()),
        };
        Ok(Self {
            state: Arc::new(state),
        })
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        &self.policy
    }

    pub fn grid(&self) -> &SlotGrid {
        &self.policy.grid
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    fn next_id(&self) -> Ulid {
        let mut ids = self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        ids.generate().unwrap_or_else(|_| Ulid::new())
    }

    /// Drive a mutation on its own task so it finishes even if the caller
    /// stops polling. Once a record reaches the WAL writer, the in-memory
    /// apply that follows it always runs too.
    async fn run_detached<T, Fut>(&self, op: impl FnOnce(Engine) -> Fut) -> Result<T, EngineError>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, EngineError>> + Send + 'static,
    {
        tokio::spawn(op(self.clone()))
            .await
            .map_err(|e| EngineError::Internal(format!("write task failed: {e}")))?
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Day state for a date, created empty on first write.
    fn day(&self, date: NaiveDate) -> SharedDay {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(date))))
            .value()
            .clone()
    }

    /// Day state for reads; dates never written have no state.
    fn existing_day(&self, date: NaiveDate) -> Option<SharedDay> {
        self.days.get(&date).map(|d| d.value().clone())
    }

    /// Write-lock two distinct days in ascending date order. Guards come back
    /// in argument order.
    async fn write_two_days(
        &self,
        a: NaiveDate,
        b: NaiveDate,
    ) -> (OwnedRwLockWriteGuard<DayState>, OwnedRwLockWriteGuard<DayState>) {
        debug_assert_ne!(a, b);
        if a < b {
            let ga = self.day(a).write_owned().await;
            let gb = self.day(b).write_owned().await;
            (ga, gb)
        } else {
            let gb = self.day(b).write_owned().await;
            let ga = self.day(a).write_owned().await;
            (ga, gb)
        }
    }

    fn entry_date(&self, id: Ulid) -> Option<NaiveDate> {
        self.entry_dates.get(&id).map(|d| *d.value())
    }

    fn booking_cell(&self, id: Ulid) -> Result<SharedBooking, EngineError> {
        self.bookings
            .get(&id)
            .map(|b| b.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    fn publish(&self, date: NaiveDate, entry_id: Ulid, kind: ChangeKind) {
        self.notify.send(CalendarChange {
            date,
            entry_id,
            kind,
        });
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        self.run_detached(|engine| async move { engine.compact_wal_inner().await })
            .await
    }

    async fn compact_wal_inner(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::new();

        let cells: Vec<SharedBooking> = self.bookings.iter().map(|b| b.value().clone()).collect();
        let mut snapshot = Vec::with_capacity(cells.len());
        for cell in cells {
            snapshot.push(cell.lock().await.clone());
        }
        snapshot.sort_by_key(|b| b.id);
        events.extend(snapshot.into_iter().map(|booking| Event::BookingSubmitted { booking }));

        let mut dates: Vec<NaiveDate> = self.days.iter().map(|d| *d.key()).collect();
        dates.sort();
        for date in dates {
            let Some(day) = self.existing_day(date) else { continue };
            let guard = day.read().await;
            events.extend(
                guard
                    .entries
                    .iter()
                    .cloned()
                    .map(|entry| Event::ScheduleEntryCreated { entry }),
            );
        }

        events.extend(
            self.announcements
                .lock()
                .await
                .values()
                .cloned()
                .map(|announcement| Event::AnnouncementPosted { announcement }),
        );

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        // Days emptied by deletes or moves no longer need state.
        self.days
            .retain(|_, day| day.try_read().map(|d| !d.is_empty()).unwrap_or(true));

        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        tracing::info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
