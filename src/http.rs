use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{MatchedPath, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures::Stream;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;

use crate::engine::{Engine, EngineError};
use crate::model::{Announcement, BookingSummary};
use crate::payload::*;

type AppState = Arc<Engine>;
type ApiResult<T> = Result<T, EngineError>;

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::Validation(_) | EngineError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::SlotConflict { .. } | EngineError::InvalidState { .. } => {
                StatusCode::CONFLICT
            }
            EngineError::BookingsClosed => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::WalError(_) | EngineError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        } else {
            tracing::debug!("request refused: {self}");
        }
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| EngineError::Validation(rejection.body_text()))
}

fn query<T>(params: Result<Query<T>, QueryRejection>) -> ApiResult<T> {
    params
        .map(|Query(value)| value)
        .map_err(|rejection| EngineError::Validation(rejection.body_text()))
}

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/slots", get(list_slots))
        .route("/api/availability", get(availability))
        .route("/api/schedules", get(list_schedules).post(create_schedule))
        .route(
            "/api/schedules/{id}",
            get(get_schedule).put(update_schedule).delete(delete_schedule),
        )
        .route("/api/bookings", get(list_bookings).post(submit_booking))
        .route("/api/bookings/summary", get(booking_summary))
        .route("/api/bookings/{id}", get(get_booking).put(update_booking))
        .route("/api/bookings/{id}/approve", post(approve_booking))
        .route("/api/bookings/{id}/reject", post(reject_booking))
        .route("/api/calendar/day/{date}", get(day_view))
        .route("/api/calendar/month/{month}", get(month_badges))
        .route("/api/calendar/changes", get(calendar_changes))
        .route(
            "/api/announcements",
            get(list_announcements).post(post_announcement),
        )
        .route(
            "/api/announcements/{id}",
            put(update_announcement).delete(delete_announcement),
        )
        .layer(middleware::from_fn(track_metrics))
        .with_state(engine)
}

/// Serve the API until `shutdown` resolves, then drain in-flight requests.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<Engine>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Request count and latency per matched route.
async fn track_metrics(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| "unknown".into());
    let method = request.method().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        crate::observability::REQUESTS_TOTAL,
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        crate::observability::REQUEST_DURATION_SECONDS,
        "method" => method,
        "route" => route
    )
    .record(start.elapsed().as_secs_f64());
    response
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Slots & availability ─────────────────────────────────

async fn list_slots(State(engine): State<AppState>) -> Json<Vec<String>> {
    Json(engine.grid().slots().iter().map(|s| s.label()).collect())
}

async fn availability(
    State(engine): State<AppState>,
    params: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<SlotView>>> {
    let params = query(params)?;
    let date = parse_date(
        "date",
        &params
            .date
            .ok_or_else(|| EngineError::Validation("date is required".into()))?,
    )?;
    let slots = engine
        .slot_availability(date)
        .await
        .into_iter()
        .map(|(slot, available)| SlotView {
            time: slot.label(),
            available,
        })
        .collect();
    Ok(Json(slots))
}

// ── Schedule entries ─────────────────────────────────────

async fn list_schedules(
    State(engine): State<AppState>,
    params: Result<Query<ScheduleQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ScheduleEntryView>>> {
    let params = query(params)?;
    let from = params.from.as_deref().map(|d| parse_date("from", d)).transpose()?;
    let to = params.to.as_deref().map(|d| parse_date("to", d)).transpose()?;
    let entries = engine.list_schedule_entries(from, to).await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|e| ScheduleEntryView::new(e, engine.grid()))
            .collect(),
    ))
}

async fn get_schedule(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ScheduleEntryView>> {
    let entry = engine.get_schedule_entry(parse_id(&id)?).await?;
    Ok(Json(ScheduleEntryView::new(entry, engine.grid())))
}

async fn create_schedule(
    State(engine): State<AppState>,
    payload: Result<Json<ScheduleForm>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ScheduleEntryView>)> {
    let draft = body(payload)?.into_draft(engine.grid())?;
    let entry = engine.create_schedule_entry(draft).await?;
    Ok((
        StatusCode::CREATED,
        Json(ScheduleEntryView::new(entry, engine.grid())),
    ))
}

async fn update_schedule(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ScheduleForm>, JsonRejection>,
) -> ApiResult<Json<ScheduleEntryView>> {
    let id = parse_id(&id)?;
    let patch = body(payload)?.into_patch(engine.grid())?;
    let entry = engine.update_schedule_entry(id, patch).await?;
    Ok(Json(ScheduleEntryView::new(entry, engine.grid())))
}

async fn delete_schedule(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    engine.delete_schedule_entry(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Booking requests ─────────────────────────────────────

async fn list_bookings(
    State(engine): State<AppState>,
    params: Result<Query<BookingQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<BookingView>>> {
    let status = query(params)?
        .status
        .as_deref()
        .map(parse_status)
        .transpose()?;
    let bookings = engine.list_bookings(status).await;
    Ok(Json(
        bookings
            .into_iter()
            .map(|b| BookingView::new(b, engine.grid()))
            .collect(),
    ))
}

async fn booking_summary(State(engine): State<AppState>) -> Json<BookingSummary> {
    Json(engine.booking_summary().await)
}

async fn get_booking(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BookingView>> {
    let booking = engine.get_booking(parse_id(&id)?).await?;
    Ok(Json(BookingView::new(booking, engine.grid())))
}

async fn submit_booking(
    State(engine): State<AppState>,
    payload: Result<Json<BookingForm>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<BookingView>)> {
    let draft = body(payload)?.into_draft(engine.grid())?;
    let booking = engine.submit_booking(draft).await?;
    Ok((
        StatusCode::CREATED,
        Json(BookingView::new(booking, engine.grid())),
    ))
}

async fn update_booking(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<BookingUpdate>, JsonRejection>,
) -> ApiResult<Json<BookingView>> {
    let id = parse_id(&id)?;
    let change = body(payload)?.into_change(engine.grid())?;
    let booking = engine.change_booking(id, change).await?;
    Ok(Json(BookingView::new(booking, engine.grid())))
}

async fn approve_booking(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BookingView>> {
    let booking = engine.approve_booking(parse_id(&id)?).await?;
    Ok(Json(BookingView::new(booking, engine.grid())))
}

async fn reject_booking(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BookingView>> {
    let booking = engine.reject_booking(parse_id(&id)?).await?;
    Ok(Json(BookingView::new(booking, engine.grid())))
}

// ── Calendar ─────────────────────────────────────────────

async fn day_view(
    State(engine): State<AppState>,
    Path(date): Path<String>,
) -> ApiResult<Json<Vec<DayViewItemView>>> {
    let date = parse_date("date", &date)?;
    let items = engine.day_view(date).await;
    Ok(Json(
        items
            .into_iter()
            .map(|item| DayViewItemView::new(item, engine.grid()))
            .collect(),
    ))
}

async fn month_badges(
    State(engine): State<AppState>,
    Path(month): Path<String>,
) -> ApiResult<Json<std::collections::BTreeMap<chrono::NaiveDate, bool>>> {
    let (year, month) = parse_month(&month)?;
    Ok(Json(engine.month_badges(year, month).await?))
}

/// Server-sent events, one `change` per schedule write. A subscriber that
/// falls behind gets a `resync` event telling it to refetch.
async fn calendar_changes(
    State(engine): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = engine.notify.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(change) => match SseEvent::default().event("change").json_data(change) {
                    Ok(event) => return Some((Ok(event), rx)),
                    Err(e) => tracing::warn!("dropping unencodable change: {e}"),
                },
                Err(RecvError::Lagged(missed)) => {
                    let event = SseEvent::default()
                        .event("resync")
                        .data(missed.to_string());
                    return Some((Ok(event), rx));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ── Announcements ────────────────────────────────────────

async fn list_announcements(
    State(engine): State<AppState>,
    params: Result<Query<AnnouncementQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Announcement>>> {
    let params = query(params)?;
    Ok(Json(engine.list_announcements(params.active).await))
}

async fn post_announcement(
    State(engine): State<AppState>,
    payload: Result<Json<AnnouncementForm>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Announcement>)> {
    let content = body(payload)?
        .content
        .ok_or_else(|| EngineError::Validation("content is required".into()))?;
    let announcement = engine.post_announcement(&content).await?;
    Ok((StatusCode::CREATED, Json(announcement)))
}

async fn update_announcement(
    State(engine): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<AnnouncementUpdate>, JsonRejection>,
) -> ApiResult<Json<Announcement>> {
    let id = parse_id(&id)?;
    let active = body(payload)?
        .active
        .ok_or_else(|| EngineError::Validation("active is required".into()))?;
    Ok(Json(engine.set_announcement_active(id, active).await?))
}

async fn delete_announcement(
    State(engine): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    engine.delete_announcement(parse_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}
