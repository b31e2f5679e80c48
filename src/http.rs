//! The booking API. Identity arrives as gateway-verified headers; the engine
//! does the actual work; this layer translates between RFC 3339 edges and the
//! engine's `Ms` core and maps `EngineError` onto HTTP statuses.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use ulid::Ulid;

use crate::engine::{BookingRequest, Engine, EngineError};
use crate::model::*;
use crate::payment::PaymentGateway;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub gateway: Arc<dyn PaymentGateway>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/teachers", post(register_teacher))
        .route("/teachers/{id}/slots", get(available_slots))
        .route("/teachers/{id}/lessons", get(teacher_schedule))
        .route("/lessons", post(create_lesson))
        .route("/lessons/{id}", get(get_lesson))
        .route("/lessons/{id}", put(update_lesson))
        .route("/lessons/{id}", delete(cancel_lesson))
        .route("/lessons/{id}/confirm", post(confirm_lesson))
        .route("/lessons/{id}/complete", post(complete_lesson))
        .route("/lessons/{id}/students", post(add_student))
        .route("/lessons/{id}/students/{student_id}", delete(remove_student))
        .with_state(state)
}

// ── Identity ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

/// The authenticated caller. Token verification happens upstream; the edge
/// proxy forwards the verified identity as `x-user-id` / `x-user-role`.
#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub user_id: Ulid,
    pub role: Role,
}

impl Identity {
    fn can_manage_lessons(&self) -> bool {
        matches!(self.role, Role::Teacher | Role::Admin)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<Ulid>().ok())
            .ok_or(ApiError::Unauthorized("missing or malformed x-user-id"))?;
        let role = match parts.headers.get("x-user-role").and_then(|v| v.to_str().ok()) {
            Some("student") => Role::Student,
            Some("teacher") => Role::Teacher,
            Some("admin") => Role::Admin,
            _ => return Err(ApiError::Unauthorized("missing or unknown x-user-role")),
        };
        Ok(Identity { user_id, role })
    }
}

// ── Errors ───────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Unauthorized(&'static str),
    Forbidden(&'static str),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError::Engine(e)
    }
}

fn engine_status(e: &EngineError) -> StatusCode {
    match e {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::SlotConflict(_)
        | EngineError::InvalidTransition { .. }
        | EngineError::AlreadyExists(_)
        | EngineError::AlreadyBooked(_)
        | EngineError::CapacityExceeded(_) => StatusCode::CONFLICT,
        EngineError::PaymentNotConfirmed(_) | EngineError::PaymentGateway(_) => {
            StatusCode::PAYMENT_REQUIRED
        }
        EngineError::InvalidInterval
        | EngineError::InsufficientNotice
        | EngineError::TooFarInAdvance
        | EngineError::OutsideBusinessHours
        | EngineError::LimitExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::WalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            ApiError::Engine(e) => (engine_status(e), e.kind(), e.to_string()),
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", (*msg).to_string())
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", (*msg).to_string()),
        };
        (status, Json(json!({ "error": kind, "message": message }))).into_response()
    }
}

// ── Wire types ───────────────────────────────────────────

fn to_ms(t: DateTime<Utc>) -> Ms {
    t.timestamp_millis()
}

fn rfc3339(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

#[derive(Debug, Serialize)]
pub struct LessonBody {
    pub id: Ulid,
    pub teacher_id: Ulid,
    pub students: Vec<Ulid>,
    pub start: String,
    pub end: String,
    pub duration_minutes: i64,
    pub lesson_type: LessonType,
    pub level: LessonLevel,
    pub price: f64,
    pub currency: String,
    pub status: LessonStatus,
    pub max_participants: u32,
    pub current_participants: u32,
    pub meeting: Option<Meeting>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Lesson> for LessonBody {
    fn from(l: Lesson) -> Self {
        Self {
            id: l.id,
            teacher_id: l.teacher_id,
            start: rfc3339(l.span.start),
            end: rfc3339(l.span.end),
            duration_minutes: l.duration_minutes(),
            current_participants: l.current_participants(),
            students: l.students,
            lesson_type: l.lesson_type,
            level: l.level,
            price: l.price,
            currency: l.currency,
            status: l.status,
            max_participants: l.max_participants,
            meeting: l.meeting,
            created_at: rfc3339(l.created_at),
            updated_at: rfc3339(l.updated_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateLessonBody {
    pub teacher_id: Ulid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub lesson_type: LessonType,
    pub level: LessonLevel,
    pub price: f64,
    pub currency: String,
    #[serde(default = "default_max_participants")]
    pub max_participants: u32,
    pub meeting: Option<Meeting>,
}

fn default_max_participants() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateLessonBody {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterTeacherBody {
    pub id: Ulid,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WindowQuery {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SlotBody {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Deserialize)]
pub struct JoinBody {
    pub student_id: Ulid,
}

fn observe(op: &'static str, started: Instant, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(crate::observability::REQUESTS_TOTAL, "op" => op, "status" => status)
        .increment(1);
    metrics::histogram!(crate::observability::REQUEST_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}

/// Run one engine call with request metrics around it.
async fn tracked<T, F>(op: &'static str, fut: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    let started = Instant::now();
    let result = fut.await;
    observe(op, started, result.is_ok());
    result.map_err(ApiError::from)
}

// ── Handlers ─────────────────────────────────────────────

async fn healthz() -> &'static str {
    "ok"
}

async fn register_teacher(
    State(state): State<AppState>,
    identity: Identity,
    Json(body): Json<RegisterTeacherBody>,
) -> Result<StatusCode, ApiError> {
    if identity.role != Role::Admin {
        return Err(ApiError::Forbidden("only admins register teachers"));
    }
    tracked("register_teacher", state.engine.register_teacher(body.id, body.name)).await?;
    Ok(StatusCode::CREATED)
}

async fn create_lesson(
    State(state): State<AppState>,
    identity: Identity,
    Json(body): Json<CreateLessonBody>,
) -> Result<(StatusCode, Json<LessonBody>), ApiError> {
    let req = BookingRequest {
        id: Ulid::new(),
        teacher_id: body.teacher_id,
        student_id: identity.user_id,
        start: to_ms(body.start),
        end: to_ms(body.end),
        lesson_type: body.lesson_type,
        level: body.level,
        price: body.price,
        currency: body.currency,
        max_participants: body.max_participants,
        meeting: body.meeting,
    };
    let lesson = tracked("create_lesson", state.engine.book_lesson(req)).await?;
    Ok((StatusCode::CREATED, Json(lesson.into())))
}

async fn get_lesson(
    State(state): State<AppState>,
    _identity: Identity,
    Path(id): Path<Ulid>,
) -> Result<Json<LessonBody>, ApiError> {
    let lesson = tracked("get_lesson", state.engine.get_lesson(id)).await?;
    Ok(Json(lesson.into()))
}

async fn available_slots(
    State(state): State<AppState>,
    _identity: Identity,
    Path(teacher_id): Path<Ulid>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<Vec<SlotBody>>, ApiError> {
    let slots = tracked(
        "available_slots",
        state
            .engine
            .available_slots(teacher_id, to_ms(window.from), to_ms(window.to)),
    )
    .await?;
    let body = slots
        .map(|s| SlotBody {
            start: rfc3339(s.start),
            end: rfc3339(s.end),
        })
        .collect();
    Ok(Json(body))
}

async fn teacher_schedule(
    State(state): State<AppState>,
    _identity: Identity,
    Path(teacher_id): Path<Ulid>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<Vec<LessonBody>>, ApiError> {
    let lessons = tracked(
        "teacher_schedule",
        state
            .engine
            .teacher_schedule(teacher_id, to_ms(window.from), to_ms(window.to)),
    )
    .await?;
    Ok(Json(lessons.into_iter().map(LessonBody::from).collect()))
}

async fn update_lesson(
    State(state): State<AppState>,
    _identity: Identity,
    Path(id): Path<Ulid>,
    Json(body): Json<UpdateLessonBody>,
) -> Result<Json<LessonBody>, ApiError> {
    let lesson = tracked(
        "update_lesson",
        state
            .engine
            .update_schedule(id, to_ms(body.start), to_ms(body.end)),
    )
    .await?;
    Ok(Json(lesson.into()))
}

async fn cancel_lesson(
    State(state): State<AppState>,
    _identity: Identity,
    Path(id): Path<Ulid>,
) -> Result<Json<LessonBody>, ApiError> {
    let lesson = tracked("cancel_lesson", state.engine.cancel_lesson(id)).await?;
    Ok(Json(lesson.into()))
}

async fn confirm_lesson(
    State(state): State<AppState>,
    _identity: Identity,
    Path(id): Path<Ulid>,
) -> Result<Json<LessonBody>, ApiError> {
    let lesson = tracked(
        "confirm_lesson",
        state.engine.confirm_lesson(id, state.gateway.as_ref()),
    )
    .await?;
    Ok(Json(lesson.into()))
}

async fn complete_lesson(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Ulid>,
) -> Result<Json<LessonBody>, ApiError> {
    if !identity.can_manage_lessons() {
        return Err(ApiError::Forbidden("only the teacher completes a lesson"));
    }
    let lesson = tracked("complete_lesson", state.engine.complete_lesson(id)).await?;
    Ok(Json(lesson.into()))
}

async fn add_student(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<Ulid>,
    body: Option<Json<JoinBody>>,
) -> Result<Json<LessonBody>, ApiError> {
    // Students enroll themselves; staff may enroll someone else explicitly.
    let student_id = match body {
        Some(Json(b)) if identity.can_manage_lessons() => b.student_id,
        _ => identity.user_id,
    };
    let lesson = tracked("add_student", state.engine.add_student(id, student_id)).await?;
    Ok(Json(lesson.into()))
}

async fn remove_student(
    State(state): State<AppState>,
    _identity: Identity,
    Path((id, student_id)): Path<(Ulid, Ulid)>,
) -> Result<Json<LessonBody>, ApiError> {
    let lesson = tracked("remove_student", state.engine.remove_student(id, student_id)).await?;
    Ok(Json(lesson.into()))
}
