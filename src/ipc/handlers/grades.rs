use crate::attempts::{self, QueueFilter};
use crate::calc;
use crate::context::RequestContext;
use crate::ipc::helpers::{
    get_optional_i64, get_required_f64, get_required_i64, with_db, with_student_tx, with_tx,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::repository;
use rusqlite::Connection;
use serde_json::{json, Value};

// Grade reads name the student explicitly; teachers are not session users.
fn grades_attempt(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let lesson = repository::require_lesson(conn, get_required_i64(params, "lessonId")?)?;
    let user_id = get_required_i64(params, "userId")?;
    let retry = match get_optional_i64(params, "retry")? {
        Some(r) if r < 0 => return Err(HandlerErr::bad_params("retry must be >= 0")),
        Some(r) => r,
        None => repository::completed_retries(conn, lesson.id, user_id)?,
    };
    let info = calc::compute_attempt_grade(conn, &lesson, retry, user_id)?;
    let row = repository::grade_for_retry(conn, lesson.id, user_id, retry)?;
    Ok(json!({
        "retry": retry,
        "grade": info,
        "completed": row.map(|r| r.completed > 0).unwrap_or(false),
    }))
}

fn grades_lesson(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let lesson = repository::require_lesson(conn, get_required_i64(params, "lessonId")?)?;
    let user_id = get_required_i64(params, "userId")?;
    let grade = calc::compute_lesson_grade(conn, &lesson, user_id)?;
    let retries = repository::completed_grades(conn, lesson.id, user_id)?;
    Ok(json!({ "lessonGrade": grade, "retries": retries, "maxGrade": lesson.grade }))
}

fn manual_queue(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let lesson_id = get_required_i64(params, "lessonId")?;
    let raw = params
        .get("filter")
        .and_then(|v| v.as_str())
        .unwrap_or("ungraded");
    let filter = QueueFilter::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params("filter must be one of: ungraded, resubmitted, all")
    })?;
    Ok(json!({ "items": attempts::manual_queue(conn, lesson_id, filter)? }))
}

fn manual_grade(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let attempt_id = get_required_i64(params, "attemptId")?;
    let score = get_required_f64(params, "score")?;
    let teacher_response = params
        .get("teacherResponse")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    Ok(serde_json::to_value(attempts::grade_essay(
        conn,
        attempt_id,
        score,
        teacher_response,
    )?)?)
}

fn manual_mark_viewed(
    conn: &Connection,
    ctx: &mut RequestContext,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let attempt_id = get_required_i64(params, "attemptId")?;
    let attempt = attempts::mark_feedback_viewed(conn, attempt_id, ctx.user_id)?;
    Ok(json!({ "attempt": attempt }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.attempt" => Some(with_db(state, req, grades_attempt)),
        "grades.lesson" => Some(with_db(state, req, grades_lesson)),
        "manual.queue" => Some(with_db(state, req, manual_queue)),
        "manual.grade" => Some(with_tx(state, req, manual_grade)),
        "manual.markViewed" => Some(with_student_tx(state, req, manual_mark_viewed)),
        _ => None,
    }
}
