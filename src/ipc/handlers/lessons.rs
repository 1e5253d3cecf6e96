use crate::graph;
use crate::ipc::helpers::{get_required_i64, parse_param, with_db, with_tx, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{Lesson, ScoringMode, JUMP_UNANSWERED_PAGE, JUMP_UNSEEN_PAGE};
use crate::repository;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Value};

/// Lesson fields a client may set; absent fields keep their value.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LessonFields {
    name: Option<String>,
    scoring_mode: Option<String>,
    custom: Option<bool>,
    retake: Option<bool>,
    usemaxgrade: Option<bool>,
    maxattempts: Option<i64>,
    minquestions: Option<i64>,
    maxpages: Option<i64>,
    nextpagedefault: Option<i64>,
    autograde: Option<bool>,
}

fn blank_lesson() -> Lesson {
    Lesson {
        id: 0,
        name: String::new(),
        scoring_mode: ScoringMode::Assignment,
        custom: true,
        retake: false,
        usemaxgrade: false,
        maxattempts: 0,
        minquestions: 0,
        maxpages: 0,
        nextpagedefault: 0,
        autograde: false,
        grade: 0.0,
    }
}

fn non_negative(v: Option<i64>, key: &str, current: i64) -> Result<i64, HandlerErr> {
    match v {
        None => Ok(current),
        Some(n) if n >= 0 => Ok(n),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be >= 0", key))),
    }
}

fn apply_fields(mut l: Lesson, f: LessonFields) -> Result<Lesson, HandlerErr> {
    if let Some(name) = f.name {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(HandlerErr::bad_params("name must not be empty"));
        }
        l.name = name;
    }
    if let Some(mode) = f.scoring_mode {
        l.scoring_mode = ScoringMode::parse(&mode).ok_or_else(|| {
            HandlerErr::bad_params("scoringMode must be one of: practice, assignment, test")
        })?;
    }
    l.custom = f.custom.unwrap_or(l.custom);
    l.retake = f.retake.unwrap_or(l.retake);
    l.usemaxgrade = f.usemaxgrade.unwrap_or(l.usemaxgrade);
    l.autograde = f.autograde.unwrap_or(l.autograde);
    l.maxattempts = non_negative(f.maxattempts, "maxattempts", l.maxattempts)?;
    l.minquestions = non_negative(f.minquestions, "minquestions", l.minquestions)?;
    l.maxpages = non_negative(f.maxpages, "maxpages", l.maxpages)?;
    if let Some(n) = f.nextpagedefault {
        if ![0, JUMP_UNSEEN_PAGE, JUMP_UNANSWERED_PAGE].contains(&n) {
            return Err(HandlerErr::bad_params("nextpagedefault must be 0, 1 or 2"));
        }
        l.nextpagedefault = n;
    }
    Ok(l)
}

fn lessons_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let fields: LessonFields = parse_param(params, "")?;
    if fields.name.is_none() {
        return Err(HandlerErr::bad_params("missing name"));
    }
    let mut lesson = apply_fields(blank_lesson(), fields)?;
    lesson.id = repository::insert_lesson(conn, &lesson)?;
    log::info!("created lesson {} ({})", lesson.id, lesson.name);
    Ok(json!({ "lesson": lesson }))
}

fn lessons_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let lesson_id = get_required_i64(params, "lessonId")?;
    let fields: LessonFields = parse_param(params, "patch")?;
    let lesson = apply_fields(repository::require_lesson(conn, lesson_id)?, fields)?;
    repository::update_lesson(conn, &lesson)?;
    Ok(json!({ "lesson": lesson }))
}

fn lessons_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let lesson_id = get_required_i64(params, "lessonId")?;
    let lesson = repository::require_lesson(conn, lesson_id)?;
    let graph = graph::load_all(conn, lesson_id)?;
    Ok(json!({
        "lesson": lesson,
        "pageCount": graph.len(),
        "firstPageId": graph.head().map(|p| p.id),
        "lastPageId": graph.tail().map(|p| p.id),
    }))
}

fn lessons_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "lessons": repository::list_lessons(conn)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lessons.create" => Some(with_tx(state, req, lessons_create)),
        "lessons.update" => Some(with_tx(state, req, lessons_update)),
        "lessons.get" => Some(with_db(state, req, lessons_get)),
        "lessons.list" => Some(with_db(state, req, lessons_list)),
        _ => None,
    }
}
