use crate::editor::{self, AnswerInput, NewPage, PageUpdate};
use crate::graph;
use crate::ipc::helpers::{
    get_optional_i64, get_required_i64, parse_param, with_db, with_tx, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::repository;
use rusqlite::Connection;
use serde_json::{json, Value};

fn pages_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let lesson_id = get_required_i64(params, "lessonId")?;
    repository::require_lesson(conn, lesson_id)?;
    let graph = graph::load_all(conn, lesson_id)?;
    Ok(json!({ "pages": graph.pages() }))
}

fn pages_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let page_id = get_required_i64(params, "pageId")?;
    let page = graph::load_one(conn, page_id)?;
    let answers = repository::answers_for_page(conn, page_id)?;
    Ok(json!({ "page": page, "answers": answers }))
}

fn pages_insert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let lesson_id = get_required_i64(params, "lessonId")?;
    let after_id = get_optional_i64(params, "afterPageId")?.unwrap_or(0);
    let new: NewPage = parse_param(params, "page")?;
    let page = editor::insert_page(conn, lesson_id, after_id, &new)?;
    Ok(json!({ "page": page }))
}

fn pages_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let page_id = get_required_i64(params, "pageId")?;
    let patch: PageUpdate = parse_param(params, "patch")?;
    Ok(json!({ "page": editor::update_page(conn, page_id, &patch)? }))
}

fn pages_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let page_id = get_required_i64(params, "pageId")?;
    editor::delete_page(conn, page_id)?;
    Ok(json!({ "ok": true }))
}

fn pages_move(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let page_id = get_required_i64(params, "pageId")?;
    let after_id = get_optional_i64(params, "afterPageId")?.unwrap_or(0);
    let graph = editor::move_page(conn, page_id, after_id)?;
    Ok(json!({ "order": graph.ids() }))
}

fn pages_move_many(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let lesson_id = get_required_i64(params, "lessonId")?;
    let ids: Vec<i64> = parse_param(params, "pageIds")?;
    let after_id = get_optional_i64(params, "afterPageId")?.unwrap_or(0);
    let graph = editor::move_pages(conn, lesson_id, &ids, after_id)?;
    Ok(json!({ "order": graph.ids() }))
}

fn pages_reorder(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let lesson_id = get_required_i64(params, "lessonId")?;
    Ok(serde_json::to_value(editor::reorder_pages(conn, lesson_id)?)?)
}

fn answers_set(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let page_id = get_required_i64(params, "pageId")?;
    let inputs: Vec<AnswerInput> = parse_param(params, "answers")?;
    let answers = editor::set_answers(conn, page_id, &inputs)?;
    let page = graph::load_one(conn, page_id)?;
    Ok(json!({ "answers": answers, "maxScore": page.max_score }))
}

fn answers_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let page_id = get_required_i64(params, "pageId")?;
    graph::load_one(conn, page_id)?;
    Ok(json!({ "answers": repository::answers_for_page(conn, page_id)? }))
}

fn branches_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let lesson_id = get_required_i64(params, "lessonId")?;
    repository::require_lesson(conn, lesson_id)?;
    Ok(json!({ "branches": repository::branches_for_lesson(conn, lesson_id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "pages.list" => Some(with_db(state, req, pages_list)),
        "pages.get" => Some(with_db(state, req, pages_get)),
        "pages.insert" => Some(with_tx(state, req, pages_insert)),
        "pages.update" => Some(with_tx(state, req, pages_update)),
        "pages.delete" => Some(with_tx(state, req, pages_delete)),
        "pages.move" => Some(with_tx(state, req, pages_move)),
        "pages.moveMany" => Some(with_tx(state, req, pages_move_many)),
        "pages.reorder" => Some(with_tx(state, req, pages_reorder)),
        "answers.set" => Some(with_tx(state, req, answers_set)),
        "answers.list" => Some(with_db(state, req, answers_list)),
        "branches.list" => Some(with_db(state, req, branches_list)),
        _ => None,
    }
}
