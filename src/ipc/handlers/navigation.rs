use crate::attempts;
use crate::context::RequestContext;
use crate::ipc::helpers::{
    get_optional_i64, get_required_i64, parse_param, with_student_tx, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Jump;
use crate::navigation;
use crate::qtype::RawResponse;
use crate::repository;
use rusqlite::Connection;
use serde_json::Value;

fn page_view(conn: &Connection, ctx: &mut RequestContext, params: &Value) -> Result<Value, HandlerErr> {
    let lesson = repository::require_lesson(conn, get_required_i64(params, "lessonId")?)?;
    let page_id = get_optional_i64(params, "pageId")?;
    Ok(serde_json::to_value(navigation::view_page(conn, ctx, &lesson, page_id)?)?)
}

/// The jump comes from a chosen answer of the page (`answerId`), an explicit
/// `jump` code, or defaults to NextPage.
fn navigation_jump(
    conn: &Connection,
    ctx: &mut RequestContext,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let lesson = repository::require_lesson(conn, get_required_i64(params, "lessonId")?)?;
    let page_id = get_required_i64(params, "pageId")?;
    let jump = match (
        get_optional_i64(params, "answerId")?,
        get_optional_i64(params, "jump")?,
    ) {
        (Some(answer_id), _) => {
            let answer = repository::get_answer(conn, answer_id)?
                .filter(|a| a.page_id == page_id)
                .ok_or_else(|| {
                    HandlerErr::bad_params(format!("answer {} is not on page {}", answer_id, page_id))
                })?;
            answer.jump()
        }
        (None, Some(code)) => Jump::from_code(code),
        (None, None) => Jump::NextPage,
    };
    Ok(serde_json::to_value(navigation::jump_from(
        conn, ctx, &lesson, page_id, jump,
    )?)?)
}

fn attempt_submit(
    conn: &Connection,
    ctx: &mut RequestContext,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let lesson = repository::require_lesson(conn, get_required_i64(params, "lessonId")?)?;
    let page_id = get_required_i64(params, "pageId")?;
    let response: RawResponse = parse_param(params, "response")?;
    Ok(serde_json::to_value(navigation::submit(
        conn, ctx, &lesson, page_id, &response,
    )?)?)
}

fn lesson_finish(
    conn: &Connection,
    ctx: &mut RequestContext,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let lesson = repository::require_lesson(conn, get_required_i64(params, "lessonId")?)?;
    Ok(serde_json::to_value(attempts::finish_retry(conn, ctx, &lesson)?)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "page.view" => Some(with_student_tx(state, req, page_view)),
        "navigation.jump" => Some(with_student_tx(state, req, navigation_jump)),
        "attempt.submit" => Some(with_student_tx(state, req, attempt_submit)),
        "lesson.finish" => Some(with_student_tx(state, req, lesson_finish)),
        _ => None,
    }
}
