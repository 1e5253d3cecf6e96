use crate::attempts::{self, AttemptResult, FinishResult};
use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};
use crate::graph;
use crate::jump::{self, Destination, LessonView, ResolveOptions};
use crate::model::{Answer, Jump, Lesson, Page};
use crate::qtype::RawResponse;
use crate::repository;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub lesson_id: i64,
    pub retry: i64,
    pub page_count: usize,
    pub page: Page,
    pub answers: Vec<Answer>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavOutcome {
    pub destination: Destination,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<FinishResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub attempt: AttemptResult,
    pub destination: Destination,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<FinishResult>,
}

/// Shows a page (the lesson's first page when `page_id` is `None`) and
/// records the view for the current retry.
pub fn view_page(
    conn: &Connection,
    ctx: &RequestContext,
    lesson: &Lesson,
    page_id: Option<i64>,
) -> EngineResult<PageView> {
    let graph = graph::load_all(conn, lesson.id)?;
    let page = match page_id {
        Some(id) => graph.get(id).ok_or_else(|| EngineError::missing("page", id))?,
        None => graph
            .head()
            .ok_or_else(|| EngineError::bad_input(format!("lesson {} has no pages", lesson.id)))?,
    };
    let retry = attempts::record_view(conn, ctx, lesson, page.id)?;
    Ok(PageView {
        lesson_id: lesson.id,
        retry,
        page_count: graph.len(),
        answers: repository::answers_for_page(conn, page.id)?,
        page: page.clone(),
    })
}

/// Resolves `jump` from `page_id` against the user's current retry.
pub fn resolve_from(
    conn: &Connection,
    ctx: &mut RequestContext,
    lesson: &Lesson,
    page_id: i64,
    jump: Jump,
) -> EngineResult<Destination> {
    let graph = graph::load_all(conn, lesson.id)?;
    let answers = graph::answers_by_page(conn, lesson.id)?;
    let retry = repository::completed_retries(conn, lesson.id, ctx.user_id)?;
    let history = attempts::load_history(conn, lesson.id, ctx.user_id, retry)?;
    let view = LessonView {
        lesson,
        graph: &graph,
        answers: &answers,
        history: &history,
        options: ResolveOptions::from(&ctx.settings),
    };
    if jump == Jump::Undefined {
        ctx.message(format!("page {} has no defined jump", page_id));
    }
    let dest = jump::resolve(&view, page_id, jump, &mut ctx.rng)?;
    log::debug!(
        "lesson {} user {}: {:?} from page {} -> {:?}",
        lesson.id,
        ctx.user_id,
        jump,
        page_id,
        dest
    );
    Ok(dest)
}

fn finish_if_done(
    conn: &Connection,
    ctx: &RequestContext,
    lesson: &Lesson,
    dest: Destination,
) -> EngineResult<Option<FinishResult>> {
    match dest {
        Destination::EndOfLesson => Ok(Some(attempts::finish_retry(conn, ctx, lesson)?)),
        Destination::Page(_) => Ok(None),
    }
}

/// Leaves a page without answering it (description "continue", a branch
/// table button, an explicit jump code). Question pages are only left
/// through `submit`.
pub fn jump_from(
    conn: &Connection,
    ctx: &mut RequestContext,
    lesson: &Lesson,
    page_id: i64,
    jump: Jump,
) -> EngineResult<NavOutcome> {
    let page = graph::load_one(conn, page_id)?;
    if page.lesson_id != lesson.id {
        return Err(EngineError::missing("page", page_id));
    }
    if page.qtype.is_question() {
        return Err(EngineError::bad_input(format!(
            "page {} is a question page, leave it by submitting an answer",
            page_id
        )));
    }
    let destination = resolve_from(conn, ctx, lesson, page_id, jump)?;
    let finished = finish_if_done(conn, ctx, lesson, destination)?;
    Ok(NavOutcome {
        destination,
        finished,
    })
}

/// Scores and stores an answer, then moves on along the jump it produced.
pub fn submit(
    conn: &Connection,
    ctx: &mut RequestContext,
    lesson: &Lesson,
    page_id: i64,
    response: &RawResponse,
) -> EngineResult<SubmitOutcome> {
    let attempt = attempts::record_attempt(conn, ctx, lesson, page_id, response)?;
    let destination = resolve_from(conn, ctx, lesson, page_id, Jump::from_code(attempt.jump))?;
    let finished = finish_if_done(conn, ctx, lesson, destination)?;
    Ok(SubmitOutcome {
        attempt,
        destination,
        finished,
    })
}
