//! Attempt recording, page views, retry finalization and the manual grading
//! workflow. Callers own the transaction; every function here takes the
//! connection (or an open `Transaction` through deref).

use crate::calc::{self, GradeInfo, LessonGrade};
use crate::context::RequestContext;
use crate::error::{EngineError, EngineResult};
use crate::graph;
use crate::jump::History;
use crate::model::{Attempt, Jump, Lesson, ManualPayload, Page, PageType, ScoringMode};
use crate::qtype::{CheckInput, RawResponse};
use crate::repository;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResult {
    pub attempt_id: i64,
    pub page_id: i64,
    pub answer_id: Option<i64>,
    pub correct: bool,
    pub score: f64,
    /// `None` under test scoring.
    pub feedback: Option<String>,
    pub jump: i64,
    pub max_attempts_reached: bool,
    pub attempts_remaining: Option<i64>,
    pub retry: i64,
    pub grade: GradeInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishResult {
    pub retry: Option<i64>,
    pub grade: Option<f64>,
    pub newly_completed: bool,
    pub lesson_grade: LessonGrade,
}

/// Index of the retry in progress. A lesson without retakes refuses a
/// second pass.
pub fn current_retry(conn: &Connection, lesson: &Lesson, user_id: i64) -> EngineResult<i64> {
    let completed = repository::completed_retries(conn, lesson.id, user_id)?;
    if !lesson.retake && completed > 0 {
        return Err(EngineError::RetakeNotAllowed(lesson.id));
    }
    Ok(completed)
}

pub fn load_history(
    conn: &Connection,
    lesson_id: i64,
    user_id: i64,
    retry: i64,
) -> EngineResult<History> {
    let attempts = repository::attempts_for_retry(conn, lesson_id, user_id, retry)?;
    let mut h = History {
        attempt_count: attempts.len(),
        ..History::default()
    };
    for a in &attempts {
        h.attempted.insert(a.page_id);
        if a.correct {
            h.correct.insert(a.page_id);
        }
    }
    h.viewed
        .extend(repository::viewed_pages(conn, lesson_id, user_id, retry)?);
    Ok(h)
}

fn lesson_page(conn: &Connection, lesson: &Lesson, page_id: i64) -> EngineResult<Page> {
    let page = graph::load_one(conn, page_id)?;
    if page.lesson_id != lesson.id {
        return Err(EngineError::missing("page", page_id));
    }
    Ok(page)
}

pub fn record_view(
    conn: &Connection,
    ctx: &RequestContext,
    lesson: &Lesson,
    page_id: i64,
) -> EngineResult<i64> {
    lesson_page(conn, lesson, page_id)?;
    let retry = current_retry(conn, lesson, ctx.user_id)?;
    repository::insert_page_view(conn, lesson.id, ctx.user_id, page_id, retry, ctx.now())?;
    Ok(retry)
}

/// Refreshes the grade row of `retry` from its attempts. A completed row
/// stays completed.
fn regrade(conn: &Connection, lesson: &Lesson, user_id: i64, retry: i64) -> EngineResult<GradeInfo> {
    let info = calc::compute_attempt_grade(conn, lesson, retry, user_id)?;
    repository::upsert_grade(conn, lesson.id, user_id, retry, info.grade, None)?;
    Ok(info)
}

pub fn record_attempt(
    conn: &Connection,
    ctx: &mut RequestContext,
    lesson: &Lesson,
    page_id: i64,
    response: &RawResponse,
) -> EngineResult<AttemptResult> {
    let page = lesson_page(conn, lesson, page_id)?;
    if !page.qtype.is_question() {
        return Err(EngineError::bad_input(format!(
            "page {} is not a question page",
            page_id
        )));
    }
    let user_id = ctx.user_id;
    let retry = current_retry(conn, lesson, user_id)?;
    let answers = repository::answers_for_page(conn, page_id)?;
    let behavior = page.qtype.behavior();
    let mut outcome = behavior.check_answer(&CheckInput {
        page: &page,
        answers: &answers,
        custom: lesson.custom,
        response,
    })?;

    let manual = behavior.requires_manual_grading();
    let mut graded = false;
    if manual && lesson.autograde && page.qtype == PageType::Essay {
        let max = behavior.max_score(&answers);
        let mut payload: ManualPayload = serde_json::from_str(&outcome.user_response)?;
        payload.score = Some(max);
        outcome.user_response = serde_json::to_string(&payload)?;
        outcome.score = max;
        outcome.correct = true;
        graded = true;
    }

    let prior = repository::count_page_attempts(conn, page_id, user_id, retry)?;
    let limit_reached = lesson.maxattempts > 0 && prior >= lesson.maxattempts;
    let now = ctx.now();
    let existing = if manual {
        repository::current_attempt(conn, page_id, user_id, retry)?
    } else {
        None
    };
    let (attempt_id, used) = match existing {
        Some(cur) if limit_reached => {
            // Past the limit the stored submission and its grade stand.
            outcome.answer_id = cur.answer_id;
            outcome.correct = cur.correct;
            outcome.score = cur.score;
            log::debug!("attempt {} kept, page {} is past its attempt limit", cur.id, page_id);
            (cur.id, prior)
        }
        Some(mut cur) => {
            if cur.graded && !graded {
                cur.resubmit = true;
                cur.viewed = false;
            }
            cur.graded = graded;
            cur.answer_id = outcome.answer_id;
            cur.correct = outcome.correct;
            cur.score = outcome.score;
            cur.user_response = outcome.user_response.clone();
            cur.time_seen = now;
            repository::update_attempt(conn, &cur)?;
            log::debug!("attempt {} resubmitted on page {}", cur.id, page_id);
            (cur.id, prior)
        }
        None => {
            repository::supersede_current(conn, page_id, user_id, retry)?;
            let id = repository::insert_attempt(
                conn,
                &Attempt {
                    id: 0,
                    lesson_id: lesson.id,
                    page_id,
                    user_id,
                    answer_id: outcome.answer_id,
                    retry,
                    correct: outcome.correct,
                    score: outcome.score,
                    user_response: outcome.user_response.clone(),
                    time_seen: now,
                    is_current: true,
                    viewed: false,
                    graded,
                    resubmit: false,
                },
            )?;
            (id, prior + 1)
        }
    };

    let mut jump = outcome.jump;
    let mut max_attempts_reached = false;
    let mut attempts_remaining = None;
    if lesson.maxattempts > 0 {
        if limit_reached {
            max_attempts_reached = true;
            jump = Jump::NextPage;
            ctx.message("maximum number of attempts reached, moving to the next page");
        } else {
            let left = (lesson.maxattempts - used).max(0);
            attempts_remaining = Some(left);
            if left == 0 && !outcome.correct && jump == Jump::ThisPage {
                jump = Jump::NextPage;
                ctx.message("no attempts left on this page, moving on");
            }
        }
    }

    let grade = regrade(conn, lesson, user_id, retry)?;
    let feedback = match lesson.scoring_mode {
        ScoringMode::Test => None,
        _ => Some(outcome.feedback),
    };
    Ok(AttemptResult {
        attempt_id,
        page_id,
        answer_id: outcome.answer_id,
        correct: outcome.correct,
        score: outcome.score,
        feedback,
        jump: jump.code(),
        max_attempts_reached,
        attempts_remaining,
        retry,
        grade,
    })
}

/// End-of-lesson finalization. Completing a retry that holds no attempts is
/// a no-op, so reaching the end twice never adds a grade row.
pub fn finish_retry(
    conn: &Connection,
    ctx: &RequestContext,
    lesson: &Lesson,
) -> EngineResult<FinishResult> {
    let user_id = ctx.user_id;
    let retry = repository::completed_retries(conn, lesson.id, user_id)?;
    let attempts = repository::attempts_for_retry(conn, lesson.id, user_id, retry)?;
    if attempts.is_empty() {
        let last = repository::completed_grades(conn, lesson.id, user_id)?.pop();
        return Ok(FinishResult {
            retry: last.as_ref().map(|g| g.retry),
            grade: last.map(|g| g.grade),
            newly_completed: false,
            lesson_grade: calc::compute_lesson_grade(conn, lesson, user_id)?,
        });
    }
    let info = calc::compute_attempt_grade(conn, lesson, retry, user_id)?;
    repository::upsert_grade(
        conn,
        lesson.id,
        user_id,
        retry,
        info.grade,
        Some(ctx.now().max(1)),
    )?;
    log::info!(
        "lesson {} retry {} completed for user {} with grade {}",
        lesson.id,
        retry,
        user_id,
        info.grade
    );
    Ok(FinishResult {
        retry: Some(retry),
        grade: Some(info.grade),
        newly_completed: true,
        lesson_grade: calc::compute_lesson_grade(conn, lesson, user_id)?,
    })
}

fn manual_attempt(conn: &Connection, attempt_id: i64) -> EngineResult<(Attempt, Page)> {
    let attempt = repository::get_attempt(conn, attempt_id)?
        .ok_or_else(|| EngineError::missing("attempt", attempt_id))?;
    let page = graph::load_one(conn, attempt.page_id)?;
    if !page.qtype.requires_manual_grading() {
        return Err(EngineError::bad_input(format!(
            "attempt {} is not on a manually graded page",
            attempt_id
        )));
    }
    Ok((attempt, page))
}

fn read_payload(attempt: &Attempt) -> ManualPayload {
    serde_json::from_str(&attempt.user_response).unwrap_or_else(|_| ManualPayload {
        answer: attempt.user_response.clone(),
        ..ManualPayload::default()
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EssayGrade {
    pub attempt: Attempt,
    pub retry_grade: GradeInfo,
}

pub fn grade_essay(
    conn: &Connection,
    attempt_id: i64,
    score: f64,
    teacher_response: &str,
) -> EngineResult<EssayGrade> {
    let (mut attempt, page) = manual_attempt(conn, attempt_id)?;
    let lesson = repository::require_lesson(conn, attempt.lesson_id)?;
    let answers = repository::answers_for_page(conn, page.id)?;
    let mut max = page.qtype.behavior().max_score(&answers);
    if max <= 0.0 {
        max = 1.0;
    }
    if !(0.0..=max).contains(&score) {
        return Err(EngineError::bad_input(format!(
            "score must be between 0 and {}",
            max
        )));
    }

    let mut payload = read_payload(&attempt);
    payload.score = Some(score);
    payload.teacher_response = teacher_response.to_string();
    attempt.user_response = serde_json::to_string(&payload)?;
    attempt.score = score;
    attempt.correct = score > 0.0;
    attempt.graded = true;
    attempt.resubmit = false;
    attempt.viewed = false;
    repository::update_attempt(conn, &attempt)?;

    let retry_grade = regrade(conn, &lesson, attempt.user_id, attempt.retry)?;
    log::info!(
        "attempt {} graded {} of {}, retry grade now {}",
        attempt_id,
        score,
        max,
        retry_grade.grade
    );
    Ok(EssayGrade {
        attempt,
        retry_grade,
    })
}

pub fn mark_feedback_viewed(conn: &Connection, attempt_id: i64, user_id: i64) -> EngineResult<Attempt> {
    let (mut attempt, _) = manual_attempt(conn, attempt_id)?;
    if attempt.user_id != user_id {
        return Err(EngineError::missing("attempt", attempt_id));
    }
    if !attempt.graded {
        return Err(EngineError::bad_input("attempt has not been graded yet"));
    }
    attempt.viewed = true;
    repository::update_attempt(conn, &attempt)?;
    Ok(attempt)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFilter {
    Ungraded,
    Resubmitted,
    All,
}

impl QueueFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ungraded" => Some(Self::Ungraded),
            "resubmitted" => Some(Self::Resubmitted),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub attempt: Attempt,
    pub payload: ManualPayload,
}

pub fn manual_queue(
    conn: &Connection,
    lesson_id: i64,
    filter: QueueFilter,
) -> EngineResult<Vec<QueueItem>> {
    repository::require_lesson(conn, lesson_id)?;
    Ok(repository::manual_attempts(conn, lesson_id)?
        .into_iter()
        .filter(|a| match filter {
            QueueFilter::Ungraded => !a.graded,
            QueueFilter::Resubmitted => a.resubmit,
            QueueFilter::All => true,
        })
        .map(|a| QueueItem {
            payload: read_payload(&a),
            attempt: a,
        })
        .collect())
}
