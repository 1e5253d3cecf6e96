//! Row-level reads and writes the engine is written against.

use crate::error::{EngineError, EngineResult};
use crate::model::{Answer, Attempt, Branch, GradeRow, Lesson, Page, PageType, ScoringMode};
use rusqlite::{Connection, OptionalExtension, Row};

const LESSON_COLS: &str = "id, name, scoring_mode, custom, retake, usemaxgrade, maxattempts,
     minquestions, maxpages, nextpagedefault, autograde, grade";
const PAGE_COLS: &str = "id, lesson_id, prev_page_id, next_page_id, ordering, qtype, qoption,
     branch_id, max_score, title, contents";
const ANSWER_COLS: &str =
    "id, lesson_id, page_id, jumpto, grade, score, answer, response, ordering";
const ATTEMPT_COLS: &str = "id, lesson_id, page_id, user_id, answer_id, retry, correct, score,
     user_response, time_seen, is_current, viewed, graded, resubmit";

fn lesson_from_row(r: &Row<'_>) -> rusqlite::Result<Lesson> {
    let mode: String = r.get(2)?;
    Ok(Lesson {
        id: r.get(0)?,
        name: r.get(1)?,
        scoring_mode: ScoringMode::parse(&mode).unwrap_or(ScoringMode::Assignment),
        custom: r.get::<_, i64>(3)? != 0,
        retake: r.get::<_, i64>(4)? != 0,
        usemaxgrade: r.get::<_, i64>(5)? != 0,
        maxattempts: r.get(6)?,
        minquestions: r.get(7)?,
        maxpages: r.get(8)?,
        nextpagedefault: r.get(9)?,
        autograde: r.get::<_, i64>(10)? != 0,
        grade: r.get(11)?,
    })
}

fn page_from_row(r: &Row<'_>) -> rusqlite::Result<Page> {
    let code: i64 = r.get(5)?;
    let qtype = PageType::from_code(code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Integer,
            format!("unknown page type {}", code).into(),
        )
    })?;
    Ok(Page {
        id: r.get(0)?,
        lesson_id: r.get(1)?,
        prev_page_id: r.get(2)?,
        next_page_id: r.get(3)?,
        ordering: r.get(4)?,
        qtype,
        qoption: r.get::<_, i64>(6)? != 0,
        branch_id: r.get(7)?,
        max_score: r.get(8)?,
        title: r.get(9)?,
        contents: r.get(10)?,
    })
}

fn answer_from_row(r: &Row<'_>) -> rusqlite::Result<Answer> {
    Ok(Answer {
        id: r.get(0)?,
        lesson_id: r.get(1)?,
        page_id: r.get(2)?,
        jumpto: r.get(3)?,
        grade: r.get(4)?,
        score: r.get(5)?,
        answer: r.get(6)?,
        response: r.get(7)?,
        ordering: r.get(8)?,
    })
}

fn attempt_from_row(r: &Row<'_>) -> rusqlite::Result<Attempt> {
    Ok(Attempt {
        id: r.get(0)?,
        lesson_id: r.get(1)?,
        page_id: r.get(2)?,
        user_id: r.get(3)?,
        answer_id: r.get(4)?,
        retry: r.get(5)?,
        correct: r.get::<_, i64>(6)? != 0,
        score: r.get(7)?,
        user_response: r.get(8)?,
        time_seen: r.get(9)?,
        is_current: r.get::<_, i64>(10)? != 0,
        viewed: r.get::<_, i64>(11)? != 0,
        graded: r.get::<_, i64>(12)? != 0,
        resubmit: r.get::<_, i64>(13)? != 0,
    })
}

fn grade_from_row(r: &Row<'_>) -> rusqlite::Result<GradeRow> {
    Ok(GradeRow {
        id: r.get(0)?,
        lesson_id: r.get(1)?,
        user_id: r.get(2)?,
        retry: r.get(3)?,
        grade: r.get(4)?,
        completed: r.get(5)?,
    })
}

// ---- lessons ----

pub fn get_lesson(conn: &Connection, lesson_id: i64) -> EngineResult<Option<Lesson>> {
    let sql = format!("SELECT {} FROM lessons WHERE id = ?", LESSON_COLS);
    Ok(conn
        .query_row(&sql, [lesson_id], lesson_from_row)
        .optional()?)
}

pub fn require_lesson(conn: &Connection, lesson_id: i64) -> EngineResult<Lesson> {
    get_lesson(conn, lesson_id)?.ok_or_else(|| EngineError::missing("lesson", lesson_id))
}

pub fn list_lessons(conn: &Connection) -> EngineResult<Vec<Lesson>> {
    let sql = format!("SELECT {} FROM lessons ORDER BY id", LESSON_COLS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], lesson_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_lesson(conn: &Connection, l: &Lesson) -> EngineResult<i64> {
    conn.execute(
        "INSERT INTO lessons(name, scoring_mode, custom, retake, usemaxgrade, maxattempts,
           minquestions, maxpages, nextpagedefault, autograde, grade)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
        (
            &l.name,
            l.scoring_mode.as_str(),
            l.custom as i64,
            l.retake as i64,
            l.usemaxgrade as i64,
            l.maxattempts,
            l.minquestions,
            l.maxpages,
            l.nextpagedefault,
            l.autograde as i64,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_lesson(conn: &Connection, l: &Lesson) -> EngineResult<()> {
    conn.execute(
        "UPDATE lessons SET name = ?, scoring_mode = ?, custom = ?, retake = ?, usemaxgrade = ?,
           maxattempts = ?, minquestions = ?, maxpages = ?, nextpagedefault = ?, autograde = ?
         WHERE id = ?",
        (
            &l.name,
            l.scoring_mode.as_str(),
            l.custom as i64,
            l.retake as i64,
            l.usemaxgrade as i64,
            l.maxattempts,
            l.minquestions,
            l.maxpages,
            l.nextpagedefault,
            l.autograde as i64,
            l.id,
        ),
    )?;
    Ok(())
}

pub fn set_lesson_grade(conn: &Connection, lesson_id: i64, grade: f64) -> EngineResult<()> {
    conn.execute("UPDATE lessons SET grade = ? WHERE id = ?", (grade, lesson_id))?;
    Ok(())
}

// ---- pages ----

pub fn get_page(conn: &Connection, page_id: i64) -> EngineResult<Option<Page>> {
    let sql = format!("SELECT {} FROM pages WHERE id = ?", PAGE_COLS);
    Ok(conn.query_row(&sql, [page_id], page_from_row).optional()?)
}

/// Unordered; callers that need traversal order go through the page graph.
pub fn pages_for_lesson(conn: &Connection, lesson_id: i64) -> EngineResult<Vec<Page>> {
    let sql = format!("SELECT {} FROM pages WHERE lesson_id = ? ORDER BY id", PAGE_COLS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([lesson_id], page_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_page(conn: &Connection, p: &Page) -> EngineResult<i64> {
    conn.execute(
        "INSERT INTO pages(lesson_id, prev_page_id, next_page_id, ordering, qtype, qoption,
           branch_id, max_score, title, contents)
         VALUES(?, ?, ?, ?, ?, ?, 0, 0, ?, ?)",
        (
            p.lesson_id,
            p.prev_page_id,
            p.next_page_id,
            p.ordering,
            p.qtype.code(),
            p.qoption as i64,
            &p.title,
            &p.contents,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_page_content(conn: &Connection, p: &Page) -> EngineResult<()> {
    conn.execute(
        "UPDATE pages SET qtype = ?, qoption = ?, title = ?, contents = ? WHERE id = ?",
        (p.qtype.code(), p.qoption as i64, &p.title, &p.contents, p.id),
    )?;
    Ok(())
}

pub fn update_page_links(
    conn: &Connection,
    page_id: i64,
    prev_page_id: i64,
    next_page_id: i64,
    ordering: i64,
) -> EngineResult<()> {
    conn.execute(
        "UPDATE pages SET prev_page_id = ?, next_page_id = ?, ordering = ? WHERE id = ?",
        (prev_page_id, next_page_id, ordering, page_id),
    )?;
    Ok(())
}

pub fn set_page_branch(conn: &Connection, page_id: i64, branch_id: i64) -> EngineResult<()> {
    conn.execute(
        "UPDATE pages SET branch_id = ? WHERE id = ?",
        (branch_id, page_id),
    )?;
    Ok(())
}

pub fn set_page_max_score(conn: &Connection, page_id: i64, max_score: f64) -> EngineResult<()> {
    conn.execute(
        "UPDATE pages SET max_score = ? WHERE id = ?",
        (max_score, page_id),
    )?;
    Ok(())
}

/// Removes the page and every row hanging off it.
pub fn delete_page_cascade(conn: &Connection, page_id: i64) -> EngineResult<()> {
    conn.execute("DELETE FROM answers WHERE page_id = ?", [page_id])?;
    conn.execute("DELETE FROM attempts WHERE page_id = ?", [page_id])?;
    conn.execute("DELETE FROM page_views WHERE page_id = ?", [page_id])?;
    conn.execute("DELETE FROM pages WHERE id = ?", [page_id])?;
    Ok(())
}

// ---- answers ----

pub fn get_answer(conn: &Connection, answer_id: i64) -> EngineResult<Option<Answer>> {
    let sql = format!("SELECT {} FROM answers WHERE id = ?", ANSWER_COLS);
    Ok(conn
        .query_row(&sql, [answer_id], answer_from_row)
        .optional()?)
}

pub fn answers_for_page(conn: &Connection, page_id: i64) -> EngineResult<Vec<Answer>> {
    let sql = format!(
        "SELECT {} FROM answers WHERE page_id = ? ORDER BY ordering, id",
        ANSWER_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([page_id], answer_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn answers_for_lesson(conn: &Connection, lesson_id: i64) -> EngineResult<Vec<Answer>> {
    let sql = format!(
        "SELECT {} FROM answers WHERE lesson_id = ? ORDER BY page_id, ordering, id",
        ANSWER_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([lesson_id], answer_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Stores a page's answers by position. Existing rows are updated in place
/// so attempts keep pointing at the answer they chose; extra inputs are
/// inserted and surplus rows deleted.
pub fn replace_answers(conn: &Connection, page: &Page, answers: &[Answer]) -> EngineResult<()> {
    let existing = answers_for_page(conn, page.id)?;
    for (i, a) in answers.iter().enumerate() {
        match existing.get(i) {
            Some(row) => {
                conn.execute(
                    "UPDATE answers
                     SET jumpto = ?, grade = ?, score = ?, answer = ?, response = ?, ordering = ?
                     WHERE id = ?",
                    (
                        a.jumpto,
                        a.grade,
                        a.score,
                        &a.answer,
                        &a.response,
                        i as i64,
                        row.id,
                    ),
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO answers(lesson_id, page_id, jumpto, grade, score, answer, response, ordering)
                     VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                    (
                        page.lesson_id,
                        page.id,
                        a.jumpto,
                        a.grade,
                        a.score,
                        &a.answer,
                        &a.response,
                        i as i64,
                    ),
                )?;
            }
        }
    }
    for row in existing.iter().skip(answers.len()) {
        conn.execute("DELETE FROM answers WHERE id = ?", [row.id])?;
    }
    Ok(())
}

// ---- attempts ----

pub fn get_attempt(conn: &Connection, attempt_id: i64) -> EngineResult<Option<Attempt>> {
    let sql = format!("SELECT {} FROM attempts WHERE id = ?", ATTEMPT_COLS);
    Ok(conn
        .query_row(&sql, [attempt_id], attempt_from_row)
        .optional()?)
}

/// Chronological (`time_seen`, then insertion order).
pub fn attempts_for_retry(
    conn: &Connection,
    lesson_id: i64,
    user_id: i64,
    retry: i64,
) -> EngineResult<Vec<Attempt>> {
    let sql = format!(
        "SELECT {} FROM attempts
         WHERE lesson_id = ? AND user_id = ? AND retry = ?
         ORDER BY time_seen, id",
        ATTEMPT_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((lesson_id, user_id, retry), attempt_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_page_attempts(
    conn: &Connection,
    page_id: i64,
    user_id: i64,
    retry: i64,
) -> EngineResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM attempts WHERE page_id = ? AND user_id = ? AND retry = ?",
        (page_id, user_id, retry),
        |r| r.get(0),
    )?)
}

pub fn current_attempt(
    conn: &Connection,
    page_id: i64,
    user_id: i64,
    retry: i64,
) -> EngineResult<Option<Attempt>> {
    let sql = format!(
        "SELECT {} FROM attempts
         WHERE page_id = ? AND user_id = ? AND retry = ? AND is_current = 1
         ORDER BY id DESC LIMIT 1",
        ATTEMPT_COLS
    );
    Ok(conn
        .query_row(&sql, (page_id, user_id, retry), attempt_from_row)
        .optional()?)
}

pub fn supersede_current(
    conn: &Connection,
    page_id: i64,
    user_id: i64,
    retry: i64,
) -> EngineResult<()> {
    conn.execute(
        "UPDATE attempts SET is_current = 0
         WHERE page_id = ? AND user_id = ? AND retry = ? AND is_current = 1",
        (page_id, user_id, retry),
    )?;
    Ok(())
}

pub fn insert_attempt(conn: &Connection, a: &Attempt) -> EngineResult<i64> {
    conn.execute(
        "INSERT INTO attempts(lesson_id, page_id, user_id, answer_id, retry, correct, score,
           user_response, time_seen, is_current, viewed, graded, resubmit)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            a.lesson_id,
            a.page_id,
            a.user_id,
            a.answer_id,
            a.retry,
            a.correct as i64,
            a.score,
            &a.user_response,
            a.time_seen,
            a.is_current as i64,
            a.viewed as i64,
            a.graded as i64,
            a.resubmit as i64,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn update_attempt(conn: &Connection, a: &Attempt) -> EngineResult<()> {
    conn.execute(
        "UPDATE attempts SET answer_id = ?, correct = ?, score = ?, user_response = ?,
           time_seen = ?, is_current = ?, viewed = ?, graded = ?, resubmit = ?
         WHERE id = ?",
        (
            a.answer_id,
            a.correct as i64,
            a.score,
            &a.user_response,
            a.time_seen,
            a.is_current as i64,
            a.viewed as i64,
            a.graded as i64,
            a.resubmit as i64,
            a.id,
        ),
    )?;
    Ok(())
}

/// Current Essay/Audio attempts of a lesson, oldest first.
pub fn manual_attempts(conn: &Connection, lesson_id: i64) -> EngineResult<Vec<Attempt>> {
    let sql = format!(
        "SELECT {} FROM attempts
         WHERE lesson_id = ? AND is_current = 1
           AND page_id IN (SELECT id FROM pages WHERE lesson_id = ? AND qtype IN (?, ?))
         ORDER BY time_seen, id",
        ATTEMPT_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            (
                lesson_id,
                lesson_id,
                PageType::Essay.code(),
                PageType::Audio.code(),
            ),
            attempt_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---- page views ----

pub fn insert_page_view(
    conn: &Connection,
    lesson_id: i64,
    user_id: i64,
    page_id: i64,
    retry: i64,
    time_seen: i64,
) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO page_views(lesson_id, user_id, page_id, retry, time_seen)
         VALUES(?, ?, ?, ?, ?)",
        (lesson_id, user_id, page_id, retry, time_seen),
    )?;
    Ok(())
}

pub fn viewed_pages(
    conn: &Connection,
    lesson_id: i64,
    user_id: i64,
    retry: i64,
) -> EngineResult<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT page_id FROM page_views
         WHERE lesson_id = ? AND user_id = ? AND retry = ?",
    )?;
    let rows = stmt
        .query_map((lesson_id, user_id, retry), |r| r.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---- grades ----

pub fn completed_grades(
    conn: &Connection,
    lesson_id: i64,
    user_id: i64,
) -> EngineResult<Vec<GradeRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, lesson_id, user_id, retry, grade, completed FROM grades
         WHERE lesson_id = ? AND user_id = ? AND completed > 0
         ORDER BY retry",
    )?;
    let rows = stmt
        .query_map((lesson_id, user_id), grade_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Number of finished passes through the lesson, which is also the index of
/// the retry in progress.
pub fn completed_retries(conn: &Connection, lesson_id: i64, user_id: i64) -> EngineResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM grades WHERE lesson_id = ? AND user_id = ? AND completed > 0",
        (lesson_id, user_id),
        |r| r.get(0),
    )?)
}

pub fn grade_for_retry(
    conn: &Connection,
    lesson_id: i64,
    user_id: i64,
    retry: i64,
) -> EngineResult<Option<GradeRow>> {
    Ok(conn
        .query_row(
            "SELECT id, lesson_id, user_id, retry, grade, completed FROM grades
             WHERE lesson_id = ? AND user_id = ? AND retry = ?",
            (lesson_id, user_id, retry),
            grade_from_row,
        )
        .optional()?)
}

/// Writes the grade for a retry; a completed row keeps its completion time
/// unless `completed` is set.
pub fn upsert_grade(
    conn: &Connection,
    lesson_id: i64,
    user_id: i64,
    retry: i64,
    grade: f64,
    completed: Option<i64>,
) -> EngineResult<GradeRow> {
    conn.execute(
        "INSERT INTO grades(lesson_id, user_id, retry, grade, completed)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(lesson_id, user_id, retry) DO UPDATE SET
           grade = excluded.grade,
           completed = CASE WHEN ? IS NULL THEN grades.completed ELSE excluded.completed END",
        (lesson_id, user_id, retry, grade, completed.unwrap_or(0), completed),
    )?;
    grade_for_retry(conn, lesson_id, user_id, retry)?
        .ok_or_else(|| EngineError::missing("grade", retry))
}

// ---- branches ----

pub fn replace_branches(conn: &Connection, lesson_id: i64, branches: &[Branch]) -> EngineResult<Vec<Branch>> {
    conn.execute("DELETE FROM branches WHERE lesson_id = ?", [lesson_id])?;
    let mut stored = Vec::with_capacity(branches.len());
    for b in branches {
        conn.execute(
            "INSERT INTO branches(lesson_id, parent_id, ordering, first_page_id, end_page_id)
             VALUES(?, ?, ?, ?, ?)",
            (lesson_id, b.parent_id, b.ordering, b.first_page_id, b.end_page_id),
        )?;
        stored.push(Branch {
            id: conn.last_insert_rowid(),
            ..b.clone()
        });
    }
    Ok(stored)
}

pub fn branches_for_lesson(conn: &Connection, lesson_id: i64) -> EngineResult<Vec<Branch>> {
    let mut stmt = conn.prepare(
        "SELECT id, lesson_id, parent_id, ordering, first_page_id, end_page_id
         FROM branches WHERE lesson_id = ? ORDER BY parent_id, ordering",
    )?;
    let rows = stmt
        .query_map([lesson_id], |r| {
            Ok(Branch {
                id: r.get(0)?,
                lesson_id: r.get(1)?,
                parent_id: r.get(2)?,
                ordering: r.get(3)?,
                first_page_id: r.get(4)?,
                end_page_id: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
