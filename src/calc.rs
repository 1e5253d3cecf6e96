use crate::error::EngineResult;
use crate::graph;
use crate::model::{Answer, Attempt, Lesson, ManualPayload, Page, ScoringMode};
use crate::repository;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;

/// Moodle keeps lesson grades to five decimals.
pub fn round_5(x: f64) -> f64 {
    (x * 100_000.0).round() / 100_000.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeInfo {
    pub nquestions: i64,
    pub attempts: i64,
    pub total: f64,
    pub earned: f64,
    pub grade: f64,
    pub nmanual: i64,
    pub manualpoints: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonGrade {
    pub grade: Option<f64>,
    pub completed_retries: i64,
    pub counts_toward_gradebook: bool,
}

fn chosen_answer<'a>(answers: &'a [Answer], attempt: &Attempt) -> Option<&'a Answer> {
    let id = attempt.answer_id?;
    answers.iter().find(|a| a.id == id)
}

fn manual_score(attempt: &Attempt) -> f64 {
    match serde_json::from_str::<ManualPayload>(&attempt.user_response) {
        Ok(p) => p.score.unwrap_or(0.0),
        Err(e) => {
            log::warn!("attempt {} has an unreadable manual payload: {}", attempt.id, e);
            0.0
        }
    }
}

/// Reduces one retry's attempts (chronological) to a grade.
///
/// Pages or answers that no longer exist contribute nothing instead of
/// failing, so grades survive edits made after the attempts were written.
pub fn aggregate(
    lesson: &Lesson,
    attempts: &[Attempt],
    pages: &HashMap<i64, Page>,
    answers: &HashMap<i64, Vec<Answer>>,
) -> GradeInfo {
    let mut order: Vec<i64> = Vec::new();
    let mut by_page: HashMap<i64, Vec<&Attempt>> = HashMap::new();
    for a in attempts {
        by_page
            .entry(a.page_id)
            .or_insert_with(|| {
                order.push(a.page_id);
                Vec::new()
            })
            .push(a);
    }
    if lesson.maxattempts > 0 {
        let cap = lesson.maxattempts as usize;
        for list in by_page.values_mut() {
            list.truncate(cap);
        }
    }

    let mut info = GradeInfo::default();
    for page_id in &order {
        let Some(list) = by_page.get(page_id) else {
            continue;
        };
        let Some(last) = list.last() else {
            continue;
        };
        info.nquestions += 1;
        info.attempts += list.len() as i64;

        let page_answers = answers.get(page_id).map(Vec::as_slice).unwrap_or(&[]);
        let page = pages.get(page_id);
        let manual = page
            .map(|p| p.qtype.requires_manual_grading())
            .unwrap_or(false);

        if lesson.custom {
            if manual {
                info.nmanual += 1;
                info.manualpoints += chosen_answer(page_answers, last)
                    .or_else(|| page_answers.first())
                    .map(|a| a.score)
                    .unwrap_or(0.0);
                info.earned += manual_score(last);
            } else {
                info.earned += chosen_answer(page_answers, last)
                    .map(|a| a.score)
                    .unwrap_or(0.0);
            }
            if let Some(p) = page {
                info.total += p.qtype.behavior().max_score(page_answers);
            }
        } else {
            if manual {
                info.nmanual += 1;
                info.manualpoints += 1.0;
            }
            info.earned += list.iter().filter(|a| a.correct).count() as f64;
        }
    }

    if !lesson.custom {
        let shortfall = (lesson.minquestions - info.nquestions).max(0);
        info.total = (info.attempts + shortfall) as f64;
    }
    info.grade = if info.total > 0.0 {
        round_5(100.0 * info.earned / info.total)
    } else {
        0.0
    };
    info
}

pub fn compute_attempt_grade(
    conn: &Connection,
    lesson: &Lesson,
    retry: i64,
    user_id: i64,
) -> EngineResult<GradeInfo> {
    let attempts = repository::attempts_for_retry(conn, lesson.id, user_id, retry)?;
    let pages: HashMap<i64, Page> = repository::pages_for_lesson(conn, lesson.id)?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();
    let answers = graph::answers_by_page(conn, lesson.id)?;
    Ok(aggregate(lesson, &attempts, &pages, &answers))
}

pub fn reduce_retries(lesson: &Lesson, grades: &[f64]) -> Option<f64> {
    let grades = if lesson.retake {
        grades
    } else {
        &grades[..grades.len().min(1)]
    };
    if grades.is_empty() {
        return None;
    }
    let g = if lesson.usemaxgrade {
        grades.iter().copied().fold(f64::MIN, f64::max)
    } else {
        grades.iter().sum::<f64>() / grades.len() as f64
    };
    Some(round_5(g))
}

pub fn compute_lesson_grade(
    conn: &Connection,
    lesson: &Lesson,
    user_id: i64,
) -> EngineResult<LessonGrade> {
    let rows = repository::completed_grades(conn, lesson.id, user_id)?;
    let grades: Vec<f64> = rows.iter().map(|r| r.grade).collect();
    Ok(LessonGrade {
        grade: reduce_retries(lesson, &grades),
        completed_retries: rows.len() as i64,
        counts_toward_gradebook: lesson.scoring_mode != ScoringMode::Practice,
    })
}

/// The lesson's maximum grade: every page's best reachable score.
pub fn lesson_max_grade(pages: &[Page], answers: &HashMap<i64, Vec<Answer>>) -> f64 {
    pages
        .iter()
        .map(|p| {
            let list = answers.get(&p.id).map(Vec::as_slice).unwrap_or(&[]);
            p.qtype.behavior().max_score(list)
        })
        .sum()
}
