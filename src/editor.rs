//! Structural edits of a lesson's page list.
//!
//! Every edit computes the complete target sequence first and then rewrites
//! all links from it with [`rebuild_links`]; nothing patches pointers
//! incrementally. Callers run each edit inside one transaction and drop it
//! on error.

use crate::calc;
use crate::error::{EngineError, EngineResult};
use crate::graph::{self, PageGraph};
use crate::model::{Answer, Branch, Jump, Page, PageType, JUMP_UNDEFINED};
use crate::repository;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPage {
    pub qtype: PageType,
    #[serde(default)]
    pub qoption: bool,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub contents: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageUpdate {
    pub qoption: Option<bool>,
    pub title: Option<String>,
    pub contents: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerInput {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub response: String,
    #[serde(default = "default_jump")]
    pub jumpto: i64,
    #[serde(default)]
    pub score: f64,
    /// Legacy 0-100 weight; derived from `score` when absent.
    #[serde(default)]
    pub grade: Option<i64>,
}

fn default_jump() -> i64 {
    Jump::NextPage.code()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderReport {
    pub pages: Vec<Page>,
    pub branches: Vec<Branch>,
    pub grade: f64,
}

/// Rewrites `prev_page_id`, `next_page_id` and `ordering` of every page of
/// the lesson from `seq`, then reloads and validates the result.
pub fn rebuild_links(conn: &Connection, lesson_id: i64, seq: &[i64]) -> EngineResult<PageGraph> {
    let stored: HashSet<i64> = repository::pages_for_lesson(conn, lesson_id)?
        .iter()
        .map(|p| p.id)
        .collect();
    let mut seen = HashSet::with_capacity(seq.len());
    if seq.len() != stored.len() || !seq.iter().all(|id| stored.contains(id) && seen.insert(*id)) {
        return Err(EngineError::graph(
            lesson_id,
            "target sequence is not a permutation of the lesson's pages",
        ));
    }

    for (i, id) in seq.iter().enumerate() {
        let prev = if i == 0 { 0 } else { seq[i - 1] };
        let next = seq.get(i + 1).copied().unwrap_or(0);
        repository::update_page_links(conn, *id, prev, next, i as i64 + 1)?;
    }

    let graph = graph::load_all(conn, lesson_id)?;
    if graph.ids() != seq {
        return Err(EngineError::graph(lesson_id, "rebuilt links disagree with sequence"));
    }
    Ok(graph)
}

fn splice_after(remaining: &mut Vec<i64>, after_id: i64, block: &[i64]) -> EngineResult<()> {
    let at = if after_id == 0 {
        0
    } else {
        remaining
            .iter()
            .position(|id| *id == after_id)
            .map(|i| i + 1)
            .ok_or_else(|| EngineError::missing("page", after_id))?
    };
    remaining.splice(at..at, block.iter().copied());
    Ok(())
}

pub fn insert_page(
    conn: &Connection,
    lesson_id: i64,
    after_id: i64,
    new: &NewPage,
) -> EngineResult<Page> {
    repository::require_lesson(conn, lesson_id)?;
    let graph = graph::load_all(conn, lesson_id)?;
    if after_id != 0 && !graph.contains(after_id) {
        return Err(EngineError::missing("page", after_id));
    }
    let id = repository::insert_page(
        conn,
        &Page {
            id: 0,
            lesson_id,
            prev_page_id: 0,
            next_page_id: 0,
            ordering: 0,
            qtype: new.qtype,
            qoption: new.qoption,
            branch_id: 0,
            max_score: 0.0,
            title: new.title.clone(),
            contents: new.contents.clone(),
        },
    )?;
    let mut seq = graph.ids();
    splice_after(&mut seq, after_id, &[id])?;
    rebuild_links(conn, lesson_id, &seq)?;
    reorder_pages(conn, lesson_id)?;
    log::info!("lesson {}: inserted {:?} page {} after {}", lesson_id, new.qtype, id, after_id);
    graph::load_one(conn, id)
}

pub fn update_page(conn: &Connection, page_id: i64, patch: &PageUpdate) -> EngineResult<Page> {
    let mut page = graph::load_one(conn, page_id)?;
    if let Some(q) = patch.qoption {
        page.qoption = q;
    }
    if let Some(t) = &patch.title {
        page.title = t.clone();
    }
    if let Some(c) = &patch.contents {
        page.contents = c.clone();
    }
    repository::update_page_content(conn, &page)?;
    Ok(page)
}

/// Removes a page with its answers, attempts and views, and closes the gap.
pub fn delete_page(conn: &Connection, page_id: i64) -> EngineResult<()> {
    let page = graph::load_one(conn, page_id)?;
    let lesson_id = page.lesson_id;
    let graph = graph::load_all(conn, lesson_id)?;
    let seq: Vec<i64> = graph.ids().into_iter().filter(|id| *id != page_id).collect();
    repository::delete_page_cascade(conn, page_id)?;
    rebuild_links(conn, lesson_id, &seq)?;
    reorder_pages(conn, lesson_id)?;
    log::info!("lesson {}: deleted page {}", lesson_id, page_id);
    Ok(())
}

pub fn move_page(conn: &Connection, page_id: i64, after_id: i64) -> EngineResult<PageGraph> {
    let page = graph::load_one(conn, page_id)?;
    move_pages(conn, page.lesson_id, &[page_id], after_id)
}

/// Moves `ids` as one contiguous block after `after_id` (to the head when
/// 0). The block keeps the pages' current relative order.
pub fn move_pages(
    conn: &Connection,
    lesson_id: i64,
    ids: &[i64],
    after_id: i64,
) -> EngineResult<PageGraph> {
    let graph = graph::load_all(conn, lesson_id)?;
    if ids.is_empty() {
        return Err(EngineError::bad_input("no pages to move"));
    }
    let moving: HashSet<i64> = ids.iter().copied().collect();
    if moving.len() != ids.len() {
        return Err(EngineError::graph(lesson_id, "page listed twice in move"));
    }
    if let Some(stray) = ids.iter().find(|id| !graph.contains(**id)) {
        return Err(EngineError::graph(
            lesson_id,
            format!("page {} is not in this lesson", stray),
        ));
    }
    if moving.contains(&after_id) {
        return Err(EngineError::graph(
            lesson_id,
            format!("cannot move pages after moved page {}", after_id),
        ));
    }
    if after_id != 0 && !graph.contains(after_id) {
        return Err(EngineError::missing("page", after_id));
    }

    let (block, mut seq): (Vec<i64>, Vec<i64>) =
        graph.ids().into_iter().partition(|id| moving.contains(id));
    splice_after(&mut seq, after_id, &block)?;
    graph::check_sequence(&graph, &seq)?;
    rebuild_links(conn, lesson_id, &seq)?;
    reorder_pages(conn, lesson_id)?;
    log::info!("lesson {}: moved {:?} after {}", lesson_id, block, after_id);
    graph::load_all(conn, lesson_id)
}

/// Full walk: rewrites cached orderings, rederives branches and each page's
/// `branch_id` and `max_score`, and stores the lesson's maximum grade.
pub fn reorder_pages(conn: &Connection, lesson_id: i64) -> EngineResult<ReorderReport> {
    repository::require_lesson(conn, lesson_id)?;
    let graph = graph::load_all(conn, lesson_id)?;
    let answers = graph::answers_by_page(conn, lesson_id)?;

    for (i, p) in graph.pages().iter().enumerate() {
        let ordering = i as i64 + 1;
        if p.ordering != ordering {
            repository::update_page_links(conn, p.id, p.prev_page_id, p.next_page_id, ordering)?;
        }
    }

    let derived = graph.derive_branches(&answers);
    let rows: Vec<Branch> = derived.iter().map(|(b, _)| b.clone()).collect();
    let branches = repository::replace_branches(conn, lesson_id, &rows)?;
    let mut branch_of: HashMap<i64, i64> = HashMap::new();
    for ((_, members), stored) in derived.iter().zip(&branches) {
        for pid in members {
            branch_of.entry(*pid).or_insert(stored.id);
        }
    }

    for p in graph.pages() {
        let branch_id = branch_of.get(&p.id).copied().unwrap_or(0);
        if p.branch_id != branch_id {
            repository::set_page_branch(conn, p.id, branch_id)?;
        }
        let list = answers.get(&p.id).map(Vec::as_slice).unwrap_or(&[]);
        let max = p.qtype.behavior().max_score(list);
        if p.max_score != max {
            repository::set_page_max_score(conn, p.id, max)?;
        }
    }

    let grade = calc::lesson_max_grade(graph.pages(), &answers);
    repository::set_lesson_grade(conn, lesson_id, grade)?;
    Ok(ReorderReport {
        pages: graph::load_all(conn, lesson_id)?.pages().to_vec(),
        branches,
        grade,
    })
}

/// Sets a page's answers. Rows are matched by position, so existing answer
/// ids survive an edit. Literal jump targets must be pages of the same
/// lesson.
pub fn set_answers(
    conn: &Connection,
    page_id: i64,
    inputs: &[AnswerInput],
) -> EngineResult<Vec<Answer>> {
    let page = graph::load_one(conn, page_id)?;
    let graph = graph::load_all(conn, page.lesson_id)?;
    let behavior = page.qtype.behavior();
    if let Some(max) = behavior.max_answers() {
        if inputs.len() > max {
            return Err(EngineError::bad_input(format!(
                "{:?} pages take at most {} answer(s)",
                page.qtype, max
            )));
        }
    }

    let mut answers = Vec::with_capacity(inputs.len());
    for (i, a) in inputs.iter().enumerate() {
        match Jump::from_code(a.jumpto) {
            Jump::Page(target) if !graph.contains(target) => {
                return Err(EngineError::InvalidJump {
                    from: page_id,
                    target,
                });
            }
            Jump::Undefined if a.jumpto != JUMP_UNDEFINED => {
                return Err(EngineError::bad_input(format!("unknown jump code {}", a.jumpto)));
            }
            _ => {}
        }
        if !a.score.is_finite() {
            return Err(EngineError::bad_input("answer score must be a number"));
        }
        answers.push(Answer {
            id: 0,
            lesson_id: page.lesson_id,
            page_id,
            jumpto: a.jumpto,
            grade: a.grade.unwrap_or(if a.score > 0.0 { 100 } else { 0 }),
            score: a.score,
            answer: a.answer.clone(),
            response: a.response.clone(),
            ordering: i as i64,
        });
    }

    repository::replace_answers(conn, &page, &answers)?;
    reorder_pages(conn, page.lesson_id)?;
    repository::answers_for_page(conn, page_id)
}
