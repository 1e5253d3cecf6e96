use crate::error::{EngineError, EngineResult};
use crate::model::{Answer, Branch, Jump, Page, PageType};
use crate::repository;
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};

/// A lesson's pages in traversal order, indexed by page id.
///
/// Built only through [`PageGraph::from_pages`], so holding one means the
/// single-head/single-tail/no-cycle invariant held when it was loaded.
#[derive(Debug, Clone)]
pub struct PageGraph {
    lesson_id: i64,
    arena: Vec<Page>,
    index: HashMap<i64, usize>,
}

/// One branch under a BranchTable: the pages from its head up to (not
/// including) the closing EndOfBranch.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchSpan {
    pub ordering: i64,
    pub head: i64,
    pub pages: Vec<i64>,
    pub end_page_id: i64,
}

impl PageGraph {
    pub fn from_pages(lesson_id: i64, pages: Vec<Page>) -> EngineResult<Self> {
        if pages.is_empty() {
            return Ok(Self {
                lesson_id,
                arena: Vec::new(),
                index: HashMap::new(),
            });
        }

        let mut by_id: HashMap<i64, Page> = HashMap::with_capacity(pages.len());
        for p in pages {
            if p.lesson_id != lesson_id {
                return Err(EngineError::graph(
                    lesson_id,
                    format!("page {} belongs to lesson {}", p.id, p.lesson_id),
                ));
            }
            if by_id.insert(p.id, p).is_some() {
                return Err(EngineError::graph(lesson_id, "duplicate page id"));
            }
        }

        let heads: Vec<i64> = by_id
            .values()
            .filter(|p| p.prev_page_id == 0)
            .map(|p| p.id)
            .collect();
        let tails = by_id.values().filter(|p| p.next_page_id == 0).count();
        if heads.len() != 1 {
            return Err(EngineError::graph(
                lesson_id,
                format!("expected one head page, found {}", heads.len()),
            ));
        }
        if tails != 1 {
            return Err(EngineError::graph(
                lesson_id,
                format!("expected one tail page, found {}", tails),
            ));
        }

        let total = by_id.len();
        let mut arena: Vec<Page> = Vec::with_capacity(total);
        let mut index: HashMap<i64, usize> = HashMap::with_capacity(total);
        let mut prev_id = 0_i64;
        let mut cursor = heads[0];
        while cursor != 0 {
            if arena.len() >= total || index.contains_key(&cursor) {
                return Err(EngineError::graph(
                    lesson_id,
                    format!("cycle through page {}", cursor),
                ));
            }
            let Some(page) = by_id.remove(&cursor) else {
                return Err(EngineError::graph(
                    lesson_id,
                    format!("next pointer to unknown page {}", cursor),
                ));
            };
            if page.prev_page_id != prev_id {
                return Err(EngineError::graph(
                    lesson_id,
                    format!(
                        "page {} points back to {} but follows {}",
                        page.id, page.prev_page_id, prev_id
                    ),
                ));
            }
            prev_id = page.id;
            cursor = page.next_page_id;
            index.insert(page.id, arena.len());
            arena.push(page);
        }

        if !by_id.is_empty() {
            return Err(EngineError::graph(
                lesson_id,
                format!("{} page(s) unreachable from the head", by_id.len()),
            ));
        }

        Ok(Self {
            lesson_id,
            arena,
            index,
        })
    }

    pub fn lesson_id(&self) -> i64 {
        self.lesson_id
    }

    /// Pages in traversal order.
    pub fn pages(&self) -> &[Page] {
        &self.arena
    }

    pub fn ids(&self) -> Vec<i64> {
        self.arena.iter().map(|p| p.id).collect()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn get(&self, page_id: i64) -> Option<&Page> {
        self.index.get(&page_id).map(|&i| &self.arena[i])
    }

    pub fn contains(&self, page_id: i64) -> bool {
        self.index.contains_key(&page_id)
    }

    pub fn position(&self, page_id: i64) -> Option<usize> {
        self.index.get(&page_id).copied()
    }

    pub fn head(&self) -> Option<&Page> {
        self.arena.first()
    }

    pub fn tail(&self) -> Option<&Page> {
        self.arena.last()
    }

    pub fn next_of(&self, page_id: i64) -> Option<&Page> {
        self.position(page_id).and_then(|i| self.arena.get(i + 1))
    }

    pub fn prev_of(&self, page_id: i64) -> Option<&Page> {
        self.position(page_id)
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| self.arena.get(i))
    }

    /// Pages after `page_id` up to the first one whose type is in `stop`.
    pub fn sub_pages_of(&self, page_id: i64, stop: &[PageType]) -> Vec<&Page> {
        let Some(start) = self.position(page_id) else {
            return Vec::new();
        };
        self.arena[start + 1..]
            .iter()
            .take_while(|p| !stop.contains(&p.qtype))
            .collect()
    }

    /// Climbs the prev chain from `page_id` (inclusive) to the nearest page
    /// of type `qtype`.
    pub fn enclosing(&self, page_id: i64, qtype: PageType) -> Option<&Page> {
        let start = self.position(page_id)?;
        self.arena[..=start].iter().rev().find(|p| p.qtype == qtype)
    }

    /// First page of type `qtype` at or after `page_id`.
    pub fn following(&self, page_id: i64, qtype: PageType) -> Option<&Page> {
        let start = self.position(page_id)?;
        self.arena[start..].iter().find(|p| p.qtype == qtype)
    }

    /// Branches of a BranchTable, one per table answer whose jump lands on a
    /// page of this lesson.
    pub fn branch_spans(&self, table_id: i64, table_answers: &[Answer]) -> Vec<BranchSpan> {
        let mut spans = Vec::new();
        for (ordering, a) in table_answers.iter().enumerate() {
            let head = match a.jump() {
                Jump::NextPage => self.next_of(table_id).map(|p| p.id),
                Jump::Page(id) if self.contains(id) => Some(id),
                _ => None,
            };
            let Some(head) = head else {
                continue;
            };
            let Some(start) = self.position(head) else {
                continue;
            };
            let mut pages = Vec::new();
            let mut end_page_id = 0;
            for p in &self.arena[start..] {
                match p.qtype {
                    PageType::EndOfBranch => {
                        end_page_id = p.id;
                        break;
                    }
                    PageType::BranchTable => break,
                    _ => pages.push(p.id),
                }
            }
            spans.push(BranchSpan {
                ordering: ordering as i64,
                head,
                pages,
                end_page_id,
            });
        }
        spans
    }

    /// Where a student leaves a branch table once its branches are used up:
    /// the page after the furthest EndOfBranch (or furthest branch page).
    pub fn branch_exit(&self, table_id: i64, spans: &[BranchSpan]) -> i64 {
        let furthest = spans
            .iter()
            .flat_map(|s| {
                let last = if s.end_page_id != 0 {
                    Some(s.end_page_id)
                } else {
                    s.pages.last().copied()
                };
                last.and_then(|id| self.position(id))
            })
            .max();
        match furthest {
            Some(pos) => self.arena.get(pos + 1).map(|p| p.id).unwrap_or(0),
            None => self.next_of(table_id).map(|p| p.id).unwrap_or(0),
        }
    }

    /// Derives branch rows for every BranchTable; `branch_id` on each page
    /// is filled by the caller once the rows are stored.
    pub fn derive_branches(&self, answers: &HashMap<i64, Vec<Answer>>) -> Vec<(Branch, Vec<i64>)> {
        let mut out = Vec::new();
        for table in self.arena.iter().filter(|p| p.qtype == PageType::BranchTable) {
            let table_answers = answers.get(&table.id).map(Vec::as_slice).unwrap_or(&[]);
            for span in self.branch_spans(table.id, table_answers) {
                out.push((
                    Branch {
                        id: 0,
                        lesson_id: self.lesson_id,
                        parent_id: table.id,
                        ordering: span.ordering,
                        first_page_id: span.head,
                        end_page_id: span.end_page_id,
                    },
                    span.pages,
                ));
            }
        }
        out
    }
}

/// Checks that `seq` is a permutation of the graph's pages.
pub fn check_sequence(graph: &PageGraph, seq: &[i64]) -> EngineResult<()> {
    if seq.len() != graph.len() {
        return Err(EngineError::graph(
            graph.lesson_id(),
            format!("sequence has {} pages, lesson has {}", seq.len(), graph.len()),
        ));
    }
    let mut seen = HashSet::with_capacity(seq.len());
    for id in seq {
        if !graph.contains(*id) || !seen.insert(*id) {
            return Err(EngineError::graph(
                graph.lesson_id(),
                format!("page {} repeated or foreign in sequence", id),
            ));
        }
    }
    Ok(())
}

pub fn load_all(conn: &Connection, lesson_id: i64) -> EngineResult<PageGraph> {
    let pages = repository::pages_for_lesson(conn, lesson_id)?;
    PageGraph::from_pages(lesson_id, pages)
}

pub fn load_one(conn: &Connection, page_id: i64) -> EngineResult<Page> {
    repository::get_page(conn, page_id)?.ok_or_else(|| EngineError::missing("page", page_id))
}

/// Answers of a lesson keyed by page id, each list in answer order.
pub fn answers_by_page(conn: &Connection, lesson_id: i64) -> EngineResult<HashMap<i64, Vec<Answer>>> {
    let mut map: HashMap<i64, Vec<Answer>> = HashMap::new();
    for a in repository::answers_for_lesson(conn, lesson_id)? {
        map.entry(a.page_id).or_default().push(a);
    }
    Ok(map)
}
