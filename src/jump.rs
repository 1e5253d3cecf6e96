use crate::config::{EngineSettings, UndefinedJumpPolicy};
use crate::error::{EngineError, EngineResult};
use crate::graph::{BranchSpan, PageGraph};
use crate::model::{
    Answer, Jump, Lesson, Page, PageType, JUMP_UNANSWERED_PAGE, JUMP_UNSEEN_PAGE,
};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "pageId", rename_all = "camelCase")]
pub enum Destination {
    Page(i64),
    EndOfLesson,
}

/// What a user has done in the current retry.
#[derive(Debug, Clone, Default)]
pub struct History {
    pub attempted: HashSet<i64>,
    pub correct: HashSet<i64>,
    pub viewed: HashSet<i64>,
    pub attempt_count: usize,
}

impl History {
    /// Question pages count as seen once attempted, other pages once viewed.
    pub fn is_unseen(&self, page: &Page) -> bool {
        if page.qtype.is_question() {
            !self.attempted.contains(&page.id)
        } else {
            !self.viewed.contains(&page.id)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    pub cluster_exit_fallback_scan: bool,
    pub undefined_jump: UndefinedJumpPolicy,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            cluster_exit_fallback_scan: true,
            undefined_jump: UndefinedJumpPolicy::Next,
        }
    }
}

impl From<&EngineSettings> for ResolveOptions {
    fn from(s: &EngineSettings) -> Self {
        Self {
            cluster_exit_fallback_scan: s.cluster_exit_fallback_scan,
            undefined_jump: s.undefined_jump,
        }
    }
}

/// Read-only inputs of one resolution.
pub struct LessonView<'a> {
    pub lesson: &'a Lesson,
    pub graph: &'a PageGraph,
    pub answers: &'a HashMap<i64, Vec<Answer>>,
    pub history: &'a History,
    pub options: ResolveOptions,
}

impl<'a> LessonView<'a> {
    fn answers_of(&self, page_id: i64) -> &'a [Answer] {
        self.answers
            .get(&page_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn page(&self, page_id: i64) -> EngineResult<&'a Page> {
        self.graph
            .get(page_id)
            .ok_or_else(|| EngineError::missing("page", page_id))
    }

    /// The jump a marker page carries; NextPage when it has no answer.
    fn marker_jump(&self, page_id: i64) -> Jump {
        self.answers_of(page_id)
            .first()
            .map(Answer::jump)
            .unwrap_or(Jump::NextPage)
    }
}

fn pick<R: Rng + ?Sized>(rng: &mut R, ids: &[i64]) -> Option<i64> {
    if ids.is_empty() {
        return None;
    }
    ids.get(rng.random_range(0..ids.len())).copied()
}

fn to_destination(page_id: i64) -> Destination {
    if page_id == 0 {
        Destination::EndOfLesson
    } else {
        Destination::Page(page_id)
    }
}

/// Computes where a student goes after `current` given `jump`, then settles
/// through marker pages (EndOfBranch, Cluster, EndOfCluster) that are never
/// shown themselves.
pub fn resolve<R: Rng + ?Sized>(
    view: &LessonView<'_>,
    current: i64,
    jump: Jump,
    rng: &mut R,
) -> EngineResult<Destination> {
    view.page(current)?;
    let mut dest = resolve_once(view, current, jump, rng)?;
    let limit = view.graph.len() + 1;
    for _ in 0..limit {
        let Destination::Page(id) = dest else {
            return Ok(dest);
        };
        let page = view.page(id)?;
        dest = match page.qtype {
            PageType::EndOfBranch | PageType::EndOfCluster => {
                let j = view.marker_jump(id);
                log::debug!("settling through marker {} with {:?}", id, j);
                resolve_once(view, id, j, rng)?
            }
            PageType::Cluster => resolve_once(view, id, Jump::ClusterJump, rng)?,
            _ => return Ok(dest),
        };
    }
    Err(EngineError::InvalidJump {
        from: current,
        target: jump.code(),
    })
}

fn resolve_once<R: Rng + ?Sized>(
    view: &LessonView<'_>,
    current: i64,
    jump: Jump,
    rng: &mut R,
) -> EngineResult<Destination> {
    let page = view.page(current)?;
    match jump {
        Jump::ThisPage => Ok(Destination::Page(current)),
        Jump::NextPage => next_page(view, page, rng),
        Jump::PreviousPage => Ok(Destination::Page(
            view.graph.prev_of(current).map(|p| p.id).unwrap_or(current),
        )),
        Jump::EndOfLesson => Ok(Destination::EndOfLesson),
        Jump::UnseenBranchPage => branch_jump(view, page, rng, BranchPolicy::Unseen),
        Jump::RandomPage => branch_jump(view, page, rng, BranchPolicy::Random),
        Jump::RandomBranch => branch_jump(view, page, rng, BranchPolicy::RandomBranch),
        Jump::ClusterJump => cluster_jump(view, page, rng),
        Jump::Undefined => match view.options.undefined_jump {
            UndefinedJumpPolicy::Next => {
                log::warn!("page {} has an undefined jump, continuing", current);
                next_page(view, page, rng)
            }
            UndefinedJumpPolicy::Reject => Err(EngineError::InvalidJump {
                from: current,
                target: jump.code(),
            }),
        },
        Jump::Page(target) => literal(view, page, target),
    }
}

fn literal(view: &LessonView<'_>, from: &Page, target: i64) -> EngineResult<Destination> {
    let invalid = EngineError::InvalidJump {
        from: from.id,
        target,
    };
    let (Some(from_pos), Some(target_pos)) =
        (view.graph.position(from.id), view.graph.position(target))
    else {
        return Err(invalid);
    };
    let backward_ok = matches!(
        from.qtype,
        PageType::EndOfBranch | PageType::EndOfCluster
    ) || view
        .graph
        .get(target)
        .map(|p| matches!(p.qtype, PageType::BranchTable | PageType::Cluster))
        .unwrap_or(false);
    if target_pos >= from_pos || backward_ok {
        Ok(Destination::Page(target))
    } else {
        Err(invalid)
    }
}

fn next_page<R: Rng + ?Sized>(
    view: &LessonView<'_>,
    page: &Page,
    rng: &mut R,
) -> EngineResult<Destination> {
    match view.lesson.nextpagedefault {
        JUMP_UNSEEN_PAGE | JUMP_UNANSWERED_PAGE => Ok(flashcard(view, rng)),
        _ => Ok(to_destination(page.next_page_id)),
    }
}

/// Flashcard traversal: a random question page not yet attempted (or not
/// yet answered correctly), capped by `maxpages`.
fn flashcard<R: Rng + ?Sized>(view: &LessonView<'_>, rng: &mut R) -> Destination {
    let lesson = view.lesson;
    let h = view.history;
    if lesson.maxpages > 0 && h.attempt_count as i64 >= lesson.maxpages {
        log::debug!("lesson {} reached maxpages {}", lesson.id, lesson.maxpages);
        return Destination::EndOfLesson;
    }
    let mut candidates: Vec<&Page> = view
        .graph
        .pages()
        .iter()
        .filter(|p| p.qtype.is_question())
        .collect();
    candidates.shuffle(rng);
    let found = candidates.into_iter().find(|p| {
        if lesson.nextpagedefault == JUMP_UNSEEN_PAGE || p.qtype.requires_manual_grading() {
            !h.attempted.contains(&p.id)
        } else {
            !h.correct.contains(&p.id)
        }
    });
    match found {
        Some(p) => Destination::Page(p.id),
        None => Destination::EndOfLesson,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchPolicy {
    Unseen,
    Random,
    RandomBranch,
}

fn branch_jump<R: Rng + ?Sized>(
    view: &LessonView<'_>,
    page: &Page,
    rng: &mut R,
    policy: BranchPolicy,
) -> EngineResult<Destination> {
    let Some(table) = view.graph.enclosing(page.id, PageType::BranchTable) else {
        log::debug!("page {} is not inside a branch table", page.id);
        return next_page(view, page, rng);
    };
    let spans = view.graph.branch_spans(table.id, view.answers_of(table.id));
    let choice = match policy {
        BranchPolicy::Unseen => {
            let unseen: Vec<i64> = branch_pages(view, &spans)
                .into_iter()
                .filter(|p| view.history.is_unseen(p))
                .map(|p| p.id)
                .collect();
            pick(rng, &unseen)
        }
        BranchPolicy::Random => {
            let all: Vec<i64> = branch_pages(view, &spans).iter().map(|p| p.id).collect();
            pick(rng, &all)
        }
        BranchPolicy::RandomBranch => {
            let open: Vec<i64> = spans
                .iter()
                .filter(|s| {
                    s.pages
                        .iter()
                        .filter_map(|id| view.graph.get(*id))
                        .any(|p| view.history.is_unseen(p))
                })
                .map(|s| s.head)
                .collect();
            pick(rng, &open)
        }
    };
    Ok(match choice {
        Some(id) => Destination::Page(id),
        None => to_destination(view.graph.branch_exit(table.id, &spans)),
    })
}

fn branch_pages<'a>(view: &LessonView<'a>, spans: &[BranchSpan]) -> Vec<&'a Page> {
    let mut seen = HashSet::new();
    spans
        .iter()
        .flat_map(|s| s.pages.iter())
        .filter(|id| seen.insert(**id))
        .filter_map(|id| view.graph.get(*id))
        .collect()
}

fn cluster_jump<R: Rng + ?Sized>(
    view: &LessonView<'_>,
    page: &Page,
    rng: &mut R,
) -> EngineResult<Destination> {
    let graph = view.graph;
    let Some(cluster) = graph.enclosing(page.id, PageType::Cluster) else {
        log::debug!("page {} is not inside a cluster", page.id);
        return next_page(view, page, rng);
    };
    let members = graph.sub_pages_of(cluster.id, &[PageType::EndOfCluster]);

    // Pages owned by a nested branch table are reached through the table.
    let mut nested: HashSet<i64> = HashSet::new();
    let mut tables: Vec<(&Page, Vec<i64>)> = Vec::new();
    for p in members.iter().filter(|p| p.qtype == PageType::BranchTable) {
        let spans = graph.branch_spans(p.id, view.answers_of(p.id));
        let inside: Vec<i64> = branch_pages(view, &spans).iter().map(|b| b.id).collect();
        nested.extend(inside.iter().copied());
        tables.push((*p, inside));
    }

    let mut eligible: Vec<i64> = Vec::new();
    for p in &members {
        if nested.contains(&p.id) {
            continue;
        }
        if p.qtype == PageType::BranchTable {
            let Some((_, inside)) = tables.iter().find(|(t, _)| t.id == p.id) else {
                continue;
            };
            let untouched = inside.iter().all(|id| {
                graph
                    .get(*id)
                    .map(|b| view.history.is_unseen(b))
                    .unwrap_or(true)
            });
            if untouched && !inside.is_empty() {
                eligible.push(p.id);
            }
        } else if p.qtype.is_question() && view.history.is_unseen(p) {
            eligible.push(p.id);
        }
    }

    if let Some(chosen) = pick(rng, &eligible) {
        let chosen_is_table = graph
            .get(chosen)
            .map(|p| p.qtype == PageType::BranchTable)
            .unwrap_or(false);
        if chosen_is_table {
            let inside = tables
                .iter()
                .find(|(t, _)| t.id == chosen)
                .map(|(_, inside)| inside.as_slice())
                .unwrap_or(&[]);
            if let Some(id) = pick(rng, inside) {
                return Ok(Destination::Page(id));
            }
        }
        return Ok(Destination::Page(chosen));
    }

    // Everything seen: leave through the cluster's end marker.
    let last = members.last().copied().unwrap_or(cluster);
    if last.next_page_id == 0 {
        return Ok(Destination::EndOfLesson);
    }
    let Some(end) = graph.following(cluster.id, PageType::EndOfCluster) else {
        return Ok(Destination::EndOfLesson);
    };
    cluster_exit(view, end, rng)
}

fn cluster_exit<R: Rng + ?Sized>(
    view: &LessonView<'_>,
    end: &Page,
    rng: &mut R,
) -> EngineResult<Destination> {
    let graph = view.graph;
    let mut from = end;
    let mut exit = view.marker_jump(end.id);
    if let Jump::Page(id) = exit {
        if !graph.contains(id) && view.options.cluster_exit_fallback_scan {
            // Dangling exit: borrow the first other EndOfCluster's jump.
            if let Some(other) = graph
                .pages()
                .iter()
                .find(|p| p.qtype == PageType::EndOfCluster && p.id != end.id)
            {
                log::warn!(
                    "cluster end {} jumps to missing page {}, using exit of {}",
                    end.id,
                    id,
                    other.id
                );
                from = other;
                exit = view.marker_jump(other.id);
            }
        }
    }
    match exit {
        Jump::NextPage => Ok(to_destination(from.next_page_id)),
        Jump::Page(id) if !graph.contains(id) => Ok(Destination::EndOfLesson),
        Jump::Page(id) => Ok(Destination::Page(id)),
        Jump::ThisPage => Ok(to_destination(from.next_page_id)),
        other => resolve_once(view, from.id, other, rng),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::{answer, chain, lesson};
    use crate::model::{JUMP_CLUSTER, JUMP_NEXT_PAGE, JUMP_RANDOM_BRANCH, JUMP_UNSEEN_BRANCH_PAGE};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn answers_map(list: Vec<Answer>) -> HashMap<i64, Vec<Answer>> {
        let mut m: HashMap<i64, Vec<Answer>> = HashMap::new();
        for a in list {
            m.entry(a.page_id).or_default().push(a);
        }
        m
    }

    fn run(
        lesson: &Lesson,
        graph: &PageGraph,
        answers: &HashMap<i64, Vec<Answer>>,
        history: &History,
        current: i64,
        jump: Jump,
        seed: u64,
    ) -> EngineResult<Destination> {
        let view = LessonView {
            lesson,
            graph,
            answers,
            history,
            options: ResolveOptions::default(),
        };
        let mut rng = StdRng::seed_from_u64(seed);
        resolve(&view, current, jump, &mut rng)
    }

    #[test]
    fn next_page_follows_links_to_tail_then_end() {
        let graph = PageGraph::from_pages(
            1,
            chain(&[
                (1, PageType::Description),
                (2, PageType::MultipleChoice),
                (3, PageType::Description),
            ]),
        )
        .expect("graph");
        let answers = answers_map(vec![answer(20, 2, JUMP_NEXT_PAGE, 1.0)]);
        let h = History::default();
        let l = lesson();
        let next = Jump::from_code(answers[&2][0].jumpto);
        assert_eq!(run(&l, &graph, &answers, &h, 2, next, 1).expect("next"), Destination::Page(3));
        assert_eq!(
            run(&l, &graph, &answers, &h, 3, Jump::NextPage, 1).expect("eol"),
            Destination::EndOfLesson
        );
        assert_eq!(
            run(&l, &graph, &answers, &h, 1, Jump::PreviousPage, 1).expect("stay"),
            Destination::Page(1)
        );
    }

    #[test]
    fn literal_jumps_must_exist_and_go_forward() {
        let graph = PageGraph::from_pages(
            1,
            chain(&[
                (1, PageType::Description),
                (2, PageType::MultipleChoice),
                (3, PageType::Description),
            ]),
        )
        .expect("graph");
        let answers = HashMap::new();
        let h = History::default();
        let l = lesson();
        assert_eq!(run(&l, &graph, &answers, &h, 1, Jump::Page(3), 1).expect("fwd"), Destination::Page(3));
        let back = run(&l, &graph, &answers, &h, 3, Jump::Page(1), 1).expect_err("backward");
        assert_eq!(back.code(), "invalid_jump");
        assert!(run(&l, &graph, &answers, &h, 1, Jump::Page(99), 1).is_err());
    }

    fn branch_lesson() -> (PageGraph, HashMap<i64, Vec<Answer>>) {
        // 1 table -> [2] eob 3 -> [4] eob 5 -> 6
        let graph = PageGraph::from_pages(
            1,
            chain(&[
                (1, PageType::BranchTable),
                (2, PageType::Description),
                (3, PageType::EndOfBranch),
                (4, PageType::Description),
                (5, PageType::EndOfBranch),
                (6, PageType::Description),
            ]),
        )
        .expect("graph");
        let answers = answers_map(vec![
            answer(10, 1, 2, 0.0),
            answer(11, 1, 4, 0.0),
            answer(12, 3, 1, 0.0),
            answer(13, 5, 1, 0.0),
        ]);
        (graph, answers)
    }

    #[test]
    fn unseen_branch_page_prefers_unseen_then_exits() {
        let (graph, answers) = branch_lesson();
        let l = lesson();
        let mut h = History::default();
        h.viewed.extend([1, 4]);
        // From branch 2's page, branch 1's page is the only unseen one.
        for seed in 0..5 {
            assert_eq!(
                run(&l, &graph, &answers, &h, 4, Jump::UnseenBranchPage, seed).expect("unseen"),
                Destination::Page(2)
            );
        }
        h.viewed.insert(2);
        assert_eq!(
            run(&l, &graph, &answers, &h, 4, Jump::UnseenBranchPage, 3).expect("exit"),
            Destination::Page(6)
        );
        assert_eq!(
            run(&l, &graph, &answers, &h, 4, Jump::from_code(JUMP_UNSEEN_BRANCH_PAGE), 3)
                .expect("exit by code"),
            Destination::Page(6)
        );
    }

    #[test]
    fn random_branch_skips_fully_seen_branches() {
        let (graph, answers) = branch_lesson();
        let l = lesson();
        let mut h = History::default();
        h.viewed.insert(2);
        for seed in 0..5 {
            assert_eq!(
                run(&l, &graph, &answers, &h, 1, Jump::from_code(JUMP_RANDOM_BRANCH), seed)
                    .expect("branch"),
                Destination::Page(4)
            );
        }
    }

    #[test]
    fn random_page_stays_inside_branches() {
        let (graph, answers) = branch_lesson();
        let l = lesson();
        let h = History::default();
        for seed in 0..10 {
            let d = run(&l, &graph, &answers, &h, 1, Jump::RandomPage, seed).expect("random");
            assert!(matches!(d, Destination::Page(2) | Destination::Page(4)), "{:?}", d);
        }
    }

    #[test]
    fn end_of_branch_destination_settles_back_to_table() {
        let (graph, answers) = branch_lesson();
        let l = lesson();
        let h = History::default();
        assert_eq!(
            run(&l, &graph, &answers, &h, 2, Jump::NextPage, 1).expect("settle"),
            Destination::Page(1)
        );
    }

    fn cluster_lesson() -> (PageGraph, HashMap<i64, Vec<Answer>>) {
        // 1 desc, 2 cluster, 3 q, 4 q, 5 eoc, 6 desc
        let graph = PageGraph::from_pages(
            1,
            chain(&[
                (1, PageType::Description),
                (2, PageType::Cluster),
                (3, PageType::MultipleChoice),
                (4, PageType::ShortAnswer),
                (5, PageType::EndOfCluster),
                (6, PageType::Description),
            ]),
        )
        .expect("graph");
        let answers = answers_map(vec![
            answer(30, 3, JUMP_CLUSTER, 1.0),
            answer(40, 4, JUMP_CLUSTER, 1.0),
            answer(50, 5, JUMP_NEXT_PAGE, 0.0),
        ]);
        (graph, answers)
    }

    #[test]
    fn cluster_jump_picks_unseen_questions_then_exits() {
        let (graph, answers) = cluster_lesson();
        let l = lesson();
        let mut h = History::default();
        h.attempted.insert(3);
        assert_eq!(
            run(&l, &graph, &answers, &h, 3, Jump::ClusterJump, 9).expect("pick"),
            Destination::Page(4)
        );
        h.attempted.insert(4);
        assert_eq!(
            run(&l, &graph, &answers, &h, 4, Jump::ClusterJump, 9).expect("exit"),
            Destination::Page(6)
        );
        // Walking onto the cluster page itself draws from the cluster.
        let fresh = History::default();
        let d = run(&l, &graph, &answers, &fresh, 1, Jump::NextPage, 2).expect("enter");
        assert!(matches!(d, Destination::Page(3) | Destination::Page(4)));
    }

    #[test]
    fn cluster_exit_with_dangling_target_scans_for_other_end() {
        // Two clusters; the first end marker points at a deleted page.
        let graph = PageGraph::from_pages(
            1,
            chain(&[
                (1, PageType::Cluster),
                (2, PageType::MultipleChoice),
                (3, PageType::EndOfCluster),
                (4, PageType::Description),
                (5, PageType::Cluster),
                (6, PageType::MultipleChoice),
                (7, PageType::EndOfCluster),
                (8, PageType::Description),
            ]),
        )
        .expect("graph");
        let answers = answers_map(vec![
            answer(30, 3, 999, 0.0),
            answer(70, 7, JUMP_NEXT_PAGE, 0.0),
        ]);
        let l = lesson();
        let mut h = History::default();
        h.attempted.insert(2);
        assert_eq!(
            run(&l, &graph, &answers, &h, 2, Jump::ClusterJump, 1).expect("fallback"),
            Destination::Page(8)
        );

        let view = LessonView {
            lesson: &l,
            graph: &graph,
            answers: &answers,
            history: &h,
            options: ResolveOptions {
                cluster_exit_fallback_scan: false,
                ..ResolveOptions::default()
            },
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            resolve(&view, 2, Jump::ClusterJump, &mut rng).expect("no scan"),
            Destination::EndOfLesson
        );
    }

    #[test]
    fn flashcard_mode_draws_unseen_and_honours_maxpages() {
        let graph = PageGraph::from_pages(
            1,
            chain(&[
                (1, PageType::Description),
                (2, PageType::MultipleChoice),
                (3, PageType::MultipleChoice),
                (4, PageType::TrueFalse),
            ]),
        )
        .expect("graph");
        let answers = HashMap::new();
        let mut l = lesson();
        l.nextpagedefault = JUMP_UNSEEN_PAGE;
        let mut h = History::default();
        h.attempted.extend([2, 4]);
        h.attempt_count = 2;
        assert_eq!(
            run(&l, &graph, &answers, &h, 1, Jump::NextPage, 4).expect("draw"),
            Destination::Page(3)
        );
        l.maxpages = 2;
        assert_eq!(
            run(&l, &graph, &answers, &h, 1, Jump::NextPage, 4).expect("cap"),
            Destination::EndOfLesson
        );

        l.maxpages = 0;
        l.nextpagedefault = JUMP_UNANSWERED_PAGE;
        h.attempted.insert(3);
        h.correct.extend([2, 3]);
        assert_eq!(
            run(&l, &graph, &answers, &h, 1, Jump::NextPage, 4).expect("unanswered"),
            Destination::Page(4)
        );
    }

    #[test]
    fn undefined_jump_policy() {
        let graph = PageGraph::from_pages(
            1,
            chain(&[(1, PageType::Description), (2, PageType::Description)]),
        )
        .expect("graph");
        let answers = HashMap::new();
        let l = lesson();
        let h = History::default();
        assert_eq!(
            run(&l, &graph, &answers, &h, 1, Jump::Undefined, 1).expect("lenient"),
            Destination::Page(2)
        );
        let view = LessonView {
            lesson: &l,
            graph: &graph,
            answers: &answers,
            history: &h,
            options: ResolveOptions {
                undefined_jump: UndefinedJumpPolicy::Reject,
                ..ResolveOptions::default()
            },
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert!(resolve(&view, 1, Jump::Undefined, &mut rng).is_err());
    }
}
