//! Per page type behaviour: how many answers a page may carry, whether a
//! teacher has to grade it, and how a raw response is checked.

use crate::error::{EngineError, EngineResult};
use crate::model::{Answer, Jump, ManualPayload, Page, PageType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// What a student sent for a page. Each page type reads the fields it needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResponse {
    #[serde(default)]
    pub answer_id: Option<i64>,
    #[serde(default)]
    pub answer_ids: Option<Vec<i64>>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub blanks: Option<Vec<String>>,
    /// Matching: answer id (as string) to the chosen right-hand value.
    #[serde(default)]
    pub matches: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub answer_id: Option<i64>,
    pub correct: bool,
    pub score: f64,
    pub jump: Jump,
    pub feedback: String,
    /// Serialized form stored in the attempt's `user_response`.
    pub user_response: String,
}

pub struct CheckInput<'a> {
    pub page: &'a Page,
    pub answers: &'a [Answer],
    pub custom: bool,
    pub response: &'a RawResponse,
}

pub trait PageBehavior: Sync {
    fn max_answers(&self) -> Option<usize>;

    fn requires_manual_grading(&self) -> bool {
        false
    }

    /// Best score a student can reach on the page.
    fn max_score(&self, answers: &[Answer]) -> f64 {
        answers.iter().map(|a| a.score).fold(0.0, f64::max)
    }

    fn check_answer(&self, input: &CheckInput<'_>) -> EngineResult<CheckOutcome>;
}

impl PageType {
    pub fn behavior(self) -> &'static dyn PageBehavior {
        match self {
            Self::MultipleChoice => &MultipleChoice,
            Self::TrueFalse => &TrueFalse,
            Self::ShortAnswer => &ShortAnswer,
            Self::Matching => &Matching,
            Self::Cloze => &Cloze,
            Self::Essay => &Manual { kind: "essay" },
            Self::Audio => &Manual { kind: "audio" },
            Self::Description => &Structural { max: Some(1) },
            Self::BranchTable => &Structural { max: None },
            Self::EndOfBranch | Self::Cluster | Self::EndOfCluster => {
                &Structural { max: Some(1) }
            }
        }
    }

    pub fn requires_manual_grading(self) -> bool {
        self.behavior().requires_manual_grading()
    }
}

fn outcome_from_answer(a: &Answer, custom: bool, user_response: String) -> CheckOutcome {
    CheckOutcome {
        answer_id: Some(a.id),
        correct: a.is_correct(custom),
        score: a.score,
        jump: a.jump(),
        feedback: a.response.clone(),
        user_response,
    }
}

fn find_answer<'a>(answers: &'a [Answer], id: i64) -> EngineResult<&'a Answer> {
    answers
        .iter()
        .find(|a| a.id == id)
        .ok_or_else(|| EngineError::missing("answer", id))
}

fn best_by_score<'a>(it: impl Iterator<Item = &'a Answer>) -> Option<&'a Answer> {
    it.fold(None, |best: Option<&Answer>, a| match best {
        Some(b) if b.score >= a.score => Some(b),
        _ => Some(a),
    })
}

/// Trim, collapse inner whitespace, optionally fold case.
pub fn normalize(text: &str, case_sensitive: bool) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if case_sensitive {
        collapsed
    } else {
        collapsed.to_lowercase()
    }
}

/// `*` matches any run of characters; everything else is literal.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let mut rest = text;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            let Some(r) = rest.strip_prefix(part) else {
                return false;
            };
            rest = r;
        } else if i == parts.len() - 1 {
            return rest.len() >= part.len() && rest.ends_with(part);
        } else if let Some(pos) = rest.find(part) {
            rest = &rest[pos + part.len()..];
        } else {
            return false;
        }
    }
    true
}

struct MultipleChoice;
struct TrueFalse;
struct ShortAnswer;
struct Matching;
struct Cloze;
struct Manual {
    kind: &'static str,
}
struct Structural {
    max: Option<usize>,
}

impl PageBehavior for MultipleChoice {
    fn max_answers(&self) -> Option<usize> {
        None
    }

    fn check_answer(&self, input: &CheckInput<'_>) -> EngineResult<CheckOutcome> {
        if !input.page.qoption {
            let id = input
                .response
                .answer_id
                .ok_or_else(|| EngineError::bad_input("multiple choice needs answerId"))?;
            let a = find_answer(input.answers, id)?;
            return Ok(outcome_from_answer(a, input.custom, id.to_string()));
        }

        let chosen: BTreeSet<i64> = input
            .response
            .answer_ids
            .as_ref()
            .ok_or_else(|| EngineError::bad_input("multi-select needs answerIds"))?
            .iter()
            .copied()
            .collect();
        if chosen.is_empty() {
            return Err(EngineError::bad_input("answerIds must not be empty"));
        }
        for id in &chosen {
            find_answer(input.answers, *id)?;
        }
        let correct_set: BTreeSet<i64> = input
            .answers
            .iter()
            .filter(|a| a.is_correct(input.custom))
            .map(|a| a.id)
            .collect();
        let all_right = chosen == correct_set;
        let user_response = chosen
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let pick = best_by_score(
            input
                .answers
                .iter()
                .filter(|a| chosen.contains(&a.id) && a.is_correct(input.custom) == all_right),
        )
        .or_else(|| {
            // Right answers only but not all of them: report the first wrong
            // answer on the page so navigation follows a wrong path.
            input.answers.iter().find(|a| !a.is_correct(input.custom))
        });
        Ok(match pick {
            Some(a) => CheckOutcome {
                correct: all_right,
                score: if all_right { a.score } else { a.score.min(0.0) },
                ..outcome_from_answer(a, input.custom, user_response)
            },
            None => CheckOutcome {
                answer_id: None,
                correct: false,
                score: 0.0,
                jump: Jump::ThisPage,
                feedback: String::new(),
                user_response,
            },
        })
    }
}

impl PageBehavior for TrueFalse {
    fn max_answers(&self) -> Option<usize> {
        Some(2)
    }

    fn check_answer(&self, input: &CheckInput<'_>) -> EngineResult<CheckOutcome> {
        let id = input
            .response
            .answer_id
            .ok_or_else(|| EngineError::bad_input("true/false needs answerId"))?;
        let a = find_answer(input.answers, id)?;
        Ok(outcome_from_answer(a, input.custom, id.to_string()))
    }
}

impl PageBehavior for ShortAnswer {
    fn max_answers(&self) -> Option<usize> {
        None
    }

    fn check_answer(&self, input: &CheckInput<'_>) -> EngineResult<CheckOutcome> {
        let raw = input
            .response
            .text
            .as_deref()
            .ok_or_else(|| EngineError::bad_input("short answer needs text"))?;
        let case_sensitive = input.page.qoption;
        let given = normalize(raw, case_sensitive);
        if given.is_empty() {
            return Err(EngineError::bad_input("short answer text is empty"));
        }
        let matched = best_by_score(
            input
                .answers
                .iter()
                .filter(|a| wildcard_match(&normalize(&a.answer, case_sensitive), &given)),
        );
        Ok(match matched {
            Some(a) => outcome_from_answer(a, input.custom, raw.to_string()),
            None => CheckOutcome {
                answer_id: None,
                correct: false,
                score: 0.0,
                jump: Jump::ThisPage,
                feedback: String::new(),
                user_response: raw.to_string(),
            },
        })
    }
}

/// Matching and Cloze keep their outcome answers first: [0] is used when
/// every part is right, [1] otherwise. Later answers are the parts.
fn split_outcomes(answers: &[Answer]) -> EngineResult<(&Answer, &Answer, &[Answer])> {
    match answers {
        [right, wrong, parts @ ..] => Ok((right, wrong, parts)),
        _ => Err(EngineError::bad_input(
            "page needs a correct and a wrong outcome answer",
        )),
    }
}

impl PageBehavior for Matching {
    fn max_answers(&self) -> Option<usize> {
        None
    }

    fn max_score(&self, answers: &[Answer]) -> f64 {
        answers.first().map(|a| a.score).unwrap_or(0.0)
    }

    fn check_answer(&self, input: &CheckInput<'_>) -> EngineResult<CheckOutcome> {
        let (right, wrong, parts) = split_outcomes(input.answers)?;
        let matches = input
            .response
            .matches
            .as_ref()
            .ok_or_else(|| EngineError::bad_input("matching needs matches"))?;
        let all_right = !parts.is_empty()
            && parts.iter().all(|p| {
                matches
                    .get(&p.id.to_string())
                    .map(|v| normalize(v, true) == normalize(&p.response, true))
                    .unwrap_or(false)
            });
        let user_response = serde_json::to_string(matches)?;
        let chosen = if all_right { right } else { wrong };
        Ok(CheckOutcome {
            correct: all_right,
            ..outcome_from_answer(chosen, input.custom, user_response)
        })
    }
}

impl PageBehavior for Cloze {
    fn max_answers(&self) -> Option<usize> {
        None
    }

    fn max_score(&self, answers: &[Answer]) -> f64 {
        answers.first().map(|a| a.score).unwrap_or(0.0)
    }

    fn check_answer(&self, input: &CheckInput<'_>) -> EngineResult<CheckOutcome> {
        let (right, wrong, parts) = split_outcomes(input.answers)?;
        let blanks = input
            .response
            .blanks
            .as_ref()
            .ok_or_else(|| EngineError::bad_input("cloze needs blanks"))?;
        let case_sensitive = input.page.qoption;
        let all_right = !parts.is_empty()
            && parts.iter().enumerate().all(|(i, part)| {
                let Some(given) = blanks.get(i) else {
                    return false;
                };
                let given = normalize(given, case_sensitive);
                part.answer
                    .split('|')
                    .any(|alt| normalize(alt, case_sensitive) == given)
            });
        let user_response = serde_json::to_string(blanks)?;
        let chosen = if all_right { right } else { wrong };
        let mut outcome = CheckOutcome {
            correct: all_right,
            ..outcome_from_answer(chosen, input.custom, user_response)
        };
        if !all_right && chosen.jump() == Jump::NextPage {
            outcome.jump = Jump::ThisPage;
        }
        Ok(outcome)
    }
}

impl PageBehavior for Manual {
    fn max_answers(&self) -> Option<usize> {
        Some(1)
    }

    fn requires_manual_grading(&self) -> bool {
        true
    }

    fn check_answer(&self, input: &CheckInput<'_>) -> EngineResult<CheckOutcome> {
        let text = input
            .response
            .text
            .as_deref()
            .map(str::trim)
            .unwrap_or("");
        if text.is_empty() {
            return Err(EngineError::bad_input(format!(
                "{} response must not be empty",
                self.kind
            )));
        }
        let payload = ManualPayload {
            answer: text.to_string(),
            score: None,
            teacher_response: String::new(),
        };
        let answer = input.answers.first();
        Ok(CheckOutcome {
            answer_id: answer.map(|a| a.id),
            correct: false,
            score: 0.0,
            jump: answer.map(|a| a.jump()).unwrap_or(Jump::NextPage),
            feedback: String::new(),
            user_response: serde_json::to_string(&payload)?,
        })
    }
}

impl PageBehavior for Structural {
    fn max_answers(&self) -> Option<usize> {
        self.max
    }

    fn max_score(&self, _answers: &[Answer]) -> f64 {
        0.0
    }

    fn check_answer(&self, input: &CheckInput<'_>) -> EngineResult<CheckOutcome> {
        Err(EngineError::bad_input(format!(
            "page {} does not take answers",
            input.page.id
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::fixtures::{answer, page};
    use crate::model::{JUMP_NEXT_PAGE, JUMP_THIS_PAGE};

    fn check(p: &Page, answers: &[Answer], custom: bool, r: RawResponse) -> CheckOutcome {
        p.qtype
            .behavior()
            .check_answer(&CheckInput {
                page: p,
                answers,
                custom,
                response: &r,
            })
            .expect("check")
    }

    #[test]
    fn wildcard_matching() {
        assert!(wildcard_match("colo*r", "colour"));
        assert!(wildcard_match("colo*r", "color"));
        assert!(wildcard_match("*", "anything"));
        assert!(!wildcard_match("a*b", "ac"));
        assert!(wildcard_match("exact", "exact"));
        assert!(!wildcard_match("ab*ab", "ab"));
    }

    #[test]
    fn multiple_choice_single_uses_chosen_answer() {
        let p = page(1, PageType::MultipleChoice);
        let answers = vec![answer(10, 1, JUMP_NEXT_PAGE, 5.0), answer(11, 1, JUMP_THIS_PAGE, 0.0)];
        let out = check(&p, &answers, true, RawResponse { answer_id: Some(10), ..Default::default() });
        assert!(out.correct);
        assert_eq!(out.score, 5.0);
        assert_eq!(out.jump, Jump::NextPage);
        let out = check(&p, &answers, true, RawResponse { answer_id: Some(11), ..Default::default() });
        assert!(!out.correct);
        assert_eq!(out.jump, Jump::ThisPage);
    }

    #[test]
    fn multi_select_needs_exact_correct_set() {
        let mut p = page(1, PageType::MultipleChoice);
        p.qoption = true;
        let answers = vec![
            answer(10, 1, JUMP_NEXT_PAGE, 2.0),
            answer(11, 1, JUMP_NEXT_PAGE, 3.0),
            answer(12, 1, JUMP_THIS_PAGE, 0.0),
        ];
        let out = check(
            &p,
            &answers,
            true,
            RawResponse { answer_ids: Some(vec![11, 10]), ..Default::default() },
        );
        assert!(out.correct);
        assert_eq!(out.answer_id, Some(11));
        assert_eq!(out.user_response, "10,11");

        let partial = check(
            &p,
            &answers,
            true,
            RawResponse { answer_ids: Some(vec![10]), ..Default::default() },
        );
        assert!(!partial.correct);
        assert_eq!(partial.answer_id, Some(12));
        assert_eq!(partial.score, 0.0);
    }

    #[test]
    fn short_answer_prefers_highest_scoring_match() {
        let p = page(1, PageType::ShortAnswer);
        let mut a1 = answer(10, 1, JUMP_NEXT_PAGE, 1.0);
        a1.answer = "paris*".into();
        let mut a2 = answer(11, 1, JUMP_NEXT_PAGE, 4.0);
        a2.answer = "Paris".into();
        let answers = vec![a1, a2];
        let out = check(&p, &answers, true, RawResponse { text: Some("  paris ".into()), ..Default::default() });
        assert_eq!(out.answer_id, Some(11));
        assert_eq!(out.score, 4.0);

        let miss = check(&p, &answers, true, RawResponse { text: Some("London".into()), ..Default::default() });
        assert_eq!(miss.answer_id, None);
        assert!(!miss.correct);
        assert_eq!(miss.jump, Jump::ThisPage);
    }

    #[test]
    fn matching_all_pairs_right() {
        let p = page(1, PageType::Matching);
        let right = answer(10, 1, JUMP_NEXT_PAGE, 6.0);
        let wrong = answer(11, 1, JUMP_THIS_PAGE, 0.0);
        let mut pair1 = answer(12, 1, 0, 0.0);
        pair1.answer = "dog".into();
        pair1.response = "perro".into();
        let mut pair2 = answer(13, 1, 0, 0.0);
        pair2.answer = "cat".into();
        pair2.response = "gato".into();
        let answers = vec![right, wrong, pair1, pair2];
        assert_eq!(Matching.max_score(&answers), 6.0);

        let mut m = HashMap::new();
        m.insert("12".to_string(), "perro".to_string());
        m.insert("13".to_string(), "gato".to_string());
        let out = check(&p, &answers, true, RawResponse { matches: Some(m.clone()), ..Default::default() });
        assert!(out.correct);
        assert_eq!(out.answer_id, Some(10));

        m.insert("13".to_string(), "perro".to_string());
        let out = check(&p, &answers, true, RawResponse { matches: Some(m), ..Default::default() });
        assert!(!out.correct);
        assert_eq!(out.answer_id, Some(11));
    }

    #[test]
    fn cloze_wrong_outcome_stays_on_page() {
        let p = page(1, PageType::Cloze);
        let right = answer(10, 1, JUMP_NEXT_PAGE, 3.0);
        let wrong = answer(11, 1, JUMP_NEXT_PAGE, 0.0);
        let mut blank = answer(12, 1, 0, 0.0);
        blank.answer = "colour|color".into();
        let answers = vec![right, wrong, blank];
        let out = check(&p, &answers, true, RawResponse { blanks: Some(vec!["Color".into()]), ..Default::default() });
        assert!(out.correct);
        assert_eq!(out.score, 3.0);
        let out = check(&p, &answers, true, RawResponse { blanks: Some(vec!["colr".into()]), ..Default::default() });
        assert!(!out.correct);
        assert_eq!(out.jump, Jump::ThisPage);
    }

    #[test]
    fn essay_is_pending_and_serialized() {
        let p = page(1, PageType::Essay);
        let answers = vec![answer(10, 1, JUMP_NEXT_PAGE, 8.0)];
        let out = check(&p, &answers, true, RawResponse { text: Some("my essay".into()), ..Default::default() });
        assert!(!out.correct);
        assert_eq!(out.answer_id, Some(10));
        let payload: ManualPayload = serde_json::from_str(&out.user_response).expect("payload");
        assert_eq!(payload.answer, "my essay");
        assert_eq!(payload.score, None);
        assert!(PageType::Essay.requires_manual_grading());
        assert!(!PageType::Cloze.requires_manual_grading());
    }

    #[test]
    fn structural_pages_refuse_answers() {
        let p = page(1, PageType::BranchTable);
        let r = RawResponse::default();
        let e = p
            .qtype
            .behavior()
            .check_answer(&CheckInput { page: &p, answers: &[], custom: true, response: &r })
            .expect_err("no answers");
        assert_eq!(e.code(), "bad_params");
    }
}
