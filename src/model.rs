use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    ShortAnswer,
    TrueFalse,
    MultipleChoice,
    Matching,
    Description,
    Essay,
    Audio,
    Cloze,
    BranchTable,
    EndOfBranch,
    Cluster,
    EndOfCluster,
}

impl PageType {
    pub fn code(self) -> i64 {
        match self {
            Self::ShortAnswer => 1,
            Self::TrueFalse => 2,
            Self::MultipleChoice => 3,
            Self::Matching => 5,
            Self::Description => 7,
            Self::Essay => 10,
            Self::Audio => 11,
            Self::Cloze => 12,
            Self::BranchTable => 20,
            Self::EndOfBranch => 21,
            Self::Cluster => 30,
            Self::EndOfCluster => 31,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::ShortAnswer),
            2 => Some(Self::TrueFalse),
            3 => Some(Self::MultipleChoice),
            5 => Some(Self::Matching),
            7 => Some(Self::Description),
            10 => Some(Self::Essay),
            11 => Some(Self::Audio),
            12 => Some(Self::Cloze),
            20 => Some(Self::BranchTable),
            21 => Some(Self::EndOfBranch),
            30 => Some(Self::Cluster),
            31 => Some(Self::EndOfCluster),
            _ => None,
        }
    }

    /// Pages a student answers (auto or manually graded).
    pub fn is_question(self) -> bool {
        matches!(
            self,
            Self::ShortAnswer
                | Self::TrueFalse
                | Self::MultipleChoice
                | Self::Matching
                | Self::Essay
                | Self::Audio
                | Self::Cloze
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    Practice,
    Assignment,
    Test,
}

impl ScoringMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Practice => "practice",
            Self::Assignment => "assignment",
            Self::Test => "test",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "practice" => Some(Self::Practice),
            "assignment" => Some(Self::Assignment),
            "test" => Some(Self::Test),
            _ => None,
        }
    }
}

pub const JUMP_THIS_PAGE: i64 = 0;
pub const JUMP_UNSEEN_PAGE: i64 = 1;
pub const JUMP_UNANSWERED_PAGE: i64 = 2;
pub const JUMP_NEXT_PAGE: i64 = -1;
pub const JUMP_END_OF_LESSON: i64 = -9;
pub const JUMP_PREVIOUS_PAGE: i64 = -40;
pub const JUMP_UNSEEN_BRANCH_PAGE: i64 = -50;
pub const JUMP_RANDOM_PAGE: i64 = -60;
pub const JUMP_RANDOM_BRANCH: i64 = -70;
pub const JUMP_CLUSTER: i64 = -80;
pub const JUMP_UNDEFINED: i64 = -99;

/// Decoded `jumpto` value of an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jump {
    ThisPage,
    NextPage,
    PreviousPage,
    EndOfLesson,
    UnseenBranchPage,
    RandomPage,
    RandomBranch,
    ClusterJump,
    Undefined,
    Page(i64),
}

impl Jump {
    /// Unknown negative codes decode as `Undefined`.
    pub fn from_code(code: i64) -> Self {
        match code {
            JUMP_THIS_PAGE => Self::ThisPage,
            JUMP_NEXT_PAGE => Self::NextPage,
            JUMP_PREVIOUS_PAGE => Self::PreviousPage,
            JUMP_END_OF_LESSON => Self::EndOfLesson,
            JUMP_UNSEEN_BRANCH_PAGE => Self::UnseenBranchPage,
            JUMP_RANDOM_PAGE => Self::RandomPage,
            JUMP_RANDOM_BRANCH => Self::RandomBranch,
            JUMP_CLUSTER => Self::ClusterJump,
            id if id > 0 => Self::Page(id),
            _ => Self::Undefined,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::ThisPage => JUMP_THIS_PAGE,
            Self::NextPage => JUMP_NEXT_PAGE,
            Self::PreviousPage => JUMP_PREVIOUS_PAGE,
            Self::EndOfLesson => JUMP_END_OF_LESSON,
            Self::UnseenBranchPage => JUMP_UNSEEN_BRANCH_PAGE,
            Self::RandomPage => JUMP_RANDOM_PAGE,
            Self::RandomBranch => JUMP_RANDOM_BRANCH,
            Self::ClusterJump => JUMP_CLUSTER,
            Self::Undefined => JUMP_UNDEFINED,
            Self::Page(id) => id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: i64,
    pub name: String,
    pub scoring_mode: ScoringMode,
    pub custom: bool,
    pub retake: bool,
    pub usemaxgrade: bool,
    pub maxattempts: i64,
    pub minquestions: i64,
    pub maxpages: i64,
    pub nextpagedefault: i64,
    pub autograde: bool,
    pub grade: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: i64,
    pub lesson_id: i64,
    pub prev_page_id: i64,
    pub next_page_id: i64,
    pub ordering: i64,
    pub qtype: PageType,
    pub qoption: bool,
    pub branch_id: i64,
    pub max_score: f64,
    pub title: String,
    pub contents: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub id: i64,
    pub lesson_id: i64,
    pub page_id: i64,
    pub jumpto: i64,
    pub grade: i64,
    pub score: f64,
    pub answer: String,
    pub response: String,
    pub ordering: i64,
}

impl Answer {
    /// Under custom scoring points decide correctness, otherwise the legacy
    /// 0-100 grade weight does.
    pub fn is_correct(&self, custom: bool) -> bool {
        if custom {
            self.score > 0.0
        } else {
            self.grade > 50
        }
    }

    pub fn jump(&self) -> Jump {
        Jump::from_code(self.jumpto)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: i64,
    pub lesson_id: i64,
    pub page_id: i64,
    pub user_id: i64,
    pub answer_id: Option<i64>,
    pub retry: i64,
    pub correct: bool,
    pub score: f64,
    pub user_response: String,
    pub time_seen: i64,
    pub is_current: bool,
    pub viewed: bool,
    pub graded: bool,
    pub resubmit: bool,
}

/// Stored in `user_response` for Essay/Audio attempts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualPayload {
    pub answer: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub teacher_response: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRow {
    pub id: i64,
    pub lesson_id: i64,
    pub user_id: i64,
    pub retry: i64,
    pub grade: f64,
    pub completed: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: i64,
    pub lesson_id: i64,
    pub parent_id: i64,
    pub ordering: i64,
    pub first_page_id: i64,
    pub end_page_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_type_codes_round_trip_through_storage() {
        for t in [
            PageType::ShortAnswer,
            PageType::TrueFalse,
            PageType::MultipleChoice,
            PageType::Matching,
            PageType::Description,
            PageType::Essay,
            PageType::Audio,
            PageType::Cloze,
            PageType::BranchTable,
            PageType::EndOfBranch,
            PageType::Cluster,
            PageType::EndOfCluster,
        ] {
            assert_eq!(PageType::from_code(t.code()), Some(t));
        }
        assert_eq!(PageType::from_code(4), None);
    }

    #[test]
    fn jump_codes_decode_literal_ids_and_sentinels() {
        assert_eq!(Jump::from_code(0), Jump::ThisPage);
        assert_eq!(Jump::from_code(-1), Jump::NextPage);
        assert_eq!(Jump::from_code(-80), Jump::ClusterJump);
        assert_eq!(Jump::from_code(17), Jump::Page(17));
        assert_eq!(Jump::from_code(-3), Jump::Undefined);
    }

    #[test]
    fn answer_correctness_depends_on_scoring_regime() {
        let a = Answer {
            id: 1,
            lesson_id: 1,
            page_id: 1,
            jumpto: -1,
            grade: 40,
            score: 2.0,
            answer: "x".into(),
            response: String::new(),
            ordering: 0,
        };
        assert!(a.is_correct(true));
        assert!(!a.is_correct(false));
    }
}
