//! Mark query (appeal) records and reviewer workflow

use crate::coords::{PageSize, PixelRect};
use crate::error::{MarkingError, Result};
use crate::ids::{AssessmentId, QueryId, QuestionId, StudentId};
use crate::question::QuestionRegion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Allowed length of query and response text, in characters
pub const TEXT_MIN_CHARS: usize = 10;
pub const TEXT_MAX_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Regrade,
    Clarification,
    TechnicalIssue,
}

impl QueryType {
    pub const ALL: [QueryType; 3] = [
        QueryType::Regrade,
        QueryType::Clarification,
        QueryType::TechnicalIssue,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    #[default]
    Pending,
    UnderReview,
    Approved,
    Rejected,
    Resolved,
}

impl QueryStatus {
    pub const ALL: [QueryStatus; 5] = [
        QueryStatus::Pending,
        QueryStatus::UnderReview,
        QueryStatus::Approved,
        QueryStatus::Rejected,
        QueryStatus::Resolved,
    ];

    /// Still waiting on the reviewer
    pub fn is_open(&self) -> bool {
        matches!(self, QueryStatus::Pending | QueryStatus::UnderReview)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkQuery {
    pub id: QueryId,
    pub student_id: StudentId,
    pub assessment_id: AssessmentId,
    /// `None` for a query about the whole assessment
    #[serde(default)]
    pub question_id: Option<QuestionId>,
    #[serde(default)]
    pub current_mark: Option<f64>,
    pub requested_change: String,
    pub query_type: QueryType,
    #[serde(default)]
    pub status: QueryStatus,
    #[serde(default)]
    pub reviewer_response: Option<String>,
    #[serde(default)]
    pub new_mark: Option<f64>,
}

fn check_text(field: &str, text: &str) -> Result<()> {
    let len = text.trim().chars().count();
    if !(TEXT_MIN_CHARS..=TEXT_MAX_CHARS).contains(&len) {
        return Err(MarkingError::Validation(format!(
            "{field} must be {TEXT_MIN_CHARS}-{TEXT_MAX_CHARS} characters, got {len}"
        )));
    }
    Ok(())
}

/// A student's new query before submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDraft {
    pub assessment_id: AssessmentId,
    pub question_id: Option<QuestionId>,
    pub current_mark: Option<f64>,
    pub requested_change: String,
    pub query_type: QueryType,
}

impl QueryDraft {
    pub fn validate(&self) -> Result<()> {
        check_text("requested change", &self.requested_change)
    }

    pub fn into_query(self, id: QueryId, student_id: StudentId) -> Result<MarkQuery> {
        self.validate()?;
        Ok(MarkQuery {
            id,
            student_id,
            assessment_id: self.assessment_id,
            question_id: self.question_id,
            current_mark: self.current_mark,
            requested_change: self.requested_change.trim().to_string(),
            query_type: self.query_type,
            status: QueryStatus::Pending,
            reviewer_response: None,
            new_mark: None,
        })
    }
}

/// Reviewer's answer to a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub status: QueryStatus,
    pub reviewer_response: String,
    #[serde(default)]
    pub new_mark: Option<f64>,
}

impl QueryResponse {
    pub fn validate(&self) -> Result<()> {
        check_text("reviewer response", &self.reviewer_response)?;
        if let Some(mark) = self.new_mark {
            if !mark.is_finite() || mark < 0.0 {
                return Err(MarkingError::Validation(format!("invalid new mark {mark}")));
            }
        }
        Ok(())
    }
}

/// Mark to store after an approved query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkChange {
    pub student_id: StudentId,
    pub assessment_id: AssessmentId,
    pub question_id: QuestionId,
    pub mark: f64,
}

impl MarkQuery {
    /// Whether this query blocks a new one for the same target.
    pub fn conflicts_with(&self, student: StudentId, assessment: AssessmentId, question: Option<QuestionId>) -> bool {
        self.status.is_open()
            && self.student_id == student
            && self.assessment_id == assessment
            && self.question_id == question
    }

    /// Record a reviewer response, returning the mark to write when approved with a new mark.
    pub fn apply_response(&mut self, response: QueryResponse) -> Result<Option<MarkChange>> {
        response.validate()?;
        self.status = response.status;
        self.reviewer_response = Some(response.reviewer_response.trim().to_string());
        self.new_mark = response.new_mark;

        if self.status != QueryStatus::Approved {
            return Ok(None);
        }
        Ok(match (self.question_id, self.new_mark) {
            (Some(question_id), Some(mark)) => Some(MarkChange {
                student_id: self.student_id,
                assessment_id: self.assessment_id,
                question_id,
                mark,
            }),
            _ => None,
        })
    }

    /// Region of the queried question on `page`, in pixels.
    pub fn highlight(&self, regions: &[QuestionRegion], page: u32, size: PageSize) -> Option<PixelRect> {
        let question = self.question_id?;
        if !size.is_ready() {
            return None;
        }
        regions
            .iter()
            .find(|r| r.id == question && r.page_number == page)
            .map(|r| r.pixel_rect(size))
    }
}

/// Whether any query in `queries` blocks a new submission.
pub fn has_open_query(
    queries: &[MarkQuery],
    student: StudentId,
    assessment: AssessmentId,
    question: Option<QuestionId>,
) -> bool {
    queries.iter().any(|q| q.conflicts_with(student, assessment, question))
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryStats {
    pub total_queries: usize,
    /// Pending or under review
    pub pending_queries: usize,
    /// Approved, rejected or resolved
    pub resolved_queries: usize,
    pub by_type: BTreeMap<QueryType, usize>,
    pub by_status: BTreeMap<QueryStatus, usize>,
}

impl QueryStats {
    pub fn from_queries<'a>(queries: impl IntoIterator<Item = &'a MarkQuery>) -> Self {
        let mut stats = Self {
            by_type: QueryType::ALL.iter().map(|t| (*t, 0)).collect(),
            by_status: QueryStatus::ALL.iter().map(|s| (*s, 0)).collect(),
            ..Default::default()
        };
        for query in queries {
            stats.total_queries += 1;
            if query.status.is_open() {
                stats.pending_queries += 1;
            } else {
                stats.resolved_queries += 1;
            }
            *stats.by_type.entry(query.query_type).or_default() += 1;
            *stats.by_status.entry(query.status).or_default() += 1;
        }
        stats
    }
}
