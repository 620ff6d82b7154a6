//! Collaborator contracts for the marking backend, plus an in-memory implementation
//!
//! The HTTP implementation lives in `marking-client`. [`MemoryMarkingService`]
//! backs tests and offline use; it honours the same write isolation: an
//! annotation save never touches the stored mark and a mark save never
//! touches stored annotations.

use crate::annotation::AnnotationSet;
use crate::error::{MarkingError, Result};
use crate::ids::{AssessmentId, FileId, QueryId, QuestionId, StudentId};
use crate::query::{has_open_query, MarkQuery, QueryDraft, QueryResponse};
use crate::question::{QuestionDraft, QuestionRegion};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// How the marker walks through submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarkingMode {
    /// One question across every student
    #[default]
    QuestionByQuestion,
    /// Every question of one student
    StudentByStudent,
}

/// Identity of one stored question result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultKey {
    pub assessment: AssessmentId,
    pub student: StudentId,
    pub question: QuestionId,
}

impl ResultKey {
    pub fn new(assessment: AssessmentId, student: StudentId, question: QuestionId) -> Self {
        Self {
            assessment,
            student,
            question,
        }
    }
}

/// Key of an annotation set held by a viewer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationKey {
    /// Question-by-question mode: one set per student per question
    Question { student: StudentId, question: QuestionId },
    /// Student-by-student mode: one set per student per page
    Page { student: StudentId, page: u32 },
}

impl AnnotationKey {
    pub fn student(&self) -> StudentId {
        match self {
            AnnotationKey::Question { student, .. } | AnnotationKey::Page { student, .. } => *student,
        }
    }
}

/// Stored mark and annotations for one student's answer to one question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub student_id: StudentId,
    pub assessment_id: AssessmentId,
    pub question_id: QuestionId,
    #[serde(default)]
    pub mark: Option<f64>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub annotation: Option<AnnotationSet>,
}

impl QuestionResult {
    pub fn empty(key: &ResultKey) -> Self {
        Self {
            student_id: key.student,
            assessment_id: key.assessment,
            question_id: key.question,
            mark: None,
            comment: None,
            annotation: None,
        }
    }

    pub fn key(&self) -> ResultKey {
        ResultKey::new(self.assessment_id, self.student_id, self.question_id)
    }

    pub fn is_marked(&self) -> bool {
        self.mark.is_some()
    }
}

/// Body of an annotation-only upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationUpdate {
    pub student_id: StudentId,
    pub assessment_id: AssessmentId,
    pub question_id: QuestionId,
    pub annotation: AnnotationSet,
    pub annotation_only: bool,
}

impl AnnotationUpdate {
    pub fn new(key: &ResultKey, annotation: AnnotationSet) -> Self {
        Self {
            student_id: key.student,
            assessment_id: key.assessment,
            question_id: key.question,
            annotation,
            annotation_only: true,
        }
    }
}

/// Body of a mark upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkUpdate {
    pub student_id: StudentId,
    pub assessment_id: AssessmentId,
    pub question_id: QuestionId,
    pub mark: f64,
}

impl MarkUpdate {
    pub fn new(key: &ResultKey, mark: f64) -> Self {
        Self {
            student_id: key.student,
            assessment_id: key.assessment,
            question_id: key.question,
            mark,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    #[serde(default)]
    pub student_number: String,
    /// Uploaded answer sheet, if any
    #[serde(default)]
    pub answer_sheet: Option<FileId>,
}

pub trait MarkingService: Send + Sync {
    fn fetch_result(&self, key: &ResultKey) -> Result<Option<QuestionResult>>;

    /// Upsert annotations only; the stored mark is left untouched.
    fn save_annotations(&self, key: &ResultKey, set: &AnnotationSet) -> Result<()>;

    /// Upsert the mark only; stored annotations are left untouched.
    fn save_mark(&self, key: &ResultKey, mark: f64) -> Result<()>;

    /// Students of an assessment in marking order
    fn list_students(&self, assessment: AssessmentId) -> Result<Vec<Student>>;
}

pub trait QuestionService: Send + Sync {
    fn list_questions(&self, assessment: AssessmentId) -> Result<Vec<QuestionRegion>>;
    fn create_question(&self, assessment: AssessmentId, draft: QuestionDraft) -> Result<QuestionRegion>;
    fn update_question(&self, id: QuestionId, draft: QuestionDraft) -> Result<QuestionRegion>;
    fn delete_question(&self, id: QuestionId) -> Result<()>;
}

pub trait BlobStore: Send + Sync {
    /// Raw PDF bytes of a student's answer sheet
    fn fetch_answer_sheet(&self, assessment: AssessmentId, student: StudentId) -> Result<Vec<u8>>;
}

pub trait QueryService: Send + Sync {
    fn list_queries(&self, assessment: AssessmentId) -> Result<Vec<MarkQuery>>;
    fn submit_query(&self, student: StudentId, draft: QueryDraft) -> Result<MarkQuery>;
    fn respond_to_query(&self, id: QueryId, response: QueryResponse) -> Result<MarkQuery>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process backend
#[derive(Default)]
pub struct MemoryMarkingService {
    results: Mutex<HashMap<ResultKey, QuestionResult>>,
    students: Mutex<HashMap<AssessmentId, Vec<Student>>>,
    questions: Mutex<Vec<QuestionRegion>>,
    sheets: Mutex<HashMap<(AssessmentId, StudentId), Vec<u8>>>,
    queries: Mutex<Vec<MarkQuery>>,
    fail_saves: AtomicBool,
    annotation_writes: AtomicUsize,
    mark_writes: AtomicUsize,
}

impl MemoryMarkingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_student(&self, assessment: AssessmentId, student: Student) {
        lock(&self.students).entry(assessment).or_default().push(student);
    }

    pub fn add_question(&self, region: QuestionRegion) {
        lock(&self.questions).push(region);
    }

    pub fn add_answer_sheet(&self, assessment: AssessmentId, student: StudentId, bytes: Vec<u8>) {
        lock(&self.sheets).insert((assessment, student), bytes);
    }

    /// Make every subsequent save fail with a network error.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn annotation_writes(&self) -> usize {
        self.annotation_writes.load(Ordering::SeqCst)
    }

    pub fn mark_writes(&self) -> usize {
        self.mark_writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(MarkingError::Network("backend unavailable".into()));
        }
        Ok(())
    }

    fn question(&self, id: QuestionId) -> Option<QuestionRegion> {
        lock(&self.questions).iter().find(|q| q.id == id).cloned()
    }
}

impl MarkingService for MemoryMarkingService {
    fn fetch_result(&self, key: &ResultKey) -> Result<Option<QuestionResult>> {
        Ok(lock(&self.results).get(key).cloned())
    }

    fn save_annotations(&self, key: &ResultKey, set: &AnnotationSet) -> Result<()> {
        self.check_writable()?;
        let mut results = lock(&self.results);
        let entry = results
            .entry(*key)
            .or_insert_with(|| QuestionResult::empty(key));
        entry.annotation = Some(set.clone());
        self.annotation_writes.fetch_add(1, Ordering::SeqCst);
        debug!(student = %key.student, question = %key.question, "stored annotations");
        Ok(())
    }

    fn save_mark(&self, key: &ResultKey, mark: f64) -> Result<()> {
        self.check_writable()?;
        if let Some(question) = self.question(key.question) {
            if !question.is_valid_mark(mark) {
                return Err(MarkingError::Validation(format!(
                    "{mark} is not an allowed mark for question {}",
                    question.question_number
                )));
            }
        }
        let mut results = lock(&self.results);
        let entry = results
            .entry(*key)
            .or_insert_with(|| QuestionResult::empty(key));
        entry.mark = Some(mark);
        self.mark_writes.fetch_add(1, Ordering::SeqCst);
        debug!(student = %key.student, question = %key.question, mark, "stored mark");
        Ok(())
    }

    fn list_students(&self, assessment: AssessmentId) -> Result<Vec<Student>> {
        Ok(lock(&self.students)
            .get(&assessment)
            .cloned()
            .unwrap_or_default())
    }
}

impl QuestionService for MemoryMarkingService {
    fn list_questions(&self, assessment: AssessmentId) -> Result<Vec<QuestionRegion>> {
        let mut questions: Vec<_> = lock(&self.questions)
            .iter()
            .filter(|q| q.assessment_id == assessment)
            .cloned()
            .collect();
        questions.sort_by_key(|q| q.page_number);
        Ok(questions)
    }

    fn create_question(&self, assessment: AssessmentId, draft: QuestionDraft) -> Result<QuestionRegion> {
        let region = draft.into_region(QuestionId::new(), assessment)?;
        lock(&self.questions).push(region.clone());
        Ok(region)
    }

    fn update_question(&self, id: QuestionId, draft: QuestionDraft) -> Result<QuestionRegion> {
        let mut questions = lock(&self.questions);
        let slot = questions
            .iter_mut()
            .find(|q| q.id == id)
            .ok_or_else(|| MarkingError::NotFound(format!("question {id}")))?;
        let updated = draft.into_region(id, slot.assessment_id)?;
        *slot = updated.clone();
        Ok(updated)
    }

    fn delete_question(&self, id: QuestionId) -> Result<()> {
        let mut questions = lock(&self.questions);
        let before = questions.len();
        questions.retain(|q| q.id != id);
        if questions.len() == before {
            return Err(MarkingError::NotFound(format!("question {id}")));
        }
        Ok(())
    }
}

impl BlobStore for MemoryMarkingService {
    fn fetch_answer_sheet(&self, assessment: AssessmentId, student: StudentId) -> Result<Vec<u8>> {
        lock(&self.sheets)
            .get(&(assessment, student))
            .cloned()
            .ok_or_else(|| MarkingError::NotFound(format!("answer sheet for student {student}")))
    }
}

impl QueryService for MemoryMarkingService {
    fn list_queries(&self, assessment: AssessmentId) -> Result<Vec<MarkQuery>> {
        Ok(lock(&self.queries)
            .iter()
            .filter(|q| q.assessment_id == assessment)
            .cloned()
            .collect())
    }

    fn submit_query(&self, student: StudentId, draft: QueryDraft) -> Result<MarkQuery> {
        let mut queries = lock(&self.queries);
        if has_open_query(&queries, student, draft.assessment_id, draft.question_id) {
            return Err(MarkingError::Validation(
                "an open query already exists for this question".into(),
            ));
        }
        let query = draft.into_query(QueryId::new(), student)?;
        queries.push(query.clone());
        Ok(query)
    }

    fn respond_to_query(&self, id: QueryId, response: QueryResponse) -> Result<MarkQuery> {
        let (query, change) = {
            let mut queries = lock(&self.queries);
            let query = queries
                .iter_mut()
                .find(|q| q.id == id)
                .ok_or_else(|| MarkingError::NotFound(format!("query {id}")))?;
            let change = query.apply_response(response)?;
            (query.clone(), change)
        };
        if let Some(change) = change {
            let key = ResultKey::new(change.assessment_id, change.student_id, change.question_id);
            self.save_mark(&key, change.mark)?;
        }
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{QueryStatus, QueryType};

    fn key() -> ResultKey {
        ResultKey::new(AssessmentId::new(), StudentId::new(), QuestionId::new())
    }

    #[test]
    fn test_writes_do_not_interfere() {
        let service = MemoryMarkingService::new();
        let key = key();
        service.save_mark(&key, 3.0).unwrap();
        service.save_annotations(&key, &AnnotationSet::new(1)).unwrap();

        let result = service.fetch_result(&key).unwrap().unwrap();
        assert_eq!(result.mark, Some(3.0));
        assert_eq!(result.annotation, Some(AnnotationSet::new(1)));

        service.save_mark(&key, 4.0).unwrap();
        let result = service.fetch_result(&key).unwrap().unwrap();
        assert_eq!(result.annotation, Some(AnnotationSet::new(1)));
    }

    #[test]
    fn test_failing_backend() {
        let service = MemoryMarkingService::new();
        service.set_fail_saves(true);
        let err = service.save_annotations(&key(), &AnnotationSet::new(1)).unwrap_err();
        assert!(err.is_transient());
        assert_eq!(service.annotation_writes(), 0);
    }

    #[test]
    fn test_mark_must_be_offered() {
        let service = MemoryMarkingService::new();
        let key = key();
        service.add_question(QuestionRegion {
            id: key.question,
            assessment_id: key.assessment,
            question_number: "1".into(),
            page_number: 1,
            x: 0.0,
            y: 0.0,
            width: 50.0,
            height: 50.0,
            max_marks: 2.0,
            increment: 0.5,
            memo: None,
            marking_note: None,
        });
        assert!(service.save_mark(&key, 1.5).is_ok());
        assert!(matches!(service.save_mark(&key, 1.2), Err(MarkingError::Validation(_))));
    }

    #[test]
    fn test_approved_query_updates_mark() {
        let service = MemoryMarkingService::new();
        let key = key();
        service.save_annotations(&key, &AnnotationSet::new(2)).unwrap();

        let query = service
            .submit_query(
                key.student,
                QueryDraft {
                    assessment_id: key.assessment,
                    question_id: Some(key.question),
                    current_mark: None,
                    requested_change: "Part (b) was not marked at all".into(),
                    query_type: QueryType::Regrade,
                },
            )
            .unwrap();

        let updated = service
            .respond_to_query(
                query.id,
                QueryResponse {
                    status: QueryStatus::Approved,
                    reviewer_response: "Missed on first pass, added.".into(),
                    new_mark: Some(2.0),
                },
            )
            .unwrap();
        assert_eq!(updated.status, QueryStatus::Approved);

        let result = service.fetch_result(&key).unwrap().unwrap();
        assert_eq!(result.mark, Some(2.0));
        assert_eq!(result.annotation, Some(AnnotationSet::new(2)));
    }

    #[test]
    fn test_duplicate_open_query_rejected() {
        let service = MemoryMarkingService::new();
        let assessment = AssessmentId::new();
        let student = StudentId::new();
        let draft = QueryDraft {
            assessment_id: assessment,
            question_id: None,
            current_mark: Some(40.0),
            requested_change: "Total looks lower than expected".into(),
            query_type: QueryType::Clarification,
        };
        service.submit_query(student, draft.clone()).unwrap();
        assert!(service.submit_query(student, draft).is_err());
    }

    #[test]
    fn test_question_crud() {
        let service = MemoryMarkingService::new();
        let assessment = AssessmentId::new();
        let draft = QuestionDraft {
            question_number: "3".into(),
            page_number: 2,
            rect: crate::coords::PercentageRect::new(5.0, 5.0, 90.0, 30.0),
            max_marks: 10.0,
            increment: 1.0,
            memo: Some("see memo".into()),
            marking_note: None,
        };
        let created = service.create_question(assessment, draft.clone()).unwrap();
        assert_eq!(service.list_questions(assessment).unwrap().len(), 1);

        let mut edit = draft;
        edit.max_marks = 12.0;
        let updated = service.update_question(created.id, edit).unwrap();
        assert_eq!(updated.max_marks, 12.0);

        service.delete_question(created.id).unwrap();
        assert!(matches!(
            service.delete_question(created.id),
            Err(MarkingError::NotFound(_))
        ));
    }
}
