//! Offline practice backend: a few students sharing one local answer sheet.

use marking_core::{
    AssessmentId, MemoryMarkingService, QueryDraft, QueryService, QueryType, QuestionId,
    QuestionRegion, Student, StudentId,
};
use std::sync::Arc;

const STUDENTS: [(&str, &str); 3] = [
    ("Ada Lovelace", "S1001"),
    ("Alan Turing", "S1002"),
    ("Grace Hopper", "S1003"),
];

fn region(assessment: AssessmentId, number: &str, y: f64, max_marks: f64, increment: f64) -> QuestionRegion {
    QuestionRegion {
        id: QuestionId::new(),
        assessment_id: assessment,
        question_number: number.to_string(),
        page_number: 1,
        x: 5.0,
        y,
        width: 90.0,
        height: 40.0,
        max_marks,
        increment,
        memo: None,
        marking_note: None,
    }
}

/// Seed an in-memory backend with every student holding `sheet`.
pub fn seed(sheet: Vec<u8>) -> (Arc<MemoryMarkingService>, AssessmentId) {
    let backend = Arc::new(MemoryMarkingService::new());
    let assessment = AssessmentId::new();

    let first = region(assessment, "1", 5.0, 5.0, 1.0);
    let second = region(assessment, "2", 50.0, 3.0, 0.5);
    let first_id = first.id;
    backend.add_question(first);
    backend.add_question(second);

    let mut first_student = None;
    for (name, number) in STUDENTS {
        let id = StudentId::new();
        first_student.get_or_insert(id);
        backend.add_student(
            assessment,
            Student {
                id,
                name: name.to_string(),
                student_number: number.to_string(),
                answer_sheet: None,
            },
        );
        backend.add_answer_sheet(assessment, id, sheet.clone());
    }

    if let Some(student) = first_student {
        let draft = QueryDraft {
            assessment_id: assessment,
            question_id: Some(first_id),
            current_mark: None,
            requested_change: "Please look at my working for part (b) again.".to_string(),
            query_type: QueryType::Regrade,
        };
        if let Err(err) = backend.submit_query(student, draft) {
            tracing::warn!(error = %err, "could not seed practice query");
        }
    }

    (backend, assessment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use marking_core::{BlobStore, MarkingService, QuestionService};

    #[test]
    fn seeded_backend_serves_every_student() {
        let (backend, assessment) = seed(b"%PDF-1.4".to_vec());
        let students = backend.list_students(assessment).unwrap();
        assert_eq!(students.len(), STUDENTS.len());
        for student in &students {
            let sheet = backend.fetch_answer_sheet(assessment, student.id).unwrap();
            assert_eq!(sheet, b"%PDF-1.4");
        }
        assert_eq!(backend.list_questions(assessment).unwrap().len(), 2);
        assert_eq!(backend.list_queries(assessment).unwrap().len(), 1);
    }
}
