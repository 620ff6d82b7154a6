//! REST routes of the assessment API

use marking_core::{AssessmentId, QueryId, QuestionId, ResultKey, StudentId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: String,
}

impl Endpoints {
    pub fn new(base_url: &str) -> Self {
        Self {
            base: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn result(&self, key: &ResultKey) -> String {
        format!(
            "{}/assessments/{}/students/{}/results/{}",
            self.base, key.assessment, key.student, key.question
        )
    }

    /// Upsert target for annotation and mark writes
    pub fn results(&self) -> String {
        format!("{}/results", self.base)
    }

    pub fn students(&self, assessment: AssessmentId) -> String {
        format!("{}/assessments/{}/students", self.base, assessment)
    }

    pub fn answer_sheet(&self, assessment: AssessmentId, student: StudentId) -> String {
        format!(
            "{}/assessments/{}/students/{}/answer-sheet",
            self.base, assessment, student
        )
    }

    pub fn questions(&self, assessment: AssessmentId) -> String {
        format!("{}/assessments/{}/questions", self.base, assessment)
    }

    pub fn question(&self, id: QuestionId) -> String {
        format!("{}/questions/{}", self.base, id)
    }

    pub fn queries(&self, assessment: AssessmentId) -> String {
        format!("{}/assessments/{}/queries", self.base, assessment)
    }

    pub fn student_queries(&self, student: StudentId) -> String {
        format!("{}/students/{}/queries", self.base, student)
    }

    pub fn query_response(&self, id: QueryId) -> String {
        format!("{}/queries/{}/response", self.base, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let endpoints = Endpoints::new("https://marking.example.edu/api/");
        assert_eq!(endpoints.base(), "https://marking.example.edu/api");
        assert_eq!(endpoints.results(), "https://marking.example.edu/api/results");
    }

    #[test]
    fn result_route_names_all_three_ids() {
        let endpoints = Endpoints::new("http://localhost:8080");
        let key = ResultKey::new(AssessmentId::new(), StudentId::new(), QuestionId::new());
        let url = endpoints.result(&key);
        assert!(url.starts_with("http://localhost:8080/assessments/"));
        assert!(url.contains(&key.assessment.to_string()));
        assert!(url.contains(&format!("/students/{}/", key.student)));
        assert!(url.ends_with(&format!("/results/{}", key.question)));
    }

    #[test]
    fn query_routes() {
        let endpoints = Endpoints::new("http://api");
        let id = QueryId::new();
        assert_eq!(endpoints.query_response(id), format!("http://api/queries/{id}/response"));
        let student = StudentId::new();
        assert_eq!(
            endpoints.student_queries(student),
            format!("http://api/students/{student}/queries")
        );
    }
}
