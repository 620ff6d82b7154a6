//! Blocking HTTP collaborators for the marking surface

use crate::endpoints::Endpoints;
use crate::error::{ClientError, Result};
use marking_core::coords::round_percentage;
use marking_core::service::{AnnotationUpdate, MarkUpdate};
use marking_core::{
    AnnotationSet, AssessmentId, BlobStore, MarkQuery, MarkingService, QueryDraft, QueryId,
    QueryResponse, QueryService, QuestionDraft, QuestionId, QuestionRegion, QuestionResult,
    QuestionService, ResultKey, Student, StudentId, SurfaceConfig,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Answer sheets larger than this are rejected rather than buffered
const MAX_ANSWER_SHEET_BYTES: u64 = 64 * 1024 * 1024;

/// Question metadata as the API accepts it
#[derive(Debug, Serialize)]
struct QuestionBody<'a> {
    question_number: &'a str,
    page_number: u32,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    max_marks: f64,
    increment: f64,
    memo: Option<&'a str>,
    marking_note: Option<&'a str>,
}

impl<'a> QuestionBody<'a> {
    fn from_draft(draft: &'a QuestionDraft, precision: u32) -> Self {
        let rect = round_percentage(&draft.rect, precision);
        Self {
            question_number: draft.question_number.trim(),
            page_number: draft.page_number,
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            max_marks: draft.max_marks,
            increment: draft.increment,
            memo: draft.memo.as_deref(),
            marking_note: draft.marking_note.as_deref(),
        }
    }
}

/// One agent shared by every collaborator trait.
pub struct HttpMarkingService {
    agent: ureq::Agent,
    endpoints: Endpoints,
    precision: u32,
}

impl HttpMarkingService {
    pub fn new(base_url: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent("marking-desk")
            .build();
        Self {
            agent,
            endpoints: Endpoints::new(base_url),
            precision: marking_core::coords::DEFAULT_PRECISION,
        }
    }

    pub fn from_config(config: &SurfaceConfig) -> Result<Self> {
        let base = config
            .api_base_url
            .as_deref()
            .ok_or(ClientError::MissingBaseUrl)?;
        let mut service = Self::new(base);
        service.precision = config.precision;
        Ok(service)
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self
            .agent
            .get(url)
            .set("Accept", "application/json")
            .call()
            .map_err(ClientError::from_ureq)?;
        resp.into_json::<T>()
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    fn send_json<B: Serialize, T: DeserializeOwned>(&self, method: &str, url: &str, body: &B) -> Result<T> {
        let resp = self
            .agent
            .request(method, url)
            .set("Accept", "application/json")
            .send_json(body)
            .map_err(ClientError::from_ureq)?;
        resp.into_json::<T>()
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }

    /// Send a body and discard whatever the server echoes back.
    fn send_only<B: Serialize>(&self, method: &str, url: &str, body: &B) -> Result<()> {
        self.agent
            .request(method, url)
            .send_json(body)
            .map_err(ClientError::from_ureq)?;
        Ok(())
    }
}

impl MarkingService for HttpMarkingService {
    fn fetch_result(&self, key: &ResultKey) -> marking_core::Result<Option<QuestionResult>> {
        match self.get_json::<Option<QuestionResult>>(&self.endpoints.result(key)) {
            Ok(result) => Ok(result),
            Err(ClientError::Http { status: 404, .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save_annotations(&self, key: &ResultKey, set: &AnnotationSet) -> marking_core::Result<()> {
        let body = AnnotationUpdate::new(key, set.clone());
        self.send_only("PUT", &self.endpoints.results(), &body)?;
        debug!(student = %key.student, question = %key.question, "annotations uploaded");
        Ok(())
    }

    fn save_mark(&self, key: &ResultKey, mark: f64) -> marking_core::Result<()> {
        let body = MarkUpdate::new(key, mark);
        self.send_only("PUT", &self.endpoints.results(), &body)?;
        info!(student = %key.student, question = %key.question, mark, "mark uploaded");
        Ok(())
    }

    fn list_students(&self, assessment: AssessmentId) -> marking_core::Result<Vec<Student>> {
        Ok(self.get_json(&self.endpoints.students(assessment))?)
    }
}

impl QuestionService for HttpMarkingService {
    fn list_questions(&self, assessment: AssessmentId) -> marking_core::Result<Vec<QuestionRegion>> {
        Ok(self.get_json(&self.endpoints.questions(assessment))?)
    }

    fn create_question(
        &self,
        assessment: AssessmentId,
        draft: QuestionDraft,
    ) -> marking_core::Result<QuestionRegion> {
        draft.validate()?;
        let body = QuestionBody::from_draft(&draft, self.precision);
        Ok(self.send_json("POST", &self.endpoints.questions(assessment), &body)?)
    }

    fn update_question(&self, id: QuestionId, draft: QuestionDraft) -> marking_core::Result<QuestionRegion> {
        draft.validate()?;
        let body = QuestionBody::from_draft(&draft, self.precision);
        Ok(self.send_json("PUT", &self.endpoints.question(id), &body)?)
    }

    fn delete_question(&self, id: QuestionId) -> marking_core::Result<()> {
        self.agent
            .delete(&self.endpoints.question(id))
            .call()
            .map_err(ClientError::from_ureq)?;
        Ok(())
    }
}

impl BlobStore for HttpMarkingService {
    fn fetch_answer_sheet(&self, assessment: AssessmentId, student: StudentId) -> marking_core::Result<Vec<u8>> {
        let resp = self
            .agent
            .get(&self.endpoints.answer_sheet(assessment, student))
            .call()
            .map_err(ClientError::from_ureq)?;

        let mut bytes = Vec::new();
        resp.into_reader()
            .take(MAX_ANSWER_SHEET_BYTES + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| ClientError::Network(e.to_string()))?;
        if bytes.len() as u64 > MAX_ANSWER_SHEET_BYTES {
            return Err(ClientError::InvalidResponse("answer sheet exceeds size limit".into()).into());
        }
        debug!(student = %student, bytes = bytes.len(), "answer sheet downloaded");
        Ok(bytes)
    }
}

impl QueryService for HttpMarkingService {
    fn list_queries(&self, assessment: AssessmentId) -> marking_core::Result<Vec<MarkQuery>> {
        Ok(self.get_json(&self.endpoints.queries(assessment))?)
    }

    fn submit_query(&self, student: StudentId, draft: QueryDraft) -> marking_core::Result<MarkQuery> {
        draft.validate()?;
        Ok(self.send_json("POST", &self.endpoints.student_queries(student), &draft)?)
    }

    fn respond_to_query(&self, id: QueryId, response: QueryResponse) -> marking_core::Result<MarkQuery> {
        response.validate()?;
        Ok(self.send_json("PUT", &self.endpoints.query_response(id), &response)?)
    }
}
