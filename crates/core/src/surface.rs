//! Marking surface orchestration
//!
//! [`MarkingSurface`] owns everything a marker sees for one assessment: the
//! student roster and question regions, the current student's answer sheet,
//! one [`AnnotationLayer`] per mounted page, the annotation sets keyed by
//! [`AnnotationKey`], debounced auto-save, resize debouncing and navigation.
//!
//! Network work is split so the UI never blocks on it. Navigation returns a
//! [`ViewRequest`] that a worker thread runs with [`ViewRequest::fetch`]; the
//! result comes back through [`MarkingSurface::complete_view_load`], which
//! drops responses for views that are no longer current. Annotation saves
//! work the same way: [`MarkingSurface::take_save_batches`] hands out
//! [`SaveBatch`]es and [`MarkingSurface::complete_saves`] takes their
//! results. A key has at most one batch in flight at a time.

use crate::annotation::AnnotationSet;
use crate::autosave::{AutoSaver, SaveReport};
use crate::blob::{BlobHandle, BlobRegistry};
use crate::cancel::{LoadGeneration, LoadTicket};
use crate::config::SurfaceConfig;
use crate::coords::{PageSize, PixelRect};
use crate::error::{MarkingError, Result};
use crate::ids::{AssessmentId, QueryId, QuestionId, StudentId};
use crate::layer::{AnnotationLayer, Command, DrawingMode, HistoryState, LayerEvent};
use crate::page_registry::PageRenderRegistry;
use crate::query::{MarkQuery, QueryResponse, QueryStatus};
use crate::question::{QuestionDraft, QuestionRegion};
use crate::service::{
    AnnotationKey, BlobStore, MarkingMode, MarkingService, MemoryMarkingService, QueryService,
    QuestionService, ResultKey, Student,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Backend collaborators used by the surface
#[derive(Clone)]
pub struct Services {
    pub marking: Arc<dyn MarkingService>,
    pub questions: Arc<dyn QuestionService>,
    pub blobs: Arc<dyn BlobStore>,
    pub queries: Arc<dyn QueryService>,
}

impl Services {
    /// Route every collaborator to one in-memory backend.
    pub fn memory(backend: Arc<MemoryMarkingService>) -> Self {
        Self {
            marking: backend.clone(),
            questions: backend.clone(),
            blobs: backend.clone(),
            queries: backend,
        }
    }
}

/// Container-width debounce: a burst of resizes triggers one re-render.
#[derive(Debug, Clone)]
pub struct ResizeDebouncer {
    delay: Duration,
    width: Option<f64>,
    pending: Option<(f64, Instant)>,
}

impl ResizeDebouncer {
    /// Debouncer that applies a width once it has been stable for `delay`.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            width: None,
            pending: None,
        }
    }

    /// Applied render width
    pub fn width(&self) -> Option<f64> {
        self.width
    }

    /// Whether a width change is still settling
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Record an observed container width. The first observation applies at once.
    ///
    /// Only a change of width restarts the quiet window, so observing the
    /// same width every frame lets a resize settle.
    pub fn observe(&mut self, width: f64, now: Instant) {
        if width <= 0.0 {
            return;
        }
        if self.width.is_none() {
            self.width = Some(width);
            return;
        }
        match self.pending {
            Some((pending, _)) if pending == width => {}
            None if self.width == Some(width) => {}
            _ => self.pending = Some((width, now)),
        }
    }

    /// Width to re-render at, once the resize has settled.
    pub fn poll(&mut self, now: Instant) -> Option<f64> {
        let (width, at) = self.pending?;
        if now.saturating_duration_since(at) < self.delay {
            return None;
        }
        self.pending = None;
        if self.width == Some(width) {
            return None;
        }
        self.width = Some(width);
        Some(width)
    }
}

/// One question's mark buttons positioned over the rendered page
#[derive(Debug, Clone, PartialEq)]
pub struct MarkOverlay {
    pub question_id: QuestionId,
    pub question_number: String,
    pub rect: PixelRect,
    pub options: Vec<f64>,
    pub selected: Option<f64>,
}

/// What a background load must fetch
#[derive(Clone)]
pub struct ViewRequest {
    pub ticket: LoadTicket,
    pub assessment: AssessmentId,
    pub student: StudentId,
    pub mode: MarkingMode,
    /// Questions whose results are loaded; only the current one in question-by-question mode
    pub questions: Vec<QuestionRegion>,
    services: Services,
}

/// Fetched data for one student view
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedView {
    pub student: StudentId,
    pub sheet: Vec<u8>,
    pub annotations: Vec<(AnnotationKey, AnnotationSet)>,
    pub marks: Vec<(QuestionId, Option<f64>)>,
}

impl ViewRequest {
    /// Run the blocking fetches for this view.
    pub fn fetch(&self) -> Result<LoadedView> {
        let sheet = self
            .services
            .blobs
            .fetch_answer_sheet(self.assessment, self.student)?;

        let mut annotations: Vec<(AnnotationKey, AnnotationSet)> = Vec::new();
        let mut page_sets: HashMap<u32, Option<AnnotationSet>> = HashMap::new();
        let mut marks = Vec::new();

        for question in &self.questions {
            if self.ticket.is_cancelled() {
                debug!(student = %self.student, "view load cancelled");
                break;
            }
            let key = ResultKey::new(self.assessment, self.student, question.id);
            let result = self.services.marking.fetch_result(&key)?;
            let (mark, annotation) = match result {
                Some(r) => (r.mark, r.annotation),
                None => (None, None),
            };
            marks.push((question.id, mark));

            match self.mode {
                MarkingMode::QuestionByQuestion => {
                    let mut set =
                        annotation.unwrap_or_else(|| AnnotationSet::new(question.page_number));
                    set.page = question.page_number;
                    annotations.push((
                        AnnotationKey::Question {
                            student: self.student,
                            question: question.id,
                        },
                        set,
                    ));
                }
                MarkingMode::StudentByStudent => {
                    // First stored set among the page's questions wins
                    let slot = page_sets.entry(question.page_number).or_insert(None);
                    if slot.is_none() {
                        *slot = annotation;
                    }
                }
            }
        }

        let mut pages: Vec<_> = page_sets.into_iter().collect();
        pages.sort_by_key(|(page, _)| *page);
        for (page, set) in pages {
            let mut set = set.unwrap_or_else(|| AnnotationSet::new(page));
            set.page = page;
            annotations.push((
                AnnotationKey::Page {
                    student: self.student,
                    page,
                },
                set,
            ));
        }

        Ok(LoadedView {
            student: self.student,
            sheet,
            annotations,
            marks,
        })
    }
}

/// Per-key outcome of a [`SaveBatch`]
pub type SaveResults = Vec<(AnnotationKey, AnnotationSet, Result<()>)>;

/// Annotation writes to run off the UI thread
pub struct SaveBatch {
    entries: Vec<(AnnotationKey, AnnotationSet)>,
    marking: Arc<dyn MarkingService>,
    assessment: AssessmentId,
    questions: Vec<QuestionRegion>,
    precision: u32,
}

impl SaveBatch {
    /// Number of annotation sets in the batch
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys this batch will write, in order.
    pub fn keys(&self) -> impl Iterator<Item = &AnnotationKey> {
        self.entries.iter().map(|(key, _)| key)
    }

    /// Run the blocking writes. Every entry reports its own result.
    pub fn run(self) -> SaveResults {
        let SaveBatch {
            entries,
            marking,
            assessment,
            questions,
            precision,
        } = self;
        entries
            .into_iter()
            .map(|(key, set)| {
                let result =
                    persist_annotations(marking.as_ref(), assessment, &questions, precision, &key, &set);
                (key, set, result)
            })
            .collect()
    }
}

/// Result of one UI-loop tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Pages must be re-rendered at the new width
    pub rerender: bool,
    /// Auto-saves that became due and were queued for a worker
    pub queued_saves: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

/// Store one annotation set under its key.
///
/// A per-page set is written to every question mapped on that page; those
/// writes run concurrently.
fn persist_annotations(
    marking: &dyn MarkingService,
    assessment: AssessmentId,
    questions: &[QuestionRegion],
    precision: u32,
    key: &AnnotationKey,
    set: &AnnotationSet,
) -> Result<()> {
    let set = set.rounded(precision);
    match *key {
        AnnotationKey::Question { student, question } => {
            marking.save_annotations(&ResultKey::new(assessment, student, question), &set)
        }
        AnnotationKey::Page { student, page } => {
            let targets: Vec<ResultKey> = questions
                .iter()
                .filter(|q| q.page_number == page)
                .map(|q| ResultKey::new(assessment, student, q.id))
                .collect();
            if targets.is_empty() {
                // Kept pending until a question is mapped on the page
                return Err(MarkingError::NotFound(format!(
                    "no question mapped on page {page}"
                )));
            }
            let results: Vec<Result<()>> = std::thread::scope(|scope| {
                let handles: Vec<_> = targets
                    .iter()
                    .map(|target| {
                        let set = &set;
                        scope.spawn(move || marking.save_annotations(target, set))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| {
                        h.join().unwrap_or_else(|_| {
                            Err(MarkingError::Network("annotation save worker panicked".into()))
                        })
                    })
                    .collect()
            });
            results.into_iter().collect()
        }
    }
}

/// State behind the marking screen
///
/// Holds the roster, the question regions and the marks of the current
/// student, mounts one [`AnnotationLayer`] per annotatable page and turns
/// layer changes into debounced [`SaveBatch`]es. Navigation goes through
/// [`ViewRequest`]s so the answer sheet can load off the UI thread.
pub struct MarkingSurface {
    config: SurfaceConfig,
    services: Services,
    assessment: AssessmentId,
    mode: MarkingMode,
    students: Vec<Student>,
    questions: Vec<QuestionRegion>,
    student_index: usize,
    question_index: usize,
    registry: PageRenderRegistry,
    layers: HashMap<u32, AnnotationLayer>,
    annotations: HashMap<AnnotationKey, AnnotationSet>,
    marks: HashMap<QuestionId, f64>,
    autosaver: AutoSaver<AnnotationKey, AnnotationSet>,
    /// Keys whose save is running on a worker
    in_flight: HashSet<AnnotationKey>,
    outgoing: Vec<SaveBatch>,
    loads: LoadGeneration,
    blobs: BlobRegistry,
    sheet: Option<BlobHandle>,
    drawing_mode: DrawingMode,
    resize: ResizeDebouncer,
    render_version: u64,
    loading: bool,
}

impl MarkingSurface {
    /// Empty surface for `assessment`. Call [`begin_view_load`](Self::begin_view_load) to populate it.
    pub fn new(config: SurfaceConfig, services: Services, assessment: AssessmentId) -> Self {
        Self {
            autosaver: AutoSaver::new(config.autosave_debounce),
            resize: ResizeDebouncer::new(config.resize_debounce),
            config,
            services,
            assessment,
            mode: MarkingMode::default(),
            students: Vec::new(),
            questions: Vec::new(),
            student_index: 0,
            question_index: 0,
            registry: PageRenderRegistry::new(),
            layers: HashMap::new(),
            annotations: HashMap::new(),
            marks: HashMap::new(),
            in_flight: HashSet::new(),
            outgoing: Vec::new(),
            loads: LoadGeneration::new(),
            blobs: BlobRegistry::new(),
            sheet: None,
            drawing_mode: DrawingMode::None,
            render_version: 0,
            loading: false,
        }
    }

    /// Fetch students and question regions.
    pub fn load_roster(&mut self) -> Result<()> {
        self.students = self.services.marking.list_students(self.assessment)?;
        let mut questions = self.services.questions.list_questions(self.assessment)?;
        questions.sort_by(|a, b| {
            a.page_number
                .cmp(&b.page_number)
                .then_with(|| a.question_number.cmp(&b.question_number))
        });
        self.questions = questions;
        self.student_index = 0;
        self.question_index = 0;
        info!(
            assessment = %self.assessment,
            students = self.students.len(),
            questions = self.questions.len(),
            "loaded roster"
        );
        Ok(())
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn assessment(&self) -> AssessmentId {
        self.assessment
    }

    pub fn mode(&self) -> MarkingMode {
        self.mode
    }

    pub fn students(&self) -> &[Student] {
        &self.students
    }

    pub fn questions(&self) -> &[QuestionRegion] {
        &self.questions
    }

    pub fn student_index(&self) -> usize {
        self.student_index
    }

    /// Student whose sheet is on screen, `None` for an empty roster.
    pub fn current_student(&self) -> Option<&Student> {
        self.students.get(self.student_index)
    }

    /// Question in focus. Only meaningful in question-by-question mode.
    pub fn current_question(&self) -> Option<&QuestionRegion> {
        self.questions.get(self.question_index)
    }

    /// A [`ViewRequest`] has been issued and its result not yet applied.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn registry(&self) -> &PageRenderRegistry {
        &self.registry
    }

    /// Bumped whenever pages must be rasterised again.
    pub fn render_version(&self) -> u64 {
        self.render_version
    }

    /// Settled container width, if any has been applied.
    pub fn render_width(&self) -> Option<f64> {
        self.resize.width()
    }

    pub fn drawing_mode(&self) -> DrawingMode {
        self.drawing_mode
    }

    /// Unsaved or still-saving annotation edits exist.
    pub fn has_pending_saves(&self) -> bool {
        self.autosaver.has_pending() || !self.in_flight.is_empty()
    }

    /// A container resize is waiting to settle.
    pub fn resize_pending(&self) -> bool {
        self.resize.is_pending()
    }

    /// Answer sheet bytes of the current student.
    pub fn sheet_bytes(&self) -> Option<Arc<[u8]>> {
        self.sheet.and_then(|handle| self.blobs.get(handle))
    }

    /// Stored mark of the current student for `question`.
    pub fn mark_for(&self, question: QuestionId) -> Option<f64> {
        self.marks.get(&question).copied()
    }

    /// Key of the annotation set shown on `page`, if the page is annotatable.
    pub fn annotation_key(&self, page: u32) -> Option<AnnotationKey> {
        let student = self.current_student()?.id;
        match self.mode {
            MarkingMode::QuestionByQuestion => {
                let question = self.current_question()?;
                (question.page_number == page).then_some(AnnotationKey::Question {
                    student,
                    question: question.id,
                })
            }
            MarkingMode::StudentByStudent => self
                .questions
                .iter()
                .any(|q| q.page_number == page)
                .then_some(AnnotationKey::Page { student, page }),
        }
    }

    /// Pages to display for the current view.
    pub fn visible_pages(&self) -> Vec<u32> {
        match self.mode {
            MarkingMode::QuestionByQuestion => {
                self.current_question().map(|q| vec![q.page_number]).unwrap_or_default()
            }
            MarkingMode::StudentByStudent => {
                (1..=self.registry.page_count().unwrap_or(0)).collect()
            }
        }
    }

    /// Last known annotations for `key`, including unsaved edits.
    pub fn annotations_for(&self, key: &AnnotationKey) -> Option<&AnnotationSet> {
        self.annotations.get(key)
    }

    /// Switch tools on every mounted layer.
    pub fn set_drawing_mode(&mut self, mode: DrawingMode) {
        self.drawing_mode = mode;
        for layer in self.layers.values_mut() {
            layer.set_mode(mode);
        }
    }

    pub fn layer(&self, page: u32) -> Option<&AnnotationLayer> {
        self.layers.get(&page)
    }

    /// Mounted layer for `page`, mounting it from the stored set on first use.
    pub fn layer_mut(&mut self, page: u32) -> Option<&mut AnnotationLayer> {
        if !self.layers.contains_key(&page) {
            let key = self.annotation_key(page)?;
            let initial = self
                .annotations
                .get(&key)
                .cloned()
                .unwrap_or_else(|| AnnotationSet::new(page));
            let mut layer = AnnotationLayer::new(page, initial, self.config.layer_settings());
            layer.set_mode(self.drawing_mode);
            if let Some(size) = self.registry.page_size(page) {
                layer.set_dimensions(size);
            }
            debug!(page, "mounted annotation layer");
            self.layers.insert(page, layer);
        }
        self.layers.get_mut(&page)
    }

    /// Undo/redo availability for `page`; both off when no layer is mounted.
    pub fn history_state(&self, page: u32) -> HistoryState {
        self.layers
            .get(&page)
            .map(AnnotationLayer::history_state)
            .unwrap_or_default()
    }

    /// Apply an undo/redo command to `page` and record the result.
    pub fn apply_command(&mut self, page: u32, command: Command, now: Instant) -> bool {
        let applied = self
            .layer_mut(page)
            .is_some_and(|layer| layer.apply_command(command));
        self.sync_layer(page, now);
        applied
    }

    /// Drain a layer's events after an interaction, scheduling saves for changes.
    pub fn sync_layer(&mut self, page: u32, now: Instant) -> Vec<LayerEvent> {
        let Some(key) = self.annotation_key(page) else {
            return Vec::new();
        };
        let Some(layer) = self.layers.get_mut(&page) else {
            return Vec::new();
        };
        let events = layer.drain_events();
        for event in &events {
            if let LayerEvent::Changed(set) = event {
                self.annotations.insert(key, set.clone());
                self.autosaver.mark_dirty(key, set.clone(), now);
            }
        }
        events
    }

    /// The renderer finished painting `page` at `size`.
    pub fn on_page_rendered(&mut self, page: u32, size: PageSize) {
        self.registry.record_render(page, size);
        if let Some(layer) = self.layers.get_mut(&page) {
            layer.set_dimensions(size);
        }
    }

    /// Record how many pages the loaded sheet has.
    pub fn set_page_count(&mut self, count: u32) {
        self.registry.set_page_count(count);
    }

    /// Report the container width seen this frame.
    ///
    /// Safe to call every frame. Only a new width restarts the quiet window,
    /// and the rerender happens from [`tick`](Self::tick) once it settles.
    pub fn on_container_resized(&mut self, width: f64, now: Instant) {
        self.resize.observe(width, now);
    }

    /// Advance timers: settle resizes and queue due auto-saves.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if let Some(width) = self.resize.poll(now) {
            self.render_version += 1;
            self.registry.invalidate();
            outcome.rerender = true;
            debug!(width, version = self.render_version, "re-rendering after resize");
        }

        let in_flight = &self.in_flight;
        let due = self.autosaver.take_due_where(now, |key| !in_flight.contains(key));
        outcome.queued_saves = due.len();
        self.queue_saves(due);
        outcome
    }

    fn queue_saves(&mut self, entries: Vec<(AnnotationKey, AnnotationSet)>) {
        if entries.is_empty() {
            return;
        }
        self.in_flight.extend(entries.iter().map(|(key, _)| *key));
        self.outgoing.push(SaveBatch {
            entries,
            marking: self.services.marking.clone(),
            assessment: self.assessment,
            questions: self.questions.clone(),
            precision: self.config.precision,
        });
    }

    /// Batches waiting for a worker. Each must come back through [`complete_saves`](Self::complete_saves).
    pub fn take_save_batches(&mut self) -> Vec<SaveBatch> {
        std::mem::take(&mut self.outgoing)
    }

    /// Apply the results of a finished batch; failures stay pending for the next window.
    pub fn complete_saves(&mut self, results: SaveResults, now: Instant) -> SaveReport {
        for (key, _, _) in &results {
            self.in_flight.remove(key);
        }
        let report = self.autosaver.settle(results, now);
        if report.failed > 0 {
            warn!(saved = report.saved, failed = report.failed, "annotation saves failed");
        }
        report
    }

    /// Run queued batches on the calling thread.
    pub fn run_saves_blocking(&mut self, now: Instant) -> SaveReport {
        let mut report = SaveReport::default();
        for batch in self.take_save_batches() {
            report += self.complete_saves(batch.run(), now);
        }
        report
    }

    /// Write every pending annotation set now, on the calling thread.
    ///
    /// Keys already saving on a worker are left to that worker.
    pub fn flush(&mut self, now: Instant) -> SaveReport {
        let in_flight = &self.in_flight;
        let all = self.autosaver.take_all_where(|key| !in_flight.contains(key));
        self.queue_saves(all);
        if self.outgoing.is_empty() {
            return SaveReport::default();
        }
        let report = self.run_saves_blocking(now);
        info!(saved = report.saved, failed = report.failed, "flushed annotations");
        report
    }

    /// When the next auto-save becomes due, for scheduling a repaint.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.autosaver.next_deadline()
    }

    /// Store a mark immediately. Failures are returned for the caller to show.
    pub fn select_mark(&mut self, question: QuestionId, mark: f64) -> Result<()> {
        let student = self
            .current_student()
            .ok_or_else(|| MarkingError::NotFound("no student selected".into()))?
            .id;
        let region = self
            .questions
            .iter()
            .find(|q| q.id == question)
            .ok_or_else(|| MarkingError::NotFound(format!("question {question}")))?;
        if !region.is_valid_mark(mark) {
            return Err(MarkingError::Validation(format!(
                "{mark} is not an allowed mark for question {}",
                region.question_number
            )));
        }

        let key = ResultKey::new(self.assessment, student, question);
        if let Err(err) = self.services.marking.save_mark(&key, mark) {
            error!(student = %student, question = %question, error = %err, "mark save failed");
            return Err(err);
        }
        info!(student = %student, question = %question, mark, "mark saved");
        self.marks.insert(question, mark);
        Ok(())
    }

    /// Mark buttons for the questions shown on `page`; empty until the page is measured.
    pub fn mark_overlays(&self, page: u32) -> Vec<MarkOverlay> {
        let Some(size) = self.registry.page_size(page) else {
            return Vec::new();
        };
        let current = self.current_question().map(|q| q.id);
        self.questions
            .iter()
            .filter(|q| q.page_number == page)
            .filter(|q| self.mode == MarkingMode::StudentByStudent || Some(q.id) == current)
            .map(|q| MarkOverlay {
                question_id: q.id,
                question_number: q.question_number.clone(),
                rect: q.pixel_rect(size),
                options: q.mark_options(),
                selected: self.marks.get(&q.id).copied(),
            })
            .collect()
    }

    /// Pixel area to outline for `query` on `page`.
    pub fn query_highlight(&self, query: &MarkQuery, page: u32) -> Option<PixelRect> {
        query.highlight(&self.questions, page, self.registry.page_size(page)?)
    }

    /// Store a new question region and add it to the current view.
    pub fn create_question(&mut self, draft: QuestionDraft) -> Result<QuestionRegion> {
        let region = self.services.questions.create_question(self.assessment, draft)?;
        self.questions.push(region.clone());
        Ok(region)
    }

    /// Store edits to a question region.
    pub fn update_question(&mut self, id: QuestionId, draft: QuestionDraft) -> Result<QuestionRegion> {
        let region = self.services.questions.update_question(id, draft)?;
        if let Some(slot) = self.questions.iter_mut().find(|q| q.id == id) {
            *slot = region.clone();
        }
        Ok(region)
    }

    /// Remove a question region. Layers on pages that are no longer annotatable are unmounted.
    pub fn delete_question(&mut self, id: QuestionId) -> Result<()> {
        self.services.questions.delete_question(id)?;
        self.questions.retain(|q| q.id != id);
        self.marks.remove(&id);
        self.question_index = self.question_index.min(self.questions.len().saturating_sub(1));

        let orphaned: Vec<u32> = self
            .layers
            .keys()
            .copied()
            .filter(|page| self.annotation_key(*page).is_none())
            .collect();
        for page in orphaned {
            self.layers.remove(&page);
        }
        info!(question = %id, "question deleted");
        Ok(())
    }

    /// Answer a mark query. An approval with a new mark updates the shown mark.
    pub fn respond_to_query(&mut self, id: QueryId, response: QueryResponse) -> Result<MarkQuery> {
        let query = self.services.queries.respond_to_query(id, response)?;
        let current = self.current_student().map(|s| s.id);
        if query.status == QueryStatus::Approved && Some(query.student_id) == current {
            if let (Some(question), Some(mark)) = (query.question_id, query.new_mark) {
                self.marks.insert(question, mark);
            }
        }
        info!(query = %id, status = ?query.status, "query answered");
        Ok(query)
    }

    /// Switch marking mode and reload the view.
    pub fn set_mode(&mut self, mode: MarkingMode, now: Instant) -> Option<ViewRequest> {
        if self.mode == mode {
            return None;
        }
        self.leave_view(now);
        self.mode = mode;
        self.begin_view_load()
    }

    /// Jump to the student at `index` in the roster.
    ///
    /// Pending edits of the current view are queued for saving first.
    /// Returns `None` when `index` is out of range.
    pub fn go_to_student(&mut self, index: usize, now: Instant) -> Option<ViewRequest> {
        if index >= self.students.len() {
            return None;
        }
        self.leave_view(now);
        self.student_index = index;
        self.begin_view_load()
    }

    /// Move to the neighbouring student; `None` at either end.
    pub fn step_student(&mut self, direction: Direction, now: Instant) -> Option<ViewRequest> {
        let index = match direction {
            Direction::Next => self.student_index + 1,
            Direction::Previous => self.student_index.checked_sub(1)?,
        };
        self.go_to_student(index, now)
    }

    /// Move to the neighbouring question; `None` at either end.
    pub fn step_question(&mut self, direction: Direction, now: Instant) -> Option<ViewRequest> {
        let index = match direction {
            Direction::Next => self.question_index + 1,
            Direction::Previous => self.question_index.checked_sub(1)?,
        };
        if index >= self.questions.len() {
            return None;
        }
        self.leave_view(now);
        self.question_index = index;
        self.begin_view_load()
    }

    fn is_unmarked(&self, student: StudentId) -> Result<bool> {
        let targets: Vec<&QuestionRegion> = match self.mode {
            MarkingMode::QuestionByQuestion => self.current_question().into_iter().collect(),
            MarkingMode::StudentByStudent => self.questions.iter().collect(),
        };
        for question in targets {
            let key = ResultKey::new(self.assessment, student, question.id);
            let marked = self
                .services
                .marking
                .fetch_result(&key)?
                .is_some_and(|r| r.is_marked());
            if !marked {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Index of the nearest unmarked student in `direction`, scanning one at a time.
    pub fn find_unmarked(&self, direction: Direction) -> Result<Option<usize>> {
        let candidates: Box<dyn Iterator<Item = usize>> = match direction {
            Direction::Next => Box::new(self.student_index + 1..self.students.len()),
            Direction::Previous => Box::new((0..self.student_index).rev()),
        };
        for index in candidates {
            if self.is_unmarked(self.students[index].id)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Jump to the nearest unmarked student; `Ok(None)` when every one is marked.
    pub fn step_unmarked(&mut self, direction: Direction, now: Instant) -> Result<Option<ViewRequest>> {
        match self.find_unmarked(direction)? {
            Some(index) => Ok(self.go_to_student(index, now)),
            None => {
                info!(?direction, "no unmarked students left");
                Ok(None)
            }
        }
    }

    /// Start loading the current student's view.
    pub fn begin_view_load(&mut self) -> Option<ViewRequest> {
        let student = self.current_student()?.id;
        let questions = match self.mode {
            MarkingMode::QuestionByQuestion => self.current_question().cloned().into_iter().collect(),
            MarkingMode::StudentByStudent => self.questions.clone(),
        };
        let ticket = self.loads.begin();
        self.loading = true;
        info!(student = %student, mode = ?self.mode, "loading view");
        Some(ViewRequest {
            ticket,
            assessment: self.assessment,
            student,
            mode: self.mode,
            questions,
            services: self.services.clone(),
        })
    }

    /// Apply a finished load. Returns `Ok(false)` for a stale response.
    pub fn complete_view_load(&mut self, ticket: &LoadTicket, result: Result<LoadedView>) -> Result<bool> {
        if !self.loads.is_current(ticket) {
            debug!(generation = ticket.generation(), "discarding stale view load");
            return Ok(false);
        }
        self.loading = false;
        let view = result?;

        if let Some(old) = self.sheet.take() {
            self.blobs.revoke(old);
        }
        self.sheet = Some(self.blobs.register(view.sheet));
        self.annotations = view.annotations.into_iter().collect();
        self.marks = view
            .marks
            .into_iter()
            .filter_map(|(q, mark)| mark.map(|m| (q, m)))
            .collect();
        self.layers.clear();
        self.registry.reset();
        self.render_version += 1;
        info!(student = %view.student, "view loaded");
        Ok(true)
    }

    /// Fetch and apply the current view on the calling thread.
    pub fn load_view_blocking(&mut self) -> Result<bool> {
        let Some(request) = self.begin_view_load() else {
            return Ok(false);
        };
        let result = request.fetch();
        self.complete_view_load(&request.ticket, result)
    }

    fn leave_view(&mut self, _now: Instant) {
        let in_flight = &self.in_flight;
        let pending = self.autosaver.take_all_where(|key| !in_flight.contains(key));
        if !pending.is_empty() {
            debug!(count = pending.len(), "queueing annotation saves before leaving view");
        }
        self.queue_saves(pending);
        self.loads.cancel();
        self.layers.clear();
        if let Some(old) = self.sheet.take() {
            self.blobs.revoke(old);
        }
    }
}

impl Drop for MarkingSurface {
    fn drop(&mut self) {
        self.flush(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Point;
    use crate::layer::PointerInput;
    use crate::query::{QueryDraft, QueryType};

    struct Fixture {
        backend: Arc<MemoryMarkingService>,
        assessment: AssessmentId,
        students: Vec<StudentId>,
        questions: Vec<QuestionRegion>,
    }

    fn region(assessment: AssessmentId, number: &str, page: u32) -> QuestionRegion {
        QuestionRegion {
            id: QuestionId::new(),
            assessment_id: assessment,
            question_number: number.into(),
            page_number: page,
            x: 10.0,
            y: 10.0,
            width: 80.0,
            height: 30.0,
            max_marks: 4.0,
            increment: 1.0,
            memo: None,
            marking_note: None,
        }
    }

    fn fixture() -> Fixture {
        let backend = Arc::new(MemoryMarkingService::new());
        let assessment = AssessmentId::new();
        let questions = vec![
            region(assessment, "1", 1),
            region(assessment, "2", 1),
            region(assessment, "3", 2),
        ];
        for q in &questions {
            backend.add_question(q.clone());
        }
        let mut students = Vec::new();
        for name in ["Ada", "Brook", "Cai"] {
            let id = StudentId::new();
            backend.add_student(
                assessment,
                Student {
                    id,
                    name: name.into(),
                    student_number: String::new(),
                    answer_sheet: None,
                },
            );
            backend.add_answer_sheet(assessment, id, b"%PDF-1.4".to_vec());
            students.push(id);
        }
        Fixture {
            backend,
            assessment,
            students,
            questions,
        }
    }

    fn surface(f: &Fixture) -> MarkingSurface {
        let mut surface = MarkingSurface::new(
            SurfaceConfig::default(),
            Services::memory(f.backend.clone()),
            f.assessment,
        );
        surface.load_roster().unwrap();
        surface
    }

    fn draw(surface: &mut MarkingSurface, page: u32, now: Instant) {
        surface.on_page_rendered(page, PageSize::new(1000.0, 1000.0));
        surface.set_drawing_mode(DrawingMode::Pencil);
        let layer = surface.layer_mut(page).unwrap();
        layer.set_dimensions(PageSize::new(1000.0, 1000.0));
        layer.pointer_down(&PointerInput::Mouse(Point::new(100.0, 100.0)));
        layer.pointer_move(&PointerInput::Mouse(Point::new(200.0, 100.0)));
        layer.pointer_up();
        surface.sync_layer(page, now);
    }

    #[test]
    fn test_autosave_after_quiet_window() {
        let f = fixture();
        let mut surface = surface(&f);
        assert!(surface.load_view_blocking().unwrap());
        assert_eq!(surface.sheet_bytes().as_deref(), Some(&b"%PDF-1.4"[..]));

        let start = Instant::now();
        draw(&mut surface, 1, start);
        assert!(surface.has_pending_saves());

        let early = surface.tick(start + Duration::from_millis(500));
        assert_eq!(early.queued_saves, 0);
        let due = surface.tick(start + Duration::from_millis(1000));
        assert_eq!(due.queued_saves, 1);
        let report = surface.run_saves_blocking(start + Duration::from_millis(1000));
        assert_eq!(report.saved, 1);

        let key = ResultKey::new(f.assessment, f.students[0], f.questions[0].id);
        let stored = f.backend.fetch_result(&key).unwrap().unwrap();
        assert_eq!(stored.annotation.map(|a| a.lines.len()), Some(1));
        assert_eq!(stored.mark, None);
    }

    #[test]
    fn test_failed_autosave_is_retried() {
        let f = fixture();
        let mut surface = surface(&f);
        surface.load_view_blocking().unwrap();
        let start = Instant::now();
        draw(&mut surface, 1, start);

        f.backend.set_fail_saves(true);
        surface.tick(start + Duration::from_secs(1));
        let failed = surface.run_saves_blocking(start + Duration::from_secs(1));
        assert_eq!(failed.failed, 1);
        assert!(surface.has_pending_saves());

        f.backend.set_fail_saves(false);
        surface.tick(start + Duration::from_secs(2));
        let retried = surface.run_saves_blocking(start + Duration::from_secs(2));
        assert_eq!(retried.saved, 1);
        assert!(!surface.has_pending_saves());
    }

    #[test]
    fn test_student_mode_saves_page_to_every_question() {
        let f = fixture();
        let mut surface = surface(&f);
        let now = Instant::now();
        let request = surface.set_mode(MarkingMode::StudentByStudent, now).unwrap();
        let result = request.fetch();
        assert!(surface.complete_view_load(&request.ticket, result).unwrap());
        surface.set_page_count(2);
        assert_eq!(surface.visible_pages(), vec![1, 2]);

        draw(&mut surface, 1, now);
        let report = surface.flush(now);
        assert_eq!(report.saved, 1);
        assert_eq!(f.backend.annotation_writes(), 2);

        for q in &f.questions[..2] {
            let key = ResultKey::new(f.assessment, f.students[0], q.id);
            assert!(f.backend.fetch_result(&key).unwrap().unwrap().annotation.is_some());
        }
        let page_two = ResultKey::new(f.assessment, f.students[0], f.questions[2].id);
        assert!(f.backend.fetch_result(&page_two).unwrap().is_none());
    }

    #[test]
    fn test_navigation_flushes_pending_edits() {
        let f = fixture();
        let mut surface = surface(&f);
        surface.load_view_blocking().unwrap();
        let now = Instant::now();
        draw(&mut surface, 1, now);

        let request = surface.step_student(Direction::Next, now).unwrap();
        assert_eq!(request.student, f.students[1]);
        assert!(surface.sheet_bytes().is_none());

        // Navigation queues the edit for a worker instead of writing inline
        assert_eq!(f.backend.annotation_writes(), 0);
        let batches = surface.take_save_batches();
        assert_eq!(batches.len(), 1);
        for batch in batches {
            let results = batch.run();
            assert_eq!(surface.complete_saves(results, now).saved, 1);
        }
        assert_eq!(f.backend.annotation_writes(), 1);
        assert!(!surface.has_pending_saves());
    }

    #[test]
    fn test_due_saves_leave_the_calling_thread_alone() {
        let f = fixture();
        let mut surface = surface(&f);
        surface.load_view_blocking().unwrap();
        let start = Instant::now();
        draw(&mut surface, 1, start);

        let due = start + Duration::from_secs(1);
        assert_eq!(surface.tick(due).queued_saves, 1);
        assert_eq!(f.backend.annotation_writes(), 0);
        assert!(surface.has_pending_saves());

        let mut batches = surface.take_save_batches();
        let batch = batches.pop().unwrap();
        assert_eq!(batch.len(), 1);

        // A newer edit waits while the first write is still running
        draw(&mut surface, 1, due);
        assert_eq!(surface.tick(due + Duration::from_secs(1)).queued_saves, 0);

        let results = std::thread::spawn(move || batch.run()).join().unwrap();
        assert_eq!(surface.complete_saves(results, due).saved, 1);
        assert_eq!(surface.tick(due + Duration::from_secs(1)).queued_saves, 1);
        assert_eq!(surface.run_saves_blocking(due + Duration::from_secs(1)).saved, 1);

        let key = ResultKey::new(f.assessment, f.students[0], f.questions[0].id);
        let stored = f.backend.fetch_result(&key).unwrap().unwrap();
        assert_eq!(stored.annotation.map(|a| a.lines.len()), Some(2));
        assert!(!surface.has_pending_saves());
    }

    #[test]
    fn test_student_mode_page_without_question_is_read_only() {
        let f = fixture();
        let mut surface = surface(&f);
        let now = Instant::now();
        let request = surface.set_mode(MarkingMode::StudentByStudent, now).unwrap();
        let result = request.fetch();
        surface.complete_view_load(&request.ticket, result).unwrap();
        surface.set_page_count(3);

        assert_eq!(surface.visible_pages(), vec![1, 2, 3]);
        assert!(surface.annotation_key(3).is_none());
        assert!(surface.layer_mut(3).is_none());
        assert!(surface.layer_mut(2).is_some());
    }

    #[test]
    fn test_page_save_without_question_stays_pending() {
        let f = fixture();
        let mut surface = surface(&f);
        let now = Instant::now();
        let request = surface.set_mode(MarkingMode::StudentByStudent, now).unwrap();
        let result = request.fetch();
        surface.complete_view_load(&request.ticket, result).unwrap();
        surface.set_page_count(2);
        draw(&mut surface, 2, now);

        // The only question on page 2 goes away before the save runs
        surface.delete_question(f.questions[2].id).unwrap();
        assert!(surface.layer(2).is_none());

        let report = surface.flush(now);
        assert_eq!(report, SaveReport { saved: 0, failed: 1 });
        assert!(surface.has_pending_saves());
        assert_eq!(f.backend.annotation_writes(), 0);
    }

    #[test]
    fn test_delete_question_keeps_index_in_range() {
        let f = fixture();
        let mut surface = surface(&f);
        let now = Instant::now();
        surface.step_question(Direction::Next, now);
        surface.step_question(Direction::Next, now);
        assert_eq!(surface.current_question().map(|q| q.id), Some(f.questions[2].id));

        surface.delete_question(f.questions[2].id).unwrap();
        assert_eq!(surface.questions().len(), 2);
        assert_eq!(surface.current_question().map(|q| q.id), Some(f.questions[1].id));
        assert!(surface.delete_question(f.questions[2].id).is_err());
    }

    #[test]
    fn test_approved_query_updates_shown_mark() {
        let f = fixture();
        let mut surface = surface(&f);
        surface.load_view_blocking().unwrap();
        let question = f.questions[0].id;
        surface.select_mark(question, 1.0).unwrap();

        let query = f
            .backend
            .submit_query(
                f.students[0],
                QueryDraft {
                    assessment_id: f.assessment,
                    question_id: Some(question),
                    current_mark: Some(1.0),
                    requested_change: "Part (b) was answered on the next page".into(),
                    query_type: QueryType::Regrade,
                },
            )
            .unwrap();

        let answered = surface
            .respond_to_query(
                query.id,
                QueryResponse {
                    status: QueryStatus::Approved,
                    reviewer_response: "Found it, awarding the extra marks".into(),
                    new_mark: Some(3.0),
                },
            )
            .unwrap();
        assert_eq!(answered.status, QueryStatus::Approved);
        assert_eq!(surface.mark_for(question), Some(3.0));

        let key = ResultKey::new(f.assessment, f.students[0], question);
        assert_eq!(f.backend.fetch_result(&key).unwrap().unwrap().mark, Some(3.0));
    }

    #[test]
    fn test_stale_load_is_discarded() {
        let f = fixture();
        let mut surface = surface(&f);
        let now = Instant::now();
        let first = surface.begin_view_load().unwrap();
        let second = surface.step_student(Direction::Next, now).unwrap();

        let stale = first.fetch();
        assert!(!surface.complete_view_load(&first.ticket, stale).unwrap());
        assert!(surface.is_loading());

        let fresh = second.fetch();
        assert!(surface.complete_view_load(&second.ticket, fresh).unwrap());
        assert!(!surface.is_loading());
        assert_eq!(surface.current_student().map(|s| s.id), Some(f.students[1]));
    }

    #[test]
    fn test_select_mark_validates_and_persists() {
        let f = fixture();
        let mut surface = surface(&f);
        surface.load_view_blocking().unwrap();
        let question = f.questions[0].id;

        assert!(matches!(
            surface.select_mark(question, 2.5),
            Err(MarkingError::Validation(_))
        ));
        surface.select_mark(question, 3.0).unwrap();
        assert_eq!(surface.mark_for(question), Some(3.0));

        f.backend.set_fail_saves(true);
        assert!(surface.select_mark(question, 4.0).is_err());
        assert_eq!(surface.mark_for(question), Some(3.0));
    }

    #[test]
    fn test_next_unmarked_skips_marked_students() {
        let f = fixture();
        let mut surface = surface(&f);
        surface.load_view_blocking().unwrap();
        let q = f.questions[0].id;
        f.backend
            .save_mark(&ResultKey::new(f.assessment, f.students[1], q), 2.0)
            .unwrap();

        assert_eq!(surface.find_unmarked(Direction::Next).unwrap(), Some(2));
        assert_eq!(surface.find_unmarked(Direction::Previous).unwrap(), None);

        f.backend
            .save_mark(&ResultKey::new(f.assessment, f.students[2], q), 1.0)
            .unwrap();
        let now = Instant::now();
        assert!(surface.step_unmarked(Direction::Next, now).unwrap().is_none());
    }

    #[test]
    fn test_student_mode_unmarked_means_any_question() {
        let f = fixture();
        let mut surface = surface(&f);
        surface.set_mode(MarkingMode::StudentByStudent, Instant::now());
        for q in &f.questions[..2] {
            f.backend
                .save_mark(&ResultKey::new(f.assessment, f.students[1], q.id), 1.0)
                .unwrap();
        }
        // Third question still unmarked for the second student
        assert_eq!(surface.find_unmarked(Direction::Next).unwrap(), Some(1));
    }

    #[test]
    fn test_resize_debounce_bumps_render_version() {
        let f = fixture();
        let mut surface = surface(&f);
        let start = Instant::now();
        surface.on_container_resized(800.0, start);
        assert_eq!(surface.render_width(), Some(800.0));

        surface.on_container_resized(700.0, start + Duration::from_millis(100));
        surface.on_container_resized(650.0, start + Duration::from_millis(200));
        assert!(!surface.tick(start + Duration::from_millis(400)).rerender);

        let version = surface.render_version();
        assert!(surface.tick(start + Duration::from_millis(500)).rerender);
        assert_eq!(surface.render_width(), Some(650.0));
        assert_eq!(surface.render_version(), version + 1);
    }

    #[test]
    fn test_resize_settles_while_observed_every_frame() {
        let mut debouncer = ResizeDebouncer::new(Duration::from_millis(300));
        let start = Instant::now();
        debouncer.observe(800.0, start);
        debouncer.observe(700.0, start);

        let mut applied = None;
        for ms in [100, 200, 290, 380] {
            let frame = start + Duration::from_millis(ms);
            debouncer.observe(700.0, frame);
            if let Some(width) = debouncer.poll(frame) {
                applied = Some((ms, width));
            }
        }
        assert_eq!(applied, Some((380, 700.0)));
        assert_eq!(debouncer.width(), Some(700.0));
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn test_resize_restarts_only_on_new_width() {
        let mut debouncer = ResizeDebouncer::new(Duration::from_millis(300));
        let start = Instant::now();
        debouncer.observe(800.0, start);
        debouncer.observe(700.0, start);
        debouncer.observe(650.0, start + Duration::from_millis(200));
        assert_eq!(debouncer.poll(start + Duration::from_millis(400)), None);
        assert!(debouncer.is_pending());
        assert_eq!(debouncer.poll(start + Duration::from_millis(500)), Some(650.0));

        debouncer.observe(650.0, start + Duration::from_millis(600));
        assert!(!debouncer.is_pending());
    }

    #[test]
    fn test_mark_overlays_follow_page_size() {
        let f = fixture();
        let mut surface = surface(&f);
        surface.load_view_blocking().unwrap();
        assert!(surface.mark_overlays(1).is_empty());

        surface.on_page_rendered(1, PageSize::new(500.0, 1000.0));
        let overlays = surface.mark_overlays(1);
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays[0].rect, PixelRect::new(50.0, 100.0, 400.0, 300.0));
        assert_eq!(overlays[0].options, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_question_mode_pages() {
        let f = fixture();
        let mut surface = surface(&f);
        surface.load_view_blocking().unwrap();
        assert_eq!(surface.visible_pages(), vec![1]);
        assert!(surface.layer_mut(2).is_none());
        assert!(surface.layer_mut(1).is_some());
    }
}
