//! Marking Desk window: toolbar, query panel and the scrolling page view.

use crate::dialogs::{
    show_error_dialog, ErrorDialogState, ErrorSeverity, QueryReplyState, QuestionDialogAction,
    QuestionDialogState,
};
use crate::overlay::rasterize;
use crate::page_view::{
    apply_note_event, dimensions_of, mark_label, paint_highlight, paint_in_progress,
    paint_question_box, paint_sticky_icon, paint_text_note, pointer_input, to_color32,
    PageTransform,
};
use eframe::egui;
use marking_core::layer::STICKY_NOTE_FOOTPRINT_PX;
use marking_core::notes::{NoteEvent, ScrollBounds};
use marking_core::surface::LoadedView;
use marking_core::{
    AnnotationLayer, AssessmentId, Command, Direction, DrawingMode, ElementId, LayerKey,
    LoadTicket, MarkQuery, MarkingMode, MarkingSurface, NoteWidgets, PageSize, PixelLine,
    PixelNote, PixelRect, Point, QueryId, QueryStats, QueryStatus, QuestionId, QuestionMapper,
    SaveResults, Services, SurfaceConfig, TextNoteWidget, ViewRequest,
};
use marking_render::{AnswerSheet, PageCache, PdfRenderer};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{info, warn};

/// Pointer travel below which a note press counts as a click
const CLICK_SLOP_PX: f64 = 3.0;

const PAGE_GAP: f32 = 16.0;
const PAGE_PADDING: f32 = 24.0;

const FULL_UV: egui::Rect = egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0));

type LoadResult = (LoadTicket, marking_core::Result<LoadedView>);

struct PageTexture {
    version: u64,
    px_width: u32,
    handle: egui::TextureHandle,
    size: egui::Vec2,
}

struct OverlayTexture {
    lines: Vec<PixelLine>,
    size: [usize; 2],
    handle: egui::TextureHandle,
}

/// Gesture in progress, owned by the page it started on
enum Gesture {
    Stroke { page: u32 },
    Note { page: u32, id: ElementId, start: Point },
    Mapping { page: u32 },
}

impl Gesture {
    fn page(&self) -> u32 {
        match self {
            Gesture::Stroke { page } | Gesture::Note { page, .. } | Gesture::Mapping { page } => *page,
        }
    }
}

#[derive(Clone, Copy)]
struct PointerFrame {
    pressed: bool,
    down: bool,
    released: bool,
    pos: Option<egui::Pos2>,
    touch: bool,
}

pub struct MarkingDeskApp {
    surface: MarkingSurface,
    renderer: &'static PdfRenderer,
    sheet: Option<AnswerSheet<'static>>,
    page_cache: PageCache,
    textures: HashMap<u32, PageTexture>,
    overlays: HashMap<u32, OverlayTexture>,
    render_failures: HashSet<u32>,
    widgets: HashMap<u32, NoteWidgets>,

    load_tx: Sender<LoadResult>,
    load_rx: Receiver<LoadResult>,
    save_tx: Sender<SaveResults>,
    save_rx: Receiver<SaveResults>,
    save_workers: Vec<JoinHandle<()>>,

    gesture: Option<Gesture>,
    active_page: Option<u32>,
    focus_note: Option<ElementId>,
    /// Screen rects of floating widgets drawn last frame; presses there skip the page
    blockers: Vec<egui::Rect>,
    next_blockers: Vec<egui::Rect>,

    mapping: bool,
    mapper: QuestionMapper,
    question_dialog: Option<QuestionDialogState>,
    error_dialog: Option<ErrorDialogState>,

    queries: Vec<MarkQuery>,
    query_stats: QueryStats,
    highlighted_query: Option<QueryId>,
    reply: Option<QueryReplyState>,
    status: Option<String>,
}

impl MarkingDeskApp {
    pub fn new(
        ctx: &egui::Context,
        config: SurfaceConfig,
        services: Services,
        assessment: AssessmentId,
        mode: MarkingMode,
        renderer: &'static PdfRenderer,
    ) -> Self {
        let (load_tx, load_rx) = channel();
        let (save_tx, save_rx) = channel();
        let mut app = Self {
            surface: MarkingSurface::new(config, services, assessment),
            renderer,
            sheet: None,
            page_cache: PageCache::new(),
            textures: HashMap::new(),
            overlays: HashMap::new(),
            render_failures: HashSet::new(),
            widgets: HashMap::new(),
            load_tx,
            load_rx,
            save_tx,
            save_rx,
            save_workers: Vec::new(),
            gesture: None,
            active_page: None,
            focus_note: None,
            blockers: Vec::new(),
            next_blockers: Vec::new(),
            mapping: false,
            mapper: QuestionMapper::new(),
            question_dialog: None,
            error_dialog: None,
            queries: Vec::new(),
            query_stats: QueryStats::default(),
            highlighted_query: None,
            reply: None,
            status: None,
        };

        if let Err(err) = app.surface.load_roster() {
            app.show_error(ErrorSeverity::Error, format!("Could not load the class list: {err}"));
            return app;
        }
        app.refresh_queries();
        let request = match app.surface.set_mode(mode, Instant::now()) {
            Some(request) => Some(request),
            None => app.surface.begin_view_load(),
        };
        app.dispatch(ctx, request);
        app
    }

    fn show_error(&mut self, severity: ErrorSeverity, message: impl Into<String>) {
        self.error_dialog = Some(ErrorDialogState {
            severity,
            message: message.into(),
        });
    }

    fn modal_open(&self) -> bool {
        self.error_dialog.is_some() || self.question_dialog.is_some()
    }

    fn refresh_queries(&mut self) {
        let assessment = self.surface.assessment();
        match self.surface.services().queries.list_queries(assessment) {
            Ok(queries) => {
                self.query_stats = QueryStats::from_queries(&queries);
                self.queries = queries;
            }
            Err(err) => warn!(error = %err, "could not load mark queries"),
        }
    }

    /// Drop everything tied to the previous view and fetch the next one off the UI thread.
    fn dispatch(&mut self, ctx: &egui::Context, request: Option<ViewRequest>) {
        let Some(request) = request else {
            return;
        };
        self.sheet = None;
        self.page_cache.clear();
        self.textures.clear();
        self.overlays.clear();
        self.render_failures.clear();
        self.widgets.clear();
        self.gesture = None;
        self.active_page = None;
        self.focus_note = None;
        self.mapper.cancel();

        let tx = self.load_tx.clone();
        let ctx = ctx.clone();
        std::thread::spawn(move || {
            let result = request.fetch();
            // The receiver only disappears when the window closes.
            let _ = tx.send((request.ticket.clone(), result));
            ctx.request_repaint();
        });
    }

    fn poll_loads(&mut self) {
        while let Ok((ticket, result)) = self.load_rx.try_recv() {
            match self.surface.complete_view_load(&ticket, result) {
                Ok(true) => self.open_sheet(),
                Ok(false) => {}
                Err(err) => self.show_error(
                    ErrorSeverity::Warning,
                    format!("Could not load the student answer sheet: {err}"),
                ),
            }
        }
    }

    /// Hand queued annotation saves to worker threads.
    fn dispatch_saves(&mut self, ctx: &egui::Context) {
        self.save_workers.retain(|worker| !worker.is_finished());
        for batch in self.surface.take_save_batches() {
            let tx = self.save_tx.clone();
            let ctx = ctx.clone();
            self.save_workers.push(std::thread::spawn(move || {
                let _ = tx.send(batch.run());
                ctx.request_repaint();
            }));
        }
    }

    fn poll_saves(&mut self, now: Instant) {
        while let Ok(results) = self.save_rx.try_recv() {
            let report = self.surface.complete_saves(results, now);
            if report.failed > 0 {
                self.status = Some("Annotations not saved yet, retrying".into());
            } else if report.saved > 0 {
                self.status = None;
            }
        }
    }

    fn open_sheet(&mut self) {
        let Some(bytes) = self.surface.sheet_bytes() else {
            return;
        };
        match self.renderer.load(bytes.to_vec()) {
            Ok(sheet) => {
                self.surface.set_page_count(sheet.page_count());
                self.sheet = Some(sheet);
                self.page_cache.clear();
                self.textures.clear();
            }
            Err(err) => self.show_error(ErrorSeverity::Warning, format!("Could not open the answer sheet: {err}")),
        }
    }

    fn navigate(&mut self, ctx: &egui::Context, request: Option<ViewRequest>) {
        self.highlighted_query = None;
        self.dispatch(ctx, request);
    }

    fn step_unmarked(&mut self, ctx: &egui::Context, direction: Direction) {
        match self.surface.step_unmarked(direction, Instant::now()) {
            Ok(Some(request)) => self.navigate(ctx, Some(request)),
            Ok(None) => self.status = Some("No unmarked students in that direction".into()),
            Err(err) => self.show_error(ErrorSeverity::Warning, format!("Could not check marks: {err}")),
        }
    }

    fn select_mark(&mut self, question: QuestionId, mark: f64) {
        if let Err(err) = self.surface.select_mark(question, mark) {
            self.show_error(ErrorSeverity::Error, format!("Could not save the mark: {err}"));
        }
    }

    fn delete_question(&mut self, ctx: &egui::Context, question: QuestionId) {
        match self.surface.delete_question(question) {
            Ok(()) => {
                let request = self.surface.begin_view_load();
                self.navigate(ctx, request);
            }
            Err(err) => self.show_error(ErrorSeverity::Error, format!("Could not delete the question: {err}")),
        }
    }

    fn send_reply(&mut self, status: QueryStatus) {
        let Some(reply) = &self.reply else {
            return;
        };
        let id = reply.query;
        let response = match reply.to_response(status) {
            Ok(response) => response,
            Err(message) => {
                self.show_error(ErrorSeverity::Warning, message);
                return;
            }
        };
        match self.surface.respond_to_query(id, response) {
            Ok(_) => {
                self.reply = None;
                self.refresh_queries();
            }
            Err(err) => self.show_error(ErrorSeverity::Error, format!("Could not answer the query: {err}")),
        }
    }
}

impl Drop for MarkingDeskApp {
    fn drop(&mut self) {
        // Let running saves finish; failures are retried by the surface's final flush.
        for worker in self.save_workers.drain(..) {
            let _ = worker.join();
        }
        self.poll_saves(Instant::now());
    }
}

impl eframe::App for MarkingDeskApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Instant::now();
        self.blockers = std::mem::take(&mut self.next_blockers);
        self.poll_loads();
        self.poll_saves(now);

        let outcome = self.surface.tick(now);
        if outcome.rerender {
            self.textures.clear();
            self.overlays.clear();
            self.render_failures.clear();
        }
        if let Some(deadline) = self.surface.next_deadline() {
            ctx.request_repaint_after(deadline.saturating_duration_since(now));
        }

        self.handle_keyboard_shortcuts(ctx, now);
        self.draw_toolbar(ctx);
        self.draw_side_panel(ctx);
        self.draw_pages(ctx, now);
        self.draw_dialogs(ctx);
        self.dispatch_saves(ctx);
    }
}

impl MarkingDeskApp {
    fn handle_keyboard_shortcuts(&mut self, ctx: &egui::Context, now: Instant) {
        if ctx.wants_keyboard_input() {
            return;
        }
        let (modifiers, delete, backspace, undo, redo, escape) = ctx.input(|i| {
            (
                i.modifiers,
                i.key_pressed(egui::Key::Delete),
                i.key_pressed(egui::Key::Backspace),
                i.key_pressed(egui::Key::Z),
                i.key_pressed(egui::Key::Y),
                i.key_pressed(egui::Key::Escape),
            )
        });
        let cmd = modifiers.command || modifiers.ctrl;

        if escape {
            if self.error_dialog.is_some() {
                self.error_dialog = None;
            } else if self.mapping {
                self.mapping = false;
                self.mapper.cancel();
            }
        }

        let Some(page) = self.active_page else {
            return;
        };
        if cmd && undo {
            let command = if modifiers.shift { Command::Redo } else { Command::Undo };
            self.surface.apply_command(page, command, now);
        } else if cmd && redo {
            self.surface.apply_command(page, Command::Redo, now);
        }

        let key = if delete {
            Some(LayerKey::Delete)
        } else if backspace {
            Some(LayerKey::Backspace { command: cmd })
        } else {
            None
        };
        if let Some(key) = key {
            if let Some(layer) = self.surface.layer_mut(page) {
                layer.handle_key(key);
            }
            self.surface.sync_layer(page, now);
        }
    }

    fn draw_toolbar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal_wrapped(|ui| {
                ui.add_space(8.0);

                let mut mode = self.surface.mode();
                egui::ComboBox::from_id_salt("marking_mode")
                    .selected_text(mode_label(mode))
                    .width(150.0)
                    .show_ui(ui, |ui| {
                        for option in [MarkingMode::QuestionByQuestion, MarkingMode::StudentByStudent] {
                            ui.selectable_value(&mut mode, option, mode_label(option));
                        }
                    });
                if mode != self.surface.mode() {
                    let request = self.surface.set_mode(mode, Instant::now());
                    self.navigate(ctx, request);
                }

                ui.separator();

                if ui.button("◀").on_hover_text("Previous student").clicked() {
                    let request = self.surface.step_student(Direction::Previous, Instant::now());
                    self.navigate(ctx, request);
                }
                let student = match self.surface.current_student() {
                    Some(s) => format!(
                        "{} {} ({}/{})",
                        s.name,
                        s.student_number,
                        self.surface.student_index() + 1,
                        self.surface.students().len()
                    ),
                    None => "No students".to_string(),
                };
                ui.label(student);
                if ui.button("▶").on_hover_text("Next student").clicked() {
                    let request = self.surface.step_student(Direction::Next, Instant::now());
                    self.navigate(ctx, request);
                }
                if ui.button("⏮ Unmarked").clicked() {
                    self.step_unmarked(ctx, Direction::Previous);
                }
                if ui.button("Unmarked ⏭").clicked() {
                    self.step_unmarked(ctx, Direction::Next);
                }

                if self.surface.mode() == MarkingMode::QuestionByQuestion {
                    ui.separator();
                    if ui.button("◀").on_hover_text("Previous question").clicked() {
                        let request = self.surface.step_question(Direction::Previous, Instant::now());
                        self.navigate(ctx, request);
                    }
                    let question = self
                        .surface
                        .current_question()
                        .map(|q| format!("Question {}", q.question_number))
                        .unwrap_or_else(|| "No questions".to_string());
                    ui.label(question);
                    if ui.button("▶").on_hover_text("Next question").clicked() {
                        let request = self.surface.step_question(Direction::Next, Instant::now());
                        self.navigate(ctx, request);
                    }
                }

                ui.separator();

                for mode in DrawingMode::ALL {
                    let selected = !self.mapping && self.surface.drawing_mode() == mode;
                    if ui.selectable_label(selected, mode.label()).clicked() {
                        self.mapping = false;
                        self.surface.set_drawing_mode(mode);
                    }
                }
                if ui
                    .selectable_label(self.mapping, "Map Question")
                    .on_hover_text("Drag a box around a question")
                    .clicked()
                {
                    self.mapping = !self.mapping;
                    self.mapper.cancel();
                    self.surface.set_drawing_mode(DrawingMode::None);
                }

                ui.separator();

                let history = self
                    .active_page
                    .map(|page| self.surface.history_state(page))
                    .unwrap_or_default();
                let now = Instant::now();
                if ui.add_enabled(history.can_undo, egui::Button::new("↶ Undo")).clicked() {
                    if let Some(page) = self.active_page {
                        self.surface.apply_command(page, Command::Undo, now);
                    }
                }
                if ui.add_enabled(history.can_redo, egui::Button::new("↷ Redo")).clicked() {
                    if let Some(page) = self.active_page {
                        self.surface.apply_command(page, Command::Redo, now);
                    }
                }

                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if let Some(status) = &self.status {
                        ui.weak(status);
                    } else if self.surface.has_pending_saves() {
                        ui.weak("Saving…");
                    } else {
                        ui.weak("All changes saved");
                    }
                });
            });
        });
    }

    fn draw_side_panel(&mut self, ctx: &egui::Context) {
        let mut delete = None;
        let mut reply_with = None;
        egui::SidePanel::right("queries")
            .default_width(240.0)
            .resizable(true)
            .show(ctx, |ui| {
                if let Some(question) = self.surface.current_question() {
                    if self.surface.mode() == MarkingMode::QuestionByQuestion {
                        ui.heading(format!("Question {}", question.question_number));
                        ui.label(format!("Out of {}", mark_label(question.max_marks)));
                        if let Some(memo) = &question.memo {
                            ui.label(egui::RichText::new(memo).italics());
                        }
                        if let Some(note) = &question.marking_note {
                            ui.weak(note);
                        }
                        if ui.small_button("Delete question").clicked() {
                            delete = Some(question.id);
                        }
                        ui.separator();
                    }
                }

                ui.horizontal(|ui| {
                    ui.heading("Queries");
                    if ui.small_button("⟳").clicked() {
                        self.refresh_queries();
                    }
                });
                ui.weak(format!(
                    "{} open, {} resolved",
                    self.query_stats.pending_queries, self.query_stats.resolved_queries
                ));
                ui.separator();

                let student = self.surface.current_student().map(|s| s.id);
                let mut toggled = None;
                egui::ScrollArea::vertical().show(ui, |ui| {
                    for query in self.queries.iter().filter(|q| Some(q.student_id) == student) {
                        let selected = self.highlighted_query == Some(query.id);
                        let title = format!("{:?} · {:?}", query.query_type, query.status);
                        if ui.selectable_label(selected, title).clicked() {
                            toggled = Some(query.id);
                        }
                        ui.label(&query.requested_change);
                        if let Some(response) = &query.reviewer_response {
                            ui.weak(response);
                        }
                        let reply = self
                            .reply
                            .as_mut()
                            .filter(|r| selected && r.query == query.id && query.status.is_open());
                        if let Some(reply) = reply {
                            ui.add(
                                egui::TextEdit::multiline(&mut reply.text)
                                    .hint_text("Response to the student")
                                    .desired_rows(3),
                            );
                            ui.horizontal(|ui| {
                                ui.label("New mark");
                                ui.add(egui::TextEdit::singleline(&mut reply.new_mark).desired_width(48.0));
                            });
                            ui.horizontal(|ui| {
                                for (status, label) in [
                                    (QueryStatus::Approved, "Approve"),
                                    (QueryStatus::Rejected, "Reject"),
                                    (QueryStatus::Resolved, "Resolve"),
                                ] {
                                    if ui.small_button(label).clicked() {
                                        reply_with = Some(status);
                                    }
                                }
                            });
                        }
                        ui.add_space(6.0);
                    }
                });
                if let Some(id) = toggled {
                    self.highlighted_query = (self.highlighted_query != Some(id)).then_some(id);
                    self.reply = self.highlighted_query.map(QueryReplyState::new);
                }
            });

        if let Some(status) = reply_with {
            self.send_reply(status);
        }
        if let Some(question) = delete {
            self.delete_question(ctx, question);
        }
    }

    fn draw_pages(&mut self, ctx: &egui::Context, now: Instant) {
        egui::CentralPanel::default().show(ctx, |ui| {
            if self.surface.is_loading() {
                ui.centered_and_justified(|ui| {
                    ui.spinner();
                    ui.label("Loading student answer sheet...");
                });
                return;
            }
            if self.sheet.is_none() {
                ui.centered_and_justified(|ui| {
                    ui.heading("No answer sheet for this student");
                });
                return;
            }

            let container_width = ui.available_width() as f64;
            self.surface.on_container_resized(container_width, now);
            if self.surface.resize_pending() {
                ctx.request_repaint_after(self.surface.config().resize_debounce);
            }

            let Some(width) = self.surface.render_width() else {
                ui.centered_and_justified(|ui| {
                    ui.label("Loading PDF...");
                });
                return;
            };
            let display_width = (width as f32 - PAGE_PADDING * 2.0).max(100.0);

            let pages = self.surface.visible_pages();
            if pages.is_empty() {
                ui.centered_and_justified(|ui| {
                    ui.label("Nothing to mark here yet. Map a question in student view first.");
                });
                return;
            }

            egui::ScrollArea::vertical()
                .auto_shrink([false, false])
                .show(ui, |ui| {
                    ui.vertical_centered(|ui| {
                        for page in pages {
                            ui.add_space(PAGE_GAP);
                            self.show_page(ui, page, display_width, now);
                        }
                        ui.add_space(PAGE_GAP);
                    });
                });
        });
    }

    fn page_texture(&mut self, ctx: &egui::Context, page: u32, px_width: u32) -> Option<(egui::TextureHandle, egui::Vec2)> {
        let version = self.surface.render_version();
        if let Some(texture) = self.textures.get(&page) {
            if texture.version == version && texture.px_width == px_width {
                return Some((texture.handle.clone(), texture.size));
            }
        }
        if self.render_failures.contains(&page) {
            return None;
        }

        let sheet = self.sheet.as_ref()?;
        let rendered = match self
            .page_cache
            .get_or_render(page, version, px_width, || sheet.render_page(page, px_width))
        {
            Ok(rendered) => rendered,
            Err(err) => {
                warn!(page, error = %err, "page render failed");
                self.render_failures.insert(page);
                return None;
            }
        };
        let ppp = ctx.pixels_per_point();
        let size = egui::vec2(rendered.width as f32 / ppp, rendered.height as f32 / ppp);
        let image = egui::ColorImage::from_rgba_unmultiplied(
            [rendered.width as usize, rendered.height as usize],
            &rendered.rgba,
        );
        let handle = ctx.load_texture(format!("page_{page}"), image, egui::TextureOptions::LINEAR);

        self.surface
            .on_page_rendered(page, PageSize::new(size.x as f64, size.y as f64));
        self.textures.insert(
            page,
            PageTexture {
                version,
                px_width,
                handle: handle.clone(),
                size,
            },
        );
        Some((handle, size))
    }

    fn show_page(&mut self, ui: &mut egui::Ui, page: u32, display_width: f32, now: Instant) {
        let ctx = ui.ctx().clone();
        let ppp = ctx.pixels_per_point();
        let px_width = (display_width * ppp).round().max(1.0) as u32;

        let Some((texture, size)) = self.page_texture(&ctx, page, px_width) else {
            let (rect, _) = ui.allocate_exact_size(
                egui::vec2(display_width, display_width * 1.414),
                egui::Sense::hover(),
            );
            ui.painter().rect_filled(rect, 0.0, ui.visuals().faint_bg_color);
            ui.painter().text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                format!("Page {page}"),
                egui::FontId::proportional(16.0),
                ui.visuals().weak_text_color(),
            );
            return;
        };

        let (rect, _) = ui.allocate_exact_size(size, egui::Sense::click_and_drag());
        let painter = ui.painter_at(rect);
        painter.image(texture.id(), rect, FULL_UV, egui::Color32::WHITE);
        let transform = PageTransform::new(rect.min);
        let clip = ui.clip_rect();

        // Only pages with an annotation key get a layer.
        if self.surface.layer_mut(page).is_some() {
            self.handle_pointer(&ctx, page, rect, transform, clip);

            let render = self.surface.layer(page).map(AnnotationLayer::render).unwrap_or_default();
            self.paint_strokes(&ctx, &painter, page, rect, transform, render.lines);
            self.show_notes(&ctx, &painter, page, transform, &render.texts, &render.sticky_notes);
            self.surface.sync_layer(page, now);
        } else if self.mapping {
            self.handle_pointer(&ctx, page, rect, transform, clip);
        }

        self.show_questions(&ctx, &painter, page, transform, clip);

        if let Some(preview) = self.mapper.preview().filter(|_| self.mapper.page() == page) {
            painter.rect_stroke(
                transform.rect_to_screen(preview),
                0.0,
                egui::Stroke::new(1.5, egui::Color32::from_rgb(31, 111, 235)),
                egui::StrokeKind::Inside,
            );
        }
    }

    fn handle_pointer(
        &mut self,
        ctx: &egui::Context,
        page: u32,
        rect: egui::Rect,
        transform: PageTransform,
        clip: egui::Rect,
    ) {
        let frame = ctx.input(|i| PointerFrame {
            pressed: i.pointer.primary_pressed(),
            down: i.pointer.primary_down(),
            released: i.pointer.primary_released(),
            pos: i.pointer.interact_pos(),
            touch: i.any_touches(),
        });
        let owns_gesture = self.gesture.as_ref().is_some_and(|g| g.page() == page);
        let local = frame.pos.map(|pos| transform.to_local(pos));

        if let (true, Some(pos), Some(local)) = (frame.pressed, frame.pos, local) {
            let blocked = self.modal_open() || self.blockers.iter().any(|r| r.contains(pos));
            if !blocked && rect.contains(pos) && clip.contains(pos) {
                self.press(page, local, frame.touch, transform, clip);
            }
        } else if frame.down && owns_gesture {
            if let Some(local) = local {
                if self.mapper.is_dragging() {
                    self.mapper.update(local);
                } else if let Some(layer) = self.surface.layer_mut(page) {
                    layer.pointer_move(&pointer_input(local, frame.touch));
                }
            }
        }

        if frame.released && owns_gesture {
            self.release(page, local, transform, clip);
        }
    }

    fn press(&mut self, page: u32, local: Point, touch: bool, transform: PageTransform, clip: egui::Rect) {
        self.active_page = Some(page);
        if self.mapping {
            self.mapper.begin(page, local);
            self.gesture = Some(Gesture::Mapping { page });
            return;
        }

        let input = pointer_input(local, touch);
        let widgets = self.widgets.entry(page).or_default();
        let Some(layer) = self.surface.layer_mut(page) else {
            return;
        };

        let editors: HashMap<ElementId, PixelRect> = layer
            .annotations()
            .sticky_notes
            .iter()
            .filter_map(|note| {
                let widget = widgets.sticky(&note.id)?;
                widget
                    .is_expanded()
                    .then(|| (note.id.clone(), widget.expanded_rect(layer.note_rect(note))))
            })
            .collect();
        for event in widgets.outside_click(local, |id| editors.get(id).copied()) {
            apply_note_event(layer, &event);
        }

        layer.pointer_down(&input);
        match layer.mode() {
            DrawingMode::None => {
                if let Some(id) = layer.selected().cloned() {
                    layer.begin_drag(&id, &input);
                    self.gesture = Some(Gesture::Note { page, id, start: local });
                }
            }
            mode if mode.is_stroke() => self.gesture = Some(Gesture::Stroke { page }),
            _ => {
                // Placing a note starts editing it; pressing an existing one selects it.
                let target = layer.editing().or(layer.selected()).cloned();
                if let Some(id) = target {
                    widgets.sync(layer.annotations());
                    open_note(widgets, layer, &id, scroll_bounds(transform, clip), clip.width() as f64);
                    self.focus_note = Some(id);
                }
            }
        }
    }

    fn release(&mut self, page: u32, local: Option<Point>, transform: PageTransform, clip: egui::Rect) {
        match self.gesture.take() {
            Some(Gesture::Mapping { .. }) => {
                let size = self.surface.registry().page_size(page).unwrap_or_default();
                if let Some(rect) = self.mapper.finish(size) {
                    let next = self.surface.questions().len() + 1;
                    self.question_dialog = Some(QuestionDialogState::new(page, rect, next));
                }
            }
            Some(Gesture::Stroke { .. }) => {
                if let Some(layer) = self.surface.layer_mut(page) {
                    layer.pointer_up();
                }
            }
            Some(Gesture::Note { id, start, .. }) => {
                let widgets = self.widgets.entry(page).or_default();
                let Some(layer) = self.surface.layer_mut(page) else {
                    return;
                };
                layer.pointer_up();
                if local.is_some_and(|p| p.distance_to(start) < CLICK_SLOP_PX) {
                    widgets.sync(layer.annotations());
                    open_note(widgets, layer, &id, scroll_bounds(transform, clip), clip.width() as f64);
                    self.focus_note = Some(id);
                }
            }
            None => {}
        }
    }

    fn paint_strokes(
        &mut self,
        ctx: &egui::Context,
        painter: &egui::Painter,
        page: u32,
        rect: egui::Rect,
        transform: PageTransform,
        lines: Vec<PixelLine>,
    ) {
        let ppp = ctx.pixels_per_point();
        let size = [
            (rect.width() * ppp).round() as usize,
            (rect.height() * ppp).round() as usize,
        ];
        if size[0] == 0 || size[1] == 0 {
            return;
        }

        let stale = self
            .overlays
            .get(&page)
            .map_or(true, |o| o.size != size || o.lines != lines);
        if stale {
            let overlay = rasterize(&lines, size[0], size[1], ppp);
            let handle = ctx.load_texture(
                format!("overlay_{page}"),
                overlay.to_color_image(),
                egui::TextureOptions::LINEAR,
            );
            self.overlays.insert(page, OverlayTexture { lines, size, handle });
        }
        if let Some(overlay) = self.overlays.get(&page) {
            painter.image(overlay.handle.id(), rect, FULL_UV, egui::Color32::WHITE);
        }

        if let Some(layer) = self.surface.layer(page) {
            if let Some(stroke) = layer.in_progress_stroke() {
                let ink = to_color32(&layer.settings().stroke, egui::Color32::RED);
                paint_in_progress(painter, transform, &stroke, ink);
            }
        }
    }

    fn show_notes(
        &mut self,
        ctx: &egui::Context,
        painter: &egui::Painter,
        page: u32,
        transform: PageTransform,
        texts: &[PixelNote],
        sticky_notes: &[PixelNote],
    ) {
        let selected = self.surface.layer(page).and_then(|l| l.selected().cloned());
        let widgets = self.widgets.entry(page).or_default();
        if let Some(layer) = self.surface.layer(page) {
            widgets.sync(layer.annotations());
        }
        let mut events: Vec<NoteEvent> = Vec::new();

        for note in texts {
            let size = TextNoteWidget::editor_size(note);
            let rect = transform.rect_to_screen(PixelRect::new(
                note.position.x,
                note.position.y,
                size.width,
                size.height,
            ));
            let Some(widget) = widgets.text_mut(&note.id).filter(|w| w.is_editing()) else {
                paint_text_note(painter, rect, note, selected.as_ref() == Some(&note.id));
                continue;
            };

            let mut text = note.text.clone();
            let area = egui::Area::new(egui::Id::new(("text-note", page, note.id.as_str())))
                .order(egui::Order::Foreground)
                .fixed_pos(rect.min)
                .show(ctx, |ui| {
                    ui.add(
                        egui::TextEdit::multiline(&mut text)
                            .font(egui::FontId::proportional(note.font_size as f32))
                            .desired_width(rect.width().max(80.0))
                            .desired_rows(1),
                    )
                });
            self.next_blockers.push(area.response.rect);
            let response = area.inner;
            if self.focus_note.as_ref() == Some(&note.id) {
                response.request_focus();
                self.focus_note = None;
            }
            if response.changed() {
                events.push(widget.edit(&text));
            }
            if response.lost_focus() {
                events.extend(widget.blur(dimensions_of(response.rect)));
            }
        }

        for note in sticky_notes {
            let size = note.size.unwrap_or(STICKY_NOTE_FOOTPRINT_PX);
            let icon = PixelRect::new(note.position.x, note.position.y, size.width, size.height);
            paint_sticky_icon(
                painter,
                transform.rect_to_screen(icon),
                note,
                selected.as_ref() == Some(&note.id),
            );
            let Some(widget) = widgets.sticky_mut(&note.id).filter(|w| w.is_expanded()) else {
                continue;
            };

            let editor = transform.rect_to_screen(widget.expanded_rect(icon));
            let mut text = note.text.clone();
            let fill = to_color32(&note.fill, egui::Color32::YELLOW);
            let area = egui::Area::new(egui::Id::new(("sticky-note", page, note.id.as_str())))
                .order(egui::Order::Foreground)
                .fixed_pos(editor.min)
                .show(ctx, |ui| {
                    egui::Frame::popup(ui.style()).fill(fill).show(ui, |ui| {
                        ui.set_min_size(editor.size() - egui::vec2(12.0, 12.0));
                        ui.add(
                            egui::TextEdit::multiline(&mut text)
                                .desired_width(editor.width() - 16.0)
                                .desired_rows(6)
                                .frame(false),
                        )
                    })
                    .inner
                });
            self.next_blockers.push(area.response.rect);
            let response = area.inner;
            if self.focus_note.as_ref() == Some(&note.id) {
                response.request_focus();
                self.focus_note = None;
            }
            if response.changed() {
                events.push(widget.edit(&text));
            }
            if response.lost_focus() {
                events.extend(widget.collapse());
            }
        }

        if events.is_empty() {
            return;
        }
        if let Some(layer) = self.surface.layer_mut(page) {
            for event in &events {
                apply_note_event(layer, event);
            }
        }
    }

    fn show_questions(
        &mut self,
        ctx: &egui::Context,
        painter: &egui::Painter,
        page: u32,
        transform: PageTransform,
        clip: egui::Rect,
    ) {
        if let Some(query) = self
            .highlighted_query
            .and_then(|id| self.queries.iter().find(|q| q.id == id))
        {
            if let Some(rect) = self.surface.query_highlight(query, page) {
                paint_highlight(painter, transform.rect_to_screen(rect));
            }
        }

        let mut clicked = None;
        for overlay in self.surface.mark_overlays(page) {
            let rect = transform.rect_to_screen(overlay.rect);
            paint_question_box(
                painter,
                rect,
                &format!("Q{}", overlay.question_number),
                overlay.selected.is_some(),
            );
            if !clip.intersects(rect) || self.mapping {
                continue;
            }

            let area = egui::Area::new(egui::Id::new(("marks", page, overlay.question_id.to_string())))
                .order(egui::Order::Foreground)
                .fixed_pos(rect.left_top() + egui::vec2(40.0, 2.0))
                .show(ctx, |ui| {
                    ui.horizontal_wrapped(|ui| {
                        ui.set_max_width((rect.width() - 48.0).max(120.0));
                        for option in &overlay.options {
                            let selected = overlay.selected == Some(*option);
                            if ui.selectable_label(selected, mark_label(*option)).clicked() {
                                clicked = Some((overlay.question_id, *option));
                            }
                        }
                    });
                });
            self.next_blockers.push(area.response.rect);
        }

        if let Some((question, mark)) = clicked {
            self.select_mark(question, mark);
        }
    }

    fn draw_dialogs(&mut self, ctx: &egui::Context) {
        if let Some(error) = &self.error_dialog {
            if show_error_dialog(ctx, error) {
                self.error_dialog = None;
            }
        }

        let Some(dialog) = &mut self.question_dialog else {
            return;
        };
        match dialog.show(ctx) {
            Some(QuestionDialogAction::Save(draft)) => {
                self.question_dialog = None;
                match self.surface.create_question(draft) {
                    Ok(region) => {
                        info!(question = %region.question_number, page = region.page_number, "question mapped");
                        self.status = Some(format!("Question {} saved", region.question_number));
                    }
                    Err(err) => {
                        self.show_error(ErrorSeverity::Error, format!("Could not save the question: {err}"))
                    }
                }
            }
            Some(QuestionDialogAction::Cancel) => self.question_dialog = None,
            None => {}
        }
    }
}

fn mode_label(mode: MarkingMode) -> &'static str {
    match mode {
        MarkingMode::QuestionByQuestion => "Question by question",
        MarkingMode::StudentByStudent => "Student by student",
    }
}

/// Horizontal extent of the page scroll area in page-local pixels.
fn scroll_bounds(transform: PageTransform, clip: egui::Rect) -> ScrollBounds {
    ScrollBounds {
        left: (clip.left() - transform.origin.x) as f64,
        right: (clip.right() - transform.origin.x) as f64,
    }
}

/// Open the editor of note `id`, as a click on its widget would.
fn open_note(
    widgets: &mut NoteWidgets,
    layer: &mut AnnotationLayer,
    id: &ElementId,
    bounds: ScrollBounds,
    viewport_width: f64,
) {
    let event = if let Some(widget) = widgets.sticky_mut(id) {
        let Some(note) = layer.annotations().note(id) else {
            return;
        };
        let icon = layer.note_rect(note);
        widget.click(icon, Some(bounds), viewport_width)
    } else if let Some(widget) = widgets.text_mut(id) {
        widget.click()
    } else {
        return;
    };
    apply_note_event(layer, &event);
}
