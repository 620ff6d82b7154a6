use eframe::egui;
use marking_core::{PercentageRect, QueryId, QueryResponse, QueryStatus, QuestionDraft};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorSeverity {
    Error,
    Warning,
}

impl ErrorSeverity {
    fn icon(&self) -> &'static str {
        match self {
            ErrorSeverity::Error => "❌",
            ErrorSeverity::Warning => "⚠️",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ErrorSeverity::Error => "Error",
            ErrorSeverity::Warning => "Warning",
        }
    }
}

pub struct ErrorDialogState {
    pub severity: ErrorSeverity,
    pub message: String,
}

/// Blocking alert. Returns true once dismissed.
pub fn show_error_dialog(ctx: &egui::Context, error: &ErrorDialogState) -> bool {
    let title = format!("{} {}", error.severity.icon(), error.severity.title());
    let mut dismissed = false;
    egui::Window::new(title)
        .collapsible(false)
        .resizable(false)
        .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
        .show(ctx, |ui| {
            ui.label(&error.message);
            ui.add_space(12.0);
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Min), |ui| {
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });
        });
    dismissed
}

/// Metadata form for a freshly mapped question region
pub struct QuestionDialogState {
    pub page: u32,
    pub rect: PercentageRect,
    pub number: String,
    pub max_marks: String,
    pub increment: String,
    pub memo: String,
}

pub enum QuestionDialogAction {
    Save(QuestionDraft),
    Cancel,
}

impl QuestionDialogState {
    pub fn new(page: u32, rect: PercentageRect, next_number: usize) -> Self {
        Self {
            page,
            rect,
            number: next_number.to_string(),
            max_marks: "5".into(),
            increment: "1".into(),
            memo: String::new(),
        }
    }

    /// Parse the form. Range checks are left to `QuestionDraft::validate`.
    pub fn to_draft(&self) -> Result<QuestionDraft, String> {
        let max_marks = self
            .max_marks
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a number of marks", self.max_marks.trim()))?;
        let increment = self
            .increment
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a mark increment", self.increment.trim()))?;
        let memo = self.memo.trim();
        Ok(QuestionDraft {
            question_number: self.number.clone(),
            page_number: self.page,
            rect: self.rect,
            max_marks,
            increment,
            memo: (!memo.is_empty()).then(|| memo.to_string()),
            marking_note: None,
        })
    }

    pub fn show(&mut self, ctx: &egui::Context) -> Option<QuestionDialogAction> {
        let mut action = None;
        egui::Window::new("New question")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(format!(
                    "Page {} at {:.1}%, {:.1}% ({:.1}% × {:.1}%)",
                    self.page, self.rect.x, self.rect.y, self.rect.width, self.rect.height
                ));
                ui.add_space(8.0);
                egui::Grid::new("question_form").num_columns(2).show(ui, |ui| {
                    ui.label("Question");
                    ui.text_edit_singleline(&mut self.number);
                    ui.end_row();
                    ui.label("Max marks");
                    ui.text_edit_singleline(&mut self.max_marks);
                    ui.end_row();
                    ui.label("Increment");
                    ui.text_edit_singleline(&mut self.increment);
                    ui.end_row();
                    ui.label("Memo");
                    ui.text_edit_multiline(&mut self.memo);
                    ui.end_row();
                });

                let draft = self.to_draft();
                if let Err(message) = &draft {
                    ui.colored_label(ui.visuals().error_fg_color, message);
                }
                ui.add_space(12.0);
                ui.horizontal(|ui| {
                    if ui.button("Cancel").clicked() {
                        action = Some(QuestionDialogAction::Cancel);
                    }
                    if let Ok(draft) = draft {
                        if ui.button("Save").clicked() {
                            action = Some(QuestionDialogAction::Save(draft));
                        }
                    }
                });
            });
        action
    }
}

/// Lecturer's reply to the selected mark query
pub struct QueryReplyState {
    pub query: QueryId,
    pub text: String,
    pub new_mark: String,
}

impl QueryReplyState {
    pub fn new(query: QueryId) -> Self {
        Self {
            query,
            text: String::new(),
            new_mark: String::new(),
        }
    }

    /// Build the response. A blank new mark leaves the stored mark alone.
    pub fn to_response(&self, status: QueryStatus) -> Result<QueryResponse, String> {
        let new_mark = match self.new_mark.trim() {
            "" => None,
            raw => Some(
                raw.parse::<f64>()
                    .map_err(|_| format!("'{raw}' is not a mark"))?,
            ),
        };
        let response = QueryResponse {
            status,
            reviewer_response: self.text.trim().to_string(),
            new_mark,
        };
        response.validate().map_err(|e| e.to_string())?;
        Ok(response)
    }
}
