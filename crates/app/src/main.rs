//! Marking Desk
//!
//! egui front end for annotating and marking student answer sheets.

mod app;
mod demo;
mod dialogs;
mod overlay;
mod page_view;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use eframe::egui;
use marking_client::HttpMarkingService;
use marking_core::{AssessmentId, MarkingMode, Services, SurfaceConfig};
use marking_render::PdfRenderer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// One question across every student
    Question,
    /// Every page of one student
    Student,
}

impl From<ModeArg> for MarkingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Question => MarkingMode::QuestionByQuestion,
            ModeArg::Student => MarkingMode::StudentByStudent,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "marking-desk")]
#[command(about = "Annotate and mark student answer sheets")]
struct Args {
    /// Assessment to mark; required when an API URL is configured
    #[arg(long, value_parser = parse_assessment)]
    assessment: Option<AssessmentId>,

    /// Config file (defaults to the user config directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ModeArg::Student)]
    mode: ModeArg,

    /// Answer sheet for offline practice marking without a server
    #[arg(long, value_name = "PDF")]
    sheet: Option<PathBuf>,
}

fn parse_assessment(value: &str) -> std::result::Result<AssessmentId, String> {
    AssessmentId::parse(value).ok_or_else(|| format!("'{value}' is not a valid assessment id"))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_services(args: &Args, config: &SurfaceConfig) -> Result<(Services, AssessmentId)> {
    if config.api_base_url.is_some() {
        let Some(assessment) = args.assessment else {
            bail!("--assessment is required when an API URL is configured");
        };
        let http = Arc::new(HttpMarkingService::from_config(config)?);
        let services = Services {
            marking: http.clone(),
            questions: http.clone(),
            blobs: http.clone(),
            queries: http,
        };
        return Ok((services, assessment));
    }

    let sheet = match &args.sheet {
        Some(path) => path.clone(),
        None => match rfd::FileDialog::new()
            .set_title("Choose an answer sheet to practise on")
            .add_filter("PDF", &["pdf"])
            .pick_file()
        {
            Some(path) => path,
            None => bail!("no API URL configured and no answer sheet chosen"),
        },
    };
    let bytes = std::fs::read(&sheet)
        .with_context(|| format!("failed to read {}", sheet.display()))?;
    let (backend, assessment) = demo::seed(bytes);
    tracing::info!(sheet = %sheet.display(), "offline practice session");
    Ok((Services::memory(backend), assessment))
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(SurfaceConfig::default_path);
    let config = SurfaceConfig::load(Some(&config_path))
        .with_context(|| format!("invalid configuration in {}", config_path.display()))?;
    let (services, assessment) = build_services(&args, &config)?;

    // One PDFium binding for the life of the process.
    let renderer: &'static PdfRenderer = Box::leak(Box::new(PdfRenderer::init()?));

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 860.0])
            .with_min_inner_size([800.0, 600.0])
            .with_title("Marking Desk"),
        ..Default::default()
    };
    let mode = MarkingMode::from(args.mode);

    eframe::run_native(
        "Marking Desk",
        options,
        Box::new(move |cc| {
            Ok(Box::new(app::MarkingDeskApp::new(
                &cc.egui_ctx,
                config,
                services,
                assessment,
                mode,
                renderer,
            )))
        }),
    )
    .map_err(|e| anyhow::anyhow!("window error: {e}"))
}
