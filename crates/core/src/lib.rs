//! Marking Core Library
//!
//! Annotation and coordinate-mapping model for the assessment marking desk:
//! percentage/pixel transforms, the per-page annotation layer, note widgets,
//! question regions, mark queries, backend contracts and the marking surface
//! that ties them together.

pub mod annotation;
pub mod autosave;
pub mod blob;
pub mod cancel;
pub mod config;
pub mod coords;
pub mod eraser;
pub mod error;
pub mod history;
pub mod ids;
pub mod layer;
pub mod notes;
pub mod page_registry;
pub mod query;
pub mod question;
pub mod service;
pub mod surface;

pub use annotation::{
    parse_css_color, AnnotationSet, CompositeOperation, ElementId, LineElement, NoteElement,
    PixelAnnotations, PixelLine, PixelNote, StickyNoteElement, TextElement, ToolKind,
};
pub use autosave::{AutoSaver, SaveReport};
pub use blob::{BlobHandle, BlobRegistry};
pub use cancel::{CancellationToken, LoadGeneration, LoadTicket};
pub use config::{ConfigError, SurfaceConfig};
pub use coords::{
    percentage_to_pixels, pixels_to_percentage, Dimensions, PageSize, PercentageRect, PixelRect,
    Point,
};
pub use error::{MarkingError, Result};
pub use history::HistoryStack;
pub use ids::{AssessmentId, FileId, QueryId, QuestionId, StudentId};
pub use layer::{
    AnnotationLayer, Command, DrawingMode, HistoryState, LayerEvent, LayerKey, LayerSettings,
    PointerInput,
};
pub use notes::{NoteEvent, NoteWidgets, StickyNoteWidget, TextNoteWidget};
pub use page_registry::PageRenderRegistry;
pub use query::{MarkQuery, QueryDraft, QueryResponse, QueryStats, QueryStatus, QueryType};
pub use question::{mark_options, QuestionDraft, QuestionMapper, QuestionRegion};
pub use service::{
    AnnotationKey, BlobStore, MarkingMode, MarkingService, MemoryMarkingService, QueryService,
    QuestionResult, QuestionService, ResultKey, Student,
};
pub use surface::{
    Direction, MarkOverlay, MarkingSurface, SaveBatch, SaveResults, Services, TickOutcome,
    ViewRequest,
};
