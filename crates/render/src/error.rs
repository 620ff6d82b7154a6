use thiserror::Error;

/// Errors raised while loading or rasterizing an answer sheet
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("PDFium initialization error: {0}")]
    Initialization(String),

    #[error("PDF load error: {0}")]
    Load(String),

    /// 1-based page number outside the document
    #[error("invalid page: {0}")]
    InvalidPage(u32),

    #[error("PDF render error: {0}")]
    Render(String),
}

pub type RenderResult<T> = Result<T, RenderError>;
