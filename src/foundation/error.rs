pub type StrandResult<T> = Result<T, StrandError>;

#[derive(thiserror::Error, Debug)]
pub enum StrandError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("unresolvable mapping conflict: {0}")]
    UnresolvableConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("pipeline is not running")]
    NotRunning,

    #[error("pipeline is already running")]
    AlreadyRunning,

    #[error("render error: {0}")]
    Render(String),

    #[error("invalid frame token for generation {generation}")]
    InvalidToken { generation: u64 },

    #[error("framebuffer range {start}..{end} exceeds capacity {capacity}")]
    OutOfRange {
        start: usize,
        end: usize,
        capacity: usize,
    },

    #[error("a frame generation is already open")]
    BusyFrame,

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StrandError {
    pub fn invalid_arg(msg: impl Into<String>) -> Self {
        Self::InvalidArg(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::UnresolvableConflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
