use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy for the request pipeline. Each stage maps its own
/// failures at the call site; nothing here is retried automatically.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("prompt template error: {0}")]
    Template(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("malformed model output: {0}")]
    MalformedOutput(String),
}
