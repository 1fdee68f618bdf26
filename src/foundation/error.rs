pub type SpritecastResult<T> = Result<T, SpritecastError>;

#[derive(thiserror::Error, Debug)]
pub enum SpritecastError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },

    #[error("cache error: {0}")]
    Cache(String),

    #[error("composition error: {0}")]
    Composition(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SpritecastError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn stage(stage: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.to_string(),
            message: message.into(),
        }
    }

    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    pub fn composition(msg: impl Into<String>) -> Self {
        Self::Composition(msg.into())
    }
}
