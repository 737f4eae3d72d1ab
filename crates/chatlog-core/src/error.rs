use chatlog_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Rejected before anything was written
    #[error("{0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(StoreError),

    #[error("provider error: {0:#}")]
    Provider(anyhow::Error),
}

impl From<StoreError> for ChatError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidInput(msg) => Self::Validation(msg),
            other => Self::Storage(other),
        }
    }
}

impl ChatError {
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
