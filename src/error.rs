pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("precondition error: {0}")]
    Precondition(String),

    #[error("packaging error: {0}")]
    Packaging(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn packaging(msg: impl Into<String>) -> Self {
        Self::Packaging(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    /// Process exit code for this error. Configuration and precondition
    /// failures (conflicting flags, existing output without `--overwrite`)
    /// map to 1; collaborator failures map to 2.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Precondition(_) => 1,
            Self::Packaging(_) | Self::Render(_) | Self::Encode(_) | Self::Other(_) => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            PipelineError::config("x")
                .to_string()
                .contains("configuration error:")
        );
        assert!(
            PipelineError::precondition("x")
                .to_string()
                .contains("precondition error:")
        );
        assert!(
            PipelineError::packaging("x")
                .to_string()
                .contains("packaging error:")
        );
        assert!(PipelineError::render("x").to_string().contains("render error:"));
        assert!(PipelineError::encode("x").to_string().contains("encode error:"));
    }

    #[test]
    fn exit_codes_follow_taxonomy() {
        assert_eq!(PipelineError::config("x").exit_code(), 1);
        assert_eq!(PipelineError::precondition("x").exit_code(), 1);
        assert_eq!(PipelineError::packaging("x").exit_code(), 2);
        assert_eq!(PipelineError::render("x").exit_code(), 2);
        assert_eq!(PipelineError::encode("x").exit_code(), 2);
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = PipelineError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
