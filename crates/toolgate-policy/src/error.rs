/// Errors raised while building or mutating policy state.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("invalid glob pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("invalid session command: {0}")]
    InvalidSessionCommand(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pattern_display() {
        let source = glob::Pattern::new("[").unwrap_err();
        let err = PolicyError::InvalidPattern {
            pattern: "[".into(),
            source,
        };
        assert!(err.to_string().starts_with("invalid glob pattern `[`"));
    }

    #[test]
    fn invalid_session_command_display() {
        let err = PolicyError::InvalidSessionCommand("unknown subcommand `foo`".into());
        assert_eq!(
            err.to_string(),
            "invalid session command: unknown subcommand `foo`"
        );
    }
}
