//! Common result and error types for tessera.

/// An internal error: a broken invariant of the incremental cache, not a
/// problem with the user's input.
///
/// Continuing after one would silently produce a stale or inconsistent
/// incremental result, so these always abort the run.
#[derive(Debug, thiserror::Error)]
#[error("IC internal error: {message}")]
pub struct InternalError {
    /// Description of the broken invariant, naming the library, file or
    /// signature involved.
    pub message: String,
}

impl InternalError {
    /// Creates a new internal error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Creates the error reported when an expected entity is missing.
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(format!("can not find {what}"))
    }
}

impl From<String> for InternalError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        let err = InternalError::new("unexpected dirty file");
        assert_eq!(format!("{err}"), "IC internal error: unexpected dirty file");
    }

    #[test]
    fn not_found_format() {
        let err = InternalError::not_found("main library");
        assert_eq!(err.message, "can not find main library");
    }

    #[test]
    fn from_string() {
        let err: InternalError = "from string".to_string().into();
        assert_eq!(err.message, "from string");
    }
}
