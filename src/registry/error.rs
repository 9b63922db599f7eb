//! Registry error types

use thiserror::Error;

/// Errors raised by the subscription registry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A live connection already uses this uid
    #[error("A connection with uid {0:?} is already registered")]
    DuplicateUid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RegistryError::DuplicateUid("abc".to_string());
        assert_eq!(
            err.to_string(),
            "A connection with uid \"abc\" is already registered"
        );
    }
}
