use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    UnknownInstallPhase(u8),
    KeyNotLowercase(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::UnknownInstallPhase(phase) => {
                write!(f, "unrecognised install phase {phase}")
            }
            ModelError::KeyNotLowercase(key) => {
                write!(f, "key {key:?} is not lower case")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
