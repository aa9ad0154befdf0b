use std::fmt;

use thiserror::Error;

/// Where in the input module an error was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub function: String,
    pub block: Option<String>,
}

impl Location {
    pub fn function(name: &str) -> Self {
        Location {
            function: name.to_string(),
            block: None,
        }
    }

    pub fn block(function: &str, label: &str) -> Self {
        Location {
            function: function.to_string(),
            block: Some(label.to_string()),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.block {
            Some(label) => write!(f, "@{}:{}", self.function, label),
            None => write!(f, "@{}", self.function),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error("Unsupported construct: {0}")]
    Unsupported(String, Option<Location>),

    #[error("Internal error: {0}")]
    Internal(String, Option<Location>),

    #[error("Inconsistent module: {0}")]
    Inconsistent(String, Option<Location>),

    #[error("Sampler map error: {0}")]
    SamplerMap(String),

    #[error("SPIR-V readback error: {0}")]
    Readback(String),

    #[error("Parse error: {0}")]
    ParseError(#[from] kir::ParseError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProducerError {
    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Unsupported(_, loc) => loc.as_ref(),
            Self::Internal(_, loc) => loc.as_ref(),
            Self::Inconsistent(_, loc) => loc.as_ref(),
            Self::SamplerMap(_) | Self::Readback(_) | Self::ParseError(_) | Self::IoError(_) => {
                None
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ProducerError>;

// Bail macros without location

#[macro_export]
macro_rules! bail_unsupported {
    ($($arg:tt)*) => {
        return Err($crate::error::ProducerError::Unsupported(format!($($arg)*), None))
    };
}

#[macro_export]
macro_rules! bail_internal {
    ($($arg:tt)*) => {
        return Err($crate::error::ProducerError::Internal(format!($($arg)*), None))
    };
}

#[macro_export]
macro_rules! bail_inconsistent {
    ($($arg:tt)*) => {
        return Err($crate::error::ProducerError::Inconsistent(format!($($arg)*), None))
    };
}

// Bail macros with location

#[macro_export]
macro_rules! bail_unsupported_at {
    ($loc:expr, $($arg:tt)*) => {
        return Err($crate::error::ProducerError::Unsupported(format!($($arg)*), Some($loc)))
    };
}

#[macro_export]
macro_rules! bail_inconsistent_at {
    ($loc:expr, $($arg:tt)*) => {
        return Err($crate::error::ProducerError::Inconsistent(format!($($arg)*), Some($loc)))
    };
}
