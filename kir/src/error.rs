use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("Invalid type: {0}")]
    InvalidType(String),

    #[error("Invalid address space: {0}")]
    InvalidAddressSpace(String),

    #[error("Invalid instruction: {0}")]
    InvalidInstruction(String),

    #[error("Invalid literal: {0}")]
    InvalidLiteral(String),

    #[error("Duplicate label: {0} in function @{1}")]
    DuplicateLabel(String, String),

    #[error("Duplicate definition: {0}")]
    DuplicateDefinition(String),

    #[error("Parse error: {0}")]
    NomError(String),
}

pub type Result<T> = std::result::Result<T, ParseError>;
