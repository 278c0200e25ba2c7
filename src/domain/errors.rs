#[derive(Debug, Clone, PartialEq)]
pub enum DomainError {
    InvalidPosition(String),
    InvalidFormula(String),
    CircularReference,
}

impl std::fmt::Display for DomainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainError::InvalidPosition(position) => {
                write!(f, "Invalid cell position: {}", position)
            }
            DomainError::InvalidFormula(message) => {
                write!(f, "Invalid formula: {}", message)
            }
            DomainError::CircularReference => {
                write!(f, "Circular reference detected")
            }
        }
    }
}

impl std::error::Error for DomainError {}

pub type DomainResult<T> = Result<T, DomainError>;
