use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchingError {
    #[error("Invalid title grammar: {0}")]
    InvalidPattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, MatchingError>;
