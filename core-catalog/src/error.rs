use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Record {0} was already enriched as a parent")]
    AlreadyEnriched(String),

    #[error("Invalid match result for {source_id}: {reason}")]
    InvalidMatch { source_id: String, reason: String },

    #[error("Record {external_id} is missing required attribute '{attribute}'")]
    MissingAttribute {
        external_id: String,
        attribute: String,
    },
}

pub type Result<T> = std::result::Result<T, CatalogError>;
