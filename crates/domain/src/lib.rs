pub mod attribute_action;
pub mod error;
pub mod ingest;
pub mod memory;
pub mod ports;
pub mod review;
pub mod review_id;
pub mod review_store;
pub mod sequence;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
