use std::num::ParseIntError;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TimestampParseError {
    #[error("Expected '<physical_ms>:<logical>', got: {0}")]
    Format(String),

    #[error("Invalid physical component: {0}")]
    InvalidPhysical(ParseIntError),

    #[error("Invalid logical component: {0}")]
    InvalidLogical(ParseIntError),

    #[error("Physical component {0} ms does not fit in 48 bits")]
    PhysicalOutOfRange(u64),
}
