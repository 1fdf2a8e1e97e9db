use thiserror::Error;

/// Error type for version, compat and range parsing and evaluation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid version \"{given}\": {reason}")]
    InvalidVersion { given: String, reason: String },

    #[error("Invalid version tag \"{given}\": {reason}")]
    InvalidTag { given: String, reason: String },

    #[error("Invalid compat specifier \"{given}\": {reason}")]
    InvalidCompat { given: String, reason: String },

    #[error("Invalid version range \"{given}\": {reason}")]
    InvalidRange { given: String, reason: String },

    #[error("Version ranges do not intersect: {first} && {second}")]
    EmptyIntersection { first: String, second: String },
}

pub type Result<T> = std::result::Result<T, Error>;
