use crate::store::StoreError;
use adt_types::{LocationId, PatientId, TypesError};

#[derive(Debug, thiserror::Error)]
pub enum AdtError {
    /// Required metadata is missing or ambiguous (tags, types, thresholds, provider accounts).
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("encounter matcher not found: {0}")]
    EncounterMatcherNotFound(String),

    /// The caller asked for something invalid. Raised before any mutation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("patient {patient} already has a visit at location {location} during the requested time period")]
    ExistingVisitDuringTimePeriod {
        patient: PatientId,
        location: LocationId,
    },

    #[error("invalid disposition location: {0}")]
    InvalidDispositionLocation(String),

    #[error("unable to merge patients: {0}")]
    PatientMerge(#[source] StoreError),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid value: {0}")]
    Types(#[from] TypesError),
}

pub type AdtResult<T> = std::result::Result<T, AdtError>;
