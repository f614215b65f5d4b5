//! # ADT Core
//!
//! Visit lifecycle and inpatient movement (admission, discharge, transfer) for a clinical record
//! system.
//!
//! This crate contains the pure domain logic:
//! - Resolving the visit location for any location in the hierarchy
//! - Deciding when a visit is active, suitable, or due to be closed
//! - Check-in, retrospective visits and admission/transfer/discharge encounters
//! - Merging visits, consecutive visits and whole patients
//! - Deriving inpatient admissions and pending admission requests
//!
//! **No transport concerns**: persistence sits behind the [`store::AdtStore`] trait. The
//! in-memory store backs the runner and the tests.

pub mod activity;
pub mod admission;
pub mod adt;
pub mod checkin;
pub mod config;
pub mod constants;
pub mod error;
pub mod location;
pub mod matcher;
pub mod maternal;
pub mod merge;
pub mod model;
pub mod service;
pub mod store;
pub mod visit;

#[cfg(test)]
mod test_support;

pub use adt_types::{
    EncounterId, EncounterRole, EncounterType, LocationId, NonEmptyText, PatientId, ProviderId,
    VisitId, VisitType,
};
pub use config::{AdtConfig, AdtSettings};
pub use error::{AdtError, AdtResult};
pub use location::{Location, LocationTree};
pub use service::AdtService;
pub use store::{AdtStore, InMemoryStore, StoreError, StoreSnapshot};
