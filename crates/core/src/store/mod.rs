//! Persistence collaborator.
//!
//! The engine never owns storage. Everything it reads arrives through [`AdtStore`] already
//! queried, and every side effect (saving or voiding a visit, saving an encounter, merging patient
//! identities) goes back through it. Implementations are expected to make each engine operation a
//! single unit of work.
//!
//! [`InMemoryStore`] is the reference implementation used by tests and the runner.

mod memory;

pub use memory::{InMemoryStore, Relationship, StoreSnapshot};

use crate::model::{DispositionDescriptor, Encounter, Obs, Patient, Provider, Visit};
use adt_types::{EncounterType, LocationId, PatientId, UserId, VisitId, VisitType};
use chrono::{DateTime, Utc};

/// Errors raised by a store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A referenced record does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Snapshot could not be read or written in its serialised form
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error while reading or writing a snapshot
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other backend failure
    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ============================================================================
// QUERIES
// ============================================================================

/// Filter for [`AdtStore::visits`]. `None` list fields do not filter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisitQuery {
    pub patients: Option<Vec<PatientId>>,
    pub locations: Option<Vec<LocationId>>,
    pub visit_types: Option<Vec<VisitType>>,
    pub started_on_or_before: Option<DateTime<Utc>>,
    /// Open visits always satisfy this bound.
    pub ended_on_or_after: Option<DateTime<Utc>>,
    pub include_inactive: bool,
    pub include_voided: bool,
}

impl VisitQuery {
    /// Open, non-voided visits of one patient.
    pub fn for_patient(patient: PatientId) -> Self {
        Self {
            patients: Some(vec![patient]),
            ..Self::default()
        }
    }

    pub fn at_locations(mut self, locations: impl IntoIterator<Item = LocationId>) -> Self {
        self.locations = Some(locations.into_iter().collect());
        self
    }

    pub fn of_type(mut self, visit_type: VisitType) -> Self {
        self.visit_types = Some(vec![visit_type]);
        self
    }

    pub fn including_inactive(mut self) -> Self {
        self.include_inactive = true;
        self
    }

    pub fn including_voided(mut self) -> Self {
        self.include_voided = true;
        self
    }

    /// Visits overlapping `[start, stop]`; an open `stop` only bounds the start.
    pub fn during(mut self, start: DateTime<Utc>, stop: Option<DateTime<Utc>>) -> Self {
        self.started_on_or_before = stop;
        self.ended_on_or_after = Some(start);
        self.include_inactive = true;
        self
    }

    /// True if `visit` satisfies every filter.
    pub fn matches(&self, visit: &Visit) -> bool {
        if visit.voided && !self.include_voided {
            return false;
        }
        if !visit.is_active() && !self.include_inactive {
            return false;
        }
        if self.patients.as_ref().is_some_and(|p| !p.contains(&visit.patient)) {
            return false;
        }
        if let Some(locations) = &self.locations {
            if !visit.location.is_some_and(|l| locations.contains(&l)) {
                return false;
            }
        }
        if self
            .visit_types
            .as_ref()
            .is_some_and(|types| !types.contains(&visit.visit_type))
        {
            return false;
        }
        if self.started_on_or_before.is_some_and(|bound| visit.start > bound) {
            return false;
        }
        if let (Some(bound), Some(stop)) = (self.ended_on_or_after, visit.stop) {
            if stop < bound {
                return false;
            }
        }
        true
    }
}

/// Parameters of the admission/transfer/discharge encounter report.
///
/// Rows are drawn from open, non-voided visits only.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdtEncounterQuery {
    pub visit_location: Option<LocationId>,
    pub encounter_types: Vec<EncounterType>,
    pub patients: Option<Vec<PatientId>>,
    pub visits: Option<Vec<VisitId>>,
}

/// One ADT encounter together with the visit it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct AdtEncounterRow {
    pub visit: VisitId,
    pub patient: PatientId,
    pub encounter: Encounter,
}

/// Parameters of the pending inpatient request report.
///
/// A request is the most recent disposition group of an open visit, provided its answer is in
/// `disposition_codes`, no ADT encounter followed it, and no denial decision followed it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InpatientRequestQuery {
    pub visit_location: Option<LocationId>,
    pub disposition_codes: Vec<String>,
    pub descriptor: DispositionDescriptor,
    pub adt_encounter_types: Vec<EncounterType>,
    pub admission_decision_concept: Option<String>,
    pub deny_admission_concept: Option<String>,
    pub patients: Option<Vec<PatientId>>,
    pub visits: Option<Vec<VisitId>>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InpatientRequestRow {
    pub visit: VisitId,
    pub patient: PatientId,
    pub encounter: Encounter,
    /// The disposition obs group.
    pub disposition_obs: Obs,
}

/// Parameters of the mother/child relationship report.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MotherChildQuery {
    pub relationship_type: String,
    pub mothers: Option<Vec<PatientId>>,
    pub children: Option<Vec<PatientId>>,
    pub require_mother_has_active_visit: bool,
    pub require_child_has_active_visit: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MotherChildRow {
    pub mother: PatientId,
    pub child: PatientId,
}

// ============================================================================
// STORE TRAIT
// ============================================================================

pub trait AdtStore: Send + Sync {
    /// Visits matching `query`, ordered by start then insertion.
    fn visits(&self, query: &VisitQuery) -> StoreResult<Vec<Visit>>;

    fn visit(&self, id: VisitId) -> StoreResult<Option<Visit>>;

    fn patient(&self, id: PatientId) -> StoreResult<Option<Patient>>;

    /// Non-voided encounters of a patient, oldest first.
    fn encounters_by_patient(&self, patient: PatientId) -> StoreResult<Vec<Encounter>>;

    fn providers_for_user(&self, user: UserId) -> StoreResult<Vec<Provider>>;

    /// Inserts or replaces the visit, including its encounter list.
    fn save_visit(&self, visit: &Visit) -> StoreResult<()>;

    /// Voids the visit and every encounter it still holds, updating `visit` to match.
    fn void_visit(&self, visit: &mut Visit, reason: &str) -> StoreResult<()>;

    /// Stores the encounter under the visit it names, removing it from any other visit.
    fn save_encounter(&self, encounter: &Encounter) -> StoreResult<()>;

    fn save_patient(&self, patient: &Patient) -> StoreResult<()>;

    /// Folds `non_preferred`'s identity and remaining records into `preferred`.
    fn merge_patients(&self, preferred: PatientId, non_preferred: PatientId) -> StoreResult<()>;

    fn adt_encounter_rows(&self, query: &AdtEncounterQuery) -> StoreResult<Vec<AdtEncounterRow>>;

    fn inpatient_request_rows(
        &self,
        query: &InpatientRequestQuery,
    ) -> StoreResult<Vec<InpatientRequestRow>>;

    fn mother_child_rows(&self, query: &MotherChildQuery) -> StoreResult<Vec<MotherChildRow>>;

    /// All of a patient's visits, optionally including closed and voided ones.
    fn visits_by_patient(
        &self,
        patient: PatientId,
        include_inactive: bool,
        include_voided: bool,
    ) -> StoreResult<Vec<Visit>> {
        let query = VisitQuery {
            include_inactive,
            include_voided,
            ..VisitQuery::for_patient(patient)
        };
        self.visits(&query)
    }
}
