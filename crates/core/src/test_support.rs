//! Shared fixtures for unit tests.

use crate::config::{AdtConfig, AdtSettings};
use crate::location::{Location, LocationTree};
use crate::model::{
    Disposition, DispositionType, Encounter, Obs, ObsValue, Patient, Provider, Visit,
};
use crate::store::{
    AdtEncounterQuery, AdtEncounterRow, AdtStore, InMemoryStore, InpatientRequestQuery,
    InpatientRequestRow, MotherChildQuery, MotherChildRow, StoreError, StoreResult, VisitQuery,
};
use adt_types::{EncounterType, LocationId, PatientId, UserId, VisitId};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

pub(crate) const HOSPITAL: LocationId = LocationId::new(1);
pub(crate) const OUTPATIENT: LocationId = LocationId::new(2);
pub(crate) const WARD_A: LocationId = LocationId::new(3);
pub(crate) const WARD_B: LocationId = LocationId::new(4);
pub(crate) const CLINIC: LocationId = LocationId::new(5);

/// 2024-01-`day` at `hour`:00 UTC.
pub(crate) fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap()
}

fn disposition(
    unique_id: &str,
    code: &str,
    disposition_type: Option<DispositionType>,
    keeps_visit_open: bool,
) -> Disposition {
    Disposition {
        unique_id: unique_id.into(),
        name: unique_id.into(),
        concept_code: code.into(),
        disposition_type,
        keeps_visit_open,
    }
}

pub(crate) fn test_settings() -> AdtSettings {
    AdtSettings {
        visit_expire_hours: 6,
        admission_decision_concept: Some("Admission decision".into()),
        deny_admission_concept: Some("Deny admission".into()),
        dispositions: vec![
            disposition("admit", "ADMIT", Some(DispositionType::Admit), false),
            disposition("observe", "OBSERVE", None, true),
            disposition("transfer", "TRANSFER", Some(DispositionType::Transfer), false),
            disposition("home", "HOME", Some(DispositionType::Discharge), false),
        ],
        mother_child_relationship_type: Some("Mother/Child".into()),
        ..AdtSettings::default()
    }
}

pub(crate) fn test_config() -> AdtConfig {
    AdtConfig::new(test_settings()).unwrap()
}

/// Hospital(1, visits) -> Outpatient(2), Ward A(3), Ward B(4); Clinic(5, visits).
pub(crate) fn test_tree() -> LocationTree {
    LocationTree::new([
        Location::new(HOSPITAL, "Hospital", None).with_tag("Visit Location"),
        Location::new(OUTPATIENT, "Outpatient", Some(HOSPITAL)),
        Location::new(WARD_A, "Ward A", Some(HOSPITAL)).with_tag("Admission Location"),
        Location::new(WARD_B, "Ward B", Some(HOSPITAL)).with_tag("Admission Location"),
        Location::new(CLINIC, "Clinic", None).with_tag("Visit Location"),
    ])
}

/// A disposition obs group answering `code`.
pub(crate) fn disposition_obs(code: &str) -> Obs {
    Obs::group(
        "Disposition construct",
        vec![Obs::new("Disposition", ObsValue::Coded(code.into()))],
    )
}

pub(crate) struct TestEnv {
    pub cfg: Arc<AdtConfig>,
    pub tree: Arc<LocationTree>,
    pub store: Arc<InMemoryStore>,
}

impl TestEnv {
    pub fn new() -> Self {
        let tree = test_tree();
        Self {
            cfg: Arc::new(test_config()),
            store: Arc::new(InMemoryStore::new(tree.clone())),
            tree: Arc::new(tree),
        }
    }

    pub fn store(&self) -> Arc<dyn AdtStore> {
        self.store.clone()
    }

    pub fn patient(&self) -> Patient {
        let patient = Patient::new(PatientId::new());
        self.store.save_patient(&patient).unwrap();
        patient
    }

    /// Saves a visit at the hospital.
    pub fn visit(&self, patient: PatientId, start: DateTime<Utc>, stop: Option<DateTime<Utc>>) -> Visit {
        let mut visit = Visit::new(
            patient,
            Some(HOSPITAL),
            self.cfg.at_facility_visit_type().clone(),
            start,
        );
        visit.stop = stop;
        self.store.save_visit(&visit).unwrap();
        visit
    }

    /// Adds an encounter to `visit` and saves it.
    pub fn encounter(
        &self,
        visit: &mut Visit,
        encounter_type: &EncounterType,
        when: DateTime<Utc>,
        location: LocationId,
    ) -> Encounter {
        let encounter = Encounter::new(visit.patient, encounter_type.clone(), Some(location), when);
        visit.add_encounter(encounter);
        self.store.save_visit(visit).unwrap();
        visit.encounters.last().cloned().unwrap()
    }
}

/// Delegates to an [`InMemoryStore`], failing the writes it is told to.
pub(crate) struct FailingStore {
    inner: Arc<InMemoryStore>,
    failing_visit: Option<VisitId>,
    failing_patient_merge: bool,
}

impl FailingStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            failing_visit: None,
            failing_patient_merge: false,
        }
    }

    /// `save_visit` fails for this visit only.
    pub fn failing_visit(mut self, id: VisitId) -> Self {
        self.failing_visit = Some(id);
        self
    }

    pub fn failing_patient_merge(mut self) -> Self {
        self.failing_patient_merge = true;
        self
    }
}

impl AdtStore for FailingStore {
    fn visits(&self, query: &VisitQuery) -> StoreResult<Vec<Visit>> {
        self.inner.visits(query)
    }

    fn visit(&self, id: VisitId) -> StoreResult<Option<Visit>> {
        self.inner.visit(id)
    }

    fn patient(&self, id: PatientId) -> StoreResult<Option<Patient>> {
        self.inner.patient(id)
    }

    fn encounters_by_patient(&self, patient: PatientId) -> StoreResult<Vec<Encounter>> {
        self.inner.encounters_by_patient(patient)
    }

    fn providers_for_user(&self, user: UserId) -> StoreResult<Vec<Provider>> {
        self.inner.providers_for_user(user)
    }

    fn save_visit(&self, visit: &Visit) -> StoreResult<()> {
        if self.failing_visit == Some(visit.id) {
            return Err(StoreError::Backend(format!("visit {} is locked", visit.id)));
        }
        self.inner.save_visit(visit)
    }

    fn void_visit(&self, visit: &mut Visit, reason: &str) -> StoreResult<()> {
        self.inner.void_visit(visit, reason)
    }

    fn save_encounter(&self, encounter: &Encounter) -> StoreResult<()> {
        self.inner.save_encounter(encounter)
    }

    fn save_patient(&self, patient: &Patient) -> StoreResult<()> {
        self.inner.save_patient(patient)
    }

    fn merge_patients(&self, preferred: PatientId, non_preferred: PatientId) -> StoreResult<()> {
        if self.failing_patient_merge {
            return Err(StoreError::Backend("identity merge rejected".into()));
        }
        self.inner.merge_patients(preferred, non_preferred)
    }

    fn adt_encounter_rows(&self, query: &AdtEncounterQuery) -> StoreResult<Vec<AdtEncounterRow>> {
        self.inner.adt_encounter_rows(query)
    }

    fn inpatient_request_rows(
        &self,
        query: &InpatientRequestQuery,
    ) -> StoreResult<Vec<InpatientRequestRow>> {
        self.inner.inpatient_request_rows(query)
    }

    fn mother_child_rows(&self, query: &MotherChildQuery) -> StoreResult<Vec<MotherChildRow>> {
        self.inner.mother_child_rows(query)
    }
}
