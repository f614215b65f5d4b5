//! Inpatient admissions and requests.
//!
//! An admission is derived, never stored: it is the admission, transfer and discharge encounters
//! of one open visit, plus the request (admit/transfer/discharge disposition) still waiting on
//! that visit, if any.

use crate::config::AdtConfig;
use crate::error::{AdtError, AdtResult};
use crate::location::LocationTree;
use crate::model::{DispositionType, Encounter, Obs, Visit};
use crate::store::{
    AdtEncounterQuery, AdtEncounterRow, AdtStore, InpatientRequestQuery, InpatientRequestRow,
    StoreError,
};
use adt_types::{EncounterType, LocationId, PatientId, VisitId};
use serde::Serialize;
use std::sync::Arc;

// ============================================================================
// DERIVED RECORDS
// ============================================================================

/// A pending admission, transfer or discharge disposition.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InpatientRequest {
    pub visit: VisitId,
    pub patient: PatientId,
    pub disposition_encounter: Encounter,
    pub disposition_obs_group: Obs,
    /// Coded disposition answer.
    pub disposition: Option<String>,
    pub disposition_type: Option<DispositionType>,
    pub disposition_location: Option<LocationId>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InpatientAdmission {
    pub visit: VisitId,
    pub patient: PatientId,
    pub admission_encounters: Vec<Encounter>,
    pub transfer_encounters: Vec<Encounter>,
    pub discharge_encounters: Vec<Encounter>,
    pub current_inpatient_request: Option<InpatientRequest>,
}

fn latest<'a>(encounters: impl IntoIterator<Item = &'a Encounter>) -> Option<&'a Encounter> {
    encounters.into_iter().max_by_key(|e| e.datetime)
}

impl InpatientAdmission {
    pub fn new(visit: VisitId, patient: PatientId) -> Self {
        Self {
            visit,
            patient,
            admission_encounters: Vec::new(),
            transfer_encounters: Vec::new(),
            discharge_encounters: Vec::new(),
            current_inpatient_request: None,
        }
    }

    pub fn first_admission_or_transfer_encounter(&self) -> Option<&Encounter> {
        self.admission_encounters
            .iter()
            .chain(&self.transfer_encounters)
            .min_by_key(|e| e.datetime)
    }

    pub fn latest_admission_or_transfer_encounter(&self) -> Option<&Encounter> {
        latest(self.admission_encounters.iter().chain(&self.transfer_encounters))
    }

    pub fn latest_discharge_encounter(&self) -> Option<&Encounter> {
        latest(&self.discharge_encounters)
    }

    /// True if discharged and not re-admitted or transferred since.
    pub fn is_discharged(&self) -> bool {
        match (
            self.latest_discharge_encounter(),
            self.latest_admission_or_transfer_encounter(),
        ) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(discharge), Some(adt)) => discharge.datetime >= adt.datetime,
        }
    }

    /// Ward of the latest admission or transfer; `None` once discharged.
    pub fn current_inpatient_location(&self) -> Option<LocationId> {
        if self.is_discharged() {
            return None;
        }
        self.latest_admission_or_transfer_encounter()
            .and_then(|e| e.location)
    }
}

// ============================================================================
// SEARCH CRITERIA
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InpatientAdmissionSearchCriteria {
    pub visit_location: Option<LocationId>,
    /// Keep only admissions currently at one of these wards.
    pub current_inpatient_locations: Option<Vec<LocationId>>,
    pub include_discharged: bool,
    pub patients: Option<Vec<PatientId>>,
    pub visits: Option<Vec<VisitId>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InpatientRequestSearchCriteria {
    pub visit_location: Option<LocationId>,
    /// All types when `None`.
    pub disposition_types: Option<Vec<DispositionType>>,
    pub disposition_locations: Option<Vec<LocationId>>,
    pub patients: Option<Vec<PatientId>>,
    pub visits: Option<Vec<VisitId>>,
}

/// The encounter types that bucket ADT rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdtEncounterTypes {
    pub admission: EncounterType,
    pub transfer: EncounterType,
    pub discharge: EncounterType,
}

impl AdtEncounterTypes {
    pub fn from_config(cfg: &AdtConfig) -> Self {
        Self {
            admission: cfg.admission_encounter_type().clone(),
            transfer: cfg.transfer_encounter_type().clone(),
            discharge: cfg.exit_from_inpatient_encounter_type().clone(),
        }
    }

    pub fn to_vec(&self) -> Vec<EncounterType> {
        vec![
            self.admission.clone(),
            self.transfer.clone(),
            self.discharge.clone(),
        ]
    }
}

// ============================================================================
// PURE STEPS
// ============================================================================

/// Groups ADT encounter rows into one admission per visit, in first-seen order.
pub fn build_admissions(
    rows: impl IntoIterator<Item = AdtEncounterRow>,
    types: &AdtEncounterTypes,
) -> Vec<InpatientAdmission> {
    let mut admissions: Vec<InpatientAdmission> = Vec::new();
    for row in rows {
        let index = match admissions.iter().position(|a| a.visit == row.visit) {
            Some(index) => index,
            None => {
                admissions.push(InpatientAdmission::new(row.visit, row.patient));
                admissions.len() - 1
            }
        };
        let admission = &mut admissions[index];

        let bucket = if row.encounter.encounter_type == types.admission {
            &mut admission.admission_encounters
        } else if row.encounter.encounter_type == types.transfer {
            &mut admission.transfer_encounters
        } else if row.encounter.encounter_type == types.discharge {
            &mut admission.discharge_encounters
        } else {
            tracing::debug!(encounter = %row.encounter.id, "ignoring non-ADT encounter row");
            continue;
        };
        bucket.push(row.encounter);
    }
    admissions
}

/// Applies the location and discharge filters, returning survivors and their visit ids.
pub fn filter_admissions(
    admissions: Vec<InpatientAdmission>,
    criteria: &InpatientAdmissionSearchCriteria,
) -> (Vec<InpatientAdmission>, Vec<VisitId>) {
    let kept: Vec<InpatientAdmission> = admissions
        .into_iter()
        .filter(|admission| {
            if let Some(wards) = &criteria.current_inpatient_locations {
                if !admission
                    .current_inpatient_location()
                    .is_some_and(|ward| wards.contains(&ward))
                {
                    return false;
                }
            }
            criteria.include_discharged || !admission.is_discharged()
        })
        .collect();
    let visit_ids = kept.iter().map(|a| a.visit).collect();
    (kept, visit_ids)
}

/// Attaches each request to the admission of its visit. Later requests replace earlier ones.
pub fn join_requests(
    admissions: &mut [InpatientAdmission],
    requests: impl IntoIterator<Item = InpatientRequest>,
) {
    for request in requests {
        if let Some(admission) = admissions.iter_mut().find(|a| a.visit == request.visit) {
            admission.current_inpatient_request = Some(request);
        }
    }
}

/// Reads the location id held as text on a disposition location obs.
///
/// A missing obs, missing text, or an id that names no known location yields `Ok(None)`.
///
/// # Errors
///
/// [`AdtError::InvalidDispositionLocation`] if the text is not a whole number. Surrounding
/// whitespace is not accepted.
pub fn decode_disposition_location(
    obs: Option<&Obs>,
    tree: &LocationTree,
) -> AdtResult<Option<LocationId>> {
    let Some(text) = obs.and_then(Obs::value_text) else {
        return Ok(None);
    };
    let id: LocationId = text
        .parse()
        .map_err(|_| AdtError::InvalidDispositionLocation(text.to_string()))?;
    Ok(tree.contains(id).then_some(id))
}

// ============================================================================
// AGGREGATOR
// ============================================================================

pub struct InpatientAdmissionAggregator {
    cfg: Arc<AdtConfig>,
    locations: Arc<LocationTree>,
    store: Arc<dyn AdtStore>,
}

impl InpatientAdmissionAggregator {
    pub fn new(cfg: Arc<AdtConfig>, locations: Arc<LocationTree>, store: Arc<dyn AdtStore>) -> Self {
        Self {
            cfg,
            locations,
            store,
        }
    }

    fn visit_location(&self, location: Option<LocationId>) -> AdtResult<Option<LocationId>> {
        location
            .map(|l| {
                self.locations
                    .resolve_visit_location(Some(l), self.cfg.supports_visits_tag())
            })
            .transpose()
    }

    fn request_query(
        &self,
        visit_location: Option<LocationId>,
        disposition_codes: Vec<String>,
        fulfilling_types: Vec<EncounterType>,
        patients: Option<Vec<PatientId>>,
        visits: Option<Vec<VisitId>>,
    ) -> InpatientRequestQuery {
        InpatientRequestQuery {
            visit_location,
            disposition_codes,
            descriptor: self.cfg.disposition_descriptor().clone(),
            adt_encounter_types: fulfilling_types,
            admission_decision_concept: self.cfg.admission_decision_concept().map(str::to_string),
            deny_admission_concept: self.cfg.deny_admission_concept().map(str::to_string),
            patients,
            visits,
        }
    }

    fn decode_request(&self, row: InpatientRequestRow) -> AdtResult<InpatientRequest> {
        let descriptor = self.cfg.disposition_descriptor();
        let disposition = descriptor
            .disposition_code(&row.disposition_obs)
            .map(str::to_string);
        let disposition_type = disposition
            .as_deref()
            .and_then(|code| self.cfg.disposition_by_code(code))
            .and_then(|d| d.disposition_type);

        let location_obs = row
            .disposition_obs
            .member(&descriptor.admission_location_concept)
            .or_else(|| {
                row.disposition_obs
                    .member(&descriptor.internal_transfer_location_concept)
            });
        let disposition_location = decode_disposition_location(location_obs, &self.locations)?;

        Ok(InpatientRequest {
            visit: row.visit,
            patient: row.patient,
            disposition_encounter: row.encounter,
            disposition_obs_group: row.disposition_obs,
            disposition,
            disposition_type,
            disposition_location,
        })
    }

    /// Pending admit, transfer or discharge requests on open visits.
    ///
    /// # Errors
    ///
    /// - [`AdtError::Configuration`] if the visit location cannot be resolved
    /// - [`AdtError::InvalidDispositionLocation`] if a request names a non-numeric location
    pub fn inpatient_requests(
        &self,
        criteria: &InpatientRequestSearchCriteria,
    ) -> AdtResult<Vec<InpatientRequest>> {
        let visit_location = self.visit_location(criteria.visit_location)?;
        let types = criteria
            .disposition_types
            .as_deref()
            .unwrap_or(&DispositionType::ALL);

        let query = self.request_query(
            visit_location,
            self.cfg.disposition_codes_of(types),
            AdtEncounterTypes::from_config(&self.cfg).to_vec(),
            criteria.patients.clone(),
            criteria.visits.clone(),
        );

        let mut requests = Vec::new();
        for row in self.store.inpatient_request_rows(&query)? {
            let request = self.decode_request(row)?;
            if let Some(wanted) = &criteria.disposition_locations {
                if !request
                    .disposition_location
                    .is_some_and(|l| wanted.contains(&l))
                {
                    continue;
                }
            }
            requests.push(request);
        }
        Ok(requests)
    }

    /// Admissions on open visits, filtered, with their pending requests attached.
    pub fn inpatient_admissions(
        &self,
        criteria: &InpatientAdmissionSearchCriteria,
    ) -> AdtResult<Vec<InpatientAdmission>> {
        let visit_location = self.visit_location(criteria.visit_location)?;
        let types = AdtEncounterTypes::from_config(&self.cfg);

        let query = AdtEncounterQuery {
            visit_location,
            encounter_types: types.to_vec(),
            patients: criteria.patients.clone(),
            visits: criteria.visits.clone(),
        };
        let rows = self.store.adt_encounter_rows(&query)?;
        let (mut admissions, visit_ids) = filter_admissions(build_admissions(rows, &types), criteria);

        if !visit_ids.is_empty() {
            let requests = self.inpatient_requests(&InpatientRequestSearchCriteria {
                visits: Some(visit_ids),
                ..InpatientRequestSearchCriteria::default()
            })?;
            join_requests(&mut admissions, requests);
        }
        Ok(admissions)
    }

    /// Open visits with an admission request that has been neither fulfilled nor denied.
    pub fn visits_awaiting_admission(
        &self,
        location: Option<LocationId>,
        patients: Option<Vec<PatientId>>,
        visits: Option<Vec<VisitId>>,
    ) -> AdtResult<Vec<Visit>> {
        let visit_location = self.visit_location(location)?;
        let query = self.request_query(
            visit_location,
            self.cfg.disposition_codes_of(&[DispositionType::Admit]),
            vec![self.cfg.admission_encounter_type().clone()],
            patients,
            visits,
        );

        self.store
            .inpatient_request_rows(&query)?
            .into_iter()
            .map(|row| -> AdtResult<Visit> {
                self.store
                    .visit(row.visit)?
                    .ok_or_else(|| StoreError::NotFound(format!("visit {}", row.visit)).into())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObsValue;
    use crate::test_support::{at, disposition_obs, TestEnv, CLINIC, HOSPITAL, WARD_A, WARD_B};

    fn setup_test_env() -> (TestEnv, InpatientAdmissionAggregator) {
        let env = TestEnv::new();
        let aggregator =
            InpatientAdmissionAggregator::new(env.cfg.clone(), env.tree.clone(), env.store());
        (env, aggregator)
    }

    fn row(
        visit: VisitId,
        patient: PatientId,
        encounter_type: &EncounterType,
        day: u32,
        ward: LocationId,
    ) -> AdtEncounterRow {
        let mut encounter =
            Encounter::new(patient, encounter_type.clone(), Some(ward), at(day, 0));
        encounter.visit = Some(visit);
        AdtEncounterRow {
            visit,
            patient,
            encounter,
        }
    }

    fn location_obs(concept: &str, text: &str) -> Obs {
        Obs::new(concept, ObsValue::Text(text.into()))
    }

    #[test]
    fn transfer_after_admission_sets_current_location() {
        let env = TestEnv::new();
        let types = AdtEncounterTypes::from_config(&env.cfg);
        let (visit, patient) = (VisitId::new(), PatientId::new());

        let admissions = build_admissions(
            [
                row(visit, patient, &types.admission, 1, WARD_A),
                row(visit, patient, &types.transfer, 2, WARD_B),
            ],
            &types,
        );
        assert_eq!(admissions.len(), 1);
        assert!(!admissions[0].is_discharged());
        assert_eq!(admissions[0].current_inpatient_location(), Some(WARD_B));
        assert_eq!(
            admissions[0].first_admission_or_transfer_encounter().unwrap().location,
            Some(WARD_A)
        );
    }

    #[test]
    fn discharge_is_undone_by_later_admission() {
        let env = TestEnv::new();
        let types = AdtEncounterTypes::from_config(&env.cfg);
        let (visit, patient) = (VisitId::new(), PatientId::new());

        let discharged = build_admissions(
            [
                row(visit, patient, &types.admission, 1, WARD_A),
                row(visit, patient, &types.discharge, 2, WARD_A),
            ],
            &types,
        );
        assert!(discharged[0].is_discharged());
        assert_eq!(discharged[0].current_inpatient_location(), None);

        let readmitted = build_admissions(
            [
                row(visit, patient, &types.admission, 1, WARD_A),
                row(visit, patient, &types.discharge, 2, WARD_A),
                row(visit, patient, &types.admission, 3, WARD_B),
            ],
            &types,
        );
        assert!(!readmitted[0].is_discharged());
    }

    #[test]
    fn build_keeps_first_seen_visit_order_and_ignores_other_types() {
        let env = TestEnv::new();
        let types = AdtEncounterTypes::from_config(&env.cfg);
        let (v1, v2, patient) = (VisitId::new(), VisitId::new(), PatientId::new());
        let vitals = EncounterType::new("Vitals").unwrap();

        let admissions = build_admissions(
            [
                row(v2, patient, &types.admission, 1, WARD_A),
                row(v1, patient, &types.admission, 2, WARD_B),
                row(v2, patient, &vitals, 3, WARD_A),
            ],
            &types,
        );
        assert_eq!(admissions.iter().map(|a| a.visit).collect::<Vec<_>>(), vec![v2, v1]);
        assert_eq!(admissions[0].admission_encounters.len(), 1);
    }

    #[test]
    fn filter_drops_discharged_and_other_wards() {
        let env = TestEnv::new();
        let types = AdtEncounterTypes::from_config(&env.cfg);
        let patient = PatientId::new();
        let (on_a, on_b, gone) = (VisitId::new(), VisitId::new(), VisitId::new());
        let admissions = build_admissions(
            [
                row(on_a, patient, &types.admission, 1, WARD_A),
                row(on_b, patient, &types.admission, 1, WARD_B),
                row(gone, patient, &types.admission, 1, WARD_A),
                row(gone, patient, &types.discharge, 2, WARD_A),
            ],
            &types,
        );

        let (kept, ids) =
            filter_admissions(admissions.clone(), &InpatientAdmissionSearchCriteria::default());
        assert_eq!(ids, vec![on_a, on_b]);
        assert_eq!(kept.len(), 2);

        let criteria = InpatientAdmissionSearchCriteria {
            current_inpatient_locations: Some(vec![WARD_A]),
            include_discharged: true,
            ..InpatientAdmissionSearchCriteria::default()
        };
        let (_, ids) = filter_admissions(admissions, &criteria);
        assert_eq!(ids, vec![on_a]);
    }

    #[test]
    fn last_joined_request_wins() {
        let env = TestEnv::new();
        let types = AdtEncounterTypes::from_config(&env.cfg);
        let (visit, patient) = (VisitId::new(), PatientId::new());
        let mut admissions =
            build_admissions([row(visit, patient, &types.admission, 1, WARD_A)], &types);

        let request = |code: &str| InpatientRequest {
            visit,
            patient,
            disposition_encounter: Encounter::new(patient, types.admission.clone(), None, at(2, 0)),
            disposition_obs_group: disposition_obs(code),
            disposition: Some(code.into()),
            disposition_type: None,
            disposition_location: None,
        };
        join_requests(&mut admissions, [request("TRANSFER"), request("HOME")]);
        assert_eq!(
            admissions[0]
                .current_inpatient_request
                .as_ref()
                .and_then(|r| r.disposition.as_deref()),
            Some("HOME")
        );
    }

    #[test]
    fn decode_location_distinguishes_missing_unknown_and_malformed() {
        let env = TestEnv::new();
        assert_eq!(decode_disposition_location(None, &env.tree).unwrap(), None);

        let ward = location_obs("Admission location", &WARD_A.to_string());
        assert_eq!(decode_disposition_location(Some(&ward), &env.tree).unwrap(), Some(WARD_A));

        let unknown = location_obs("Admission location", "999");
        assert_eq!(decode_disposition_location(Some(&unknown), &env.tree).unwrap(), None);

        for text in ["Ward A", " 3 "] {
            let malformed = location_obs("Admission location", text);
            assert!(matches!(
                decode_disposition_location(Some(&malformed), &env.tree),
                Err(AdtError::InvalidDispositionLocation(_))
            ));
        }
    }

    #[test]
    fn admissions_carry_pending_transfer_request() {
        let (env, aggregator) = setup_test_env();
        let patient = env.patient();
        let mut visit = env.visit(patient.id, at(1, 0), None);
        env.encounter(&mut visit, env.cfg.admission_encounter_type(), at(1, 2), WARD_A);

        let mut consult = Encounter::new(
            patient.id,
            EncounterType::new("Consult").unwrap(),
            Some(WARD_A),
            at(1, 5),
        );
        let mut group = disposition_obs("TRANSFER");
        group.group_members.push(location_obs(
            "Internal transfer location",
            &WARD_B.to_string(),
        ));
        consult.obs.push(group);
        visit.add_encounter(consult);
        env.store.save_visit(&visit).unwrap();

        let admissions = aggregator
            .inpatient_admissions(&InpatientAdmissionSearchCriteria {
                visit_location: Some(WARD_A),
                ..InpatientAdmissionSearchCriteria::default()
            })
            .unwrap();
        assert_eq!(admissions.len(), 1);
        let request = admissions[0].current_inpatient_request.as_ref().unwrap();
        assert_eq!(request.disposition_type, Some(DispositionType::Transfer));
        assert_eq!(request.disposition_location, Some(WARD_B));

        let elsewhere = aggregator
            .inpatient_admissions(&InpatientAdmissionSearchCriteria {
                visit_location: Some(CLINIC),
                ..InpatientAdmissionSearchCriteria::default()
            })
            .unwrap();
        assert!(elsewhere.is_empty());
    }

    #[test]
    fn requests_filter_by_type_and_location() {
        let (env, aggregator) = setup_test_env();
        let patient = env.patient();
        let mut visit = env.visit(patient.id, at(1, 0), None);
        let mut consult = Encounter::new(
            patient.id,
            EncounterType::new("Consult").unwrap(),
            Some(HOSPITAL),
            at(1, 5),
        );
        let mut group = disposition_obs("ADMIT");
        group
            .group_members
            .push(location_obs("Admission location", &WARD_A.to_string()));
        consult.obs.push(group);
        visit.add_encounter(consult);
        env.store.save_visit(&visit).unwrap();

        let all = aggregator
            .inpatient_requests(&InpatientRequestSearchCriteria::default())
            .unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].disposition_location, Some(WARD_A));

        let discharges = aggregator
            .inpatient_requests(&InpatientRequestSearchCriteria {
                disposition_types: Some(vec![DispositionType::Discharge]),
                ..InpatientRequestSearchCriteria::default()
            })
            .unwrap();
        assert!(discharges.is_empty());

        let to_ward_b = aggregator
            .inpatient_requests(&InpatientRequestSearchCriteria {
                disposition_locations: Some(vec![WARD_B]),
                ..InpatientRequestSearchCriteria::default()
            })
            .unwrap();
        assert!(to_ward_b.is_empty());

        let awaiting = aggregator
            .visits_awaiting_admission(Some(HOSPITAL), None, None)
            .unwrap();
        assert_eq!(awaiting.len(), 1);
        assert_eq!(awaiting[0].id, visit.id);
    }

    #[test]
    fn malformed_request_location_is_an_error() {
        let (env, aggregator) = setup_test_env();
        let patient = env.patient();
        let mut visit = env.visit(patient.id, at(1, 0), None);
        let mut consult = Encounter::new(
            patient.id,
            EncounterType::new("Consult").unwrap(),
            Some(HOSPITAL),
            at(1, 5),
        );
        let mut group = disposition_obs("ADMIT");
        group
            .group_members
            .push(location_obs("Admission location", "north wing"));
        consult.obs.push(group);
        visit.add_encounter(consult);
        env.store.save_visit(&visit).unwrap();

        assert!(matches!(
            aggregator.inpatient_requests(&InpatientRequestSearchCriteria::default()),
            Err(AdtError::InvalidDispositionLocation(_))
        ));
    }
}
