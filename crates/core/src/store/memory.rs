//! In-memory [`AdtStore`] backed by a YAML snapshot.
//!
//! The whole data set lives behind one `RwLock`, so each trait call is atomic on its own. The
//! snapshot format is the serde form of [`StoreSnapshot`].

use super::{
    AdtEncounterQuery, AdtEncounterRow, AdtStore, InpatientRequestQuery, InpatientRequestRow,
    MotherChildQuery, MotherChildRow, StoreError, StoreResult, VisitQuery,
};
use crate::location::{Location, LocationTree};
use crate::model::{Encounter, Patient, Provider, Visit};
use adt_types::{PatientId, UserId, VisitId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A typed link between two patients, e.g. mother (`person_a`) and child (`person_b`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub relationship_type: String,
    pub person_a: PatientId,
    pub person_b: PatientId,
}

/// Serialised form of an [`InMemoryStore`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub locations: Vec<Location>,
    pub patients: Vec<Patient>,
    pub providers: Vec<Provider>,
    pub visits: Vec<Visit>,
    pub relationships: Vec<Relationship>,
}

impl StoreSnapshot {
    pub fn parse(yaml_text: &str) -> StoreResult<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
        serde_path_to_error::deserialize(deserializer).map_err(|err| {
            let path = err.path().to_string();
            StoreError::Serialization(format!(
                "snapshot schema mismatch at {path}: {}",
                err.into_inner()
            ))
        })
    }

    pub fn render(&self) -> StoreResult<String> {
        serde_yaml::to_string(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

#[derive(Debug, Default)]
struct StoreState {
    patients: BTreeMap<PatientId, Patient>,
    providers: Vec<Provider>,
    /// Insertion order; queries sort by start on top of it.
    visits: Vec<Visit>,
    relationships: Vec<Relationship>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    locations: LocationTree,
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new(locations: LocationTree) -> Self {
        Self {
            locations,
            state: RwLock::new(StoreState::default()),
        }
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let state = StoreState {
            patients: snapshot.patients.into_iter().map(|p| (p.id, p)).collect(),
            providers: snapshot.providers,
            visits: snapshot.visits,
            relationships: snapshot.relationships,
        };
        Self {
            locations: LocationTree::new(snapshot.locations),
            state: RwLock::new(state),
        }
    }

    /// Loads a snapshot from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the file cannot be read or does not match the snapshot schema.
    pub fn load(path: &Path) -> StoreResult<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::from_snapshot(StoreSnapshot::parse(&text)?))
    }

    pub fn snapshot(&self) -> StoreResult<StoreSnapshot> {
        let state = self.read()?;
        Ok(StoreSnapshot {
            locations: self.locations.iter().cloned().collect(),
            patients: state.patients.values().cloned().collect(),
            providers: state.providers.clone(),
            visits: state.visits.clone(),
            relationships: state.relationships.clone(),
        })
    }

    /// Writes the current state to `path` as YAML.
    pub fn save(&self, path: &Path) -> StoreResult<()> {
        let yaml = self.snapshot()?.render()?;
        fs::write(path, yaml)?;
        Ok(())
    }

    pub fn location_tree(&self) -> &LocationTree {
        &self.locations
    }

    pub fn insert_provider(&self, provider: Provider) -> StoreResult<()> {
        self.write()?.providers.push(provider);
        Ok(())
    }

    pub fn insert_relationship(&self, relationship: Relationship) -> StoreResult<()> {
        self.write()?.relationships.push(relationship);
        Ok(())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("store lock poisoned".into()))
    }
}

/// Open, non-voided visits matching the optional location, patient and visit filters.
fn open_visits<'a>(
    state: &'a StoreState,
    location: Option<adt_types::LocationId>,
    patients: Option<&'a [PatientId]>,
    visits: Option<&'a [VisitId]>,
) -> impl Iterator<Item = &'a Visit> + 'a {
    state.visits.iter().filter(move |v| {
        !v.voided
            && v.is_active()
            && location.is_none_or(|l| v.location == Some(l))
            && patients.is_none_or(|p| p.contains(&v.patient))
            && visits.is_none_or(|ids| ids.contains(&v.id))
    })
}

/// The pending request of one visit, if any.
fn current_request(visit: &Visit, query: &InpatientRequestQuery) -> Option<InpatientRequestRow> {
    let mut encounters: Vec<&Encounter> = visit.non_voided_encounters().collect();
    encounters.sort_by(|a, b| b.datetime.cmp(&a.datetime));

    let (encounter, obs, code) = encounters.iter().find_map(|e| {
        e.top_level_obs().find_map(|obs| {
            query
                .descriptor
                .disposition_code(obs)
                .map(|code| (*e, obs, code))
        })
    })?;

    if !query.disposition_codes.iter().any(|c| c == code) {
        return None;
    }

    let later = encounters
        .iter()
        .filter(|e| e.id != encounter.id && e.datetime >= encounter.datetime);
    for e in later {
        if query.adt_encounter_types.contains(&e.encounter_type) {
            return None;
        }
        if let (Some(decision), Some(deny)) = (
            query.admission_decision_concept.as_deref(),
            query.deny_admission_concept.as_deref(),
        ) {
            if e
                .top_level_obs()
                .any(|o| o.concept == decision && o.value_coded() == Some(deny))
            {
                return None;
            }
        }
    }

    Some(InpatientRequestRow {
        visit: visit.id,
        patient: visit.patient,
        encounter: encounter.clone(),
        disposition_obs: obs.clone(),
    })
}

impl AdtStore for InMemoryStore {
    fn visits(&self, query: &VisitQuery) -> StoreResult<Vec<Visit>> {
        let state = self.read()?;
        let mut found: Vec<Visit> = state
            .visits
            .iter()
            .filter(|v| query.matches(v))
            .cloned()
            .collect();
        found.sort_by_key(|v| v.start);
        Ok(found)
    }

    fn visit(&self, id: VisitId) -> StoreResult<Option<Visit>> {
        Ok(self.read()?.visits.iter().find(|v| v.id == id).cloned())
    }

    fn patient(&self, id: PatientId) -> StoreResult<Option<Patient>> {
        Ok(self.read()?.patients.get(&id).cloned())
    }

    fn encounters_by_patient(&self, patient: PatientId) -> StoreResult<Vec<Encounter>> {
        let state = self.read()?;
        let mut found: Vec<Encounter> = state
            .visits
            .iter()
            .filter(|v| !v.voided)
            .flat_map(|v| v.non_voided_encounters())
            .filter(|e| e.patient == patient)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.datetime);
        Ok(found)
    }

    fn providers_for_user(&self, user: UserId) -> StoreResult<Vec<Provider>> {
        Ok(self
            .read()?
            .providers
            .iter()
            .filter(|p| p.user == Some(user))
            .cloned()
            .collect())
    }

    fn save_visit(&self, visit: &Visit) -> StoreResult<()> {
        let mut state = self.write()?;
        match state.visits.iter_mut().find(|v| v.id == visit.id) {
            Some(existing) => *existing = visit.clone(),
            None => state.visits.push(visit.clone()),
        }
        Ok(())
    }

    fn void_visit(&self, visit: &mut Visit, reason: &str) -> StoreResult<()> {
        visit.voided = true;
        visit.void_reason = Some(reason.to_string());
        for encounter in &mut visit.encounters {
            encounter.voided = true;
        }
        self.save_visit(visit)
    }

    fn save_encounter(&self, encounter: &Encounter) -> StoreResult<()> {
        let Some(target) = encounter.visit else {
            return Err(StoreError::Backend(format!(
                "encounter {} is not attached to a visit",
                encounter.id
            )));
        };

        let mut state = self.write()?;
        if !state.visits.iter().any(|v| v.id == target) {
            return Err(StoreError::NotFound(format!("visit {target}")));
        }

        for visit in state.visits.iter_mut() {
            if visit.id == target {
                match visit.encounters.iter_mut().find(|e| e.id == encounter.id) {
                    Some(existing) => *existing = encounter.clone(),
                    None => visit.encounters.push(encounter.clone()),
                }
            } else {
                visit.encounters.retain(|e| e.id != encounter.id);
            }
        }
        Ok(())
    }

    fn save_patient(&self, patient: &Patient) -> StoreResult<()> {
        self.write()?.patients.insert(patient.id, patient.clone());
        Ok(())
    }

    fn merge_patients(&self, preferred: PatientId, non_preferred: PatientId) -> StoreResult<()> {
        if preferred == non_preferred {
            return Err(StoreError::Backend(format!(
                "cannot merge patient {preferred} into itself"
            )));
        }
        let mut state = self.write()?;
        if !state.patients.contains_key(&preferred) {
            return Err(StoreError::NotFound(format!("patient {preferred}")));
        }
        let Some(loser) = state.patients.remove(&non_preferred) else {
            return Err(StoreError::NotFound(format!("patient {non_preferred}")));
        };

        if let Some(winner) = state.patients.get_mut(&preferred) {
            for (name, value) in loser.attributes {
                winner.attributes.entry(name).or_insert(value);
            }
        }

        for visit in state.visits.iter_mut() {
            if visit.patient == non_preferred {
                visit.patient = preferred;
            }
            for encounter in visit.encounters.iter_mut() {
                if encounter.patient == non_preferred {
                    encounter.patient = preferred;
                }
            }
        }

        for relationship in state.relationships.iter_mut() {
            if relationship.person_a == non_preferred {
                relationship.person_a = preferred;
            }
            if relationship.person_b == non_preferred {
                relationship.person_b = preferred;
            }
        }
        Ok(())
    }

    fn adt_encounter_rows(&self, query: &AdtEncounterQuery) -> StoreResult<Vec<AdtEncounterRow>> {
        let state = self.read()?;
        let mut rows: Vec<AdtEncounterRow> = open_visits(
            &state,
            query.visit_location,
            query.patients.as_deref(),
            query.visits.as_deref(),
        )
        .flat_map(|visit| {
            visit
                .non_voided_encounters()
                .filter(|e| query.encounter_types.contains(&e.encounter_type))
                .map(|e| AdtEncounterRow {
                    visit: visit.id,
                    patient: visit.patient,
                    encounter: e.clone(),
                })
        })
        .collect();
        rows.sort_by_key(|r| r.encounter.datetime);
        Ok(rows)
    }

    fn inpatient_request_rows(
        &self,
        query: &InpatientRequestQuery,
    ) -> StoreResult<Vec<InpatientRequestRow>> {
        let state = self.read()?;
        let mut rows: Vec<InpatientRequestRow> = open_visits(
            &state,
            query.visit_location,
            query.patients.as_deref(),
            query.visits.as_deref(),
        )
        .filter_map(|visit| current_request(visit, query))
        .collect();
        rows.sort_by_key(|r| r.encounter.datetime);
        Ok(rows)
    }

    fn mother_child_rows(&self, query: &MotherChildQuery) -> StoreResult<Vec<MotherChildRow>> {
        let state = self.read()?;
        let has_active_visit = |patient: PatientId| {
            state
                .visits
                .iter()
                .any(|v| v.patient == patient && !v.voided && v.is_active())
        };

        Ok(state
            .relationships
            .iter()
            .filter(|r| r.relationship_type == query.relationship_type)
            .map(|r| MotherChildRow {
                mother: r.person_a,
                child: r.person_b,
            })
            .filter(|row| {
                query.mothers.as_ref().is_none_or(|m| m.contains(&row.mother))
                    && query.children.as_ref().is_none_or(|c| c.contains(&row.child))
                    && (!query.require_mother_has_active_visit || has_active_visit(row.mother))
                    && (!query.require_child_has_active_visit || has_active_visit(row.child))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Obs, ObsValue};
    use adt_types::{EncounterType, LocationId, VisitType};
    use chrono::{DateTime, TimeZone, Utc};
    use tempfile::TempDir;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap()
    }

    fn setup_test_env() -> (InMemoryStore, Patient) {
        let store = InMemoryStore::new(LocationTree::new([Location::new(
            LocationId::new(1),
            "Hospital",
            None,
        )
        .with_tag("Visit Location")]));
        let patient = Patient::new(PatientId::new());
        store.save_patient(&patient).unwrap();
        (store, patient)
    }

    fn new_visit(patient: PatientId, start: u32) -> Visit {
        Visit::new(
            patient,
            Some(LocationId::new(1)),
            VisitType::new("Facility Visit").unwrap(),
            at(start),
        )
    }

    fn encounter(visit: &Visit, type_name: &str, h: u32) -> Encounter {
        let mut e = Encounter::new(
            visit.patient,
            EncounterType::new(type_name).unwrap(),
            visit.location,
            at(h),
        );
        e.visit = Some(visit.id);
        e
    }

    #[test]
    fn visits_are_ordered_by_start() {
        let (store, patient) = setup_test_env();
        let late = new_visit(patient.id, 10);
        let early = new_visit(patient.id, 2);
        store.save_visit(&late).unwrap();
        store.save_visit(&early).unwrap();

        let found = store.visits_by_patient(patient.id, true, false).unwrap();
        assert_eq!(
            found.iter().map(|v| v.id).collect::<Vec<_>>(),
            vec![early.id, late.id]
        );
    }

    #[test]
    fn save_encounter_moves_between_visits() {
        let (store, patient) = setup_test_env();
        let mut first = new_visit(patient.id, 1);
        let second = new_visit(patient.id, 2);
        let e = encounter(&first, "Vitals", 3);
        first.add_encounter(e.clone());
        store.save_visit(&first).unwrap();
        store.save_visit(&second).unwrap();

        let mut moved = e.clone();
        moved.visit = Some(second.id);
        store.save_encounter(&moved).unwrap();

        assert!(store.visit(first.id).unwrap().unwrap().encounters.is_empty());
        assert_eq!(store.visit(second.id).unwrap().unwrap().encounters.len(), 1);
    }

    #[test]
    fn save_encounter_requires_known_visit() {
        let (store, patient) = setup_test_env();
        let v = new_visit(patient.id, 1);
        let e = encounter(&v, "Vitals", 2);
        assert!(matches!(store.save_encounter(&e), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn void_visit_cascades_to_encounters() {
        let (store, patient) = setup_test_env();
        let mut v = new_visit(patient.id, 1);
        let e = encounter(&v, "Vitals", 2);
        v.add_encounter(e);
        store.save_visit(&v).unwrap();

        store.void_visit(&mut v, "duplicate").unwrap();
        let stored = store.visit(v.id).unwrap().unwrap();
        assert!(stored.voided);
        assert_eq!(stored.void_reason.as_deref(), Some("duplicate"));
        assert!(stored.encounters.iter().all(|e| e.voided));
        assert!(store.encounters_by_patient(patient.id).unwrap().is_empty());
    }

    #[test]
    fn merge_patients_reassigns_records() {
        let (store, preferred) = setup_test_env();
        let mut other = Patient::new(PatientId::new());
        other.set_attribute("Mother's name", "Ada");
        store.save_patient(&other).unwrap();

        let mut v = new_visit(other.id, 1);
        let e = encounter(&v, "Vitals", 2);
        v.add_encounter(e);
        store.save_visit(&v).unwrap();

        store.merge_patients(preferred.id, other.id).unwrap();
        assert!(store.patient(other.id).unwrap().is_none());
        let merged = store.patient(preferred.id).unwrap().unwrap();
        assert_eq!(merged.attribute("Mother's name"), Some("Ada"));
        assert_eq!(store.encounters_by_patient(preferred.id).unwrap().len(), 1);

        assert!(matches!(
            store.merge_patients(preferred.id, other.id),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn merging_patient_into_itself_keeps_record() {
        let (store, patient) = setup_test_env();
        assert!(matches!(
            store.merge_patients(patient.id, patient.id),
            Err(StoreError::Backend(_))
        ));
        assert!(store.patient(patient.id).unwrap().is_some());
    }

    #[test]
    fn request_rows_skip_fulfilled_requests() {
        let (store, patient) = setup_test_env();
        let mut v = new_visit(patient.id, 1);
        let mut consult = encounter(&v, "Consult", 2);
        consult.obs.push(Obs::group(
            "Disposition construct",
            vec![Obs::new("Disposition", ObsValue::Coded("ADMIT".into()))],
        ));
        v.add_encounter(consult);
        store.save_visit(&v).unwrap();

        let query = InpatientRequestQuery {
            disposition_codes: vec!["ADMIT".into()],
            adt_encounter_types: vec![EncounterType::new("Admission").unwrap()],
            ..InpatientRequestQuery::default()
        };
        assert_eq!(store.inpatient_request_rows(&query).unwrap().len(), 1);

        let admission = encounter(&v, "Admission", 3);
        store.save_encounter(&admission).unwrap();
        assert!(store.inpatient_request_rows(&query).unwrap().is_empty());
    }

    #[test]
    fn snapshot_round_trips_through_file() {
        let (store, patient) = setup_test_env();
        store.save_visit(&new_visit(patient.id, 1)).unwrap();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.yaml");
        store.save(&path).unwrap();

        let loaded = InMemoryStore::load(&path).unwrap();
        assert_eq!(loaded.snapshot().unwrap(), store.snapshot().unwrap());
        assert_eq!(loaded.location_tree().len(), 1);
    }

    #[test]
    fn parse_reports_schema_path() {
        let err = StoreSnapshot::parse("visits:\n  - id: 12\n").unwrap_err();
        assert!(err.to_string().contains("visits"));
    }
}
