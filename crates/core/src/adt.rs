//! ADT actions: closing stale visits, retrospective visits, admission/transfer/discharge
//! encounters, and visit listings by location.

use crate::activity::should_close;
use crate::checkin::close_and_save;
use crate::config::AdtConfig;
use crate::error::{AdtError, AdtResult};
use crate::location::LocationTree;
use crate::model::{Encounter, EncounterProvider, Visit};
use crate::store::{AdtStore, StoreError, VisitQuery};
use crate::visit::VisitView;
use adt_types::{EncounterType, LocationId, PatientId, VisitId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of one closure sweep.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CloseSummary {
    pub examined: usize,
    pub closed: Vec<VisitId>,
    /// Visits that should have closed but could not be saved.
    pub failed: Vec<VisitId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdtActionType {
    Admission,
    Transfer,
    Discharge,
}

impl AdtActionType {
    pub fn encounter_type(self, cfg: &AdtConfig) -> &EncounterType {
        match self {
            Self::Admission => cfg.admission_encounter_type(),
            Self::Transfer => cfg.transfer_encounter_type(),
            Self::Discharge => cfg.exit_from_inpatient_encounter_type(),
        }
    }

    /// Admission needs a patient who is not admitted; transfer and discharge need one who is.
    pub fn check_visit_valid(self, visit: &VisitView<'_>) -> AdtResult<()> {
        let admitted = visit.is_admitted();
        match self {
            Self::Admission if admitted => Err(AdtError::InvalidArgument(
                "patient is already admitted".into(),
            )),
            Self::Transfer | Self::Discharge if !admitted => Err(AdtError::InvalidArgument(
                "patient is not currently admitted".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// A requested admission, transfer or discharge.
#[derive(Clone, Debug, PartialEq)]
pub struct AdtAction {
    pub visit: VisitId,
    pub location: Option<LocationId>,
    pub providers: Vec<EncounterProvider>,
    pub action_type: AdtActionType,
    /// Defaults to now.
    pub datetime: Option<DateTime<Utc>>,
}

pub struct AdtActions {
    cfg: Arc<AdtConfig>,
    locations: Arc<LocationTree>,
    store: Arc<dyn AdtStore>,
}

impl AdtActions {
    pub fn new(cfg: Arc<AdtConfig>, locations: Arc<LocationTree>, store: Arc<dyn AdtStore>) -> Self {
        Self {
            cfg,
            locations,
            store,
        }
    }

    fn view<'a>(&'a self, visit: &'a Visit) -> VisitView<'a> {
        VisitView::new(visit, &self.cfg)
    }

    fn is_test_patient(&self, patient: PatientId) -> AdtResult<bool> {
        let Some(attribute) = self.cfg.test_patient_attribute() else {
            return Ok(false);
        };
        Ok(self
            .store
            .patient(patient)?
            .is_some_and(|p| p.has_flag(attribute)))
    }

    // ========================================================================
    // CLOSURE SWEEP
    // ========================================================================

    /// Closes every open visit at a visit location that has been inactive past its threshold.
    ///
    /// A visit that fails to close is logged and skipped; the sweep carries on.
    pub fn close_inactive_visits_at(&self, now: DateTime<Utc>) -> AdtResult<CloseSummary> {
        let visit_locations = self.locations.tagged(self.cfg.supports_visits_tag());
        let open = self
            .store
            .visits(&VisitQuery::default().at_locations(visit_locations))?;

        let thresholds = self.cfg.expiry_thresholds();
        let mut summary = CloseSummary {
            examined: open.len(),
            ..CloseSummary::default()
        };

        for mut visit in open {
            let inpatient = self.view(&visit).is_inpatient();
            if !should_close(&visit, now, thresholds, inpatient) {
                continue;
            }
            match close_and_save(self.store.as_ref(), &mut visit) {
                Ok(()) => summary.closed.push(visit.id),
                Err(err) => {
                    tracing::warn!(visit = %visit.id, error = %err, "failed to close inactive visit");
                    summary.failed.push(visit.id);
                }
            }
        }

        tracing::info!(
            examined = summary.examined,
            closed = summary.closed.len(),
            failed = summary.failed.len(),
            "closed inactive visits"
        );
        Ok(summary)
    }

    // ========================================================================
    // RETROSPECTIVE VISITS
    // ========================================================================

    /// At-facility visits of the patient at the visit location serving `location` that overlap
    /// `[start, stop]`.
    pub fn visits_during(
        &self,
        patient: PatientId,
        location: LocationId,
        start: DateTime<Utc>,
        stop: Option<DateTime<Utc>>,
    ) -> AdtResult<Vec<Visit>> {
        let visit_location = self
            .locations
            .resolve_visit_location(Some(location), self.cfg.supports_visits_tag())?;
        let query = VisitQuery::for_patient(patient)
            .of_type(self.cfg.at_facility_visit_type().clone())
            .at_locations([visit_location])
            .during(start, stop);
        Ok(self.store.visits(&query)?)
    }

    pub fn has_visit_during(
        &self,
        patient: PatientId,
        location: LocationId,
        start: DateTime<Utc>,
        stop: Option<DateTime<Utc>>,
    ) -> AdtResult<bool> {
        Ok(!self.visits_during(patient, location, start, stop)?.is_empty())
    }

    /// Records a visit that happened in the past.
    ///
    /// # Errors
    ///
    /// - [`AdtError::InvalidArgument`] if start or stop is after `now`, or stop is before start
    /// - [`AdtError::ExistingVisitDuringTimePeriod`] if the patient already has a visit there
    ///   during the window
    pub fn create_retrospective_visit(
        &self,
        patient: PatientId,
        location: LocationId,
        start: DateTime<Utc>,
        stop: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> AdtResult<Visit> {
        if start > now {
            return Err(AdtError::InvalidArgument(
                "retrospective visit cannot start in the future".into(),
            ));
        }
        if let Some(stop) = stop {
            if stop > now {
                return Err(AdtError::InvalidArgument(
                    "retrospective visit cannot stop in the future".into(),
                ));
            }
            if start > stop {
                return Err(AdtError::InvalidArgument(
                    "retrospective visit cannot stop before it starts".into(),
                ));
            }
        }

        let visit_location = self
            .locations
            .resolve_visit_location(Some(location), self.cfg.supports_visits_tag())?;
        if self.has_visit_during(patient, location, start, stop)? {
            return Err(AdtError::ExistingVisitDuringTimePeriod {
                patient,
                location: visit_location,
            });
        }

        let mut visit = Visit::new(
            patient,
            Some(visit_location),
            self.cfg.at_facility_visit_type().clone(),
            start,
        );
        visit.stop = stop;
        self.store.save_visit(&visit)?;
        tracing::info!(visit = %visit.id, patient = %patient, "created retrospective visit");
        Ok(visit)
    }

    // ========================================================================
    // ADT ENCOUNTERS
    // ========================================================================

    /// Records an admission, transfer or discharge encounter on the action's visit.
    ///
    /// # Errors
    ///
    /// - [`AdtError::InvalidArgument`] if the location or providers are missing, the visit's
    ///   admission state does not allow the action, or the time falls outside the visit
    /// - [`AdtError::Store`] if the visit does not exist
    pub fn create_adt_encounter(&self, action: AdtAction, now: DateTime<Utc>) -> AdtResult<Encounter> {
        let location = match action.location {
            Some(location) if !action.providers.is_empty() => location,
            _ => {
                return Err(AdtError::InvalidArgument(
                    "must provide a visit, location and provider".into(),
                ));
            }
        };
        let visit = self
            .store
            .visit(action.visit)?
            .ok_or_else(|| StoreError::NotFound(format!("visit {}", action.visit)))?;

        let view = self.view(&visit);
        action.action_type.check_visit_valid(&view)?;

        let when = action.datetime.unwrap_or(now);
        view.error_if_outside_visit(when, "ADT datetime outside of visit bounds")?;

        let mut encounter = Encounter::new(
            visit.patient,
            action.action_type.encounter_type(&self.cfg).clone(),
            Some(location),
            when,
        );
        for assignment in action.providers {
            encounter.add_provider(assignment.role, assignment.provider);
        }
        encounter.visit = Some(visit.id);

        self.store.save_encounter(&encounter)?;
        tracing::info!(
            encounter = %encounter.id,
            visit = %visit.id,
            action = ?action.action_type,
            "recorded ADT encounter"
        );
        Ok(encounter)
    }

    // ========================================================================
    // LISTINGS
    // ========================================================================

    /// Open visits at `location` or anywhere beneath it, excluding test patients.
    pub fn active_visits(&self, location: LocationId) -> AdtResult<Vec<Visit>> {
        let locations = self.locations.descendants(location);
        let candidates = self
            .store
            .visits(&VisitQuery::default().at_locations(locations))?;

        let mut active = Vec::with_capacity(candidates.len());
        for visit in candidates {
            if !self.is_test_patient(visit.patient)? {
                active.push(visit);
            }
        }
        Ok(active)
    }

    /// Active visits whose patient is admitted, optionally only those last placed on `ward`.
    pub fn inpatient_visits(
        &self,
        visit_location: LocationId,
        ward: Option<LocationId>,
    ) -> AdtResult<Vec<Visit>> {
        let visits = self.active_visits(visit_location)?;
        Ok(visits
            .into_iter()
            .filter(|visit| {
                let view = self.view(visit);
                if !view.is_admitted() {
                    return false;
                }
                match ward {
                    Some(ward) => view
                        .latest_adt_encounter()
                        .is_some_and(|e| e.location == Some(ward)),
                    None => true,
                }
            })
            .collect())
    }

    pub fn last_encounter(&self, patient: PatientId) -> AdtResult<Option<Encounter>> {
        Ok(self.store.encounters_by_patient(patient)?.pop())
    }

    pub fn count_of_encounters(&self, patient: PatientId) -> AdtResult<usize> {
        Ok(self.store.encounters_by_patient(patient)?.len())
    }

    /// Non-voided visits of the patient, open or closed.
    pub fn count_of_visits(&self, patient: PatientId) -> AdtResult<usize> {
        Ok(self.store.visits_by_patient(patient, true, false)?.len())
    }

    pub fn inpatient_locations(&self) -> Vec<LocationId> {
        self.locations.tagged(self.cfg.supports_admission_tag())
    }

    pub fn visit_locations(&self) -> Vec<LocationId> {
        self.locations.tagged(self.cfg.supports_visits_tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        at, disposition_obs, FailingStore, TestEnv, CLINIC, HOSPITAL, OUTPATIENT, WARD_A, WARD_B,
    };
    use adt_types::{EncounterRole, ProviderId};

    fn setup_test_env() -> (TestEnv, AdtActions) {
        let env = TestEnv::new();
        let actions = AdtActions::new(env.cfg.clone(), env.tree.clone(), env.store());
        (env, actions)
    }

    fn action(visit: VisitId, action_type: AdtActionType, ward: LocationId, when: DateTime<Utc>) -> AdtAction {
        AdtAction {
            visit,
            location: Some(ward),
            providers: vec![EncounterProvider {
                role: EncounterRole::new("Attending").unwrap(),
                provider: ProviderId::new(),
            }],
            action_type,
            datetime: Some(when),
        }
    }

    #[test]
    fn sweep_closes_stale_outpatient_visits_only() {
        let (env, actions) = setup_test_env();
        let patient = env.patient();
        let stale = env.visit(patient.id, at(1, 8), None);
        let mut fresh = env.visit(patient.id, at(1, 8), None);
        env.encounter(&mut fresh, &EncounterType::new("Vitals").unwrap(), at(1, 12), OUTPATIENT);

        let summary = actions.close_inactive_visits_at(at(1, 15)).unwrap();
        assert_eq!(summary.examined, 2);
        assert_eq!(summary.closed, vec![stale.id]);

        let closed = env.store.visit(stale.id).unwrap().unwrap();
        assert_eq!(closed.stop, Some(at(1, 8)));
        assert!(env.store.visit(fresh.id).unwrap().unwrap().is_active());
    }

    #[test]
    fn sweep_carries_on_past_a_failing_visit() {
        let env = TestEnv::new();
        let patient = env.patient();
        let first = env.visit(patient.id, at(1, 6), None);
        let locked = env.visit(patient.id, at(1, 7), None);
        let last = env.visit(patient.id, at(1, 8), None);

        let store = Arc::new(FailingStore::new(env.store.clone()).failing_visit(locked.id));
        let actions = AdtActions::new(env.cfg.clone(), env.tree.clone(), store);
        let summary = actions.close_inactive_visits_at(at(2, 0)).unwrap();

        assert_eq!(summary.examined, 3);
        assert_eq!(summary.closed, vec![first.id, last.id]);
        assert_eq!(summary.failed, vec![locked.id]);
        assert!(env.store.visit(locked.id).unwrap().unwrap().is_active());
        assert_eq!(env.store.visit(last.id).unwrap().unwrap().stop, Some(at(1, 8)));
    }

    #[test]
    fn sweep_keeps_inpatient_visits_without_inpatient_threshold() {
        let (env, actions) = setup_test_env();
        let patient = env.patient();
        let mut admitted = env.visit(patient.id, at(1, 8), None);
        env.encounter(&mut admitted, env.cfg.admission_encounter_type(), at(1, 9), WARD_A);

        let mut awaiting = env.visit(patient.id, at(1, 8), None);
        let mut consult = Encounter::new(
            patient.id,
            EncounterType::new("Consult").unwrap(),
            Some(HOSPITAL),
            at(1, 9),
        );
        consult.obs.push(disposition_obs("ADMIT"));
        awaiting.add_encounter(consult);
        env.store.save_visit(&awaiting).unwrap();

        let summary = actions.close_inactive_visits_at(at(9, 0)).unwrap();
        assert!(summary.closed.is_empty());
    }

    #[test]
    fn retrospective_visit_validates_window() {
        let (env, actions) = setup_test_env();
        let patient = env.patient();
        let now = at(10, 0);

        assert!(matches!(
            actions.create_retrospective_visit(patient.id, OUTPATIENT, at(11, 0), None, now),
            Err(AdtError::InvalidArgument(_))
        ));
        assert!(matches!(
            actions.create_retrospective_visit(patient.id, OUTPATIENT, at(1, 0), Some(at(11, 0)), now),
            Err(AdtError::InvalidArgument(_))
        ));
        assert!(matches!(
            actions.create_retrospective_visit(patient.id, OUTPATIENT, at(3, 0), Some(at(2, 0)), now),
            Err(AdtError::InvalidArgument(_))
        ));

        let visit = actions
            .create_retrospective_visit(patient.id, OUTPATIENT, at(2, 0), Some(at(3, 0)), now)
            .unwrap();
        assert_eq!(visit.location, Some(HOSPITAL));
        assert_eq!(visit.stop, Some(at(3, 0)));

        assert!(matches!(
            actions.create_retrospective_visit(patient.id, OUTPATIENT, at(2, 12), Some(at(4, 0)), now),
            Err(AdtError::ExistingVisitDuringTimePeriod { location, .. }) if location == HOSPITAL
        ));
        assert!(actions
            .create_retrospective_visit(patient.id, CLINIC, at(2, 12), Some(at(4, 0)), now)
            .is_ok());
    }

    #[test]
    fn adt_encounters_follow_admission_state() {
        let (env, actions) = setup_test_env();
        let patient = env.patient();
        let visit = env.visit(patient.id, at(1, 8), None);

        assert!(matches!(
            actions.create_adt_encounter(action(visit.id, AdtActionType::Transfer, WARD_B, at(1, 9)), at(1, 10)),
            Err(AdtError::InvalidArgument(_))
        ));

        let admission = actions
            .create_adt_encounter(action(visit.id, AdtActionType::Admission, WARD_A, at(1, 9)), at(1, 10))
            .unwrap();
        assert_eq!(admission.encounter_type, *env.cfg.admission_encounter_type());
        assert_eq!(admission.providers.len(), 1);

        assert!(matches!(
            actions.create_adt_encounter(action(visit.id, AdtActionType::Admission, WARD_A, at(1, 9)), at(1, 10)),
            Err(AdtError::InvalidArgument(_))
        ));

        actions
            .create_adt_encounter(action(visit.id, AdtActionType::Transfer, WARD_B, at(1, 11)), at(1, 12))
            .unwrap();
        let wards = actions.inpatient_visits(HOSPITAL, Some(WARD_B)).unwrap();
        assert_eq!(wards.len(), 1);
        assert!(actions.inpatient_visits(HOSPITAL, Some(WARD_A)).unwrap().is_empty());
    }

    #[test]
    fn adt_encounter_requires_location_providers_and_time_in_visit() {
        let (env, actions) = setup_test_env();
        let patient = env.patient();
        let visit = env.visit(patient.id, at(1, 8), Some(at(2, 8)));

        let mut missing_location = action(visit.id, AdtActionType::Admission, WARD_A, at(1, 9));
        missing_location.location = None;
        assert!(actions.create_adt_encounter(missing_location, at(1, 10)).is_err());

        let mut no_providers = action(visit.id, AdtActionType::Admission, WARD_A, at(1, 9));
        no_providers.providers.clear();
        assert!(actions.create_adt_encounter(no_providers, at(1, 10)).is_err());

        assert!(matches!(
            actions.create_adt_encounter(action(visit.id, AdtActionType::Admission, WARD_A, at(3, 9)), at(4, 0)),
            Err(AdtError::InvalidArgument(_))
        ));
    }

    #[test]
    fn active_visits_exclude_test_patients_and_include_children() {
        let (env, actions) = setup_test_env();
        let real = env.patient();
        let mut test = env.patient();
        test.set_attribute("Test Patient", "true");
        env.store.save_patient(&test).unwrap();

        let mut ward_visit = env.visit(real.id, at(1, 8), None);
        ward_visit.location = Some(WARD_A);
        env.store.save_visit(&ward_visit).unwrap();
        env.visit(test.id, at(1, 8), None);

        let active = actions.active_visits(HOSPITAL).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, ward_visit.id);
        assert!(actions.active_visits(CLINIC).unwrap().is_empty());
    }

    #[test]
    fn encounter_counts_and_location_lists() {
        let (env, actions) = setup_test_env();
        let patient = env.patient();
        let mut visit = env.visit(patient.id, at(1, 8), Some(at(1, 20)));
        env.encounter(&mut visit, &EncounterType::new("Vitals").unwrap(), at(1, 9), OUTPATIENT);
        let last = env.encounter(&mut visit, &EncounterType::new("Consult").unwrap(), at(1, 10), OUTPATIENT);

        assert_eq!(actions.count_of_encounters(patient.id).unwrap(), 2);
        assert_eq!(actions.count_of_visits(patient.id).unwrap(), 1);
        assert_eq!(actions.last_encounter(patient.id).unwrap().unwrap().id, last.id);
        assert_eq!(actions.inpatient_locations(), vec![WARD_A, WARD_B]);
        assert_eq!(actions.visit_locations(), vec![HOSPITAL, CLINIC]);
    }
}
