//! The ADT service facade.
//!
//! Wires the visit resolver, merge engine, admission aggregator, ADT actions and maternal
//! lookups over one configuration, location tree and store. Operations that depend on the
//! current time read the clock here; the components underneath take `now` explicitly.

use crate::admission::{
    InpatientAdmission, InpatientAdmissionAggregator, InpatientAdmissionSearchCriteria,
    InpatientRequest, InpatientRequestSearchCriteria,
};
use crate::adt::{AdtAction, AdtActions, CloseSummary};
use crate::checkin::{ActiveVisitResolver, CheckInRequest};
use crate::config::AdtConfig;
use crate::error::AdtResult;
use crate::location::LocationTree;
use crate::matcher::{find_or_create_encounter, EncounterMatcher, EncounterParameters};
use crate::maternal::{
    Child, ChildrenByMothersCriteria, MaternalService, Mother, MothersByChildrenCriteria,
};
use crate::merge::{PatientMergeAction, VisitMergeAction, VisitMergeEngine};
use crate::model::{Encounter, Visit};
use crate::store::{AdtStore, StoreError};
use adt_types::{LocationId, PatientId, VisitId};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct AdtService {
    store: Arc<dyn AdtStore>,
    visits: ActiveVisitResolver,
    merge: VisitMergeEngine,
    admissions: InpatientAdmissionAggregator,
    actions: AdtActions,
    maternal: MaternalService,
    matcher: Arc<dyn EncounterMatcher>,
}

impl AdtService {
    /// Creates the service with the encounter matcher named in `cfg` and no merge hooks.
    pub fn new(cfg: Arc<AdtConfig>, locations: Arc<LocationTree>, store: Arc<dyn AdtStore>) -> Self {
        let matcher = cfg.encounter_matcher().build();
        Self {
            visits: ActiveVisitResolver::new(cfg.clone(), locations.clone(), store.clone()),
            merge: VisitMergeEngine::new(cfg.clone(), locations.clone(), store.clone()),
            admissions: InpatientAdmissionAggregator::new(
                cfg.clone(),
                locations.clone(),
                store.clone(),
            ),
            actions: AdtActions::new(cfg.clone(), locations.clone(), store.clone()),
            maternal: MaternalService::new(cfg, locations, store.clone()),
            store,
            matcher,
        }
    }

    pub fn with_encounter_matcher(mut self, matcher: Arc<dyn EncounterMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Registers a hook run around every visit merge, in registration order.
    pub fn with_visit_merge_action(self, action: Arc<dyn VisitMergeAction>) -> Self {
        Self {
            merge: self.merge.with_visit_merge_action(action),
            ..self
        }
    }

    /// Registers a hook run around every patient merge, in registration order.
    pub fn with_patient_merge_action(self, action: Arc<dyn PatientMergeAction>) -> Self {
        Self {
            merge: self.merge.with_patient_merge_action(action),
            ..self
        }
    }

    fn load_visit(&self, id: VisitId) -> AdtResult<Visit> {
        Ok(self
            .store
            .visit(id)?
            .ok_or_else(|| StoreError::NotFound(format!("visit {id}")))?)
    }

    // ========================================================================
    // VISITS
    // ========================================================================

    /// Checks the patient in at `request.location`, opening a visit when needed.
    ///
    /// # Returns
    ///
    /// The saved check-in encounter, or the existing one when the patient's latest encounter is
    /// already an equivalent check-in on the active visit.
    ///
    /// # Errors
    ///
    /// Returns an `AdtError` if the location cannot host a visit, the clerk cannot be resolved,
    /// or the store fails.
    pub fn check_in(&self, request: CheckInRequest) -> AdtResult<Encounter> {
        self.visits.check_in(request, Utc::now())
    }

    pub fn active_visit(&self, patient: PatientId, location: LocationId) -> AdtResult<Option<Visit>> {
        self.visits.find_active_visit(patient, location, Utc::now())
    }

    pub fn ensure_active_visit(&self, patient: PatientId, location: LocationId) -> AdtResult<Visit> {
        self.visits.ensure_active_visit(patient, location, Utc::now())
    }

    pub fn ensure_visit(
        &self,
        patient: PatientId,
        when: Option<DateTime<Utc>>,
        location: LocationId,
    ) -> AdtResult<Visit> {
        self.visits.ensure_visit(patient, when, location, Utc::now())
    }

    pub fn close_and_save_visit(&self, visit: &mut Visit) -> AdtResult<()> {
        self.visits.close_and_save_visit(visit)
    }

    /// Closes every open visit that has been inactive past its threshold.
    pub fn close_inactive_visits(&self) -> AdtResult<CloseSummary> {
        self.actions.close_inactive_visits_at(Utc::now())
    }

    pub fn create_retrospective_visit(
        &self,
        patient: PatientId,
        location: LocationId,
        start: DateTime<Utc>,
        stop: Option<DateTime<Utc>>,
    ) -> AdtResult<Visit> {
        self.actions
            .create_retrospective_visit(patient, location, start, stop, Utc::now())
    }

    pub fn visits_during(
        &self,
        patient: PatientId,
        location: LocationId,
        start: DateTime<Utc>,
        stop: Option<DateTime<Utc>>,
    ) -> AdtResult<Vec<Visit>> {
        self.actions.visits_during(patient, location, start, stop)
    }

    pub fn has_visit_during(
        &self,
        patient: PatientId,
        location: LocationId,
        start: DateTime<Utc>,
        stop: Option<DateTime<Utc>>,
    ) -> AdtResult<bool> {
        self.actions.has_visit_during(patient, location, start, stop)
    }

    pub fn active_visits(&self, location: LocationId) -> AdtResult<Vec<Visit>> {
        self.actions.active_visits(location)
    }

    pub fn inpatient_visits(
        &self,
        visit_location: LocationId,
        ward: Option<LocationId>,
    ) -> AdtResult<Vec<Visit>> {
        self.actions.inpatient_visits(visit_location, ward)
    }

    pub fn last_encounter(&self, patient: PatientId) -> AdtResult<Option<Encounter>> {
        self.actions.last_encounter(patient)
    }

    pub fn count_of_encounters(&self, patient: PatientId) -> AdtResult<usize> {
        self.actions.count_of_encounters(patient)
    }

    pub fn count_of_visits(&self, patient: PatientId) -> AdtResult<usize> {
        self.actions.count_of_visits(patient)
    }

    pub fn inpatient_locations(&self) -> Vec<LocationId> {
        self.actions.inpatient_locations()
    }

    pub fn visit_locations(&self) -> Vec<LocationId> {
        self.actions.visit_locations()
    }

    // ========================================================================
    // ENCOUNTERS
    // ========================================================================

    pub fn create_adt_encounter(&self, action: AdtAction) -> AdtResult<Encounter> {
        self.actions.create_adt_encounter(action, Utc::now())
    }

    /// Returns the encounter on `visit` matching `params`, creating and saving one if none does.
    pub fn find_or_create_encounter(
        &self,
        visit: VisitId,
        params: &EncounterParameters,
    ) -> AdtResult<Encounter> {
        let mut visit = self.load_visit(visit)?;
        let before = visit.encounters.len();
        let patient = visit.patient;
        let encounter =
            find_or_create_encounter(self.matcher.as_ref(), &mut visit, params, patient, Utc::now())?;
        if visit.encounters.len() != before {
            self.store.save_visit(&visit)?;
        }
        Ok(encounter)
    }

    // ========================================================================
    // MERGES
    // ========================================================================

    pub fn merge_visits(&self, winner: VisitId, loser: VisitId) -> AdtResult<Visit> {
        let winner = self.load_visit(winner)?;
        let loser = self.load_visit(loser)?;
        self.merge.merge_visits(winner, loser)
    }

    pub fn are_consecutive_visits(&self, ids: &[VisitId], patient: PatientId) -> AdtResult<bool> {
        self.merge.are_consecutive_visits(ids, patient)
    }

    pub fn merge_consecutive_visits(
        &self,
        ids: &[VisitId],
        patient: PatientId,
    ) -> AdtResult<Option<Visit>> {
        self.merge.merge_consecutive_visits(ids, patient)
    }

    pub fn merge_patients(&self, preferred: PatientId, non_preferred: PatientId) -> AdtResult<()> {
        self.merge.merge_patients(preferred, non_preferred)
    }

    // ========================================================================
    // ADMISSIONS
    // ========================================================================

    pub fn inpatient_admissions(
        &self,
        criteria: &InpatientAdmissionSearchCriteria,
    ) -> AdtResult<Vec<InpatientAdmission>> {
        self.admissions.inpatient_admissions(criteria)
    }

    pub fn inpatient_requests(
        &self,
        criteria: &InpatientRequestSearchCriteria,
    ) -> AdtResult<Vec<InpatientRequest>> {
        self.admissions.inpatient_requests(criteria)
    }

    pub fn visits_awaiting_admission(
        &self,
        location: Option<LocationId>,
        patients: Option<Vec<PatientId>>,
        visits: Option<Vec<VisitId>>,
    ) -> AdtResult<Vec<Visit>> {
        self.admissions
            .visits_awaiting_admission(location, patients, visits)
    }

    pub fn children_by_mothers(&self, criteria: &ChildrenByMothersCriteria) -> AdtResult<Vec<Child>> {
        self.maternal.children_by_mothers(criteria)
    }

    pub fn mothers_by_children(&self, criteria: &MothersByChildrenCriteria) -> AdtResult<Vec<Mother>> {
        self.maternal.mothers_by_children(criteria)
    }
}
