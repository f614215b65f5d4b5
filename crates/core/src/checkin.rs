//! Active-visit resolution and check-in.
//!
//! A patient has at most one active visit per visit location. [`ActiveVisitResolver`] finds it,
//! creates it when needed, and records check-in encounters against it. Check-in runs under a
//! process-local lock so two concurrent check-ins for the same patient cannot both decide that
//! no check-in exists yet.

use crate::activity::{infer_stop_time, is_suitable_visit};
use crate::config::AdtConfig;
use crate::error::{AdtError, AdtResult};
use crate::location::LocationTree;
use crate::model::{Encounter, Obs, Order, Visit};
use crate::store::{AdtStore, VisitQuery};
use adt_types::{LocationId, PatientId, ProviderId, UserId};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};

/// Everything needed to check a patient in.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckInRequest {
    pub patient: PatientId,
    pub location: LocationId,
    /// Provider recorded as the clerk. Looked up from `acting_user` when absent.
    pub clerk: Option<ProviderId>,
    pub acting_user: Option<UserId>,
    pub obs: Vec<Obs>,
    pub orders: Vec<Order>,
    /// Close any active visit first and start a new one.
    pub force_new_visit: bool,
}

impl CheckInRequest {
    pub fn new(patient: PatientId, location: LocationId) -> Self {
        Self {
            patient,
            location,
            clerk: None,
            acting_user: None,
            obs: Vec::new(),
            orders: Vec::new(),
            force_new_visit: false,
        }
    }

    pub fn with_clerk(mut self, clerk: ProviderId) -> Self {
        self.clerk = Some(clerk);
        self
    }

    pub fn by_user(mut self, user: UserId) -> Self {
        self.acting_user = Some(user);
        self
    }
}

/// Sets the inferred stop time on `visit` and saves it.
pub(crate) fn close_and_save(store: &dyn AdtStore, visit: &mut Visit) -> AdtResult<()> {
    visit.stop = Some(infer_stop_time(visit));
    store.save_visit(visit)?;
    tracing::info!(visit = %visit.id, stop = ?visit.stop, "closed visit");
    Ok(())
}

pub struct ActiveVisitResolver {
    cfg: Arc<AdtConfig>,
    locations: Arc<LocationTree>,
    store: Arc<dyn AdtStore>,
    check_in_lock: Mutex<()>,
}

impl ActiveVisitResolver {
    pub fn new(cfg: Arc<AdtConfig>, locations: Arc<LocationTree>, store: Arc<dyn AdtStore>) -> Self {
        Self {
            cfg,
            locations,
            store,
            check_in_lock: Mutex::new(()),
        }
    }

    /// The patient's visit that suits `location` at `now`.
    ///
    /// When several visits qualify the last one in store order wins.
    pub fn find_active_visit(
        &self,
        patient: PatientId,
        location: LocationId,
        now: DateTime<Utc>,
    ) -> AdtResult<Option<Visit>> {
        let candidates = self.store.visits_by_patient(patient, true, false)?;
        Ok(candidates
            .into_iter()
            .filter(|v| is_suitable_visit(&self.locations, v, Some(location), now, false))
            .last())
    }

    /// A new, unsaved at-facility visit at the visit location serving `location`.
    ///
    /// # Errors
    ///
    /// [`AdtError::Configuration`] if no location in the chain supports visits.
    pub fn build_visit(
        &self,
        patient: PatientId,
        location: LocationId,
        start: DateTime<Utc>,
    ) -> AdtResult<Visit> {
        let visit_location = self
            .locations
            .resolve_visit_location(Some(location), self.cfg.supports_visits_tag())?;
        Ok(Visit::new(
            patient,
            Some(visit_location),
            self.cfg.at_facility_visit_type().clone(),
            start,
        ))
    }

    /// Returns the active visit, creating and saving one if there is none.
    pub fn ensure_active_visit(
        &self,
        patient: PatientId,
        location: LocationId,
        now: DateTime<Utc>,
    ) -> AdtResult<Visit> {
        if let Some(active) = self.find_active_visit(patient, location, now)? {
            return Ok(active);
        }

        let visit = self.build_visit(patient, location, now)?;
        self.store.save_visit(&visit)?;
        tracing::info!(visit = %visit.id, patient = %patient, "started visit");
        Ok(visit)
    }

    /// Returns a visit covering `when`, creating one that starts at `when` if none does.
    ///
    /// Candidates are the patient's non-voided visits that had not ended by `when`; the first
    /// suitable one is used. A missing `when` means `now`.
    pub fn ensure_visit(
        &self,
        patient: PatientId,
        when: Option<DateTime<Utc>>,
        location: LocationId,
        now: DateTime<Utc>,
    ) -> AdtResult<Visit> {
        let when = when.unwrap_or(now);
        let query = VisitQuery {
            ended_on_or_after: Some(when),
            include_inactive: true,
            ..VisitQuery::for_patient(patient)
        };

        let candidates = self.store.visits(&query)?;
        if let Some(found) = candidates
            .into_iter()
            .find(|v| is_suitable_visit(&self.locations, v, Some(location), when, false))
        {
            return Ok(found);
        }

        let visit = self.build_visit(patient, location, when)?;
        self.store.save_visit(&visit)?;
        tracing::info!(visit = %visit.id, patient = %patient, "started visit");
        Ok(visit)
    }

    /// Closes `visit` at its inferred stop time and saves it.
    pub fn close_and_save_visit(&self, visit: &mut Visit) -> AdtResult<()> {
        close_and_save(self.store.as_ref(), visit)
    }

    /// The clerk to record: the one given, else the acting user's only provider account.
    ///
    /// # Errors
    ///
    /// [`AdtError::Configuration`] if no clerk and no user are given, or the user has zero or
    /// several provider accounts.
    pub fn resolve_clerk(
        &self,
        clerk: Option<ProviderId>,
        acting_user: Option<UserId>,
    ) -> AdtResult<ProviderId> {
        if let Some(clerk) = clerk {
            return Ok(clerk);
        }
        let Some(user) = acting_user else {
            return Err(AdtError::Configuration(
                "no check-in clerk given and no acting user to look one up from".into(),
            ));
        };

        let mut providers = self.store.providers_for_user(user)?;
        match providers.len() {
            0 => Err(AdtError::Configuration(format!(
                "user {user} does not have a provider account"
            ))),
            1 => Ok(providers.remove(0).id),
            _ => Err(AdtError::Configuration(format!(
                "user {user} has more than one provider account"
            ))),
        }
    }

    /// Records a check-in encounter for the patient at `now`.
    ///
    /// Checking in twice in a row at the same location within the same visit returns the
    /// existing check-in encounter instead of creating another.
    ///
    /// # Errors
    ///
    /// Returns `AdtError` if the clerk cannot be resolved, the location has no visit location,
    /// or the store fails.
    pub fn check_in(&self, request: CheckInRequest, now: DateTime<Utc>) -> AdtResult<Encounter> {
        let _guard = self
            .check_in_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let clerk = self.resolve_clerk(request.clerk, request.acting_user)?;

        let mut active = self.find_active_visit(request.patient, request.location, now)?;
        if request.force_new_visit {
            if let Some(mut current) = active.take() {
                self.close_and_save_visit(&mut current)?;
            }
        }
        let visit = match active {
            Some(visit) => visit,
            None => self.ensure_active_visit(request.patient, request.location, now)?,
        };

        let last = self.store.encounters_by_patient(request.patient)?.pop();
        if let Some(last) = last {
            if last.visit == Some(visit.id)
                && &last.encounter_type == self.cfg.check_in_encounter_type()
                && last.location == Some(request.location)
            {
                tracing::warn!(
                    patient = %request.patient,
                    location = %request.location,
                    "patient tried to check in twice in a row during the same visit"
                );
                return Ok(last);
            }
        }

        let mut encounter = Encounter::new(
            request.patient,
            self.cfg.check_in_encounter_type().clone(),
            Some(request.location),
            now,
        );
        encounter.obs = request
            .obs
            .into_iter()
            .map(|mut obs| {
                obs.datetime = Some(now);
                obs
            })
            .collect();
        encounter.orders = request.orders;
        encounter.add_provider(self.cfg.check_in_clerk_encounter_role().clone(), clerk);
        encounter.visit = Some(visit.id);

        self.store.save_encounter(&encounter)?;
        tracing::info!(
            encounter = %encounter.id,
            visit = %visit.id,
            patient = %request.patient,
            "checked in patient"
        );
        Ok(encounter)
    }
}
