//! Derived, read-only views over a visit.
//!
//! [`VisitView`] pairs a [`Visit`] with the configuration that names its encounter types and
//! dispositions, and answers questions such as "is this patient admitted?" without storing the
//! answer anywhere.

use crate::config::AdtConfig;
use crate::error::{AdtError, AdtResult};
use crate::model::{Disposition, DispositionType, Encounter, Visit};
use adt_types::{EncounterType, LocationId};
use chrono::{DateTime, Utc};

#[derive(Clone, Copy, Debug)]
pub struct VisitView<'a> {
    visit: &'a Visit,
    cfg: &'a AdtConfig,
}

impl<'a> VisitView<'a> {
    pub fn new(visit: &'a Visit, cfg: &'a AdtConfig) -> Self {
        Self { visit, cfg }
    }

    pub fn visit(&self) -> &'a Visit {
        self.visit
    }

    pub fn is_active(&self) -> bool {
        self.visit.is_active()
    }

    /// Non-voided encounters, most recent first.
    pub fn sorted_encounters(&self) -> Vec<&'a Encounter> {
        let mut encounters: Vec<&Encounter> = self.visit.non_voided_encounters().collect();
        encounters.sort_by(|a, b| b.datetime.cmp(&a.datetime));
        encounters
    }

    pub fn has_encounters(&self) -> bool {
        self.visit.non_voided_encounters().next().is_some()
    }

    pub fn most_recent_encounter(&self) -> Option<&'a Encounter> {
        self.sorted_encounters().first().copied()
    }

    pub fn oldest_encounter(&self) -> Option<&'a Encounter> {
        self.sorted_encounters().last().copied()
    }

    fn most_recent_of_type(&self, encounter_type: &EncounterType) -> Option<&'a Encounter> {
        self.sorted_encounters()
            .into_iter()
            .find(|e| &e.encounter_type == encounter_type)
    }

    pub fn check_in_encounter(&self) -> Option<&'a Encounter> {
        self.most_recent_of_type(self.cfg.check_in_encounter_type())
    }

    pub fn admission_encounter(&self) -> Option<&'a Encounter> {
        self.most_recent_of_type(self.cfg.admission_encounter_type())
    }

    /// Most recent admission or transfer encounter.
    pub fn latest_adt_encounter(&self) -> Option<&'a Encounter> {
        self.sorted_encounters().into_iter().find(|e| {
            &e.encounter_type == self.cfg.admission_encounter_type()
                || &e.encounter_type == self.cfg.transfer_encounter_type()
        })
    }

    /// Walks encounters newest-first (optionally only those at or before `on`) and reports
    /// whether `look_for` appears before any `unless_after`.
    fn has_encounter_without_subsequent(
        &self,
        look_for: &EncounterType,
        unless_after: &EncounterType,
        on: Option<DateTime<Utc>>,
    ) -> bool {
        for encounter in self.sorted_encounters() {
            if on.is_some_and(|on| encounter.datetime > on) {
                continue;
            }
            if &encounter.encounter_type == look_for {
                return true;
            }
            if &encounter.encounter_type == unless_after {
                return false;
            }
        }
        false
    }

    /// True if the visit has an admission encounter with no later discharge.
    pub fn is_admitted(&self) -> bool {
        self.has_encounter_without_subsequent(
            self.cfg.admission_encounter_type(),
            self.cfg.exit_from_inpatient_encounter_type(),
            None,
        )
    }

    /// Admission state as of `on`.
    ///
    /// # Errors
    ///
    /// [`AdtError::InvalidArgument`] if `on` falls outside the visit.
    pub fn is_admitted_on(&self, on: DateTime<Utc>) -> AdtResult<bool> {
        if self.visit.start > on || self.visit.stop.is_some_and(|stop| stop < on) {
            return Err(AdtError::InvalidArgument(
                "date does not fall within visit".into(),
            ));
        }
        Ok(self.has_encounter_without_subsequent(
            self.cfg.admission_encounter_type(),
            self.cfg.exit_from_inpatient_encounter_type(),
            Some(on),
        ))
    }

    /// Ward the patient occupied at `on`, if admitted then.
    pub fn inpatient_location_on(&self, on: DateTime<Utc>) -> AdtResult<Option<LocationId>> {
        if !self.is_admitted_on(on)? {
            return Ok(None);
        }
        Ok(self
            .sorted_encounters()
            .into_iter()
            .filter(|e| e.datetime <= on)
            .find(|e| {
                &e.encounter_type == self.cfg.admission_encounter_type()
                    || &e.encounter_type == self.cfg.transfer_encounter_type()
            })
            .and_then(|e| e.location))
    }

    /// Dispositions recorded on the visit, newest encounter first, with their encounter.
    fn dispositions(&self) -> impl Iterator<Item = (&'a Encounter, &'a Disposition)> {
        let cfg = self.cfg;
        let descriptor = cfg.disposition_descriptor();
        self.sorted_encounters().into_iter().flat_map(move |encounter| {
            encounter
                .top_level_obs()
                .filter_map(move |obs| descriptor.disposition_code(obs))
                .filter_map(move |code| cfg.disposition_by_code(code))
                .map(move |d| (encounter, d))
        })
    }

    /// Disposition on the most recent encounter that has one.
    ///
    /// Only top-level disposition groups are considered.
    pub fn most_recent_disposition(&self) -> Option<&'a Disposition> {
        self.dispositions().next().map(|(_, d)| d)
    }

    /// True if an admission was requested and neither fulfilled nor denied since.
    pub fn is_awaiting_admission(&self) -> bool {
        if self.is_admitted() {
            return false;
        }

        let Some((request, _)) = self
            .dispositions()
            .find(|(_, d)| d.disposition_type == Some(DispositionType::Admit))
        else {
            return false;
        };

        let admitted_since = self.sorted_encounters().into_iter().any(|e| {
            e.id != request.id
                && e.datetime >= request.datetime
                && &e.encounter_type == self.cfg.admission_encounter_type()
        });
        if admitted_since {
            return false;
        }

        !self.denied_since(request)
    }

    fn denied_since(&self, request: &Encounter) -> bool {
        let (Some(decision), Some(deny)) = (
            self.cfg.admission_decision_concept(),
            self.cfg.deny_admission_concept(),
        ) else {
            return false;
        };

        self.sorted_encounters()
            .into_iter()
            .filter(|e| e.datetime >= request.datetime)
            .flat_map(|e| e.top_level_obs())
            .any(|obs| obs.concept == decision && obs.value_coded() == Some(deny))
    }

    /// Admitted, awaiting admission, or holding a disposition that keeps the visit open.
    pub fn is_inpatient(&self) -> bool {
        self.is_admitted()
            || self.is_awaiting_admission()
            || self
                .most_recent_disposition()
                .is_some_and(|d| d.keeps_visit_open)
    }

    /// Fails if `when` is outside the visit's start/stop bounds.
    pub fn error_if_outside_visit(&self, when: DateTime<Utc>, message: &str) -> AdtResult<()> {
        if when < self.visit.start {
            return Err(AdtError::InvalidArgument(format!(
                "{message}: visit started at {} but testing an earlier date",
                self.visit.start
            )));
        }
        if let Some(stop) = self.visit.stop {
            if stop < when {
                return Err(AdtError::InvalidArgument(format!(
                    "{message}: visit stopped at {stop} but testing a later date"
                )));
            }
        }
        Ok(())
    }
}
