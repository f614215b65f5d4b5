//! Visit and patient merging.
//!
//! Merging a visit moves every encounter of the losing visit into the winning one, widens the
//! winner's date range to cover the loser, and voids the loser. Merging patients merges their
//! overlapping visits first and then hands the identity merge to the store.
//!
//! Extension hooks ([`VisitMergeAction`], [`PatientMergeAction`]) are injected at construction and
//! run in registration order.

use crate::config::AdtConfig;
use crate::error::{AdtError, AdtResult};
use crate::location::LocationTree;
use crate::model::{Patient, Visit};
use crate::store::{AdtStore, StoreError};
use adt_types::{PatientId, VisitId};
use chrono::{DateTime, Utc};
use std::sync::Arc;

// ============================================================================
// HOOKS
// ============================================================================

/// Runs around the save of a visit merge.
pub trait VisitMergeAction: Send + Sync {
    /// Called after encounters have moved, before the loser is voided.
    fn before_saving_visits(&self, _winner: &Visit, _loser: &Visit) -> AdtResult<()> {
        Ok(())
    }

    fn after_saving_visits(&self, _winner: &Visit, _loser: &Visit) -> AdtResult<()> {
        Ok(())
    }
}

/// Runs around a patient merge.
pub trait PatientMergeAction: Send + Sync {
    fn before_merging_patients(&self, _preferred: &Patient, _non_preferred: &Patient) -> AdtResult<()> {
        Ok(())
    }

    fn after_merging_patients(&self, _preferred: &Patient, _non_preferred: &Patient) -> AdtResult<()> {
        Ok(())
    }
}

// ============================================================================
// OVERLAP
// ============================================================================

/// True if the visits are at the "same" location and their date ranges intersect.
///
/// Locations are the same when both are missing or one is the same as or an ancestor of the
/// other. A missing stop counts as the latest possible time.
pub fn visits_overlap(tree: &LocationTree, v1: &Visit, v2: &Visit) -> bool {
    let same_place = (v1.location.is_none() && v2.location.is_none())
        || tree.is_same_or_ancestor(v1.location, v2.location)
        || tree.is_same_or_ancestor(v2.location, v1.location);
    if !same_place {
        return false;
    }

    let starts_before_end =
        |start: DateTime<Utc>, stop: Option<DateTime<Utc>>| stop.is_none_or(|stop| start <= stop);
    starts_before_end(v1.start, v2.stop) && starts_before_end(v2.start, v1.stop)
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct VisitMergeEngine {
    cfg: Arc<AdtConfig>,
    locations: Arc<LocationTree>,
    store: Arc<dyn AdtStore>,
    visit_actions: Vec<Arc<dyn VisitMergeAction>>,
    patient_actions: Vec<Arc<dyn PatientMergeAction>>,
}

impl VisitMergeEngine {
    pub fn new(cfg: Arc<AdtConfig>, locations: Arc<LocationTree>, store: Arc<dyn AdtStore>) -> Self {
        Self {
            cfg,
            locations,
            store,
            visit_actions: Vec::new(),
            patient_actions: Vec::new(),
        }
    }

    pub fn with_visit_merge_action(mut self, action: Arc<dyn VisitMergeAction>) -> Self {
        self.visit_actions.push(action);
        self
    }

    pub fn with_patient_merge_action(mut self, action: Arc<dyn PatientMergeAction>) -> Self {
        self.patient_actions.push(action);
        self
    }

    /// Merges `loser` into `winner` in place and persists both.
    ///
    /// # Errors
    ///
    /// - [`AdtError::InvalidArgument`] if both are the same visit or either is voided. Nothing is
    ///   changed in that case.
    /// - Any hook or store failure.
    pub fn merge_into(&self, winner: &mut Visit, loser: &mut Visit) -> AdtResult<()> {
        if winner.id == loser.id {
            return Err(AdtError::InvalidArgument(format!(
                "cannot merge visit {} into itself",
                winner.id
            )));
        }
        if winner.voided || loser.voided {
            return Err(AdtError::InvalidArgument(
                "cannot merge a voided visit".into(),
            ));
        }

        if loser.start < winner.start {
            winner.start = loser.start;
        }
        if let Some(winner_stop) = winner.stop {
            match loser.stop {
                None => winner.stop = None,
                Some(loser_stop) if loser_stop > winner_stop => winner.stop = Some(loser_stop),
                Some(_) => {}
            }
        }

        // Moved encounters must be gone from the loser before it is voided, or the void
        // cascades onto them.
        for mut encounter in std::mem::take(&mut loser.encounters) {
            encounter.patient = winner.patient;
            encounter.visit = Some(winner.id);
            self.store.save_encounter(&encounter)?;
            winner.add_encounter(encounter);
        }

        for action in &self.visit_actions {
            action.before_saving_visits(winner, loser)?;
        }

        let reason = format!("merged into visit {}", winner.id);
        self.store.void_visit(loser, &reason)?;
        self.store.save_visit(winner)?;

        for action in &self.visit_actions {
            action.after_saving_visits(winner, loser)?;
        }

        tracing::info!(winner = %winner.id, loser = %loser.id, "merged visits");
        Ok(())
    }

    /// Owned form of [`Self::merge_into`], returning the winner.
    pub fn merge_visits(&self, mut winner: Visit, mut loser: Visit) -> AdtResult<Visit> {
        self.merge_into(&mut winner, &mut loser)?;
        Ok(winner)
    }

    /// True if `ids` appear, in order and without gaps, in the patient's visit history starting
    /// at the position of the first id.
    pub fn are_consecutive_visits(&self, ids: &[VisitId], patient: PatientId) -> AdtResult<bool> {
        let Some(first) = ids.first() else {
            return Ok(false);
        };

        let history: Vec<VisitId> = self
            .store
            .visits_by_patient(patient, true, false)?
            .iter()
            .map(|v| v.id)
            .collect();

        if !ids.iter().all(|id| history.contains(id)) {
            return Ok(false);
        }
        let Some(start) = history.iter().position(|id| id == first) else {
            return Ok(false);
        };

        Ok(history.len() - start >= ids.len() && history[start..start + ids.len()] == *ids)
    }

    /// Folds consecutive visits left to right into the first one.
    ///
    /// Returns `Ok(None)` when the ids are not consecutive for the patient.
    pub fn merge_consecutive_visits(
        &self,
        ids: &[VisitId],
        patient: PatientId,
    ) -> AdtResult<Option<Visit>> {
        if !self.are_consecutive_visits(ids, patient)? {
            return Ok(None);
        }

        let mut visits = ids.iter().map(|id| self.load_visit(*id));
        let Some(first) = visits.next() else {
            return Ok(None);
        };
        let mut merged = first?;
        for next in visits {
            let mut loser = next?;
            self.merge_into(&mut merged, &mut loser)?;
        }
        Ok(Some(merged))
    }

    /// Merges `non_preferred` into `preferred`, visits first, then identity.
    ///
    /// # Errors
    ///
    /// - [`AdtError::InvalidArgument`] when both ids name the same patient, or when merging a
    ///   permanent record into an unknown one
    /// - [`AdtError::PatientMerge`] when the store's identity merge fails
    /// - Any hook, visit merge or store failure
    pub fn merge_patients(&self, preferred: PatientId, non_preferred: PatientId) -> AdtResult<()> {
        if preferred == non_preferred {
            return Err(AdtError::InvalidArgument(format!(
                "cannot merge patient {preferred} into itself"
            )));
        }

        let preferred_patient = self.load_patient(preferred)?;
        let non_preferred_patient = self.load_patient(non_preferred)?;

        let unknown = self.cfg.unknown_patient_attribute();
        let preferred_was_unknown = preferred_patient.has_flag(unknown);
        if preferred_was_unknown && !non_preferred_patient.has_flag(unknown) {
            return Err(AdtError::InvalidArgument(
                "cannot merge a permanent record into an unknown one".into(),
            ));
        }

        for action in &self.patient_actions {
            action.before_merging_patients(&preferred_patient, &non_preferred_patient)?;
        }

        let mut kept = self.store.visits_by_patient(preferred, true, false)?;
        let incoming = self.store.visits_by_patient(non_preferred, true, false)?;

        for mut losing in incoming {
            if losing.voided {
                continue;
            }
            let target = kept
                .iter()
                .position(|w| !w.voided && visits_overlap(&self.locations, &losing, w));
            if let Some(index) = target {
                self.merge_into(&mut kept[index], &mut losing)?;
            }
        }

        // Widened visits may now overlap each other.
        kept.sort_by_key(|v| v.start);
        for i in 0..kept.len() {
            let (head, tail) = kept.split_at_mut(i + 1);
            let visit = &mut head[i];
            if visit.voided {
                continue;
            }
            for candidate in tail.iter_mut() {
                if !candidate.voided && visits_overlap(&self.locations, visit, candidate) {
                    self.merge_into(visit, candidate)?;
                }
            }
        }

        self.store
            .merge_patients(preferred, non_preferred)
            .map_err(AdtError::PatientMerge)?;

        if !preferred_was_unknown {
            if let Some(mut merged) = self.store.patient(preferred)? {
                if merged.remove_attribute(unknown).is_some() {
                    self.store.save_patient(&merged)?;
                }
            }
        }

        for action in &self.patient_actions {
            action.after_merging_patients(&preferred_patient, &non_preferred_patient)?;
        }

        tracing::info!(preferred = %preferred, non_preferred = %non_preferred, "merged patients");
        Ok(())
    }

    fn load_visit(&self, id: VisitId) -> AdtResult<Visit> {
        self.store
            .visit(id)?
            .ok_or_else(|| StoreError::NotFound(format!("visit {id}")).into())
    }

    fn load_patient(&self, id: PatientId) -> AdtResult<Patient> {
        self.store
            .patient(id)?
            .ok_or_else(|| StoreError::NotFound(format!("patient {id}")).into())
    }
}
