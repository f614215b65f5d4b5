//! Mother and child lookups, each joined with the relevant inpatient admission.

use crate::admission::{
    InpatientAdmission, InpatientAdmissionAggregator, InpatientAdmissionSearchCriteria,
};
use crate::config::AdtConfig;
use crate::error::{AdtError, AdtResult};
use crate::location::LocationTree;
use crate::store::{AdtStore, MotherChildQuery, MotherChildRow};
use adt_types::PatientId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChildrenByMothersCriteria {
    pub mothers: Vec<PatientId>,
    pub require_mother_has_active_visit: bool,
    pub require_child_has_active_visit: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MothersByChildrenCriteria {
    pub children: Vec<PatientId>,
    pub require_mother_has_active_visit: bool,
    pub require_child_has_active_visit: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Child {
    pub mother: PatientId,
    pub child: PatientId,
    pub child_admission: Option<InpatientAdmission>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Mother {
    pub mother: PatientId,
    pub child: PatientId,
    pub mother_admission: Option<InpatientAdmission>,
}

pub struct MaternalService {
    cfg: Arc<AdtConfig>,
    store: Arc<dyn AdtStore>,
    admissions: InpatientAdmissionAggregator,
}

impl MaternalService {
    pub fn new(cfg: Arc<AdtConfig>, locations: Arc<LocationTree>, store: Arc<dyn AdtStore>) -> Self {
        let admissions = InpatientAdmissionAggregator::new(cfg.clone(), locations, store.clone());
        Self {
            cfg,
            store,
            admissions,
        }
    }

    fn relationship_type(&self) -> AdtResult<String> {
        self.cfg
            .mother_child_relationship_type()
            .map(str::to_string)
            .ok_or_else(|| {
                AdtError::Configuration(
                    "mother-child relationship type has not been configured".into(),
                )
            })
    }

    /// Current admission of each patient, keyed by patient. A later admission replaces an
    /// earlier one.
    fn admissions_by_patient(
        &self,
        patients: BTreeSet<PatientId>,
    ) -> AdtResult<BTreeMap<PatientId, InpatientAdmission>> {
        if patients.is_empty() {
            return Ok(BTreeMap::new());
        }
        let criteria = InpatientAdmissionSearchCriteria {
            patients: Some(patients.into_iter().collect()),
            ..InpatientAdmissionSearchCriteria::default()
        };
        Ok(self
            .admissions
            .inpatient_admissions(&criteria)?
            .into_iter()
            .map(|admission| (admission.patient, admission))
            .collect())
    }

    fn rows(&self, query: MotherChildQuery) -> AdtResult<Vec<MotherChildRow>> {
        Ok(self.store.mother_child_rows(&query)?)
    }

    /// Children of the given mothers, each with the child's inpatient admission if any.
    ///
    /// # Errors
    ///
    /// Returns [`AdtError::Configuration`] if no mother-child relationship type is configured.
    pub fn children_by_mothers(&self, criteria: &ChildrenByMothersCriteria) -> AdtResult<Vec<Child>> {
        let rows = self.rows(MotherChildQuery {
            relationship_type: self.relationship_type()?,
            mothers: Some(criteria.mothers.clone()),
            children: None,
            require_mother_has_active_visit: criteria.require_mother_has_active_visit,
            require_child_has_active_visit: criteria.require_child_has_active_visit,
        })?;

        let admissions = self.admissions_by_patient(rows.iter().map(|r| r.child).collect())?;
        tracing::debug!(rows = rows.len(), admitted = admissions.len(), "children by mothers");

        Ok(rows
            .into_iter()
            .map(|row| Child {
                mother: row.mother,
                child: row.child,
                child_admission: admissions.get(&row.child).cloned(),
            })
            .collect())
    }

    /// Mothers of the given children, each with the mother's inpatient admission if any.
    ///
    /// # Errors
    ///
    /// Returns [`AdtError::Configuration`] if no mother-child relationship type is configured.
    pub fn mothers_by_children(&self, criteria: &MothersByChildrenCriteria) -> AdtResult<Vec<Mother>> {
        let rows = self.rows(MotherChildQuery {
            relationship_type: self.relationship_type()?,
            mothers: None,
            children: Some(criteria.children.clone()),
            require_mother_has_active_visit: criteria.require_mother_has_active_visit,
            require_child_has_active_visit: criteria.require_child_has_active_visit,
        })?;

        let admissions = self.admissions_by_patient(rows.iter().map(|r| r.mother).collect())?;
        tracing::debug!(rows = rows.len(), admitted = admissions.len(), "mothers by children");

        Ok(rows
            .into_iter()
            .map(|row| Mother {
                mother: row.mother,
                child: row.child,
                mother_admission: admissions.get(&row.mother).cloned(),
            })
            .collect())
    }
}
