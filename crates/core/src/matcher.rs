//! Encounter matching.
//!
//! When a clinical transaction arrives for a visit, a matcher decides which existing encounter it
//! belongs to. The strategy is chosen once by name from configuration; unknown names are an error
//! rather than a silent fallback.

use crate::constants::DEFAULT_ENCOUNTER_MATCHER;
use crate::error::{AdtError, AdtResult};
use crate::model::{Encounter, Visit};
use adt_types::{EncounterId, EncounterType, LocationId, PatientId};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// What the caller knows about the encounter it wants.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EncounterParameters {
    pub encounter_type: Option<EncounterType>,
    pub location: Option<LocationId>,
    pub datetime: Option<DateTime<Utc>>,
}

impl EncounterParameters {
    pub fn of_type(encounter_type: EncounterType) -> Self {
        Self {
            encounter_type: Some(encounter_type),
            ..Self::default()
        }
    }

    pub fn at_location(mut self, location: LocationId) -> Self {
        self.location = Some(location);
        self
    }

    pub fn at(mut self, datetime: DateTime<Utc>) -> Self {
        self.datetime = Some(datetime);
        self
    }

    fn required_type(&self) -> AdtResult<&EncounterType> {
        self.encounter_type
            .as_ref()
            .ok_or_else(|| AdtError::InvalidArgument("encounter type not found".into()))
    }
}

pub trait EncounterMatcher: Send + Sync {
    /// The encounter within `visit` that `params` refers to, if any.
    fn find_encounter(
        &self,
        visit: &Visit,
        params: &EncounterParameters,
    ) -> AdtResult<Option<EncounterId>>;
}

/// Matches the first non-voided encounter of the requested type.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultEncounterMatcher;

impl EncounterMatcher for DefaultEncounterMatcher {
    fn find_encounter(
        &self,
        visit: &Visit,
        params: &EncounterParameters,
    ) -> AdtResult<Option<EncounterId>> {
        let wanted = params.required_type()?;
        Ok(visit
            .non_voided_encounters()
            .find(|e| &e.encounter_type == wanted)
            .map(|e| e.id))
    }
}

/// Like [`DefaultEncounterMatcher`], but the location must match too.
#[derive(Clone, Copy, Debug, Default)]
pub struct TypeAndLocationEncounterMatcher;

impl EncounterMatcher for TypeAndLocationEncounterMatcher {
    fn find_encounter(
        &self,
        visit: &Visit,
        params: &EncounterParameters,
    ) -> AdtResult<Option<EncounterId>> {
        let wanted = params.required_type()?;
        Ok(visit
            .non_voided_encounters()
            .find(|e| &e.encounter_type == wanted && e.location == params.location)
            .map(|e| e.id))
    }
}

/// The built-in matchers, selectable by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncounterMatcherKind {
    Default,
    TypeAndLocation,
}

impl EncounterMatcherKind {
    pub const TYPE_AND_LOCATION: &'static str = "type-and-location";

    /// # Errors
    ///
    /// Returns [`AdtError::EncounterMatcherNotFound`] for any name outside the known set.
    pub fn from_name(name: &str) -> AdtResult<Self> {
        match name.trim() {
            DEFAULT_ENCOUNTER_MATCHER => Ok(Self::Default),
            Self::TYPE_AND_LOCATION => Ok(Self::TypeAndLocation),
            other => Err(AdtError::EncounterMatcherNotFound(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Default => DEFAULT_ENCOUNTER_MATCHER,
            Self::TypeAndLocation => Self::TYPE_AND_LOCATION,
        }
    }

    pub fn build(self) -> Arc<dyn EncounterMatcher> {
        match self {
            Self::Default => Arc::new(DefaultEncounterMatcher),
            Self::TypeAndLocation => Arc::new(TypeAndLocationEncounterMatcher),
        }
    }
}

/// Returns the matched encounter, or adds a new one to `visit` when nothing matches.
///
/// A new encounter takes the requested type and location, and `params.datetime` or `now`. The
/// caller persists the visit or the returned encounter.
pub fn find_or_create_encounter(
    matcher: &dyn EncounterMatcher,
    visit: &mut Visit,
    params: &EncounterParameters,
    patient: PatientId,
    now: DateTime<Utc>,
) -> AdtResult<Encounter> {
    if let Some(id) = matcher.find_encounter(visit, params)? {
        if let Some(found) = visit.encounter(id) {
            tracing::debug!(encounter = %id, visit = %visit.id, "matched existing encounter");
            return Ok(found.clone());
        }
    }

    let encounter_type = params.required_type()?.clone();
    let encounter = Encounter::new(
        patient,
        encounter_type,
        params.location,
        params.datetime.unwrap_or(now),
    );
    visit.add_encounter(encounter);
    visit
        .encounters
        .last()
        .cloned()
        .ok_or_else(|| AdtError::InvalidArgument("encounter could not be added to visit".into()))
}
