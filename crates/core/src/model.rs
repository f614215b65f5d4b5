//! Records the engine reads and mutates.
//!
//! These are plain data carriers. A [`Visit`] owns its [`Encounter`]s; locations are referenced
//! by [`LocationId`] and resolved through [`crate::location::LocationTree`].

use adt_types::{
    EncounterId, EncounterRole, EncounterType, LocationId, ObsId, OrderId, PatientId, ProviderId,
    UserId, VisitId, VisitType,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// PATIENTS AND PROVIDERS
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    /// Person attributes keyed by attribute type name.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Patient {
    pub fn new(id: PatientId) -> Self {
        Self {
            id,
            attributes: BTreeMap::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// True if the named attribute holds `"true"` (case-insensitive).
    pub fn has_flag(&self, name: &str) -> bool {
        self.attribute(name)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case(crate::constants::ATTRIBUTE_TRUE))
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<String> {
        self.attributes.remove(name)
    }
}

/// A provider account. A user may own several, or none.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    #[serde(default)]
    pub user: Option<UserId>,
    pub name: String,
}

// ============================================================================
// OBSERVATIONS AND ORDERS
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObsValue {
    #[default]
    None,
    Coded(String),
    Text(String),
    Numeric(f64),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Obs {
    #[serde(default)]
    pub id: ObsId,
    pub concept: String,
    #[serde(default)]
    pub value: ObsValue,
    #[serde(default)]
    pub datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub group_members: Vec<Obs>,
    #[serde(default)]
    pub voided: bool,
}

impl Obs {
    pub fn new(concept: impl Into<String>, value: ObsValue) -> Self {
        Self {
            id: ObsId::new(),
            concept: concept.into(),
            value,
            datetime: None,
            group_members: Vec::new(),
            voided: false,
        }
    }

    /// Builds an obs group holding `members`.
    pub fn group(concept: impl Into<String>, members: Vec<Obs>) -> Self {
        Self {
            group_members: members,
            ..Self::new(concept, ObsValue::None)
        }
    }

    pub fn value_coded(&self) -> Option<&str> {
        match &self.value {
            ObsValue::Coded(code) => Some(code),
            _ => None,
        }
    }

    pub fn value_text(&self) -> Option<&str> {
        match &self.value {
            ObsValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// First non-voided group member with the given concept.
    pub fn member(&self, concept: &str) -> Option<&Obs> {
        self.group_members
            .iter()
            .find(|m| !m.voided && m.concept == concept)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    #[serde(default)]
    pub id: OrderId,
    pub concept: String,
    #[serde(default)]
    pub instructions: Option<String>,
}

// ============================================================================
// ENCOUNTERS AND VISITS
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterProvider {
    pub role: EncounterRole,
    pub provider: ProviderId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Encounter {
    pub id: EncounterId,
    pub patient: PatientId,
    /// Owning visit. Set when the encounter is added to a visit.
    #[serde(default)]
    pub visit: Option<VisitId>,
    #[serde(default)]
    pub location: Option<LocationId>,
    pub encounter_type: EncounterType,
    pub datetime: DateTime<Utc>,
    #[serde(default)]
    pub voided: bool,
    #[serde(default)]
    pub obs: Vec<Obs>,
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub providers: Vec<EncounterProvider>,
}

impl Encounter {
    pub fn new(
        patient: PatientId,
        encounter_type: EncounterType,
        location: Option<LocationId>,
        datetime: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EncounterId::new(),
            patient,
            visit: None,
            location,
            encounter_type,
            datetime,
            voided: false,
            obs: Vec::new(),
            orders: Vec::new(),
            providers: Vec::new(),
        }
    }

    pub fn add_provider(&mut self, role: EncounterRole, provider: ProviderId) {
        let assignment = EncounterProvider { role, provider };
        if !self.providers.contains(&assignment) {
            self.providers.push(assignment);
        }
    }

    /// Non-voided observations that are not members of a group.
    pub fn top_level_obs(&self) -> impl Iterator<Item = &Obs> {
        self.obs.iter().filter(|o| !o.voided)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub id: VisitId,
    pub patient: PatientId,
    #[serde(default)]
    pub location: Option<LocationId>,
    pub visit_type: VisitType,
    pub start: DateTime<Utc>,
    /// `None` while the visit is open.
    #[serde(default)]
    pub stop: Option<DateTime<Utc>>,
    #[serde(default)]
    pub encounters: Vec<Encounter>,
    #[serde(default)]
    pub voided: bool,
    #[serde(default)]
    pub void_reason: Option<String>,
}

impl Visit {
    pub fn new(
        patient: PatientId,
        location: Option<LocationId>,
        visit_type: VisitType,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            id: VisitId::new(),
            patient,
            location,
            visit_type,
            start,
            stop: None,
            encounters: Vec::new(),
            voided: false,
            void_reason: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.stop.is_none()
    }

    /// Takes ownership of `encounter`, pointing it at this visit.
    pub fn add_encounter(&mut self, mut encounter: Encounter) {
        encounter.visit = Some(self.id);
        self.encounters.retain(|e| e.id != encounter.id);
        self.encounters.push(encounter);
    }

    pub fn encounter(&self, id: EncounterId) -> Option<&Encounter> {
        self.encounters.iter().find(|e| e.id == id)
    }

    pub fn non_voided_encounters(&self) -> impl Iterator<Item = &Encounter> {
        self.encounters.iter().filter(|e| !e.voided)
    }
}

// ============================================================================
// DISPOSITIONS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispositionType {
    Admit,
    Transfer,
    Discharge,
}

impl DispositionType {
    pub const ALL: [DispositionType; 3] = [
        DispositionType::Admit,
        DispositionType::Transfer,
        DispositionType::Discharge,
    ];
}

/// A configured disposition option, loaded outside the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Disposition {
    pub unique_id: String,
    pub name: String,
    /// Coded answer recorded on the disposition obs.
    pub concept_code: String,
    #[serde(default)]
    pub disposition_type: Option<DispositionType>,
    #[serde(default)]
    pub keeps_visit_open: bool,
}

/// Concepts that make up a disposition obs group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionDescriptor {
    /// Concept of the obs group.
    pub disposition_set_concept: String,
    /// Concept of the coded member holding the disposition.
    pub disposition_concept: String,
    /// Concept of the text member holding the admission location id.
    pub admission_location_concept: String,
    /// Concept of the text member holding the transfer location id.
    pub internal_transfer_location_concept: String,
}

impl DispositionDescriptor {
    /// Returns the coded disposition answer if `obs` is a disposition group.
    pub fn disposition_code<'a>(&self, obs: &'a Obs) -> Option<&'a str> {
        if obs.voided || obs.concept != self.disposition_set_concept {
            return None;
        }
        obs.member(&self.disposition_concept)
            .and_then(Obs::value_coded)
    }
}

impl Default for DispositionDescriptor {
    fn default() -> Self {
        Self {
            disposition_set_concept: "Disposition construct".into(),
            disposition_concept: "Disposition".into(),
            admission_location_concept: "Admission location".into(),
            internal_transfer_location_concept: "Internal transfer location".into(),
        }
    }
}
