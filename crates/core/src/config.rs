//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into the services as an
//! `Arc<AdtConfig>`. Nothing in the engine reads the environment while handling a request.
//!
//! [`AdtSettings`] is the raw, serde-friendly form (loaded from YAML, overridable from
//! environment values). [`AdtConfig`] is the validated form the services consume.

use crate::activity::ExpiryThresholds;
use crate::constants::{
    DEFAULT_ADMISSION_ENCOUNTER_TYPE, DEFAULT_AT_FACILITY_VISIT_TYPE,
    DEFAULT_CHECK_IN_CLERK_ENCOUNTER_ROLE, DEFAULT_CHECK_IN_ENCOUNTER_TYPE,
    DEFAULT_ENCOUNTER_MATCHER, DEFAULT_EXIT_FROM_INPATIENT_ENCOUNTER_TYPE,
    DEFAULT_TEST_PATIENT_ATTRIBUTE, DEFAULT_TRANSFER_ENCOUNTER_TYPE,
    DEFAULT_UNKNOWN_PATIENT_ATTRIBUTE, DEFAULT_VISIT_EXPIRE_HOURS, LOCATION_TAG_SUPPORTS_ADMISSION,
    LOCATION_TAG_SUPPORTS_VISITS,
};
use crate::error::{AdtError, AdtResult};
use crate::matcher::EncounterMatcherKind;
use crate::model::{Disposition, DispositionDescriptor, DispositionType};
use adt_types::{EncounterRole, EncounterType, NonEmptyText, VisitType};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ============================================================================
// RAW SETTINGS
// ============================================================================

/// Unvalidated settings, as written in the settings YAML file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdtSettings {
    pub supports_visits_tag: String,
    pub supports_admission_tag: String,
    pub at_facility_visit_type: String,
    pub check_in_encounter_type: String,
    pub admission_encounter_type: String,
    pub transfer_encounter_type: String,
    pub exit_from_inpatient_encounter_type: String,
    pub check_in_clerk_encounter_role: String,
    pub visit_expire_hours: u32,
    pub inpatient_visit_expire_hours: Option<u32>,
    pub unknown_patient_attribute: String,
    pub test_patient_attribute: Option<String>,
    pub disposition_descriptor: DispositionDescriptor,
    pub admission_decision_concept: Option<String>,
    pub deny_admission_concept: Option<String>,
    pub dispositions: Vec<Disposition>,
    pub encounter_matcher: String,
    pub mother_child_relationship_type: Option<String>,
}

impl Default for AdtSettings {
    fn default() -> Self {
        Self {
            supports_visits_tag: LOCATION_TAG_SUPPORTS_VISITS.into(),
            supports_admission_tag: LOCATION_TAG_SUPPORTS_ADMISSION.into(),
            at_facility_visit_type: DEFAULT_AT_FACILITY_VISIT_TYPE.into(),
            check_in_encounter_type: DEFAULT_CHECK_IN_ENCOUNTER_TYPE.into(),
            admission_encounter_type: DEFAULT_ADMISSION_ENCOUNTER_TYPE.into(),
            transfer_encounter_type: DEFAULT_TRANSFER_ENCOUNTER_TYPE.into(),
            exit_from_inpatient_encounter_type: DEFAULT_EXIT_FROM_INPATIENT_ENCOUNTER_TYPE.into(),
            check_in_clerk_encounter_role: DEFAULT_CHECK_IN_CLERK_ENCOUNTER_ROLE.into(),
            visit_expire_hours: DEFAULT_VISIT_EXPIRE_HOURS,
            inpatient_visit_expire_hours: None,
            unknown_patient_attribute: DEFAULT_UNKNOWN_PATIENT_ATTRIBUTE.into(),
            test_patient_attribute: Some(DEFAULT_TEST_PATIENT_ATTRIBUTE.into()),
            disposition_descriptor: DispositionDescriptor::default(),
            admission_decision_concept: None,
            deny_admission_concept: None,
            dispositions: Vec::new(),
            encounter_matcher: DEFAULT_ENCOUNTER_MATCHER.into(),
            mother_child_relationship_type: None,
        }
    }
}

impl AdtSettings {
    /// Parse settings from YAML text.
    ///
    /// Missing keys fall back to [`AdtSettings::default`]. Unknown keys are rejected, and the
    /// error names the path of the offending field.
    pub fn from_yaml(yaml_text: &str) -> AdtResult<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(yaml_text);
        serde_path_to_error::deserialize::<_, AdtSettings>(deserializer).map_err(|err| {
            let path = err.path().to_string();
            let source = err.into_inner();
            let path = if path.is_empty() {
                "<root>"
            } else {
                path.as_str()
            };
            AdtError::ConfigParse(format!("settings schema mismatch at {path}: {source}"))
        })
    }

    /// Read settings from `path`, or use the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> AdtResult<Self> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    AdtError::ConfigParse(format!("failed to read {}: {e}", path.display()))
                })?;
                Self::from_yaml(&text)
            }
            None => Ok(Self::default()),
        }
    }

    /// Apply environment overrides for the expiry thresholds.
    ///
    /// Values are the raw environment strings; `None` or blank leaves the setting unchanged.
    pub fn with_env_overrides(
        mut self,
        visit_expire_hours: Option<String>,
        inpatient_visit_expire_hours: Option<String>,
    ) -> AdtResult<Self> {
        if let Some(hours) = expire_hours_from_env_value(visit_expire_hours)? {
            self.visit_expire_hours = hours;
        }
        if let Some(hours) = expire_hours_from_env_value(inpatient_visit_expire_hours)? {
            self.inpatient_visit_expire_hours = Some(hours);
        }
        Ok(self)
    }
}

/// Parse an expiry threshold from an optional environment value.
///
/// `None` or empty/whitespace yields `Ok(None)`.
pub fn expire_hours_from_env_value(value: Option<String>) -> AdtResult<Option<u32>> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    value
        .map(|v| {
            v.parse::<u32>().map_err(|_| {
                AdtError::Configuration(format!("expiry hours must be a whole number, got {v:?}"))
            })
        })
        .transpose()
}

// ============================================================================
// VALIDATED CONFIGURATION
// ============================================================================

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct AdtConfig {
    supports_visits_tag: NonEmptyText,
    supports_admission_tag: NonEmptyText,
    at_facility_visit_type: VisitType,
    check_in_encounter_type: EncounterType,
    admission_encounter_type: EncounterType,
    transfer_encounter_type: EncounterType,
    exit_from_inpatient_encounter_type: EncounterType,
    check_in_clerk_encounter_role: EncounterRole,
    expiry: ExpiryThresholds,
    unknown_patient_attribute: NonEmptyText,
    test_patient_attribute: Option<NonEmptyText>,
    disposition_descriptor: DispositionDescriptor,
    admission_decision_concept: Option<String>,
    deny_admission_concept: Option<String>,
    dispositions: Vec<Disposition>,
    encounter_matcher: EncounterMatcherKind,
    mother_child_relationship_type: Option<String>,
}

impl AdtConfig {
    /// Validate `settings` into a configuration.
    ///
    /// # Errors
    ///
    /// - [`AdtError::Configuration`] if a tag, type, role or attribute name is blank, or the
    ///   outpatient/inpatient expiry threshold is zero
    /// - [`AdtError::EncounterMatcherNotFound`] if the matcher name is not one of the known set
    pub fn new(settings: AdtSettings) -> AdtResult<Self> {
        if settings.visit_expire_hours == 0 {
            return Err(AdtError::Configuration(
                "visit_expire_hours must be greater than zero".into(),
            ));
        }
        if settings.inpatient_visit_expire_hours == Some(0) {
            return Err(AdtError::Configuration(
                "inpatient_visit_expire_hours must be greater than zero when set".into(),
            ));
        }

        let encounter_matcher = EncounterMatcherKind::from_name(&settings.encounter_matcher)?;

        Ok(Self {
            supports_visits_tag: required_text("supports_visits_tag", &settings.supports_visits_tag)?,
            supports_admission_tag: required_text(
                "supports_admission_tag",
                &settings.supports_admission_tag,
            )?,
            at_facility_visit_type: VisitType::new(&settings.at_facility_visit_type)
                .map_err(|_| missing("at_facility_visit_type"))?,
            check_in_encounter_type: encounter_type(
                "check_in_encounter_type",
                &settings.check_in_encounter_type,
            )?,
            admission_encounter_type: encounter_type(
                "admission_encounter_type",
                &settings.admission_encounter_type,
            )?,
            transfer_encounter_type: encounter_type(
                "transfer_encounter_type",
                &settings.transfer_encounter_type,
            )?,
            exit_from_inpatient_encounter_type: encounter_type(
                "exit_from_inpatient_encounter_type",
                &settings.exit_from_inpatient_encounter_type,
            )?,
            check_in_clerk_encounter_role: EncounterRole::new(
                &settings.check_in_clerk_encounter_role,
            )
            .map_err(|_| missing("check_in_clerk_encounter_role"))?,
            expiry: ExpiryThresholds {
                outpatient_hours: settings.visit_expire_hours,
                inpatient_hours: settings.inpatient_visit_expire_hours,
            },
            unknown_patient_attribute: required_text(
                "unknown_patient_attribute",
                &settings.unknown_patient_attribute,
            )?,
            test_patient_attribute: settings
                .test_patient_attribute
                .as_deref()
                .and_then(|v| NonEmptyText::new(v).ok()),
            disposition_descriptor: settings.disposition_descriptor,
            admission_decision_concept: settings.admission_decision_concept,
            deny_admission_concept: settings.deny_admission_concept,
            dispositions: settings.dispositions,
            encounter_matcher,
            mother_child_relationship_type: settings
                .mother_child_relationship_type
                .filter(|v| !v.trim().is_empty()),
        })
    }

    pub fn supports_visits_tag(&self) -> &str {
        self.supports_visits_tag.as_str()
    }

    pub fn supports_admission_tag(&self) -> &str {
        self.supports_admission_tag.as_str()
    }

    pub fn at_facility_visit_type(&self) -> &VisitType {
        &self.at_facility_visit_type
    }

    pub fn check_in_encounter_type(&self) -> &EncounterType {
        &self.check_in_encounter_type
    }

    pub fn admission_encounter_type(&self) -> &EncounterType {
        &self.admission_encounter_type
    }

    pub fn transfer_encounter_type(&self) -> &EncounterType {
        &self.transfer_encounter_type
    }

    pub fn exit_from_inpatient_encounter_type(&self) -> &EncounterType {
        &self.exit_from_inpatient_encounter_type
    }

    /// Admission, transfer and discharge types, in that order.
    pub fn adt_encounter_types(&self) -> [&EncounterType; 3] {
        [
            &self.admission_encounter_type,
            &self.transfer_encounter_type,
            &self.exit_from_inpatient_encounter_type,
        ]
    }

    pub fn check_in_clerk_encounter_role(&self) -> &EncounterRole {
        &self.check_in_clerk_encounter_role
    }

    pub fn expiry_thresholds(&self) -> ExpiryThresholds {
        self.expiry
    }

    pub fn unknown_patient_attribute(&self) -> &str {
        self.unknown_patient_attribute.as_str()
    }

    pub fn test_patient_attribute(&self) -> Option<&str> {
        self.test_patient_attribute.as_ref().map(NonEmptyText::as_str)
    }

    pub fn disposition_descriptor(&self) -> &DispositionDescriptor {
        &self.disposition_descriptor
    }

    pub fn admission_decision_concept(&self) -> Option<&str> {
        self.admission_decision_concept.as_deref()
    }

    pub fn deny_admission_concept(&self) -> Option<&str> {
        self.deny_admission_concept.as_deref()
    }

    pub fn dispositions(&self) -> &[Disposition] {
        &self.dispositions
    }

    /// The configured disposition whose coded answer is `code`.
    pub fn disposition_by_code(&self, code: &str) -> Option<&Disposition> {
        self.dispositions.iter().find(|d| d.concept_code == code)
    }

    /// Coded answers of every disposition of one of `types`.
    pub fn disposition_codes_of(&self, types: &[DispositionType]) -> Vec<String> {
        self.dispositions
            .iter()
            .filter(|d| d.disposition_type.is_some_and(|t| types.contains(&t)))
            .map(|d| d.concept_code.clone())
            .collect()
    }

    pub fn encounter_matcher(&self) -> EncounterMatcherKind {
        self.encounter_matcher
    }

    pub fn mother_child_relationship_type(&self) -> Option<&str> {
        self.mother_child_relationship_type.as_deref()
    }
}

fn missing(field: &str) -> AdtError {
    AdtError::Configuration(format!("{field} cannot be empty"))
}

fn required_text(field: &str, value: &str) -> AdtResult<NonEmptyText> {
    NonEmptyText::new(value).map_err(|_| missing(field))
}

fn encounter_type(field: &str, value: &str) -> AdtResult<EncounterType> {
    EncounterType::new(value).map_err(|_| missing(field))
}
