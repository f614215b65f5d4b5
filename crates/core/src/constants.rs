//! Constants used throughout the ADT core crate.
//!
//! Default metadata names used when settings leave them out, and the environment variable names
//! the runner reads at startup.

/// Location tag marking a location where visits are recorded.
pub const LOCATION_TAG_SUPPORTS_VISITS: &str = "Visit Location";

/// Location tag marking a ward that accepts inpatient admissions.
pub const LOCATION_TAG_SUPPORTS_ADMISSION: &str = "Admission Location";

/// Default visit type for visits created by check-in and retrospective entry.
pub const DEFAULT_AT_FACILITY_VISIT_TYPE: &str = "Facility Visit";

pub const DEFAULT_CHECK_IN_ENCOUNTER_TYPE: &str = "Check-in";
pub const DEFAULT_ADMISSION_ENCOUNTER_TYPE: &str = "Admission";
pub const DEFAULT_TRANSFER_ENCOUNTER_TYPE: &str = "Transfer Within Hospital";
pub const DEFAULT_EXIT_FROM_INPATIENT_ENCOUNTER_TYPE: &str = "Exit from Inpatient Care";

/// Encounter role assigned to the clerk on a check-in encounter.
pub const DEFAULT_CHECK_IN_CLERK_ENCOUNTER_ROLE: &str = "Check-in Clerk";

/// Person attribute flagging a placeholder ("unknown") patient identity.
pub const DEFAULT_UNKNOWN_PATIENT_ATTRIBUTE: &str = "Unknown patient";

/// Person attribute flagging a test patient excluded from visit listings.
pub const DEFAULT_TEST_PATIENT_ATTRIBUTE: &str = "Test Patient";

/// Hours of inactivity after which an outpatient visit is closed.
pub const DEFAULT_VISIT_EXPIRE_HOURS: u32 = 12;

/// Name of the encounter matcher used when settings do not pick one.
pub const DEFAULT_ENCOUNTER_MATCHER: &str = "default";

/// Attribute value that marks a boolean person attribute as set.
pub const ATTRIBUTE_TRUE: &str = "true";

/// Environment variable naming the settings YAML file.
pub const ENV_CONFIG_PATH: &str = "ADT_CONFIG";

/// Environment variable overriding the outpatient expiry threshold.
pub const ENV_VISIT_EXPIRE_HOURS: &str = "ADT_VISIT_EXPIRE_HOURS";

/// Environment variable overriding the inpatient expiry threshold.
pub const ENV_INPATIENT_VISIT_EXPIRE_HOURS: &str = "ADT_INPATIENT_VISIT_EXPIRE_HOURS";
