//! Validated primitives shared by the ADT crates.
//!
//! - [`NonEmptyText`] for names and codes that must carry content
//! - UUID-backed identifiers for records the engine creates ([`VisitId`], [`EncounterId`], ...)
//! - [`LocationId`], an integer identifier, because disposition observations refer to locations
//!   by their numeric id in free text
//! - named code types ([`EncounterType`], [`VisitType`], [`EncounterRole`]) configured by name

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors that can occur when constructing validated primitives.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// The input text was empty or contained only whitespace
    #[error("text cannot be empty")]
    Empty,
    /// The input could not be parsed as an identifier
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),
}

pub type TypesResult<T> = Result<T, TypesError>;

/// A trimmed string that is guaranteed to contain at least one non-whitespace character.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NonEmptyText(String);

impl NonEmptyText {
    pub fn new(input: impl AsRef<str>) -> TypesResult<Self> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TypesError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NonEmptyText {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<NonEmptyText> for String {
    fn from(value: NonEmptyText) -> Self {
        value.0
    }
}

impl fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// UUID-BACKED IDENTIFIERS
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Generates a fresh random identifier.
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            pub fn from_uuid(id: uuid::Uuid) -> Self {
                Self(id)
            }

            pub fn uuid(&self) -> uuid::Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = TypesError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| TypesError::InvalidIdentifier(s.to_string()))
            }
        }
    };
}

uuid_id!(
    /// Identifier of a visit.
    VisitId
);
uuid_id!(
    /// Identifier of an encounter.
    EncounterId
);
uuid_id!(
    /// Identifier of a patient record.
    PatientId
);
uuid_id!(
    /// Identifier of a provider account.
    ProviderId
);
uuid_id!(
    /// Identifier of an authenticated user.
    UserId
);
uuid_id!(ObsId);
uuid_id!(OrderId);

/// Identifier of a location.
///
/// Integer-valued: disposition observations store the target location as its id in text form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(u32);

impl LocationId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for LocationId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .map(Self)
            .map_err(|_| TypesError::InvalidIdentifier(s.to_string()))
    }
}

// ============================================================================
// NAMED CODES
// ============================================================================

macro_rules! named_code {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(NonEmptyText);

        impl $name {
            pub fn new(name: impl AsRef<str>) -> TypesResult<Self> {
                NonEmptyText::new(name).map(Self)
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

named_code!(
    /// Encounter type, e.g. "Check-in" or "Admission".
    EncounterType
);
named_code!(
    /// Visit type, e.g. "Facility Visit".
    VisitType
);
named_code!(
    /// The role a provider plays in an encounter, e.g. "Check-in Clerk".
    EncounterRole
);
