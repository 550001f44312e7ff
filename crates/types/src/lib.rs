//! Validated identifier newtypes shared across the casebook crates.
//!
//! Field and form identifiers come from externally supplied schema documents
//! and end up embedded in condition strings, draft keys and submission
//! payloads. Wrapping them in validated newtypes keeps malformed identifiers
//! out at the deserialization boundary instead of failing deep inside the
//! engine.

use std::borrow::Borrow;
use std::fmt;

/// Errors that can occur when constructing validated identifier types.
#[derive(Debug, thiserror::Error)]
pub enum IdentError {
    /// The input was empty or contained only whitespace.
    #[error("identifier cannot be empty")]
    Empty,
    /// The input exceeded the maximum permitted length.
    #[error("identifier exceeds maximum length of {max} characters: {value}")]
    TooLong { value: String, max: usize },
    /// The input contained characters outside the permitted set.
    #[error("identifier contains invalid characters (only alphanumeric, '.', '-', '_' allowed): {0}")]
    InvalidCharacters(String),
}

const MAX_IDENT_LEN: usize = 128;

/// Validates an identifier against the conservative character set shared by
/// field names and form ids.
///
/// Identifiers are embedded into condition strings (whitespace-delimited) and
/// draft keys, so whitespace and exotic characters are rejected outright.
fn validate_ident(input: &str) -> Result<String, IdentError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(IdentError::Empty);
    }

    if trimmed.len() > MAX_IDENT_LEN {
        return Err(IdentError::TooLong {
            value: trimmed.to_owned(),
            max: MAX_IDENT_LEN,
        });
    }

    let ok = trimmed
        .bytes()
        .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'.' | b'-' | b'_'));

    if !ok {
        return Err(IdentError::InvalidCharacters(trimmed.to_owned()));
    }

    Ok(trimmed.to_owned())
}

macro_rules! ident_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, trimming surrounding whitespace and
            /// validating the character set.
            pub fn new(input: impl AsRef<str>) -> Result<Self, IdentError> {
                validate_ident(input.as_ref()).map(Self)
            }

            /// Returns the inner identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdentError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                Self::new(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

ident_newtype! {
    /// The name of a form field, unique within its form.
    ///
    /// Field names key the value map, appear on the left-hand side of
    /// enabling-condition strings and compose record identities, so they are
    /// restricted to a URI-safe ASCII set.
    FieldName
}

ident_newtype! {
    /// An opaque form identifier.
    FormId
}
