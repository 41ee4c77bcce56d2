//! Typed permission tokens and the permission list stored on a role.
//!
//! Roles persist their grants as a JSON array in a single column. These types
//! keep that representation behind explicit parse/serialize calls so that
//! nothing else in the crate touches the raw column.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionNameError {
    #[error("Permission name cannot be empty")]
    Empty,

    #[error("Permission '{0}' must have the form module.action")]
    Malformed(String),
}

/// A validated `module.action` capability token.
///
/// Both segments are lowercase ASCII letters, digits or underscores.
///
/// ```rust
/// use terraintrack::domain::PermissionName;
///
/// let name: PermissionName = "vehicles.view".parse().unwrap();
/// assert_eq!(name.module(), "vehicles");
/// assert_eq!(name.action(), "view");
/// assert!("vehicles".parse::<PermissionName>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PermissionName(String);

impl PermissionName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn module(&self) -> &str {
        self.0.split_once('.').map_or("", |(module, _)| module)
    }

    #[must_use]
    pub fn action(&self) -> &str {
        self.0.split_once('.').map_or("", |(_, action)| action)
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl FromStr for PermissionName {
    type Err = PermissionNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(PermissionNameError::Empty);
        }

        match trimmed.split_once('.') {
            Some((module, action)) if is_valid_segment(module) && is_valid_segment(action) => {
                Ok(Self(trimmed.to_string()))
            }
            _ => Err(PermissionNameError::Malformed(trimmed.to_string())),
        }
    }
}

impl fmt::Display for PermissionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PermissionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Set of permission tokens granted by a role.
///
/// Serializes as a sorted JSON array; duplicates collapse on insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Parses the raw `roles.permissions` column.
    ///
    /// `NULL`, an empty string and the JSON literal `null` all mean
    /// "no permissions".
    pub fn from_column(raw: Option<&str>) -> Result<Self, serde_json::Error> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Self::new());
        };

        let entries: Option<Vec<String>> = serde_json::from_str(raw)?;
        Ok(entries.into_iter().flatten().collect())
    }

    /// Serializes into the JSON array stored in `roles.permissions`.
    #[must_use]
    pub fn to_column(&self) -> String {
        // A set of strings always serializes.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }

    /// Returns `false` when the permission was already present.
    pub fn insert(&mut self, name: &PermissionName) -> bool {
        self.0.insert(name.as_str().to_string())
    }

    /// Returns `false` when the permission was not present.
    pub fn remove(&mut self, name: &str) -> bool {
        self.0.remove(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn union_with(&mut self, other: &Self) {
        self.0.extend(other.0.iter().cloned());
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.0.into_iter().collect()
    }
}

impl FromIterator<String> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> FromIterator<&'a str> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(str::to_string).collect())
    }
}
