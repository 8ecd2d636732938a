//! Profile-type coordinates and profile rows
//!
//! A profile type is the five-part coordinate binding a query to one sample
//! dimension of a pprof profile, e.g. `memory:inuse_space:bytes:space:bytes`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::labels::LabelSet;
use crate::error::ModelError;

/// The `name:sample_type:sample_unit:period_type:period_unit` coordinate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileType {
    pub name: String,
    pub sample_type: String,
    pub sample_unit: String,
    pub period_type: String,
    pub period_unit: String,
}

impl ProfileType {
    /// Parses a canonical profile-type ID. Exactly five non-empty
    /// colon-separated parts are required.
    pub fn parse(id: &str) -> Result<Self, ModelError> {
        let parts: Vec<&str> = id.split(':').collect();
        if parts.len() != 5 || parts.iter().any(|p| p.is_empty()) {
            return Err(ModelError::InvalidProfileType(id.to_string()));
        }
        Ok(Self {
            name: parts[0].to_string(),
            sample_type: parts[1].to_string(),
            sample_unit: parts[2].to_string(),
            period_type: parts[3].to_string(),
            period_unit: parts[4].to_string(),
        })
    }

    /// The canonical ID string.
    pub fn id(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.name, self.sample_type, self.sample_unit, self.period_type, self.period_unit
        )
    }
}

impl FromStr for ProfileType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// One call stack and its sample value.
///
/// `function_ids[0]` is the leaf (innermost) frame; ids resolve through the
/// name table carried by the containing response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StacktraceSample {
    pub function_ids: Vec<u64>,
    pub value: i64,
}

/// A profile row as returned by an ingester range query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub labels: LabelSet,
    pub timestamp_ns: i64,
    pub total_value: i64,
    pub stacktraces: Vec<StacktraceSample>,
}
