//! Wire contract consumed from ingesters
//!
//! Request and response bodies for the ingester query surface. Transport
//! framing is the client's concern; these types only fix the shapes.

use serde::{Deserialize, Serialize};

use crate::types::labels::LabelSet;
use crate::types::profile::{ProfileRow, ProfileType};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileTypesResponse {
    pub profile_types: Vec<ProfileType>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelValuesRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelValuesResponse {
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRequest {
    pub matchers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesResponse {
    pub labels_set: Vec<LabelSet>,
}

/// Range query for profile rows matching a selector and profile type.
///
/// `start` and `end` are nanoseconds since the Unix epoch, inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectProfilesRequest {
    pub label_selector: String,
    pub profile_type: ProfileType,
    pub start: i64,
    pub end: i64,
}

/// One batch of a profile row stream.
///
/// `function_names` is the intern table resolving every `function_id`
/// appearing in this batch's stacktraces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectProfilesResponse {
    pub profiles: Vec<ProfileRow>,
    pub function_names: Vec<String>,
}
