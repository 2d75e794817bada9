use serde::{Deserialize, Serialize};

use crate::domain::media::MediaKind;

/// One row of the duplicate index, keyed by the hex content digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub hash: String,
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub url: String,
}
