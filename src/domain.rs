#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Imagery operation served by this process, fixed at configuration time.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum OperationMode {
    StaticMap,
    ImageryMetadata,
}

impl OperationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationMode::StaticMap => "StaticMap",
            OperationMode::ImageryMetadata => "ImageryMetadata",
        }
    }
}

impl Display for OperationMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationMode {
    type Err = UnknownOperationMode;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "StaticMap" => Ok(OperationMode::StaticMap),
            "ImageryMetadata" => Ok(OperationMode::ImageryMetadata),
            other => Err(UnknownOperationMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation type `{0}` (expected `StaticMap` or `ImageryMetadata`)")]
pub struct UnknownOperationMode(pub String);

/// Immutable settings the translator needs for every request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImagerySettings {
    pub mode: OperationMode,
    pub api_key: String,
    pub static_map_url: String,
    pub imagery_metadata_url: String,
}

impl ImagerySettings {
    /// Base URL of the endpoint the active mode talks to.
    pub fn base_url(&self) -> &str {
        match self.mode {
            OperationMode::StaticMap => &self.static_map_url,
            OperationMode::ImageryMetadata => &self.imagery_metadata_url,
        }
    }
}
