//! Input shapes consumed by the compiler
//!
//! Three JSON documents feed the knowledge graph: per-command artifacts
//! authored by the extraction pipeline, the resource map (resources,
//! attributes, relationships), and the summary map (aggregate resources
//! tied to primary resources). All three are deserialized with serde and
//! validated before touching the store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// A single extracted command with its flags and provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandArtifact {
    /// Stable identity; derived from the full path when absent
    #[serde(default)]
    pub id: String,
    pub full_path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Option<String>,
    #[serde(default)]
    pub side_effects: Option<String>,
    #[serde(default)]
    pub validation_notes: Option<String>,
    #[serde(default)]
    pub flags: Vec<FlagSpec>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
}

/// A flag belonging to exactly one command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagSpec {
    pub name: String,
    #[serde(default)]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "type")]
    pub flag_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub validation: Option<String>,
}

/// A provenance reference: which repo file a command or summary came from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub repo_name: String,
    pub file_path: String,
}

/// The resource/relationship schema (resource_map.json)
///
/// BTreeMaps keep iteration order deterministic so repeated compiles
/// produce identical table contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceMap {
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSpec>,
    #[serde(default)]
    pub relationships: BTreeMap<String, BTreeMap<String, RelationshipSpec>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(default)]
    pub label_fields: Vec<String>,
    #[serde(default)]
    pub server_types: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipSpec {
    #[serde(default)]
    pub resources: Vec<String>,
}

/// The summary-resource schema (summary_map.json)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryMap {
    #[serde(default)]
    pub summaries: BTreeMap<String, SummarySpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarySpec {
    #[serde(default)]
    pub primary_resources: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<SummaryCondition>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryCondition {
    #[serde(default)]
    pub filter: Option<serde_json::Value>,
    #[serde(default)]
    pub primary_resources: Vec<String>,
}

/// Stable command identity: sha256 hex of the full path string
pub fn command_id(full_path: &str) -> String {
    let digest = Sha256::digest(full_path.as_bytes());
    hex::encode(digest)
}

impl CommandArtifact {
    /// Validate the artifact and fill in a derived id when missing.
    ///
    /// Artifacts with no usable command path are rejected; the caller is
    /// expected to skip them and keep compiling.
    pub fn validate(mut self) -> Result<Self> {
        if self.full_path.trim().is_empty() {
            return Err(Error::ArtifactInvalid("empty full_path".to_string()));
        }
        if self.id.trim().is_empty() {
            self.id = command_id(&self.full_path);
        }
        for flag in &self.flags {
            if flag.name.trim().is_empty() {
                return Err(Error::ArtifactInvalid(format!(
                    "flag with empty name on {}",
                    self.full_path
                )));
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_artifact() {
        let json = r#"{
            "id": "abc",
            "full_path": "view invoices list",
            "description": "List invoices",
            "flags": [
                {"name": "--status", "required": false, "type": "string", "description": "Filter by status"}
            ],
            "sources": [{"repo_name": "cli", "file_path": "internal/cli/invoices_list.go"}]
        }"#;
        let artifact: CommandArtifact = serde_json::from_str(json).unwrap();
        let artifact = artifact.validate().unwrap();
        assert_eq!(artifact.id, "abc");
        assert_eq!(artifact.flags.len(), 1);
        assert_eq!(artifact.flags[0].flag_type, "string");
        assert!(!artifact.flags[0].required);
    }

    #[test]
    fn test_derived_id_is_stable() {
        let a = command_id("view invoices list");
        let b = command_id("view invoices list");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, command_id("view invoices show"));
    }

    #[test]
    fn test_validate_fills_missing_id() {
        let json = r#"{"full_path": "do invoices archive", "description": "x"}"#;
        let artifact: CommandArtifact = serde_json::from_str(json).unwrap();
        let artifact = artifact.validate().unwrap();
        assert_eq!(artifact.id, command_id("do invoices archive"));
    }

    #[test]
    fn test_validate_rejects_empty_path() {
        let artifact = CommandArtifact {
            id: String::new(),
            full_path: "  ".to_string(),
            description: String::new(),
            permissions: None,
            side_effects: None,
            validation_notes: None,
            flags: vec![],
            sources: vec![],
        };
        assert!(artifact.validate().is_err());
    }

    #[test]
    fn test_parse_resource_map() {
        let json = r#"{
            "resources": {
                "invoices": {"label_fields": ["number"], "attributes": ["number", "status"]}
            },
            "relationships": {
                "invoices": {"customer": {"resources": ["customers"]}}
            }
        }"#;
        let map: ResourceMap = serde_json::from_str(json).unwrap();
        assert!(map.resources.contains_key("invoices"));
        assert_eq!(
            map.relationships["invoices"]["customer"].resources,
            vec!["customers"]
        );
    }

    #[test]
    fn test_parse_summary_map_tolerates_missing_fields() {
        let json = r#"{"summaries": {"invoice-summaries": {"primary_resources": ["invoices"]}}}"#;
        let map: SummaryMap = serde_json::from_str(json).unwrap();
        let spec = &map.summaries["invoice-summaries"];
        assert_eq!(spec.primary_resources, vec!["invoices"]);
        assert!(spec.conditions.is_empty());
        assert!(spec.sources.is_empty());
    }
}
