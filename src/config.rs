// ⚙️ Run Configuration - explicit, immutable, passed in at construction
// Defaults reproduce the published knowledge base; a JSON file may override any subset.

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use uuid::Uuid;

/// Namespace for every derived identifier. Changing it re-keys the whole store.
pub const DEFAULT_NAMESPACE: Uuid = Uuid::from_u128(0x221c1248_e62e_56e5_bbfb_7d5efc477271);

pub const DEFAULT_MARKING_DEFINITION_URL: &str =
    "https://raw.githubusercontent.com/muchdogesec/stix4doge/main/objects/marking-definition/ransomware_kb.json";
pub const DEFAULT_IDENTITY_URL: &str =
    "https://raw.githubusercontent.com/muchdogesec/stix4doge/main/objects/identity/ransomware_kb.json";

/// Second marking carried by every generated object next to the fetched one
pub const DEFAULT_SECONDARY_MARKING_REF: &str =
    "marking-definition--94868c89-83c2-464b-929b-a1a8aa3c8487";

pub const DEFAULT_BUNDLE_NAME: &str = "ransomware-kb-bundle.json";

// ============================================================================
// BUNDLE MODE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BundleMode {
    /// Only inserted and updated records (plus foundational records)
    #[default]
    Delta,

    /// Delta plus the stored version of every unchanged record seen this run
    Full,
}

impl std::str::FromStr for BundleMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "delta" => Ok(BundleMode::Delta),
            "full" => Ok(BundleMode::Full),
            other => Err(format!("unknown bundle mode '{}' (expected delta|full)", other)),
        }
    }
}

// ============================================================================
// TABLE + COLUMN CONVENTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub groups: String,
    pub malware: String,
    pub tools: String,
}

impl Default for TableNames {
    fn default() -> Self {
        TableNames {
            groups: "Intrusion Set - Groups".to_string(),
            malware: "Malware - Ransomware".to_string(),
            tools: "Tool - Tools".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConventions {
    pub name: String,
    pub description: String,
    pub aliases: String,

    /// `ref.<source>` columns become external references labelled `<source>`
    pub reference_prefix: String,

    /// Multi-line cell of platform names, one per line
    pub platforms: String,

    /// `platform.<tag>` columns with a truthy cell become platform tags
    pub platform_prefix: String,

    /// Internal catalog id column and the reference source it is published under
    pub internal_id: String,
    pub internal_id_source: String,

    /// External catalog id column; also the key group rows use to name endpoints
    pub external_id: String,
    pub external_id_source: String,

    /// Group columns listing used malware / tools by external catalog key
    pub malware_used: String,
    pub tools_used: String,

    /// Characters separating keys inside a list cell
    pub list_delimiters: String,
}

impl Default for ColumnConventions {
    fn default() -> Self {
        ColumnConventions {
            name: "name".to_string(),
            description: "description".to_string(),
            aliases: "aliases".to_string(),
            reference_prefix: "ref.".to_string(),
            platforms: "platforms".to_string(),
            platform_prefix: "platform.".to_string(),
            internal_id: "kb_id".to_string(),
            internal_id_source: "ransomware-kb".to_string(),
            external_id: "external_id".to_string(),
            external_id_source: "mitre-attack".to_string(),
            malware_used: "ransomware_used".to_string(),
            tools_used: "tools_used".to_string(),
            list_delimiters: "\n,;".to_string(),
        }
    }
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub namespace: Uuid,
    pub marking_definition_url: String,
    pub identity_url: String,
    pub secondary_marking_ref: String,
    pub bundle_name: String,
    pub bundle_mode: BundleMode,
    pub tables: TableNames,
    pub columns: ColumnConventions,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            namespace: DEFAULT_NAMESPACE,
            marking_definition_url: DEFAULT_MARKING_DEFINITION_URL.to_string(),
            identity_url: DEFAULT_IDENTITY_URL.to_string(),
            secondary_marking_ref: DEFAULT_SECONDARY_MARKING_REF.to_string(),
            bundle_name: DEFAULT_BUNDLE_NAME.to_string(),
            bundle_mode: BundleMode::Delta,
            tables: TableNames::default(),
            columns: ColumnConventions::default(),
        }
    }
}

impl Config {
    /// Load config overrides from a JSON file; absent keys keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        Ok(config)
    }

    pub fn with_bundle_mode(mut self, mode: BundleMode) -> Self {
        self.bundle_mode = mode;
        self
    }
}
