//! Data model shared across the pipeline (spec.md §3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A collection as reported by the inventory endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectionDescriptor {
    pub name: String,
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
    /// Opaque blob written verbatim as `<coll>.structure.json`, minus
    /// `parameters.shadowCollections` and the supplemented `objectId`/
    /// `globallyUniqueId` fields (SPEC_FULL.md §6).
    pub parameters: Value,
}

impl CollectionDescriptor {
    /// Shards declared in `parameters.shards` (cluster mode only):
    /// shard id -> ordered dbserver ids, primary first.
    pub fn shards(&self) -> HashMap<String, Vec<String>> {
        self.parameters
            .get("shards")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .map(|(shard_id, servers)| {
                        let servers = servers
                            .as_array()
                            .map(|arr| {
                                arr.iter()
                                    .filter_map(|s| s.as_str().map(str::to_string))
                                    .collect()
                            })
                            .unwrap_or_default();
                        (shard_id.clone(), servers)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn distribute_shards_like(&self) -> Option<&str> {
        self.parameters.get("distributeShardsLike").and_then(|v| v.as_str())
    }

    pub fn is_system(&self) -> bool {
        self.name.starts_with('_')
    }
}

/// A view definition, written verbatim as `<view>.view.json`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ViewDescriptor {
    pub name: String,
    #[serde(flatten)]
    pub definition: Value,
}

/// `dump.json`: per-database metadata. Field names and the fixed
/// `use_envelope: false` follow spec.md §6's definitive key list
/// (`database, createdAt, lastTickAtDumpStart, useEnvelope:false, useVPack,
/// properties`), not §3's looser prose description.
#[derive(Debug, Clone, Serialize)]
pub struct DumpMeta {
    pub database: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "lastTickAtDumpStart")]
    pub last_tick_at_dump_start: String,
    #[serde(rename = "useEnvelope")]
    pub use_envelope: bool,
    #[serde(rename = "useVPack")]
    pub use_vpack: bool,
    /// Supplemented field (SPEC_FULL.md §6): the database's own
    /// properties, sourced from `GET /_api/database/current`.
    pub properties: Value,
}

/// Whether the target endpoint is a standalone server or a cluster
/// coordinator, decided once by the inventory orchestrator (spec.md §4.J).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentMode {
    SingleServer,
    Cluster,
}
