//! Bidder registry, order partitioning and price targeting keys.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::UsageError;
use crate::settings::{BUILTIN_BIDDERS, BidderSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidderInfo {
    pub code: String,
    pub name: String,
}

/// Known bidder codes, keyed by code.
#[derive(Debug, Clone, Default)]
pub struct BidderRegistry {
    bidders: BTreeMap<String, BidderInfo>,
}

impl BidderRegistry {
    pub fn builtin() -> Result<Self, UsageError> {
        Self::from_yaml(BUILTIN_BIDDERS)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, UsageError> {
        let entries: Vec<BidderInfo> = serde_yaml::from_str(raw)
            .map_err(|err| UsageError::configuration(format!("Invalid bidder registry: {err}")))?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: impl IntoIterator<Item = BidderInfo>) -> Self {
        let bidders = entries
            .into_iter()
            .map(|info| (info.code.clone(), info))
            .collect();
        Self { bidders }
    }

    pub fn contains(&self, code: &str) -> bool {
        self.bidders.contains_key(code)
    }

    pub fn name_of(&self, code: &str) -> Option<&str> {
        self.bidders.get(code).map(|info| info.name.as_str())
    }

    /// All bidders sorted by code.
    pub fn list(&self) -> Vec<BidderInfo> {
        self.bidders.values().cloned().collect()
    }
}

pub fn list_bidders() -> Result<Vec<BidderInfo>, UsageError> {
    Ok(BidderRegistry::builtin()?.list())
}

/// How price points are grouped into orders. Exactly one mode is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BidderPartition {
    SingleOrder,
    PerBidder(Vec<String>),
}

impl BidderPartition {
    /// Resolve the operator's selection; both or neither is a configuration error.
    pub fn from_selection(single_order: bool, bidder_codes: &[String]) -> Result<Self, UsageError> {
        let mut seen = HashSet::new();
        let codes: Vec<String> = bidder_codes
            .iter()
            .map(|code| code.trim())
            .filter(|code| !code.is_empty())
            .filter(|code| seen.insert(code.to_string()))
            .map(str::to_string)
            .collect();

        match (single_order, codes.is_empty()) {
            (true, true) => Ok(BidderPartition::SingleOrder),
            (false, false) => Ok(BidderPartition::PerBidder(codes)),
            (true, false) => Err(UsageError::configuration(
                "Use of --single-order and --bidder-code is not allowed.",
            )),
            (false, true) => Err(UsageError::configuration(
                "You must use --single-order or provide at least one --bidder-code",
            )),
        }
    }
}

/// Per-bidder overrides from the user's `bidder_key_map` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOverride {
    #[serde(default)]
    pub hb_pb: Option<String>,
}

pub type BidderKeyMap = BTreeMap<String, KeyOverride>;

/// The override map may only name registered bidders.
pub fn validate_override_map(
    map: Option<&serde_yaml::Value>,
    registry: &BidderRegistry,
) -> Result<(), UsageError> {
    let Some(map) = map.and_then(serde_yaml::Value::as_mapping) else {
        return Ok(());
    };

    let unknown: Vec<String> = map
        .keys()
        .map(|key| key.as_str().map(str::to_string).unwrap_or_else(|| format!("{key:?}")))
        .filter(|code| !registry.contains(code))
        .collect();

    if unknown.is_empty() {
        Ok(())
    } else {
        Err(UsageError::BidderMap(format!(
            "bidder_key_map references unrecognized bidder code(s): {}",
            unknown.join(", ")
        )))
    }
}

/// One grouping to create: a bidder (or the single-order pseudo bidder) and its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionUnit {
    pub code: String,
    pub name: String,
    pub targeting_key: String,
}

pub fn targeting_key(code: &str, settings: &BidderSettings, key_map: &BidderKeyMap) -> String {
    if let Some(custom) = key_map.get(code).and_then(|o| o.hb_pb.as_deref()) {
        return custom.to_string();
    }
    format!("{}{}", settings.key_prefix, code)
        .chars()
        .take(settings.key_max_length)
        .collect()
}

pub fn partition_units(
    partition: &BidderPartition,
    registry: &BidderRegistry,
    settings: &BidderSettings,
    key_map: &BidderKeyMap,
) -> Vec<PartitionUnit> {
    match partition {
        BidderPartition::SingleOrder => vec![PartitionUnit {
            code: settings.single_order.code.clone(),
            name: settings.single_order.name.clone(),
            targeting_key: settings.single_order.key.clone(),
        }],
        BidderPartition::PerBidder(codes) => codes
            .iter()
            .map(|code| {
                let name = match registry.name_of(code) {
                    Some(name) => name.to_string(),
                    None => {
                        warn!(bidder = %code, "Bidder code is not in the registry");
                        code.clone()
                    }
                };
                PartitionUnit {
                    code: code.clone(),
                    name,
                    targeting_key: targeting_key(code, settings, key_map),
                }
            })
            .collect(),
    }
}
