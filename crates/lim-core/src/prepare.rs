//! Typed view of a validated user document and the per-run values derived from it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bidders::{BidderKeyMap, BidderPartition, PartitionUnit, partition_units};
use crate::error::UsageError;
use crate::platform::{NewCreative, NewLineItem, PriceTargeting, Size};
use crate::pricing::{CpmName, PriceBucket};
use crate::resolver::ConfigResolver;
use crate::schedule::{
    ScheduleWindow, normalize_schedule, render_template, render_value, run_mode_text,
    with_run_mode_placeholder,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum LineItemType {
    Standard,
    Sponsorship,
    Network,
    Bulk,
    PricePriority,
    House,
}

impl LineItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            LineItemType::Standard => "STANDARD",
            LineItemType::Sponsorship => "SPONSORSHIP",
            LineItemType::Network => "NETWORK",
            LineItemType::Bulk => "BULK",
            LineItemType::PricePriority => "PRICE_PRIORITY",
            LineItemType::House => "HOUSE",
        }
    }
}

impl fmt::Display for LineItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LineItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STANDARD" => Ok(LineItemType::Standard),
            "SPONSORSHIP" => Ok(LineItemType::Sponsorship),
            "NETWORK" => Ok(LineItemType::Network),
            "BULK" => Ok(LineItemType::Bulk),
            "PRICE_PRIORITY" => Ok(LineItemType::PricePriority),
            "HOUSE" => Ok(LineItemType::House),
            other => Err(format!("unknown line item type '{other}'")),
        }
    }
}

impl TryFrom<String> for LineItemType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Delivery goal attached to each line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "goal_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Goal {
    /// Explicit "no goal" for non-sponsorship items.
    None,
    /// Lifetime goal measured in viewable impressions.
    Lifetime { unit_type: &'static str, units: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CostType {
    Cpm,
    Vcpm,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserConfig {
    pub advertiser: AdvertiserConfig,
    pub order: OrderConfig,
    pub line_item: LineItemConfig,
    pub creative: CreativeConfig,
    pub rate: RateConfig,
    #[serde(default)]
    pub bidder_key_map: Option<BidderKeyMap>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AdvertiserConfig {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderConfig {
    pub name: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LineItemConfig {
    pub name: String,
    pub item_type: LineItemType,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub start_datetime: Option<String>,
    #[serde(default)]
    pub end_datetime: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreativeConfig {
    pub name: String,
    #[serde(default)]
    pub count: Option<u32>,
    pub sizes: Vec<Size>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateConfig {
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub vcpm: Option<i64>,
    pub granularity: GranularityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GranularityConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub custom: Option<Vec<PriceBucket>>,
}

impl UserConfig {
    pub fn from_document(document: &serde_yaml::Value) -> Result<Self, UsageError> {
        serde_yaml::from_value(document.clone())
            .map_err(|err| UsageError::UserDocument(err.to_string()))
    }
}

/// Goal for one item type. A vCPM rate is only legal on standard items.
pub fn resolve_goal(item_type: LineItemType, vcpm: Option<i64>) -> Result<Option<Goal>, UsageError> {
    match (item_type, vcpm) {
        (LineItemType::Standard, Some(units)) => Ok(Some(Goal::Lifetime {
            unit_type: "VIEWABLE_IMPRESSIONS",
            units,
        })),
        (other, Some(_)) => Err(UsageError::configuration(format!(
            "Line item type '{other}' does not support vcpm; use 'standard'."
        ))),
        (LineItemType::Sponsorship, None) => Ok(None),
        (_, None) => Ok(Some(Goal::None)),
    }
}

pub fn resolve_cost_type(vcpm: Option<i64>) -> CostType {
    if vcpm.is_some() {
        CostType::Vcpm
    } else {
        CostType::Cpm
    }
}

/// Line item template as the JSON attributes sent with every line item.
pub fn template_attributes(template: &serde_yaml::Value) -> Result<serde_json::Value, UsageError> {
    serde_json::to_value(template).map_err(|err| {
        UsageError::configuration(format!("Line item template is not JSON compatible: {err}"))
    })
}

/// Everything the creation phase needs, computed before anything is mutated.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub config: UserConfig,
    pub units: Vec<PartitionUnit>,
    pub cpm_names: Vec<CpmName>,
    pub schedule: ScheduleWindow,
    pub goal: Option<Goal>,
    pub cost_type: CostType,
    pub currency: String,
    pub micro_cent_factor: i64,
    pub creative_count: u32,
    pub order_name: String,
    pub line_item_name: String,
    pub run_mode: String,
    pub template: serde_json::Value,
}

impl PreparedRun {
    pub fn build(
        resolver: &mut ConfigResolver,
        partition: &BidderPartition,
    ) -> Result<Self, UsageError> {
        let config = UserConfig::from_document(resolver.user_document())?;

        let goal = resolve_goal(config.line_item.item_type, config.rate.vcpm)?;
        let cost_type = resolve_cost_type(config.rate.vcpm);

        let schedule = normalize_schedule(
            config.line_item.start_datetime.as_deref(),
            config.line_item.end_datetime.as_deref(),
            &resolver.date_format(),
            &resolver.timezone(),
        )
        .map_err(|err| UsageError::configuration(err.to_string()))?;

        let cpm_names = resolver.run_cpm_names()?;
        if cpm_names.is_empty() {
            return Err(UsageError::configuration(
                "Price granularity expands to no price points; nothing to create.",
            ));
        }

        let key_map = config.bidder_key_map.clone().unwrap_or_default();
        let settings = resolver.settings();
        let units = partition_units(
            partition,
            resolver.bidder_registry(),
            &settings.prebid.bidders,
            &key_map,
        );
        let micro_cent_factor = settings.platform.micro_cent_factor;
        let run_mode =
            run_mode_text(resolver.test_run(), &settings.mgr.test_run.name_prefix).to_string();

        let prepared = PreparedRun {
            units,
            cpm_names,
            schedule,
            goal,
            cost_type,
            currency: resolver.currency(),
            micro_cent_factor,
            creative_count: resolver.creative_count(),
            order_name: with_run_mode_placeholder(&config.order.name),
            line_item_name: with_run_mode_placeholder(&config.line_item.name),
            run_mode,
            template: template_attributes(&resolver.template()?)?,
            config,
        };
        debug!(
            units = prepared.units.len(),
            price_points = prepared.cpm_names.len(),
            cost_type = ?prepared.cost_type,
            "Run prepared"
        );
        Ok(prepared)
    }

    fn vars(&self, unit: &PartitionUnit) -> HashMap<&'static str, String> {
        HashMap::from([
            ("run_mode", self.run_mode.clone()),
            ("bidder_code", unit.code.clone()),
            ("bidder_name", unit.name.clone()),
        ])
    }

    pub fn order_name_for(&self, unit: &PartitionUnit) -> String {
        render_template(&self.order_name, &self.vars(unit))
    }

    pub fn creatives_for(&self, unit: &PartitionUnit, advertiser_id: i64) -> Vec<NewCreative> {
        let base = render_template(&self.config.creative.name, &self.vars(unit));
        let mut creatives = Vec::new();
        for index in 1..=self.creative_count {
            for size in &self.config.creative.sizes {
                let name = if self.creative_count > 1 {
                    format!("{base} {index} {}x{}", size.width, size.height)
                } else {
                    format!("{base} {}x{}", size.width, size.height)
                };
                creatives.push(NewCreative {
                    name,
                    advertiser_id,
                    size: *size,
                });
            }
        }
        creatives
    }

    pub fn line_item_for(&self, unit: &PartitionUnit, order_id: i64, cpm: CpmName) -> NewLineItem {
        let mut vars = self.vars(unit);
        vars.insert("cpm", cpm.to_string());

        let attributes = render_value(&self.template, &vars);

        NewLineItem {
            order_id,
            name: render_template(&self.line_item_name, &vars),
            item_type: self.config.line_item.item_type,
            priority: self.config.line_item.priority,
            cost_type: self.cost_type,
            cost_per_unit_micros: cpm.scaled(self.micro_cent_factor),
            currency: self.currency.clone(),
            schedule: self.schedule.clone(),
            goal: self.goal,
            targeting: PriceTargeting {
                key: unit.targeting_key.clone(),
                value: cpm.to_string(),
            },
            creative_sizes: self.config.creative.sizes.clone(),
            attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_types_parse_in_either_case() {
        assert_eq!("price_priority".parse(), Ok(LineItemType::PricePriority));
        assert_eq!("STANDARD".parse(), Ok(LineItemType::Standard));
        assert!("premium".parse::<LineItemType>().is_err());
        assert_eq!(LineItemType::PricePriority.to_string(), "PRICE_PRIORITY");
    }

    #[test]
    fn vcpm_is_only_legal_on_standard_items() {
        assert_eq!(
            resolve_goal(LineItemType::Standard, Some(1000)).unwrap(),
            Some(Goal::Lifetime {
                unit_type: "VIEWABLE_IMPRESSIONS",
                units: 1000
            })
        );
        assert!(matches!(
            resolve_goal(LineItemType::PricePriority, Some(1000)),
            Err(UsageError::Configuration(_))
        ));
        assert!(matches!(
            resolve_goal(LineItemType::Sponsorship, Some(1)),
            Err(UsageError::Configuration(_))
        ));
    }

    #[test]
    fn sponsorship_has_no_explicit_goal() {
        assert_eq!(resolve_goal(LineItemType::Sponsorship, None).unwrap(), None);
        assert_eq!(
            resolve_goal(LineItemType::PricePriority, None).unwrap(),
            Some(Goal::None)
        );
    }

    #[test]
    fn cost_type_follows_vcpm() {
        assert_eq!(resolve_cost_type(Some(5)), CostType::Vcpm);
        assert_eq!(resolve_cost_type(None), CostType::Cpm);
    }

    #[test]
    fn goal_serializes_with_type_tag() {
        let json = serde_json::to_value(Goal::Lifetime {
            unit_type: "VIEWABLE_IMPRESSIONS",
            units: 7,
        })
        .unwrap();
        assert_eq!(json["goal_type"], "LIFETIME");
        assert_eq!(json["units"], 7);
        assert_eq!(serde_json::to_value(Goal::None).unwrap()["goal_type"], "NONE");
    }

    #[test]
    fn builtin_template_converts_to_attributes() {
        let template = crate::settings::load_template(None).unwrap();
        assert!(template_attributes(&template).unwrap().is_object());
    }

    #[test]
    fn template_with_non_string_keys_is_a_configuration_error() {
        let template: serde_yaml::Value = serde_yaml::from_str("? [a, b]\n: x\n").unwrap();
        match template_attributes(&template) {
            Err(UsageError::Configuration(message)) => {
                assert!(message.starts_with("Line item template is not JSON compatible"));
            }
            other => panic!("expected a configuration error, got {other:?}"),
        }
    }

    #[test]
    fn sample_document_deserializes() {
        let document: serde_yaml::Value =
            serde_yaml::from_str(crate::settings::BUILTIN_CONFIG).unwrap();
        let config = UserConfig::from_document(&document).unwrap();
        assert_eq!(config.line_item.item_type, LineItemType::PricePriority);
        assert_eq!(config.creative.sizes.len(), 2);
        assert_eq!(config.rate.granularity.kind, "dense");
    }
}
