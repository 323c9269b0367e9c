//! Built-in settings (the default configuration layer) and on-disk document loading.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use dirs::config_dir;
use serde::{Deserialize, Serialize};

use crate::error::UsageError;
use crate::pricing::PriceBucket;

const CONFIG_DIR_NAME: &str = "line-item-manager";

pub const BUILTIN_SETTINGS: &str = include_str!("../resources/settings.yml");
pub const BUILTIN_SCHEMA: &str = include_str!("../resources/schema.yml");
pub const BUILTIN_CONFIG: &str = include_str!("../resources/line_item_manager.yml");
pub const BUILTIN_TEMPLATE: &str = include_str!("../resources/line_item_template.yml");
pub const BUILTIN_BIDDERS: &str = include_str!("../resources/bidders.yml");

/// Indicates where a document was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    Builtin,
    File(PathBuf),
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSource::Builtin => write!(f, "built-in"),
            DocumentSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Default layer. Every field has a default so a custom settings file may be partial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppSettings {
    #[serde(default)]
    pub prebid: PrebidSettings,
    #[serde(default)]
    pub mgr: ManagerSettings,
    #[serde(default)]
    pub platform: PlatformSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrebidSettings {
    #[serde(default = "default_price_granularity")]
    pub price_granularity: BTreeMap<String, Vec<PriceBucket>>,
    #[serde(default)]
    pub bidders: BidderSettings,
}

impl Default for PrebidSettings {
    fn default() -> Self {
        Self {
            price_granularity: default_price_granularity(),
            bidders: BidderSettings::default(),
        }
    }
}

fn default_price_granularity() -> BTreeMap<String, Vec<PriceBucket>> {
    BTreeMap::from([
        ("low".to_string(), vec![PriceBucket::new(0.50, 5.00, 0.50)]),
        ("medium".to_string(), vec![PriceBucket::new(0.10, 20.00, 0.10)]),
        ("high".to_string(), vec![PriceBucket::new(0.01, 20.00, 0.01)]),
        (
            "auto".to_string(),
            vec![
                PriceBucket::new(0.05, 5.00, 0.05),
                PriceBucket::new(5.10, 10.00, 0.10),
                PriceBucket::new(10.50, 20.00, 0.50),
            ],
        ),
        (
            "dense".to_string(),
            vec![
                PriceBucket::new(0.01, 3.00, 0.01),
                PriceBucket::new(3.05, 8.00, 0.05),
                PriceBucket::new(8.50, 20.00, 0.50),
            ],
        ),
    ])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidderSettings {
    #[serde(default)]
    pub single_order: SingleOrderBidder,
    #[serde(default = "BidderSettings::default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "BidderSettings::default_key_max_length")]
    pub key_max_length: usize,
}

impl Default for BidderSettings {
    fn default() -> Self {
        Self {
            single_order: SingleOrderBidder::default(),
            key_prefix: Self::default_key_prefix(),
            key_max_length: Self::default_key_max_length(),
        }
    }
}

impl BidderSettings {
    fn default_key_prefix() -> String {
        "hb_pb_".to_string()
    }

    const fn default_key_max_length() -> usize {
        20
    }
}

/// Pseudo-bidder used when every price point goes into one umbrella order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleOrderBidder {
    pub code: String,
    pub name: String,
    pub key: String,
}

impl Default for SingleOrderBidder {
    fn default() -> Self {
        Self {
            code: "top".to_string(),
            name: "Top Bid".to_string(),
            key: "hb_pb".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSettings {
    #[serde(default = "ManagerSettings::default_date_fmt")]
    pub date_fmt: String,
    #[serde(default = "ManagerSettings::default_timezone")]
    pub timezone: String,
    #[serde(default = "ManagerSettings::default_currency")]
    pub currency: String,
    #[serde(default = "ManagerSettings::default_creative_count")]
    pub creative_count: u32,
    /// Upper bound on the price points one granularity may expand to.
    #[serde(default = "ManagerSettings::default_max_price_points")]
    pub max_price_points: usize,
    #[serde(default)]
    pub test_run: TestRunSettings,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            date_fmt: Self::default_date_fmt(),
            timezone: Self::default_timezone(),
            currency: Self::default_currency(),
            creative_count: Self::default_creative_count(),
            max_price_points: Self::default_max_price_points(),
            test_run: TestRunSettings::default(),
        }
    }
}

impl ManagerSettings {
    fn default_date_fmt() -> String {
        "%Y-%m-%d %H:%M".to_string()
    }

    fn default_timezone() -> String {
        "UTC".to_string()
    }

    fn default_currency() -> String {
        "USD".to_string()
    }

    const fn default_creative_count() -> u32 {
        1
    }

    const fn default_max_price_points() -> usize {
        10_000
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunSettings {
    #[serde(default = "TestRunSettings::default_line_item_limit")]
    pub line_item_limit: usize,
    #[serde(default = "TestRunSettings::default_name_prefix")]
    pub name_prefix: String,
}

impl Default for TestRunSettings {
    fn default() -> Self {
        Self {
            line_item_limit: Self::default_line_item_limit(),
            name_prefix: Self::default_name_prefix(),
        }
    }
}

impl TestRunSettings {
    const fn default_line_item_limit() -> usize {
        2
    }

    fn default_name_prefix() -> String {
        "Test: ".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformSettings {
    #[serde(default = "PlatformSettings::default_endpoint")]
    pub endpoint: String,
    #[serde(default = "PlatformSettings::default_micro_cent_factor")]
    pub micro_cent_factor: i64,
}

impl Default for PlatformSettings {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            micro_cent_factor: Self::default_micro_cent_factor(),
        }
    }
}

impl PlatformSettings {
    fn default_endpoint() -> String {
        "https://localhost:8443/api/v1".to_string()
    }

    const fn default_micro_cent_factor() -> i64 {
        1_000_000
    }
}

/// Internal resources that can be printed for reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Config,
    Template,
    Settings,
    Schema,
}

impl Resource {
    pub const ALL: [Resource; 4] = [
        Resource::Config,
        Resource::Template,
        Resource::Settings,
        Resource::Schema,
    ];

    pub fn contents(self) -> &'static str {
        match self {
            Resource::Config => BUILTIN_CONFIG,
            Resource::Template => BUILTIN_TEMPLATE,
            Resource::Settings => BUILTIN_SETTINGS,
            Resource::Schema => BUILTIN_SCHEMA,
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Resource::Config => "line_item_manager.yml",
            Resource::Template => "line_item_template.yml",
            Resource::Settings => "settings.yml",
            Resource::Schema => "schema.yml",
        }
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "config" => Ok(Resource::Config),
            "template" => Ok(Resource::Template),
            "settings" => Ok(Resource::Settings),
            "schema" => Ok(Resource::Schema),
            other => Err(format!("Unknown resource '{other}'")),
        }
    }
}

pub fn read_resource(name: &str) -> Result<&'static str, String> {
    name.parse::<Resource>().map(Resource::contents)
}

/// Path to the per-user directory (logs live underneath it).
pub fn config_directory() -> PathBuf {
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Expand `~` and environment references in a user-supplied path.
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(raw.as_ref()) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref()),
    }
}

fn read_document(path: &Path, what: &str) -> Result<String, UsageError> {
    let path = expand_path(path);
    fs::read_to_string(&path).map_err(|err| {
        UsageError::configuration(format!("Failed to read {what} {}: {err}", path.display()))
    })
}

/// Load the default layer, from a custom file when one is given.
pub fn load_settings(path: Option<&Path>) -> Result<(AppSettings, DocumentSource), UsageError> {
    match path {
        None => {
            let settings = serde_yaml::from_str(BUILTIN_SETTINGS).map_err(|err| {
                UsageError::configuration(format!("Built-in settings are invalid: {err}"))
            })?;
            Ok((settings, DocumentSource::Builtin))
        }
        Some(path) => {
            let raw = read_document(path, "settings file")?;
            let settings = serde_yaml::from_str(&raw).map_err(|err| {
                UsageError::configuration(format!(
                    "Failed to parse settings file {}: {err}",
                    path.display()
                ))
            })?;
            Ok((settings, DocumentSource::File(path.to_path_buf())))
        }
    }
}

/// Load the raw validation schema document.
pub fn load_schema_document(path: Option<&Path>) -> Result<serde_yaml::Value, UsageError> {
    let raw = match path {
        None => BUILTIN_SCHEMA.to_string(),
        Some(path) => read_document(path, "schema file")?,
    };
    serde_yaml::from_str(&raw)
        .map_err(|err| UsageError::configuration(format!("Failed to parse schema: {err}")))
}

/// Load the line item template; it must be a mapping.
pub fn load_template(path: Option<&Path>) -> Result<serde_yaml::Value, UsageError> {
    let raw = match path {
        None => BUILTIN_TEMPLATE.to_string(),
        Some(path) => read_document(path, "template file")?,
    };
    let value: serde_yaml::Value = serde_yaml::from_str(&raw)
        .map_err(|err| UsageError::configuration(format!("Failed to parse template: {err}")))?;
    if !value.is_mapping() {
        return Err(UsageError::configuration(
            "Line item template must be a mapping of fields.",
        ));
    }
    Ok(value)
}

/// Parse a user configuration document. TOML is accepted by extension, YAML otherwise.
pub fn parse_user_document(raw: &str, toml_format: bool) -> Result<serde_yaml::Value, UsageError> {
    let value = if toml_format {
        let parsed: toml::Value =
            toml::from_str(raw).map_err(|err| UsageError::UserDocument(err.to_string()))?;
        serde_yaml::to_value(parsed).map_err(|err| UsageError::UserDocument(err.to_string()))?
    } else {
        serde_yaml::from_str(raw).map_err(|err| UsageError::UserDocument(err.to_string()))?
    };

    match value {
        serde_yaml::Value::Mapping(_) => Ok(value),
        serde_yaml::Value::Null => Err(UsageError::UserDocument("document is empty".into())),
        _ => Err(UsageError::UserDocument(
            "top level must be a mapping of sections".into(),
        )),
    }
}

pub fn load_user_document(path: &Path) -> Result<serde_yaml::Value, UsageError> {
    let expanded = expand_path(path);
    let raw = fs::read_to_string(&expanded)
        .map_err(|err| UsageError::UserDocument(format!("{}: {err}", expanded.display())))?;
    let toml_format = expanded
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    parse_user_document(&raw, toml_format)
}
