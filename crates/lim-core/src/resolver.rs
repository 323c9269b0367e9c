//! Layered configuration: run overrides, then the user document, then built-in settings.
//!
//! Precedence is decided per field by each accessor. Derived values (platform handle,
//! canonical price list, validation schema) are memoized and dropped whenever the
//! override layer or the user document is replaced.

use std::path::PathBuf;
use std::sync::Arc;

use serde_yaml::Value;
use tracing::{debug, info};

use crate::bidders::BidderRegistry;
use crate::error::UsageError;
use crate::options::{DEFAULT_PRIVATE_KEY_FILE, RunOverrides, Verbosity};
use crate::platform::{AdPlatform, Credentials, DryRunPlatform, PlatformConnector};
use crate::pricing::{CpmName, PriceBucket, expand_buckets};
use crate::schema::Schema;
use crate::settings::{AppSettings, DocumentSource, load_schema_document, load_settings, load_template};

/// A lazily computed value with explicit invalidation.
#[derive(Debug)]
pub struct Memo<T> {
    value: Option<T>,
}

impl<T> Default for Memo<T> {
    fn default() -> Self {
        Self { value: None }
    }
}

impl<T> Memo<T> {
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn get_or_try_init<E>(&mut self, init: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        let value = match self.value.take() {
            Some(value) => value,
            None => init()?,
        };
        Ok(self.value.insert(value))
    }

    pub fn set(&mut self, value: T) -> &T {
        self.value.insert(value)
    }

    pub fn invalidate(&mut self) {
        self.value = None;
    }

    pub fn is_cached(&self) -> bool {
        self.value.is_some()
    }
}

pub struct ConfigResolver {
    overrides: RunOverrides,
    user: Value,
    base_settings: AppSettings,
    settings: AppSettings,
    settings_source: DocumentSource,
    registry: BidderRegistry,
    client: Memo<Arc<dyn AdPlatform>>,
    cpm_names: Memo<Vec<CpmName>>,
    schema: Memo<Schema>,
}

impl ConfigResolver {
    /// Resolver over the built-in settings and bidder registry.
    pub fn new() -> Result<Self, UsageError> {
        let (settings, _) = load_settings(None)?;
        Ok(Self::with_settings(settings, BidderRegistry::builtin()?))
    }

    pub fn with_settings(settings: AppSettings, registry: BidderRegistry) -> Self {
        Self {
            overrides: RunOverrides::default(),
            user: Value::Null,
            base_settings: settings.clone(),
            settings,
            settings_source: DocumentSource::Builtin,
            registry,
            client: Memo::default(),
            cpm_names: Memo::default(),
            schema: Memo::default(),
        }
    }

    /// Install a new override layer. A custom settings path replaces the default layer.
    pub fn set_overrides(&mut self, overrides: RunOverrides) -> Result<(), UsageError> {
        match overrides.settings.as_deref() {
            Some(path) => {
                let (settings, source) = load_settings(Some(path))?;
                info!(source = %source, "Loaded custom settings");
                self.settings = settings;
                self.settings_source = source;
            }
            None => {
                self.settings = self.base_settings.clone();
                self.settings_source = DocumentSource::Builtin;
            }
        }
        self.overrides = overrides;
        self.invalidate_caches();
        Ok(())
    }

    pub fn set_user_document(&mut self, document: Value) {
        self.user = document;
        self.invalidate_caches();
    }

    /// Back to an empty override layer and no user document.
    pub fn reset(&mut self) {
        self.overrides = RunOverrides::default();
        self.user = Value::Null;
        self.settings = self.base_settings.clone();
        self.settings_source = DocumentSource::Builtin;
        self.invalidate_caches();
    }

    fn invalidate_caches(&mut self) {
        self.client.invalidate();
        self.cpm_names.invalidate();
        self.schema.invalidate();
        debug!("Resolver caches invalidated");
    }

    pub fn overrides(&self) -> &RunOverrides {
        &self.overrides
    }

    pub fn user_document(&self) -> &Value {
        &self.user
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn settings_source(&self) -> &DocumentSource {
        &self.settings_source
    }

    pub fn bidder_registry(&self) -> &BidderRegistry {
        &self.registry
    }

    fn user_value(&self, path: &[&str]) -> Option<&Value> {
        let mut current = &self.user;
        for key in path {
            current = current.as_mapping()?.get(*key)?;
        }
        (!current.is_null()).then_some(current)
    }

    fn user_str(&self, path: &[&str]) -> Option<String> {
        self.user_value(path)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    }

    pub fn network_code(&self) -> Result<i64, UsageError> {
        if let Some(code) = self.overrides.network_code {
            return Ok(code);
        }
        match self.user_value(&["publisher", "network_code"]) {
            Some(value) => value
                .as_i64()
                .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
                .ok_or_else(|| {
                    UsageError::configuration("publisher.network_code must be an integer")
                }),
            None => Err(UsageError::configuration(
                "Network code must be provided with --network-code or publisher.network_code",
            )),
        }
    }

    pub fn network_name(&self) -> Result<String, UsageError> {
        self.overrides
            .network_name
            .clone()
            .or_else(|| self.user_str(&["publisher", "network_name"]))
            .ok_or_else(|| {
                UsageError::configuration(
                    "Network name must be provided with --network-name or publisher.network_name",
                )
            })
    }

    pub fn private_key_file(&self) -> PathBuf {
        self.overrides
            .private_key_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PRIVATE_KEY_FILE))
    }

    pub fn single_order(&self) -> bool {
        self.overrides.single_order.unwrap_or(false)
    }

    pub fn bidder_codes(&self) -> Vec<String> {
        self.overrides.bidder_codes.clone().unwrap_or_default()
    }

    pub fn test_run(&self) -> bool {
        self.overrides.test_run.unwrap_or(false)
    }

    pub fn dry_run(&self) -> bool {
        self.overrides.dry_run.unwrap_or(false)
    }

    pub fn skip_auto_archive(&self) -> bool {
        self.overrides.skip_auto_archive.unwrap_or(false)
    }

    pub fn include_details(&self) -> bool {
        self.overrides.include_details.unwrap_or(false)
    }

    pub fn verbosity(&self) -> Verbosity {
        self.overrides.verbosity.unwrap_or_default()
    }

    pub fn quiet(&self) -> bool {
        self.verbosity() == Verbosity::Quiet
    }

    pub fn timezone(&self) -> String {
        self.user_str(&["line_item", "timezone"])
            .unwrap_or_else(|| self.settings.mgr.timezone.clone())
    }

    pub fn date_format(&self) -> String {
        self.settings.mgr.date_fmt.clone()
    }

    pub fn currency(&self) -> String {
        self.user_str(&["rate", "currency"])
            .unwrap_or_else(|| self.settings.mgr.currency.clone())
    }

    pub fn creative_count(&self) -> u32 {
        self.user_value(&["creative", "count"])
            .and_then(Value::as_u64)
            .and_then(|count| u32::try_from(count).ok())
            .unwrap_or(self.settings.mgr.creative_count)
    }

    pub fn test_line_item_limit(&self) -> usize {
        self.settings.mgr.test_run.line_item_limit
    }

    pub fn max_price_points(&self) -> usize {
        self.settings.mgr.max_price_points
    }

    /// Buckets for the configured granularity: a named tier from settings, or the
    /// user's custom list.
    pub fn price_buckets(&self) -> Result<Vec<PriceBucket>, UsageError> {
        let kind = self
            .user_str(&["rate", "granularity", "type"])
            .ok_or_else(|| UsageError::configuration("rate.granularity.type is required"))?;

        if kind == "custom" {
            let Some(custom) = self.user_value(&["rate", "granularity", "custom"]) else {
                return Ok(Vec::new());
            };
            return serde_yaml::from_value(custom.clone()).map_err(|err| {
                UsageError::configuration(format!("Invalid custom price granularity: {err}"))
            });
        }

        self.settings
            .prebid
            .price_granularity
            .get(&kind)
            .cloned()
            .ok_or_else(|| {
                UsageError::configuration(format!("Unknown price granularity '{kind}'"))
            })
    }

    /// Canonical price list, never truncated.
    pub fn cpm_names(&mut self) -> Result<Vec<CpmName>, UsageError> {
        if let Some(names) = self.cpm_names.get() {
            return Ok(names.clone());
        }
        let buckets = self.price_buckets()?;
        let names = expand_buckets(&buckets, self.max_price_points())
            .map_err(|err| UsageError::configuration(err.to_string()))?;
        debug!(count = names.len(), "Expanded price granularity");
        Ok(self.cpm_names.set(names).clone())
    }

    /// Price list this run consumes: the canonical list, truncated in test mode.
    pub fn run_cpm_names(&mut self) -> Result<Vec<CpmName>, UsageError> {
        let mut names = self.cpm_names()?;
        if self.test_run() {
            names.truncate(self.test_line_item_limit());
        }
        Ok(names)
    }

    pub fn schema(&mut self) -> Result<&Schema, UsageError> {
        let path = self.overrides.schema.clone();
        self.schema.get_or_try_init(|| {
            let document = load_schema_document(path.as_deref())?;
            Schema::from_value(&document)
        })
    }

    pub fn template(&self) -> Result<Value, UsageError> {
        load_template(self.overrides.template.as_deref())
    }

    pub fn credentials(&self) -> Result<Credentials, UsageError> {
        Ok(Credentials {
            network_code: self.network_code()?,
            key_file: crate::settings::expand_path(&self.private_key_file()),
        })
    }

    /// Authenticated platform handle, wrapped for dry runs.
    pub async fn client(
        &mut self,
        connector: &dyn PlatformConnector,
    ) -> Result<Arc<dyn AdPlatform>, UsageError> {
        if let Some(client) = self.client.get() {
            return Ok(Arc::clone(client));
        }
        let credentials = self.credentials()?;
        let platform = connector.connect(&credentials).await?;
        let platform: Arc<dyn AdPlatform> = if self.dry_run() {
            Arc::new(DryRunPlatform::new(platform))
        } else {
            platform
        };
        Ok(Arc::clone(self.client.set(platform)))
    }

    pub fn has_cached_client(&self) -> bool {
        self.client.is_cached()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ConfigResolver {
        ConfigResolver::new().unwrap()
    }

    fn doc(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    const TENTHS: &str = "
rate:
  granularity:
    type: custom
    custom:
      - {min: 0.0, max: 1.0, increment: 0.1}
";

    #[test]
    fn fields_resolve_independently_across_layers() {
        let mut resolver = resolver();
        resolver.set_user_document(doc(
            "publisher: {network_code: 11, network_name: From Doc}\nline_item: {timezone: Europe/Paris}\n",
        ));
        resolver
            .set_overrides(RunOverrides {
                network_code: Some(99),
                ..RunOverrides::default()
            })
            .unwrap();

        assert_eq!(resolver.network_code().unwrap(), 99);
        assert_eq!(resolver.network_name().unwrap(), "From Doc");
        assert_eq!(resolver.timezone(), "Europe/Paris");
        assert_eq!(resolver.currency(), "USD");
    }

    #[test]
    fn verbosity_comes_from_the_override_layer() {
        let mut resolver = resolver();
        assert_eq!(resolver.verbosity(), Verbosity::Normal);
        assert!(!resolver.quiet());

        resolver
            .set_overrides(RunOverrides {
                verbosity: Some(Verbosity::Quiet),
                ..RunOverrides::default()
            })
            .unwrap();
        assert_eq!(resolver.verbosity(), Verbosity::Quiet);
        assert!(resolver.quiet());
    }

    #[test]
    fn missing_network_code_is_a_configuration_error() {
        let resolver = resolver();
        assert!(matches!(
            resolver.network_code(),
            Err(UsageError::Configuration(_))
        ));
    }

    #[test]
    fn named_tiers_come_from_settings() {
        let mut resolver = resolver();
        resolver.set_user_document(doc("rate: {granularity: {type: low}}"));
        let names = resolver.cpm_names().unwrap();
        assert_eq!(names.len(), 10);
        assert_eq!(names[0].to_string(), "0.50");

        resolver.set_user_document(doc("rate: {granularity: {type: platinum}}"));
        assert!(matches!(
            resolver.cpm_names(),
            Err(UsageError::Configuration(_))
        ));
    }

    #[test]
    fn test_mode_truncates_only_the_run_view() {
        let mut settings = AppSettings::default();
        settings.mgr.test_run.line_item_limit = 3;
        let mut resolver =
            ConfigResolver::with_settings(settings, BidderRegistry::builtin().unwrap());
        resolver.set_user_document(doc(TENTHS));
        resolver
            .set_overrides(RunOverrides {
                test_run: Some(true),
                ..RunOverrides::default()
            })
            .unwrap();

        let run: Vec<String> = resolver
            .run_cpm_names()
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(run, vec!["0.00", "0.10", "0.20"]);
        assert_eq!(resolver.cpm_names().unwrap().len(), 11);
    }

    #[test]
    fn installing_a_document_drops_the_price_cache() {
        let mut resolver = resolver();
        resolver.set_user_document(doc(TENTHS));
        assert_eq!(resolver.cpm_names().unwrap().len(), 11);

        resolver.set_user_document(doc("rate: {granularity: {type: low}}"));
        assert_eq!(resolver.cpm_names().unwrap().len(), 10);

        resolver.reset();
        assert!(resolver.user_document().is_null());
        assert!(!resolver.has_cached_client());
    }

    #[test]
    fn custom_type_without_buckets_is_empty() {
        let mut resolver = resolver();
        resolver.set_user_document(doc("rate: {granularity: {type: custom}}"));
        assert!(resolver.cpm_names().unwrap().is_empty());
    }

    #[test]
    fn oversized_granularity_is_a_configuration_error() {
        let mut resolver = resolver();
        resolver.set_user_document(doc(
            "rate: {granularity: {type: custom, custom: [{min: 0, max: 10000000, increment: 0.01}]}}",
        ));
        assert!(matches!(
            resolver.cpm_names(),
            Err(UsageError::Configuration(_))
        ));

        let mut settings = AppSettings::default();
        settings.mgr.max_price_points = 5;
        let mut resolver =
            ConfigResolver::with_settings(settings, BidderRegistry::builtin().unwrap());
        resolver.set_user_document(doc(TENTHS));
        let Err(UsageError::Configuration(message)) = resolver.cpm_names() else {
            panic!("expected the point cap to apply");
        };
        assert!(message.contains("more than 5 price points"));
    }

    #[test]
    fn memo_initializes_once_until_invalidated() {
        let mut memo = Memo::default();
        let mut calls = 0;
        for _ in 0..2 {
            let value = memo
                .get_or_try_init(|| {
                    calls += 1;
                    Ok::<_, ()>(7)
                })
                .unwrap();
            assert_eq!(*value, 7);
        }
        assert_eq!(calls, 1);
        memo.invalidate();
        assert!(!memo.is_cached());
    }
}
