//! The creation pipeline.
//!
//! `authenticate -> verify network -> validate -> pre-process -> create -> clean up`.
//! Anything that fails before creation returns a [`UsageError`]; from creation onward
//! failures are collected into the [`CreationResult`].

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::bidders::{BidderPartition, PartitionUnit, validate_override_map};
use crate::error::{CreationFailure, PlatformError, UsageError};
use crate::options::CreateOptions;
use crate::platform::{
    AdPlatform, Advertiser, Association, Creative, LineItem, NewAssociation, NewOrder, Order,
    PlatformConnector,
};
use crate::prepare::PreparedRun;
use crate::resolver::ConfigResolver;
use crate::settings::load_user_document;

pub type StageProgressCallback = Arc<dyn Fn(StageProgressEvent) + Send + Sync + 'static>;

#[derive(Debug, Clone, Serialize)]
pub struct StageProgressEvent {
    pub kind: StageProgressEventKind,
    pub stage: Option<String>,
    pub elapsed_ms: f64,
    pub stage_elapsed_ms: Option<f64>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageProgressEventKind {
    Begin,
    End,
    Note,
    Progress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Authenticate,
    VerifyNetwork,
    Validate,
    PreProcess,
    Create,
    Cleanup,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::Authenticate => "Authenticate",
            Stage::VerifyNetwork => "Verify network",
            Stage::Validate => "Validate configuration",
            Stage::PreProcess => "Pre-process",
            Stage::Create => "Create line items",
            Stage::Cleanup => "Clean up",
        }
    }
}

struct StageLogger {
    program_start: Instant,
    stage_start: Instant,
    current_stage: Option<&'static str>,
    callback: Option<StageProgressCallback>,
}

impl StageLogger {
    fn new(callback: Option<StageProgressCallback>) -> Self {
        let start = Instant::now();
        Self {
            program_start: start,
            stage_start: start,
            current_stage: None,
            callback,
        }
    }

    fn emit(&self, kind: StageProgressEventKind, stage_elapsed: bool, message: String) {
        if let Some(cb) = &self.callback {
            cb(StageProgressEvent {
                kind,
                stage: self.current_stage.map(str::to_string),
                elapsed_ms: self.program_start.elapsed().as_secs_f64() * 1_000.0,
                stage_elapsed_ms: stage_elapsed
                    .then(|| self.stage_start.elapsed().as_secs_f64() * 1_000.0),
                message: Some(message),
            });
        }
    }

    fn begin(&mut self, stage: Stage) {
        let name = stage.label();
        info!(stage = name, "BEGIN");
        self.stage_start = Instant::now();
        self.current_stage = Some(name);
        self.emit(StageProgressEventKind::Begin, false, format!("Starting {name}"));
    }

    fn end(&mut self) {
        let Some(name) = self.current_stage else {
            return;
        };
        let elapsed = self.stage_start.elapsed();
        info!(stage = name, elapsed_ms = elapsed.as_millis() as u64, "END");
        self.emit(
            StageProgressEventKind::End,
            true,
            format!("Finished {name} ({} ms)", elapsed.as_millis()),
        );
        self.current_stage = None;
    }

    /// Run one stage; the end event is emitted whether or not it succeeds.
    async fn stage<T, F>(&mut self, stage: Stage, work: F) -> Result<T, UsageError>
    where
        F: Future<Output = Result<T, UsageError>>,
    {
        self.begin(stage);
        let result = work.await;
        if let Err(err) = &result {
            error!(stage = stage.label(), "{err}");
        }
        self.end();
        result
    }

    fn note(&self, message: impl Into<String>) {
        let text = message.into();
        info!("{text}");
        self.emit(StageProgressEventKind::Note, true, text);
    }

    fn progress(&self, message: impl Into<String>) {
        let text = message.into();
        trace!("{text}");
        self.emit(StageProgressEventKind::Progress, true, text);
    }
}

/// Snapshot of every resource this run created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreatedResources {
    pub orders: Vec<Order>,
    pub creatives: Vec<Creative>,
    pub line_items: Vec<LineItem>,
    pub associations: Vec<Association>,
}

/// Terminal artifact of a run that reached creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreationResult {
    pub success: bool,
    pub errors: Vec<String>,
    pub line_item_count: usize,
    pub lica_count: usize,
    pub dry_run: bool,
    pub test_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<CreatedResources>,
}

/// Run once with a fresh resolver.
pub async fn create_line_items(
    options: &CreateOptions,
    connector: &dyn PlatformConnector,
    cancel: CancellationToken,
) -> Result<CreationResult, UsageError> {
    Pipeline::new()?.run(options, connector, cancel).await
}

pub async fn create_line_items_with_progress(
    options: &CreateOptions,
    connector: &dyn PlatformConnector,
    cancel: CancellationToken,
    callback: StageProgressCallback,
) -> Result<CreationResult, UsageError> {
    Pipeline::new()?
        .with_progress(callback)
        .run(options, connector, cancel)
        .await
}

/// Holds one resolver across runs for long-lived callers.
pub struct Pipeline {
    resolver: ConfigResolver,
    callback: Option<StageProgressCallback>,
}

impl Pipeline {
    pub fn new() -> Result<Self, UsageError> {
        Ok(Self::with_resolver(ConfigResolver::new()?))
    }

    pub fn with_resolver(resolver: ConfigResolver) -> Self {
        Self {
            resolver,
            callback: None,
        }
    }

    pub fn with_progress(mut self, callback: StageProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn resolver(&self) -> &ConfigResolver {
        &self.resolver
    }

    pub async fn run(
        &mut self,
        options: &CreateOptions,
        connector: &dyn PlatformConnector,
        cancel: CancellationToken,
    ) -> Result<CreationResult, UsageError> {
        self.resolver.reset();
        let document = load_user_document(&options.configfile)?;
        self.resolver.set_overrides(options.overrides())?;
        self.resolver.set_user_document(document);
        self.execute(connector, cancel).await
    }

    /// Run against whatever layers are installed, without reloading them.
    pub async fn execute(
        &mut self,
        connector: &dyn PlatformConnector,
        cancel: CancellationToken,
    ) -> Result<CreationResult, UsageError> {
        let resolver = &mut self.resolver;
        let mut logger = StageLogger::new(self.callback.clone());
        logger.note(format!("Settings: {}", resolver.settings_source()));
        debug!(
            verbosity = ?resolver.verbosity(),
            test_run = resolver.test_run(),
            dry_run = resolver.dry_run(),
            "Run layers installed"
        );

        let partition =
            BidderPartition::from_selection(resolver.single_order(), &resolver.bidder_codes())?;

        let client = logger
            .stage(Stage::Authenticate, resolver.client(connector))
            .await?;

        logger
            .stage(Stage::VerifyNetwork, verify_network(resolver, client.as_ref()))
            .await?;

        logger
            .stage(Stage::Validate, async {
                let document = resolver.user_document().clone();
                resolver
                    .schema()?
                    .validate(&document)
                    .map_err(UsageError::SchemaValidation)?;
                validate_override_map(document.get("bidder_key_map"), resolver.bidder_registry())
            })
            .await?;

        let prepared = logger
            .stage(Stage::PreProcess, async {
                PreparedRun::build(resolver, &partition)
            })
            .await?;
        logger.note(format!(
            "{} order(s) x {} price point(s)",
            prepared.units.len(),
            prepared.cpm_names.len()
        ));

        let test_run = resolver.test_run();
        let dry_run = resolver.dry_run();

        let mut creation = CreationRun::new(client, &prepared, cancel);
        logger.begin(Stage::Create);
        creation.create(&logger).await;
        logger.end();

        if resolver.skip_auto_archive() {
            if !creation.errors.is_empty() {
                warn!("Auto archive skipped; partially created resources were left in place");
            }
        } else if !creation.errors.is_empty() || test_run {
            logger.begin(Stage::Cleanup);
            creation.cleanup().await;
            logger.end();
        }

        let CreationRun {
            created, errors, ..
        } = creation;
        let result = CreationResult {
            success: errors.is_empty(),
            line_item_count: created.line_items.len(),
            lica_count: created.associations.len(),
            errors,
            dry_run,
            test_run,
            details: resolver.include_details().then_some(created),
        };
        logger.note(format!(
            "Created {} line item(s) and {} creative association(s)",
            result.line_item_count, result.lica_count
        ));
        Ok(result)
    }
}

async fn verify_network(
    resolver: &ConfigResolver,
    client: &dyn AdPlatform,
) -> Result<(), UsageError> {
    let expected = resolver.network_name()?;
    let network = client
        .current_network()
        .await
        .map_err(UsageError::AccessDenied)?;
    if network.display_name.trim() != expected.trim() {
        return Err(UsageError::NetworkMismatch {
            expected,
            actual: network.display_name,
        });
    }
    info!(network_code = network.network_code, name = %network.display_name, "Network verified");
    Ok(())
}

/// Why a grouping stopped early.
enum Halt {
    Failed(CreationFailure),
    Interrupted,
}

impl From<CreationFailure> for Halt {
    fn from(value: CreationFailure) -> Self {
        match value {
            CreationFailure::UserInterrupt => Halt::Interrupted,
            other => Halt::Failed(other),
        }
    }
}

/// Mutable state of the creation and cleanup phases.
struct CreationRun<'a> {
    client: Arc<dyn AdPlatform>,
    prepared: &'a PreparedRun,
    cancel: CancellationToken,
    created: CreatedResources,
    errors: Vec<String>,
}

impl<'a> CreationRun<'a> {
    fn new(client: Arc<dyn AdPlatform>, prepared: &'a PreparedRun, cancel: CancellationToken) -> Self {
        Self {
            client,
            prepared,
            cancel,
            created: CreatedResources::default(),
            errors: Vec::new(),
        }
    }

    fn record(&mut self, failure: CreationFailure) {
        error!("{failure}");
        self.errors.push(failure.to_string());
    }

    /// Await one platform call unless the run is interrupted first.
    async fn guarded<T>(
        &self,
        call: impl Future<Output = Result<T, PlatformError>>,
        context: impl FnOnce() -> String,
    ) -> Result<T, CreationFailure> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CreationFailure::UserInterrupt),
            result = call => result.map_err(|err| err.context(context()).into()),
        }
    }

    async fn create(&mut self, logger: &StageLogger) {
        let advertiser = match self.advertiser().await {
            Ok(advertiser) => advertiser,
            Err(failure) => {
                self.record(failure);
                return;
            }
        };

        let prepared = self.prepared;
        for unit in &prepared.units {
            match self.create_unit(unit, &advertiser, logger).await {
                Ok(()) => {}
                Err(Halt::Failed(failure)) => self.record(failure),
                Err(Halt::Interrupted) => {
                    self.record(CreationFailure::UserInterrupt);
                    break;
                }
            }
        }
    }

    async fn advertiser(&self) -> Result<Advertiser, CreationFailure> {
        let name = self.prepared.config.advertiser.name.clone();
        let found = self
            .guarded(self.client.find_advertiser(&name), || "advertiser".to_string())
            .await?;
        match found {
            Some(advertiser) if advertiser.active => Ok(advertiser),
            Some(_) => Err(CreationFailure::NotActive(format!("advertiser '{name}'"))),
            None => Err(CreationFailure::NotFound(format!("advertiser '{name}'"))),
        }
    }

    async fn create_unit(
        &mut self,
        unit: &PartitionUnit,
        advertiser: &Advertiser,
        logger: &StageLogger,
    ) -> Result<(), Halt> {
        let prepared = self.prepared;
        let request = NewOrder {
            name: prepared.order_name_for(unit),
            advertiser_id: advertiser.id,
            notes: prepared.config.order.notes.clone(),
        };
        let order = self
            .guarded(self.client.create_order(&request), || {
                format!("order for bidder '{}'", unit.code)
            })
            .await?;
        info!(bidder = %unit.code, order_id = order.id, name = %order.name, "Order created");
        let order_id = order.id;
        self.created.orders.push(order);

        let requests = prepared.creatives_for(unit, advertiser.id);
        let creatives = self
            .guarded(self.client.create_creatives(&requests), || {
                format!("creatives for bidder '{}'", unit.code)
            })
            .await?;
        let creative_ids: Vec<i64> = creatives.iter().map(|creative| creative.id).collect();
        self.created.creatives.extend(creatives);

        for &cpm in &prepared.cpm_names {
            let request = prepared.line_item_for(unit, order_id, cpm);
            let line_item = self
                .guarded(self.client.create_line_item(&request), || {
                    format!("line item {cpm} for bidder '{}'", unit.code)
                })
                .await?;
            logger.progress(format!("{}: {cpm}", unit.code));
            let line_item_id = line_item.id;
            self.created.line_items.push(line_item);

            let links: Vec<NewAssociation> = creative_ids
                .iter()
                .map(|&creative_id| NewAssociation {
                    line_item_id,
                    creative_id,
                })
                .collect();
            let associations = self
                .guarded(self.client.create_associations(&links), || {
                    format!("creative associations for line item {line_item_id}")
                })
                .await?;
            self.created.associations.extend(associations);
        }

        info!(
            bidder = %unit.code,
            line_items = prepared.cpm_names.len(),
            "Bidder complete"
        );
        Ok(())
    }

    /// Archive every order this run created. Not interruptible.
    async fn cleanup(&mut self) {
        let orders = self.created.orders.clone();
        for order in orders {
            match self.client.archive_order(order.id).await {
                Ok(()) => info!(order_id = order.id, name = %order.name, "Order archived"),
                Err(err) => self.record(CreationFailure::Cleanup(format!(
                    "archiving order {} '{}' failed: {err}",
                    order.id, order.name
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn stage_logger_reports_begin_and_end_to_callback() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let callback: StageProgressCallback = Arc::new(move |event: StageProgressEvent| {
            sink.lock().unwrap().push(event);
        });

        let mut logger = StageLogger::new(Some(callback));
        logger.begin(Stage::Validate);
        logger.progress("ix: 0.10");
        logger.end();
        logger.end();

        let events = events.lock().unwrap();
        let kinds: Vec<StageProgressEventKind> = events.iter().map(|event| event.kind).collect();
        assert_eq!(
            kinds,
            vec![
                StageProgressEventKind::Begin,
                StageProgressEventKind::Progress,
                StageProgressEventKind::End,
            ]
        );
        assert_eq!(events[0].stage.as_deref(), Some("Validate configuration"));
        assert!(events[0].stage_elapsed_ms.is_none());
        assert!(events[2].stage_elapsed_ms.is_some());
    }

    #[test]
    fn interrupts_halt_every_unit() {
        assert!(matches!(
            Halt::from(CreationFailure::UserInterrupt),
            Halt::Interrupted
        ));
        assert!(matches!(
            Halt::from(CreationFailure::NotFound("x".into())),
            Halt::Failed(_)
        ));
    }
}
