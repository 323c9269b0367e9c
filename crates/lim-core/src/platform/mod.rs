//! Seam to the external ad-serving platform.
//!
//! The core never depends on a wire format. Everything it needs from the platform goes
//! through [`AdPlatform`], and handles are obtained through a [`PlatformConnector`].

pub mod dry_run;
pub mod rest;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, PlatformError};
use crate::prepare::{CostType, Goal, LineItemType};
use crate::schedule::ScheduleWindow;

pub use dry_run::DryRunPlatform;
pub use rest::{RestConnector, RestPlatform};

/// Network the authenticated credentials belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub network_code: i64,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertiser {
    pub id: i64,
    pub name: String,
    #[serde(default = "Advertiser::default_active")]
    pub active: bool,
}

impl Advertiser {
    const fn default_active() -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewOrder {
    pub name: String,
    pub advertiser_id: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCreative {
    pub name: String,
    pub advertiser_id: i64,
    pub size: Size,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creative {
    pub id: i64,
    pub name: String,
}

/// Key-value targeting for one price point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceTargeting {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewLineItem {
    pub order_id: i64,
    pub name: String,
    pub item_type: LineItemType,
    pub priority: Option<u32>,
    pub cost_type: CostType,
    pub cost_per_unit_micros: i64,
    pub currency: String,
    pub schedule: ScheduleWindow,
    pub goal: Option<Goal>,
    pub targeting: PriceTargeting,
    pub creative_sizes: Vec<Size>,
    /// Rendered line item template, forwarded without interpretation.
    pub attributes: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: i64,
    pub order_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAssociation {
    pub line_item_id: i64,
    pub creative_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub line_item_id: i64,
    pub creative_id: i64,
}

/// Operations the creation pipeline performs against the platform.
///
/// Each call is attempted exactly once by the core; retries, if any, belong to the
/// implementation.
#[async_trait]
pub trait AdPlatform: Send + Sync {
    async fn current_network(&self) -> Result<Network, PlatformError>;

    async fn find_advertiser(&self, name: &str) -> Result<Option<Advertiser>, PlatformError>;

    async fn create_order(&self, order: &NewOrder) -> Result<Order, PlatformError>;

    async fn create_creatives(
        &self,
        creatives: &[NewCreative],
    ) -> Result<Vec<Creative>, PlatformError>;

    async fn create_line_item(&self, line_item: &NewLineItem) -> Result<LineItem, PlatformError>;

    async fn create_associations(
        &self,
        associations: &[NewAssociation],
    ) -> Result<Vec<Association>, PlatformError>;

    /// Archive an order together with its line items.
    async fn archive_order(&self, order_id: i64) -> Result<(), PlatformError>;
}

/// What a connector needs to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub network_code: i64,
    pub key_file: PathBuf,
}

/// Builds authenticated platform handles.
#[async_trait]
pub trait PlatformConnector: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn AdPlatform>, AuthError>;
}
