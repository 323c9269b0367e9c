use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tracing::info;

use super::{
    AdPlatform, Advertiser, Association, Creative, LineItem, NewAssociation, NewCreative,
    NewLineItem, NewOrder, Network, Order,
};
use crate::error::PlatformError;

/// Passes reads through to the real platform and answers mutations with synthetic ids.
///
/// Synthetic ids are negative so they can never collide with real platform ids.
pub struct DryRunPlatform {
    inner: Arc<dyn AdPlatform>,
    next_id: AtomicI64,
}

impl DryRunPlatform {
    pub fn new(inner: Arc<dyn AdPlatform>) -> Self {
        Self {
            inner,
            next_id: AtomicI64::new(-1),
        }
    }

    fn allocate(&self) -> i64 {
        self.next_id.fetch_sub(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl AdPlatform for DryRunPlatform {
    async fn current_network(&self) -> Result<Network, PlatformError> {
        self.inner.current_network().await
    }

    async fn find_advertiser(&self, name: &str) -> Result<Option<Advertiser>, PlatformError> {
        self.inner.find_advertiser(name).await
    }

    async fn create_order(&self, order: &NewOrder) -> Result<Order, PlatformError> {
        info!(name = %order.name, advertiser_id = order.advertiser_id, "Dry run: would create order");
        Ok(Order {
            id: self.allocate(),
            name: order.name.clone(),
        })
    }

    async fn create_creatives(
        &self,
        creatives: &[NewCreative],
    ) -> Result<Vec<Creative>, PlatformError> {
        Ok(creatives
            .iter()
            .map(|creative| {
                info!(
                    name = %creative.name,
                    width = creative.size.width,
                    height = creative.size.height,
                    "Dry run: would create creative"
                );
                Creative {
                    id: self.allocate(),
                    name: creative.name.clone(),
                }
            })
            .collect())
    }

    async fn create_line_item(&self, line_item: &NewLineItem) -> Result<LineItem, PlatformError> {
        info!(
            name = %line_item.name,
            order_id = line_item.order_id,
            key = %line_item.targeting.key,
            value = %line_item.targeting.value,
            micros = line_item.cost_per_unit_micros,
            "Dry run: would create line item"
        );
        Ok(LineItem {
            id: self.allocate(),
            order_id: line_item.order_id,
            name: line_item.name.clone(),
        })
    }

    async fn create_associations(
        &self,
        associations: &[NewAssociation],
    ) -> Result<Vec<Association>, PlatformError> {
        info!(count = associations.len(), "Dry run: would associate creatives");
        Ok(associations
            .iter()
            .map(|assoc| Association {
                line_item_id: assoc.line_item_id,
                creative_id: assoc.creative_id,
            })
            .collect())
    }

    async fn archive_order(&self, order_id: i64) -> Result<(), PlatformError> {
        info!(order_id, "Dry run: would archive order");
        Ok(())
    }
}
