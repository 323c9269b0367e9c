#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lim_core::error::{AuthError, PlatformError};
use lim_core::platform::{
    AdPlatform, Advertiser, Association, Creative, Credentials, LineItem, NewAssociation,
    NewCreative, NewLineItem, NewOrder, Network, Order, PlatformConnector,
};
use tokio_util::sync::CancellationToken;

pub const BASE_CONFIG: &str = r#"
publisher:
  network_code: 1234
  network_name: "Test Network"
advertiser:
  name: "Prebid"
order:
  name: "Prebid-{{ bidder_name }}"
line_item:
  name: "{{ bidder_code }}: HB ${{ cpm }}"
  item_type: price_priority
  priority: 12
creative:
  name: "{{ bidder_name }} creative"
  sizes:
    - {width: 300, height: 250}
rate:
  granularity:
    type: custom
    custom:
      - {min: 0.5, max: 1.5, increment: 0.5}
"#;

pub fn write_config(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write config fixture");
    path
}

/// Every call the pipeline made, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CurrentNetwork,
    FindAdvertiser(String),
    CreateOrder(String),
    CreateCreatives(usize),
    CreateLineItem(String),
    CreateAssociations(usize),
    ArchiveOrder(i64),
}

/// Failures and side effects to inject.
#[derive(Default)]
pub struct Script {
    pub network_name: String,
    pub network_error: Option<PlatformError>,
    pub advertiser: Option<Advertiser>,
    pub fail_order_named: Option<(String, PlatformError)>,
    pub fail_line_item_call: Option<(usize, PlatformError)>,
    pub fail_archive: Option<PlatformError>,
    pub cancel_after_line_items: Option<(usize, CancellationToken)>,
}

impl Script {
    pub fn healthy() -> Self {
        Self {
            network_name: "Test Network".to_string(),
            advertiser: Some(Advertiser {
                id: 77,
                name: "Prebid".to_string(),
                active: true,
            }),
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    line_items: Vec<NewLineItem>,
    next_id: i64,
    line_item_calls: usize,
}

pub struct FakePlatform {
    script: Script,
    state: Mutex<State>,
}

impl FakePlatform {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            state: Mutex::new(State {
                next_id: 1000,
                ..State::default()
            }),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn line_item_requests(&self) -> Vec<NewLineItem> {
        self.state.lock().unwrap().line_items.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, Call::CurrentNetwork | Call::FindAdvertiser(_)))
            .collect()
    }

    fn record(&self, call: Call) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state.next_id += 1;
        state.next_id
    }
}

#[async_trait]
impl AdPlatform for FakePlatform {
    async fn current_network(&self) -> Result<Network, PlatformError> {
        self.record(Call::CurrentNetwork);
        if let Some(err) = &self.script.network_error {
            return Err(err.clone());
        }
        Ok(Network {
            network_code: 1234,
            display_name: self.script.network_name.clone(),
        })
    }

    async fn find_advertiser(&self, name: &str) -> Result<Option<Advertiser>, PlatformError> {
        self.record(Call::FindAdvertiser(name.to_string()));
        Ok(self.script.advertiser.clone())
    }

    async fn create_order(&self, order: &NewOrder) -> Result<Order, PlatformError> {
        let id = self.record(Call::CreateOrder(order.name.clone()));
        if let Some((fragment, err)) = &self.script.fail_order_named {
            if order.name.contains(fragment.as_str()) {
                return Err(err.clone());
            }
        }
        Ok(Order {
            id,
            name: order.name.clone(),
        })
    }

    async fn create_creatives(
        &self,
        creatives: &[NewCreative],
    ) -> Result<Vec<Creative>, PlatformError> {
        self.record(Call::CreateCreatives(creatives.len()));
        let mut created = Vec::new();
        for creative in creatives {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            created.push(Creative {
                id: state.next_id,
                name: creative.name.clone(),
            });
        }
        Ok(created)
    }

    async fn create_line_item(&self, line_item: &NewLineItem) -> Result<LineItem, PlatformError> {
        let id = self.record(Call::CreateLineItem(line_item.name.clone()));
        let index = {
            let mut state = self.state.lock().unwrap();
            state.line_items.push(line_item.clone());
            state.line_item_calls += 1;
            state.line_item_calls - 1
        };
        if let Some((at, err)) = &self.script.fail_line_item_call {
            if *at == index {
                return Err(err.clone());
            }
        }
        if let Some((after, token)) = &self.script.cancel_after_line_items {
            if index + 1 == *after {
                token.cancel();
            }
        }
        Ok(LineItem {
            id,
            order_id: line_item.order_id,
            name: line_item.name.clone(),
        })
    }

    async fn create_associations(
        &self,
        associations: &[NewAssociation],
    ) -> Result<Vec<Association>, PlatformError> {
        self.record(Call::CreateAssociations(associations.len()));
        Ok(associations
            .iter()
            .map(|assoc| Association {
                line_item_id: assoc.line_item_id,
                creative_id: assoc.creative_id,
            })
            .collect())
    }

    async fn archive_order(&self, order_id: i64) -> Result<(), PlatformError> {
        self.record(Call::ArchiveOrder(order_id));
        match &self.script.fail_archive {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Hands out the same fake platform and counts how often it was asked to.
pub struct FakeConnector {
    pub platform: Arc<FakePlatform>,
    connects: AtomicUsize,
    seen: Mutex<Vec<Credentials>>,
    fail: bool,
}

impl FakeConnector {
    pub fn new(platform: Arc<FakePlatform>) -> Self {
        Self {
            platform,
            connects: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing(platform: Arc<FakePlatform>) -> Self {
        Self {
            fail: true,
            ..Self::new(platform)
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn credentials_seen(&self) -> Vec<Credentials> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformConnector for FakeConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn AdPlatform>, AuthError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(credentials.clone());
        if self.fail {
            return Err(AuthError::Malformed("no access_token".to_string()));
        }
        let platform: Arc<dyn AdPlatform> = self.platform.clone();
        Ok(platform)
    }
}
