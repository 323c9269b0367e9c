//! JSON-over-HTTPS adapter for platforms that expose a REST management API.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{
    AdPlatform, Advertiser, Association, Creative, Credentials, LineItem, NewAssociation,
    NewCreative, NewLineItem, NewOrder, Network, Order, PlatformConnector,
};
use crate::error::{AuthError, PlatformError};

const INACTIVE_MARKERS: &[&str] = &["INACTIVE", "not active", "NOT_ACTIVE"];

/// Contents of the private key file.
#[derive(Debug, Deserialize)]
struct KeyFile {
    access_token: String,
    #[serde(default)]
    endpoint: Option<String>,
}

/// Connects to a REST platform using the endpoint from application settings, unless the
/// key file names its own.
#[derive(Debug, Clone)]
pub struct RestConnector {
    endpoint: String,
}

impl RestConnector {
    pub fn new<T: Into<String>>(endpoint: T) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl PlatformConnector for RestConnector {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn AdPlatform>, AuthError> {
        let raw = tokio::fs::read_to_string(&credentials.key_file)
            .await
            .map_err(|source| AuthError::Unreadable {
                path: credentials.key_file.display().to_string(),
                source,
            })?;
        let key: KeyFile =
            serde_json::from_str(&raw).map_err(|err| AuthError::Malformed(err.to_string()))?;
        if key.access_token.trim().is_empty() {
            return Err(AuthError::Malformed("access_token is empty".to_string()));
        }

        let endpoint = key.endpoint.unwrap_or_else(|| self.endpoint.clone());
        let platform = RestPlatform::new(&endpoint, credentials.network_code, key.access_token)?;
        Ok(Arc::new(platform))
    }
}

pub struct RestPlatform {
    client: reqwest::Client,
    base: String,
    token: String,
}

impl RestPlatform {
    pub fn new(endpoint: &str, network_code: i64, token: String) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("line-item-manager/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| AuthError::Handle(err.to_string()))?;
        Ok(Self {
            client,
            base: format!("{}/networks/{network_code}", endpoint.trim_end_matches('/')),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            self.base.clone()
        } else {
            format!("{}/{path}", self.base)
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, PlatformError> {
        debug!(path, "GET");
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }

    async fn post<B: serde::Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, PlatformError> {
        debug!(path, "POST");
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        decode(response).await
    }
}

fn transport_error(err: reqwest::Error) -> PlatformError {
    PlatformError::Service(format!("HTTP error: {err}"))
}

/// Map a response onto the platform error categories the pipeline distinguishes.
pub(crate) fn classify(status: StatusCode, body: &str) -> PlatformError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };
    match status {
        StatusCode::NOT_FOUND => PlatformError::NotFound(detail),
        StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY
            if INACTIVE_MARKERS.iter().any(|marker| body.contains(marker)) =>
        {
            PlatformError::NotActive(detail)
        }
        _ => PlatformError::Service(detail),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, PlatformError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify(status, &body));
    }
    response
        .json()
        .await
        .map_err(|err| PlatformError::Service(format!("Unexpected response body: {err}")))
}

#[async_trait]
impl AdPlatform for RestPlatform {
    async fn current_network(&self) -> Result<Network, PlatformError> {
        self.get("", &[]).await
    }

    async fn find_advertiser(&self, name: &str) -> Result<Option<Advertiser>, PlatformError> {
        let matches: Vec<Advertiser> = self.get("advertisers", &[("name", name)]).await?;
        Ok(matches.into_iter().find(|advertiser| advertiser.name == name))
    }

    async fn create_order(&self, order: &NewOrder) -> Result<Order, PlatformError> {
        self.post("orders", order).await
    }

    async fn create_creatives(
        &self,
        creatives: &[NewCreative],
    ) -> Result<Vec<Creative>, PlatformError> {
        self.post("creatives", creatives).await
    }

    async fn create_line_item(&self, line_item: &NewLineItem) -> Result<LineItem, PlatformError> {
        self.post("line-items", line_item).await
    }

    async fn create_associations(
        &self,
        associations: &[NewAssociation],
    ) -> Result<Vec<Association>, PlatformError> {
        self.post("line-item-creative-associations", associations)
            .await
    }

    async fn archive_order(&self, order_id: i64) -> Result<(), PlatformError> {
        let _: serde_json::Value = self
            .post(&format!("orders/{order_id}:archive"), &serde_json::json!({}))
            .await?;
        Ok(())
    }
}
