//! Read-only view of the order ledger.

use crate::config::LedgerConfig;
use crate::Error;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Completed,
    Confirmed,
    AutoReleased,
    Approved,
    Cancelled,
    Disputed,
    Refunded,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// Statuses that grant content access.
    pub const ALLOW_LIST: [OrderStatus; 4] = [
        OrderStatus::Completed,
        OrderStatus::Confirmed,
        OrderStatus::AutoReleased,
        OrderStatus::Approved,
    ];

    pub fn grants_access(self) -> bool {
        Self::ALLOW_LIST.contains(&self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub order_id: String,
    pub buyer_id: String,
    pub pack_id: String,
    pub status: OrderStatus,
    /// Unix seconds.
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_username: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct OrderQuery<'a> {
    pub buyer_id: &'a str,
    pub pack_id: &'a str,
    pub order_id: Option<&'a str>,
}

impl OrderQuery<'_> {
    pub fn matches(&self, record: &OrderRecord) -> bool {
        record.buyer_id == self.buyer_id
            && record.pack_id == self.pack_id
            && match self.order_id {
                Some(id) => record.order_id == id,
                None => true,
            }
    }
}

/// Order ledger seam. Implementations may over-return; callers re-filter.
#[async_trait]
pub trait OrderLedger: Send + Sync {
    async fn find_orders(&self, query: OrderQuery<'_>) -> Result<Vec<OrderRecord>, Error>;
}

/// REST client: `GET {url}/orders?buyerId=&packId=[&orderId=]` → `[OrderRecord]`.
pub struct HttpOrderLedger {
    http: reqwest::Client,
    orders_url: String,
    api_key: Option<String>,
}

impl HttpOrderLedger {
    pub fn from_config(config: &LedgerConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Config(format!("ledger HTTP client build failed: {e}")))?;
        let base = config.url.trim_end_matches('/');
        url::Url::parse(base).map_err(|e| Error::Config(format!("invalid ledger.url: {e}")))?;
        Ok(Self {
            http,
            orders_url: format!("{base}/orders"),
            api_key: Some(config.api_key.expose().to_string()).filter(|k| !k.is_empty()),
        })
    }
}

#[async_trait]
impl OrderLedger for HttpOrderLedger {
    async fn find_orders(&self, query: OrderQuery<'_>) -> Result<Vec<OrderRecord>, Error> {
        let mut params = vec![("buyerId", query.buyer_id), ("packId", query.pack_id)];
        if let Some(order_id) = query.order_id {
            params.push(("orderId", order_id));
        }

        let mut request = self.http.get(&self.orders_url).query(&params);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            warn!(error = %e, "Ledger request failed");
            Error::upstream("ledger_unavailable", e.to_string())
        })?;
        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "Ledger returned error status");
            return Err(Error::upstream(
                "ledger_unavailable",
                format!("ledger status {status}"),
            ));
        }
        response
            .json::<Vec<OrderRecord>>()
            .await
            .map_err(|e| Error::upstream("ledger_unavailable", format!("ledger body: {e}")))
    }
}

/// In-memory ledger (tests and local development).
#[derive(Default)]
pub struct InMemoryOrderLedger {
    orders: RwLock<Vec<OrderRecord>>,
}

impl InMemoryOrderLedger {
    pub fn new(orders: Vec<OrderRecord>) -> Self {
        Self {
            orders: RwLock::new(orders),
        }
    }

    /// Load a JSON array of orders.
    pub fn from_json_file(path: &str) -> Result<Self, Error> {
        let data = std::fs::read(path)
            .map_err(|e| Error::Config(format!("Failed to read orders file: {e}")))?;
        let orders: Vec<OrderRecord> = serde_json::from_slice(&data)
            .map_err(|e| Error::Config(format!("Failed to parse orders file: {e}")))?;
        Ok(Self::new(orders))
    }

    pub fn upsert(&self, record: OrderRecord) {
        let mut orders = self.orders.write().unwrap_or_else(|e| e.into_inner());
        match orders.iter_mut().find(|o| o.order_id == record.order_id) {
            Some(existing) => *existing = record,
            None => orders.push(record),
        }
    }

    pub fn set_status(&self, order_id: &str, status: OrderStatus) {
        let mut orders = self.orders.write().unwrap_or_else(|e| e.into_inner());
        if let Some(order) = orders.iter_mut().find(|o| o.order_id == order_id) {
            order.status = status;
        }
    }
}

#[async_trait]
impl OrderLedger for InMemoryOrderLedger {
    async fn find_orders(&self, query: OrderQuery<'_>) -> Result<Vec<OrderRecord>, Error> {
        let orders = self.orders.read().unwrap_or_else(|e| e.into_inner());
        Ok(orders.iter().filter(|o| query.matches(o)).cloned().collect())
    }
}
