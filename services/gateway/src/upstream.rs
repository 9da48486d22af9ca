//! HTTP adapters for the external content store and ledger relay
//!
//! Content store: a pinning service. Blobs are read through the public
//! gateway template and written/listed through the pinning API
//! (`/pinning/pinJSONToIPFS`, `/data/pinList`) with tags carried as
//! metadata key-values.
//!
//! Ledger: a relay in front of the auction contract.
//! - `GET  /auctions/{id}`        contract state, 404 when none exists
//! - `POST /auctions/{id}/bids`   `{ bidder, amount }` → `{ tx }`
//! - `GET  /receipts/{tx}`        200 final, 202 pending, 409 reverted
//!
//! Status mapping: 5xx, 429 and connection failures are transient; other
//! 4xx are permanent.

use std::time::Duration;

use async_trait::async_trait;
use auction_engine::metadata;
use auction_engine::ledger::{Ledger, LedgerDetails, LedgerError, Receipt, TxReference};
use auction_engine::store::{ContentId, ContentStore, StoreError, StoredEntry, TagFilter, Tags};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use types::ids::{Address, AuctionId};
use types::numeric::Amount;

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

pub struct HttpContentStore {
    client: Client,
    api_url: String,
    gateway_template: String,
    api_key: Option<String>,
    api_secret: Option<String>,
}

impl HttpContentStore {
    pub fn new(
        client: Client,
        api_url: impl Into<String>,
        gateway_template: impl Into<String>,
        api_key: Option<String>,
        api_secret: Option<String>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            gateway_template: gateway_template.into(),
            api_key,
            api_secret,
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request;
        if let Some(key) = &self.api_key {
            request = request.header("pinata_api_key", key);
        }
        if let Some(secret) = &self.api_secret {
            request = request.header("pinata_secret_api_key", secret);
        }
        request
    }

    fn classify(status: StatusCode, context: &str) -> StoreError {
        if is_transient(status) {
            StoreError::Transient(format!("{}: HTTP {}", context, status))
        } else {
            StoreError::Permanent(format!("{}: HTTP {}", context, status))
        }
    }
}

#[derive(Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

#[derive(Deserialize)]
struct PinList {
    rows: Vec<PinRow>,
}

#[derive(Deserialize)]
struct PinRow {
    ipfs_pin_hash: String,
    #[serde(default)]
    metadata: PinMetadata,
}

#[derive(Deserialize, Default)]
struct PinMetadata {
    #[serde(default)]
    keyvalues: Option<Map<String, Value>>,
}

impl PinRow {
    fn into_entry(self) -> StoredEntry {
        let tags: Tags = self
            .metadata
            .keyvalues
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(key, value)| match value {
                Value::String(s) => Some((key, s)),
                Value::Null => None,
                other => Some((key, other.to_string())),
            })
            .collect();
        StoredEntry {
            id: self.ipfs_pin_hash,
            tags,
        }
    }
}

/// `metadata[keyvalues]` query value: every tag as an `eq` condition.
fn keyvalues_query(filter: &TagFilter) -> String {
    let conditions: Map<String, Value> = filter
        .pairs()
        .map(|(key, value)| (key.clone(), json!({ "value": value, "op": "eq" })))
        .collect();
    Value::Object(conditions).to_string()
}

#[async_trait]
impl ContentStore for HttpContentStore {
    async fn get(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.gateway_template.replace("{cid}", id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Transient(format!("fetch {}: {}", id, e)))?;

        match response.status() {
            status if status.is_success() => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| StoreError::Transient(format!("read {}: {}", id, e)))?;
                Ok(bytes.to_vec())
            }
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(id.to_string())),
            status => Err(Self::classify(status, &format!("fetch {}", id))),
        }
    }

    async fn put(&self, blob: Vec<u8>, tags: Tags) -> Result<ContentId, StoreError> {
        let content: Value = serde_json::from_slice(&blob)
            .map_err(|e| StoreError::Permanent(format!("blob is not JSON: {}", e)))?;
        let name = tags.get(metadata::TAG_TYPE).cloned().unwrap_or_else(|| "blob".to_string());
        let body = json!({
            "pinataContent": content,
            "pinataMetadata": { "name": name, "keyvalues": tags },
        });

        let response = self
            .authorized(
                self.client
                    .post(format!("{}/pinning/pinJSONToIPFS", self.api_url))
                    .json(&body),
            )
            .send()
            .await
            .map_err(|e| StoreError::Transient(format!("pin: {}", e)))?;
        if !response.status().is_success() {
            return Err(Self::classify(response.status(), "pin"));
        }

        let pinned: PinResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Permanent(format!("pin response: {}", e)))?;
        debug!(content_id = %pinned.ipfs_hash, "Pinned blob");
        Ok(pinned.ipfs_hash)
    }

    async fn list(&self, filter: &TagFilter) -> Result<Vec<StoredEntry>, StoreError> {
        let url = Url::parse_with_params(
            &format!("{}/data/pinList", self.api_url),
            &[
                ("status", "pinned".to_string()),
                ("pageLimit", "1000".to_string()),
                ("metadata[keyvalues]", keyvalues_query(filter)),
            ],
        )
        .map_err(|e| StoreError::Permanent(format!("list url: {}", e)))?;
        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| StoreError::Transient(format!("list: {}", e)))?;
        if !response.status().is_success() {
            return Err(Self::classify(response.status(), "list"));
        }

        let list: PinList = response
            .json()
            .await
            .map_err(|e| StoreError::Permanent(format!("list response: {}", e)))?;
        Ok(list
            .rows
            .into_iter()
            .map(PinRow::into_entry)
            // The pinning service matches loosely; keep AND-equality exact.
            .filter(|entry| filter.matches(&entry.tags))
            .collect())
    }
}

pub struct HttpLedger {
    client: Client,
    base_url: String,
    receipt_poll: Duration,
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    bidder: &'a Address,
    amount: Amount,
}

#[derive(Deserialize)]
struct SubmitResponse {
    tx: TxReference,
}

impl HttpLedger {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            receipt_poll: Duration::from_secs(1),
        }
    }

    async fn error_from(response: Response, context: &str) -> LedgerError {
        let status = response.status();
        let detail = response.text().await.unwrap_or_default();
        let message = format!("{}: HTTP {} {}", context, status, detail.trim());
        if is_transient(status) {
            LedgerError::Transient(message)
        } else if status == StatusCode::CONFLICT {
            LedgerError::Reverted(message)
        } else {
            LedgerError::Permanent(message)
        }
    }
}

fn unreachable(context: &str, e: reqwest::Error) -> LedgerError {
    LedgerError::Transient(format!("{}: {}", context, e))
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn read_auction_details(
        &self,
        auction_id: &AuctionId,
    ) -> Result<Option<LedgerDetails>, LedgerError> {
        let response = self
            .client
            .get(format!("{}/auctions/{}", self.base_url, auction_id))
            .send()
            .await
            .map_err(|e| unreachable("read", e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<LedgerDetails>()
                .await
                .map(Some)
                .map_err(|e| LedgerError::Permanent(format!("read response: {}", e))),
            _ => Err(Self::error_from(response, "read").await),
        }
    }

    async fn submit_bid(
        &self,
        auction_id: &AuctionId,
        bidder: &Address,
        amount: Amount,
    ) -> Result<TxReference, LedgerError> {
        let response = self
            .client
            .post(format!("{}/auctions/{}/bids", self.base_url, auction_id))
            .json(&SubmitBody { bidder, amount })
            .send()
            .await
            .map_err(|e| unreachable("submit", e))?;
        if !response.status().is_success() {
            return Err(Self::error_from(response, "submit").await);
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Permanent(format!("submit response: {}", e)))?;
        debug!(auction_id = %auction_id, tx = %submitted.tx.0, "Bid submitted to ledger");
        Ok(submitted.tx)
    }

    async fn await_receipt(&self, tx: &TxReference) -> Result<Receipt, LedgerError> {
        loop {
            let response = self
                .client
                .get(format!("{}/receipts/{}", self.base_url, tx.0))
                .send()
                .await
                .map_err(|e| unreachable("receipt", e))?;

            match response.status() {
                StatusCode::ACCEPTED => {
                    tokio::time::sleep(self.receipt_poll).await;
                }
                status if status.is_success() => {
                    return response
                        .json::<Receipt>()
                        .await
                        .map_err(|e| LedgerError::Permanent(format!("receipt response: {}", e)));
                }
                status => {
                    warn!(tx = %tx.0, status = %status, "Receipt lookup failed");
                    return Err(Self::error_from(response, "receipt").await);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyvalues_query_shape() {
        let filter = TagFilter::new()
            .with_tag("type", "auction-metadata")
            .with_tag("category", "Art");
        let value: Value = serde_json::from_str(&keyvalues_query(&filter)).unwrap();
        assert_eq!(value["type"], json!({ "value": "auction-metadata", "op": "eq" }));
        assert_eq!(value["category"]["value"], "Art");
    }

    #[test]
    fn test_pin_row_tags() {
        let row: PinRow = serde_json::from_value(json!({
            "ipfs_pin_hash": "QmRow",
            "metadata": { "keyvalues": { "type": "bid", "amount": 110, "note": null } }
        }))
        .unwrap();
        let entry = row.into_entry();
        assert_eq!(entry.id, "QmRow");
        assert_eq!(entry.tags.get("type").map(String::as_str), Some("bid"));
        assert_eq!(entry.tags.get("amount").map(String::as_str), Some("110"));
        assert!(!entry.tags.contains_key("note"));
    }

    #[test]
    fn test_status_classification() {
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_transient(StatusCode::BAD_REQUEST));
    }
}
