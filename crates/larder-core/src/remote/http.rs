//! HTTP implementation of the remote store traits against a class-style
//! REST API (`/classes/Item`, `/classes/Backup`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{BackupMeta, BackupSnapshot, BackupTrigger, Item, ItemId, SnapshotId};
use crate::util::compact_text;

use super::{ItemPayload, RemoteBackups, RemoteError, RemoteItems};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const LIST_PAGE_SIZE: usize = 200;

/// Connection settings for the hosted item store
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Base URL, e.g. `https://api.example.com/1`
    pub endpoint: String,
    /// Application identifier sent as `X-App-Id`
    pub app_id: String,
    /// Session credential sent as `X-Api-Key`
    pub api_key: String,
    /// Elevated credential for the privileged delete fallback
    pub master_key: Option<String>,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("endpoint", &self.endpoint)
            .field("app_id", &self.app_id)
            .field("api_key", &"[REDACTED]")
            .field(
                "master_key",
                &self.master_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Remote store client over HTTP
pub struct HttpRemote {
    client: reqwest::Client,
    config: RemoteConfig,
}

impl HttpRemote {
    /// Build a client from the given configuration
    pub fn new(mut config: RemoteConfig) -> Result<Self> {
        config.endpoint = normalize_endpoint(&config.endpoint)?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{path}", self.config.endpoint))
            .header("X-App-Id", &self.config.app_id)
            .header("X-Api-Key", &self.config.api_key)
            .header("Accept", "application/json")
    }

    /// Look up a backup row by our snapshot id; the server key comes back
    /// with it so the caller can address the row directly
    async fn find_backup_row(&self, id: SnapshotId) -> std::result::Result<WireBackup, RemoteError> {
        let selector = format!("{{\"snapshotId\":\"{id}\"}}");
        let response = self
            .request(Method::GET, "classes/Backup")
            .query(&[("where", selector.as_str()), ("limit", "1")])
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        let page = response
            .json::<ListResponse<WireBackup>>()
            .await
            .map_err(|e| RemoteError::InvalidPayload(e.to_string()))?;
        page.results
            .into_iter()
            .next()
            .ok_or(RemoteError::NotFound)
    }
}

#[async_trait]
impl RemoteItems for HttpRemote {
    async fn list(&self) -> std::result::Result<Vec<Item>, RemoteError> {
        let mut items = Vec::new();
        let mut skip = 0usize;
        loop {
            let response = self
                .request(Method::GET, "classes/Item")
                .query(&[
                    ("order", "-createdAt".to_string()),
                    ("limit", LIST_PAGE_SIZE.to_string()),
                    ("skip", skip.to_string()),
                ])
                .send()
                .await
                .map_err(transport_error)?;
            let response = check_status(response).await?;
            let page = response
                .json::<ListResponse<WireItem>>()
                .await
                .map_err(|e| RemoteError::InvalidPayload(e.to_string()))?;
            let fetched = page.results.len();
            for row in page.results {
                match row.into_item() {
                    Ok(item) => items.push(item),
                    Err(e) => tracing::warn!("Skipping malformed remote item: {}", e),
                }
            }
            if fetched < LIST_PAGE_SIZE {
                break;
            }
            skip += fetched;
        }
        Ok(items)
    }

    async fn create(&self, payload: &ItemPayload) -> std::result::Result<ItemId, RemoteError> {
        let response = self
            .request(Method::POST, "classes/Item")
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        let created = response
            .json::<CreateResponse>()
            .await
            .map_err(|e| RemoteError::InvalidPayload(e.to_string()))?;
        created
            .object_id
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(|_| {
                RemoteError::InvalidPayload("create response did not include objectId".to_string())
            })
    }

    async fn update(&self, id: &ItemId, payload: &ItemPayload) -> std::result::Result<(), RemoteError> {
        let response = self
            .request(Method::PUT, &format!("classes/Item/{id}"))
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        Ok(())
    }

    async fn delete(&self, id: &ItemId) -> std::result::Result<(), RemoteError> {
        let response = self
            .request(Method::DELETE, &format!("classes/Item/{id}"))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        Ok(())
    }

    async fn delete_privileged(&self, id: &ItemId) -> std::result::Result<(), RemoteError> {
        let Some(master_key) = self.config.master_key.as_deref() else {
            return Err(RemoteError::PermissionDenied(
                "no master key configured".to_string(),
            ));
        };
        let response = self
            .request(Method::DELETE, &format!("classes/Item/{id}"))
            .header("X-Master-Key", master_key)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        Ok(())
    }

    async fn probe(&self) -> std::result::Result<(), RemoteError> {
        // Any HTTP response proves the remote is reachable; credential and
        // route problems surface per-operation instead.
        self.request(Method::GET, "health")
            .send()
            .await
            .map_err(transport_error)?;
        Ok(())
    }
}

#[async_trait]
impl RemoteBackups for HttpRemote {
    async fn list(&self) -> std::result::Result<Vec<BackupMeta>, RemoteError> {
        let response = self
            .request(Method::GET, "classes/Backup")
            .query(&[
                ("order", "-takenAt"),
                ("keys", "snapshotId,takenAt,trigger,itemCount"),
            ])
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response).await?;
        let page = response
            .json::<ListResponse<WireBackup>>()
            .await
            .map_err(|e| RemoteError::InvalidPayload(e.to_string()))?;
        Ok(page
            .results
            .into_iter()
            .filter_map(|row| match row.into_meta() {
                Ok(meta) => Some(meta),
                Err(e) => {
                    tracing::warn!("Skipping malformed remote backup: {}", e);
                    None
                }
            })
            .collect())
    }

    async fn upload(&self, snapshot: &BackupSnapshot) -> std::result::Result<(), RemoteError> {
        let response = self
            .request(Method::POST, "classes/Backup")
            .json(&WireBackup::from(snapshot))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        Ok(())
    }

    async fn fetch(&self, id: SnapshotId) -> std::result::Result<BackupSnapshot, RemoteError> {
        let row = self.find_backup_row(id).await?;
        row.into_snapshot()
            .map_err(|e| RemoteError::InvalidPayload(e.to_string()))
    }

    async fn delete(&self, id: SnapshotId) -> std::result::Result<(), RemoteError> {
        let row = self.find_backup_row(id).await?;
        let Some(object_id) = row.object_id.filter(|key| !key.is_empty()) else {
            return Err(RemoteError::InvalidPayload(
                "backup row did not include objectId".to_string(),
            ));
        };
        let response = self
            .request(Method::DELETE, &format!("classes/Backup/{object_id}"))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    object_id: Option<String>,
}

/// Item row as the remote stores it: our payload fields plus the three
/// server-managed system fields
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireItem {
    object_id: String,
    name: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default = "crate::models::default_quantity")]
    quantity: u32,
    #[serde(default)]
    expiry_date: Option<i64>,
    #[serde(default)]
    production_date: Option<i64>,
    #[serde(default)]
    medicine_tags: Vec<String>,
    created_at: i64,
    updated_at: i64,
}

impl WireItem {
    fn into_item(self) -> std::result::Result<Item, crate::models::ParseItemIdError> {
        Ok(Item {
            id: self.object_id.parse()?,
            name: self.name,
            category: self.category,
            brand: self.brand,
            location: self.location,
            notes: self.notes,
            quantity: self.quantity,
            expiry_date: self.expiry_date,
            production_date: self.production_date,
            medicine_tags: self.medicine_tags,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Backup row shape. Field names avoid the server-managed `id`/`createdAt`
/// keys, which class writes are not allowed to carry.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBackup {
    #[serde(default, skip_serializing)]
    object_id: Option<String>,
    snapshot_id: String,
    taken_at: i64,
    trigger: BackupTrigger,
    item_count: usize,
    #[serde(default)]
    items: Option<Vec<Item>>,
}

impl From<&BackupSnapshot> for WireBackup {
    fn from(snapshot: &BackupSnapshot) -> Self {
        Self {
            object_id: None,
            snapshot_id: snapshot.id.as_str(),
            taken_at: snapshot.created_at,
            trigger: snapshot.trigger,
            item_count: snapshot.items.len(),
            items: Some(snapshot.items.clone()),
        }
    }
}

impl WireBackup {
    fn into_meta(self) -> std::result::Result<BackupMeta, uuid::Error> {
        Ok(BackupMeta {
            id: self.snapshot_id.parse()?,
            created_at: self.taken_at,
            trigger: self.trigger,
            item_count: self.item_count,
        })
    }

    fn into_snapshot(self) -> std::result::Result<BackupSnapshot, uuid::Error> {
        let id: SnapshotId = self.snapshot_id.parse()?;
        Ok(BackupSnapshot {
            id,
            created_at: self.taken_at,
            trigger: self.trigger,
            items: self.items.unwrap_or_default(),
        })
    }
}

/// Map a reqwest transport failure; anything that kept us from getting a
/// response is retryable
fn transport_error(e: reqwest::Error) -> RemoteError {
    RemoteError::Unreachable(e.to_string())
}

/// Turn a non-success response into the matching error variant
async fn check_status(response: reqwest::Response) -> std::result::Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = parse_api_error(status, &body);
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::PermissionDenied(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound,
        _ if status.is_server_error() => RemoteError::Unreachable(message),
        _ => RemoteError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: &str) -> std::result::Result<String, RemoteError> {
    let endpoint = crate::util::normalize_text_option(Some(raw.to_string()))
        .ok_or_else(|| RemoteError::Config("remote endpoint must not be empty".to_string()))?;
    if crate::util::is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::Config(
            "remote endpoint must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::ItemDraft;

    #[test]
    fn test_normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint("").is_err());
        assert!(normalize_endpoint("api.example.com").is_err());
        assert_eq!(
            normalize_endpoint("https://api.example.com/1/").unwrap(),
            "https://api.example.com/1"
        );
    }

    #[test]
    fn test_remote_config_debug_redacts_keys() {
        let config = RemoteConfig {
            endpoint: "https://api.example.com".to_string(),
            app_id: "app".to_string(),
            api_key: "secret-key".to_string(),
            master_key: Some("master-secret".to_string()),
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-key"));
        assert!(!debug.contains("master-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_parse_api_error_prefers_json_message() {
        let status = StatusCode::UNPROCESSABLE_ENTITY;
        assert_eq!(
            parse_api_error(status, r#"{"error":"quantity must be a number"}"#),
            "quantity must be a number (422)"
        );
        assert_eq!(parse_api_error(status, ""), "HTTP 422");
        assert_eq!(parse_api_error(status, "plain text"), "plain text (422)");
    }

    #[test]
    fn test_wire_item_round_trip() {
        let json = r#"{
            "objectId": "srv1",
            "name": "Rice",
            "quantity": 2,
            "medicineTags": [],
            "createdAt": 100,
            "updatedAt": 200
        }"#;
        let wire: WireItem = serde_json::from_str(json).unwrap();
        let item = wire.into_item().unwrap();
        assert_eq!(item.id.as_str(), "srv1");
        assert_eq!(item.quantity, 2);
        assert_eq!(item.created_at, 100);
        assert_eq!(item.updated_at, 200);
    }

    #[test]
    fn test_wire_item_defaults_missing_quantity_to_one() {
        let json = r#"{"objectId": "srv1", "name": "Rice", "createdAt": 1, "updatedAt": 1}"#;
        let wire: WireItem = serde_json::from_str(json).unwrap();
        assert_eq!(wire.into_item().unwrap().quantity, 1);
    }

    #[test]
    fn test_wire_item_rejects_empty_object_id() {
        let json = r#"{"objectId": "", "name": "Rice", "createdAt": 1, "updatedAt": 1}"#;
        let wire: WireItem = serde_json::from_str(json).unwrap();
        assert!(wire.into_item().is_err());
    }

    #[test]
    fn test_wire_backup_upload_shape() {
        let snapshot = BackupSnapshot::new(
            BackupTrigger::Manual,
            vec![Item::new(ItemDraft::new("Rice"))],
        );
        let wire = WireBackup::from(&snapshot);
        let json = serde_json::to_value(&wire).unwrap();
        let keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        assert!(!keys.contains(&"id"));
        assert!(!keys.contains(&"createdAt"));
        assert!(!keys.contains(&"objectId"));
        assert_eq!(json["itemCount"], 1);
        assert_eq!(json["snapshotId"], snapshot.id.as_str());
    }
}
