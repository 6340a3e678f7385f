//! HTTP remote store driver.
//!
//! Talks JSON to a REST backend:
//!
//! - `GET    /v1/{collection}?ownerId=..`      list an owner's records
//! - `POST   /v1/{collection}`                 create, returns `{ "id": .. }`
//! - `PUT    /v1/{collection}/{id}`            replace fields
//! - `DELETE /v1/{collection}/{id}`            delete (404 counts as done)
//! - `PATCH  /v1/{collection}/{id}/sync-state` acknowledge sync state

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::remote::{RemoteRecord, RemoteStore};
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::models::{
    Collection, DraftFields, IdeaFields, OwnerId, RawTimestamp, RecordFields, RemoteId, SyncState,
};

const REMOTE_HTTP_TIMEOUT_SECS: u64 = 30;

/// Remote store reached over HTTP.
#[derive(Clone)]
pub struct HttpRemoteStore {
    config: RemoteConfig,
    client: Client,
}

impl HttpRemoteStore {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REMOTE_HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|error| Error::remote(format!("failed to build HTTP client: {error}"), false))?;
        Ok(Self { config, client })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, self.config.endpoint(path))
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.config.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn list_request(&self, collection: Collection, owner: &OwnerId) -> RequestBuilder {
        self.request(Method::GET, &format!("v1/{collection}"))
            .query(&[("ownerId", owner.as_str())])
    }

    fn create_request(
        &self,
        collection: Collection,
        owner: &OwnerId,
        fields: &RecordFields,
    ) -> RequestBuilder {
        self.request(Method::POST, &format!("v1/{collection}"))
            .json(&WriteBody {
                owner_id: owner.as_str(),
                fields: WireFields::from(fields),
            })
    }

    fn update_request(
        &self,
        collection: Collection,
        owner: &OwnerId,
        remote_id: &RemoteId,
        fields: &RecordFields,
    ) -> RequestBuilder {
        self.request(Method::PUT, &record_path(collection, remote_id))
            .json(&WriteBody {
                owner_id: owner.as_str(),
                fields: WireFields::from(fields),
            })
    }

    fn delete_request(
        &self,
        collection: Collection,
        owner: &OwnerId,
        remote_id: &RemoteId,
    ) -> RequestBuilder {
        self.request(Method::DELETE, &record_path(collection, remote_id))
            .query(&[("ownerId", owner.as_str())])
    }

    fn sync_state_request(
        &self,
        collection: Collection,
        owner: &OwnerId,
        remote_id: &RemoteId,
        state: SyncState,
    ) -> RequestBuilder {
        self.request(
            Method::PATCH,
            &format!("{}/sync-state", record_path(collection, remote_id)),
        )
        .json(&SyncStateBody {
            owner_id: owner.as_str(),
            sync_state: state.as_str(),
        })
    }
}

impl RemoteStore for HttpRemoteStore {
    async fn create_remote(
        &self,
        collection: Collection,
        owner: &OwnerId,
        fields: &RecordFields,
    ) -> Result<RemoteId> {
        let response = send(self.create_request(collection, owner, fields)).await?;
        let created: CreatedResponse = response.json().await.map_err(transport_error)?;
        RemoteId::new(created.id)
            .map_err(|_| Error::remote("remote store returned an empty id", false))
    }

    async fn update_remote(
        &self,
        collection: Collection,
        owner: &OwnerId,
        remote_id: &RemoteId,
        fields: &RecordFields,
    ) -> Result<()> {
        send(self.update_request(collection, owner, remote_id, fields)).await?;
        Ok(())
    }

    async fn delete_remote(
        &self,
        collection: Collection,
        owner: &OwnerId,
        remote_id: &RemoteId,
    ) -> Result<()> {
        let response = self
            .delete_request(collection, owner, remote_id)
            .send()
            .await
            .map_err(transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("Remote {} {} already gone", collection.singular(), remote_id);
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }

    async fn list_remote(
        &self,
        collection: Collection,
        owner: &OwnerId,
    ) -> Result<Vec<RemoteRecord>> {
        let response = send(self.list_request(collection, owner)).await?;
        let body = response.text().await.map_err(transport_error)?;
        parse_list_response(collection, &body)
    }

    async fn update_remote_sync_state(
        &self,
        collection: Collection,
        owner: &OwnerId,
        remote_id: &RemoteId,
        state: SyncState,
    ) -> Result<()> {
        send(self.sync_state_request(collection, owner, remote_id, state)).await?;
        Ok(())
    }
}

async fn send(request: RequestBuilder) -> Result<Response> {
    let response = request.send().await.map_err(transport_error)?;
    check_status(response).await
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::remote(
        parse_api_error(status, &body),
        is_retryable_status(status),
    ))
}

fn transport_error(error: reqwest::Error) -> Error {
    // Connection failures and timeouts may succeed later; malformed bodies won't
    Error::remote(format!("HTTP request failed: {error}"), !error.is_decode())
}

/// Path of one remote record; the id is a single escaped segment
fn record_path(collection: Collection, remote_id: &RemoteId) -> String {
    format!("v1/{collection}/{}", urlencoding::encode(remote_id.as_str()))
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
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

    let trimmed: String = body.trim().chars().take(180).collect();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

/// Variant-specific wire fields, flattened into request bodies
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireFields<'a> {
    Idea(&'a IdeaFields),
    Draft(&'a DraftFields),
}

impl<'a> From<&'a RecordFields> for WireFields<'a> {
    fn from(fields: &'a RecordFields) -> Self {
        match fields {
            RecordFields::Idea(idea) => Self::Idea(idea),
            RecordFields::Draft(draft) => Self::Draft(draft),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteBody<'a> {
    owner_id: &'a str,
    #[serde(flatten)]
    fields: WireFields<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncStateBody<'a> {
    owner_id: &'a str,
    sync_state: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    #[serde(alias = "remoteId", alias = "cloudId")]
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRecord {
    #[serde(alias = "id", alias = "cloudId")]
    remote_id: String,
    created_at: RawTimestamp,
    #[serde(default)]
    updated_at: Option<RawTimestamp>,
    #[serde(flatten)]
    fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListResponse {
    Wrapped { records: Vec<WireRecord> },
    Bare(Vec<WireRecord>),
}

fn parse_list_response(collection: Collection, body: &str) -> Result<Vec<RemoteRecord>> {
    let records = match serde_json::from_str::<ListResponse>(body)
        .map_err(|error| Error::remote(format!("invalid {collection} payload: {error}"), false))?
    {
        ListResponse::Wrapped { records } | ListResponse::Bare(records) => records,
    };

    records
        .into_iter()
        .map(|wire| {
            let remote_id = RemoteId::new(wire.remote_id).map_err(|_| {
                Error::remote(format!("{collection} payload has a record without id"), false)
            })?;
            let fields = serde_json::Value::Object(wire.fields);
            let fields = match collection {
                Collection::Ideas => RecordFields::Idea(serde_json::from_value(fields)?),
                Collection::Drafts => RecordFields::Draft(serde_json::from_value(fields)?),
            };
            Ok(RemoteRecord {
                remote_id,
                created_at: wire.created_at,
                updated_at: wire.updated_at,
                fields,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> HttpRemoteStore {
        let config =
            RemoteConfig::new("https://api.example.com/", Some("test-token".into())).unwrap();
        HttpRemoteStore::new(config).unwrap()
    }

    fn owner() -> OwnerId {
        OwnerId::new("user-1").unwrap()
    }

    #[test]
    fn list_request_shape_is_correct() {
        let request = store()
            .list_request(Collection::Ideas, &owner())
            .build()
            .unwrap();

        assert_eq!(request.method(), Method::GET);
        assert_eq!(
            request.url().as_str(),
            "https://api.example.com/v1/ideas?ownerId=user-1"
        );
        let auth = request
            .headers()
            .get(reqwest::header::AUTHORIZATION)
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(auth, "Bearer test-token");
    }

    #[test]
    fn create_request_flattens_fields() {
        let fields = RecordFields::Idea(IdeaFields {
            teaching_angle: "angle".into(),
            ..IdeaFields::titled("Title")
        });
        let request = store()
            .create_request(Collection::Ideas, &owner(), &fields)
            .build()
            .unwrap();

        assert_eq!(request.method(), Method::POST);
        let body: serde_json::Value =
            serde_json::from_slice(request.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["ownerId"], "user-1");
        assert_eq!(body["title"], "Title");
        assert_eq!(body["teachingAngle"], "angle");
    }

    #[test]
    fn sync_state_request_targets_record() {
        let remote_id = RemoteId::new("abc").unwrap();
        let request = store()
            .sync_state_request(Collection::Drafts, &owner(), &remote_id, SyncState::Synced)
            .build()
            .unwrap();

        assert_eq!(request.method(), Method::PATCH);
        assert_eq!(
            request.url().as_str(),
            "https://api.example.com/v1/drafts/abc/sync-state"
        );
    }

    #[test]
    fn remote_ids_are_escaped_in_paths() {
        let remote_id = RemoteId::new("a/b?c#d").unwrap();
        let request = store()
            .delete_request(Collection::Ideas, &owner(), &remote_id)
            .build()
            .unwrap();

        assert_eq!(
            request.url().as_str(),
            "https://api.example.com/v1/ideas/a%2Fb%3Fc%23d?ownerId=user-1"
        );
    }

    #[test]
    fn list_payload_accepts_every_timestamp_shape() {
        let body = r#"{"records": [
            {"id": "r1", "createdAt": 5, "title": "a"},
            {"cloudId": "r2", "createdAt": {"seconds": 1, "nanoseconds": 0},
             "updatedAt": "1970-01-01T00:00:02Z", "title": "b", "hook": "h"}
        ]}"#;
        let records = parse_list_response(Collection::Ideas, body).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].effective_updated_at(), 5);
        assert_eq!(records[1].remote_id.as_str(), "r2");
        assert_eq!(records[1].effective_updated_at(), 2000);
        assert_eq!(
            records[1].fields,
            RecordFields::Idea(IdeaFields {
                hook: "h".into(),
                ..IdeaFields::titled("b")
            })
        );
    }

    #[test]
    fn bare_draft_list_is_accepted() {
        let body = r#"[{"remoteId": "d1", "createdAt": 1, "content": "body"}]"#;
        let records = parse_list_response(Collection::Drafts, body).unwrap();
        assert_eq!(
            records[0].fields,
            RecordFields::Draft(DraftFields::new("body"))
        );
    }

    #[test]
    fn api_error_prefers_message_field() {
        let message = parse_api_error(StatusCode::FORBIDDEN, r#"{"error":"quota exceeded"}"#);
        assert_eq!(message, "quota exceeded (403)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, ""), "HTTP 502");
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }
}
