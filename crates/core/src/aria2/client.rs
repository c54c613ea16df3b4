//! aria2 JSON-RPC client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use url::Url;

use super::Aria2Error;
use crate::model::Download;

/// Result of `aria2.tellStatus`. Numbers arrive as decimal strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatusInfo {
    /// Job identifier.
    pub gid: String,
    /// `active`, `waiting`, `paused`, `error`, `complete` or `removed`.
    pub status: String,
    /// Total bytes.
    pub total_length: String,
    /// Bytes downloaded.
    pub completed_length: String,
    /// Bytes uploaded.
    pub upload_length: String,
    /// Download speed in bytes per second.
    pub download_speed: String,
    /// Upload speed in bytes per second.
    pub upload_speed: String,
    /// Torrent info hash.
    pub info_hash: String,
    /// Connected seeders.
    pub num_seeders: String,
    /// Open connections.
    pub connections: String,
    /// Last error code.
    pub error_code: String,
    /// Last error message.
    pub error_message: String,
    /// Jobs spawned by this one, e.g. a magnet's torrent.
    pub followed_by: Vec<String>,
    /// Parent job.
    pub belongs_to: String,
    /// Download directory.
    pub dir: String,
    /// Files of the job.
    pub files: Vec<FileInfo>,
}

impl StatusInfo {
    /// Paths of the files selected for download.
    #[must_use]
    pub fn selected_paths(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| f.is_selected())
            .map(|f| f.path.clone())
            .collect()
    }
}

/// One file of a download job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileInfo {
    /// 1-based index.
    pub index: String,
    /// Local path.
    pub path: String,
    /// Size in bytes.
    pub length: String,
    /// Bytes downloaded.
    pub completed_length: String,
    /// `"true"` when selected.
    pub selected: String,
}

impl FileInfo {
    /// Whether the file will be downloaded.
    #[must_use]
    pub fn is_selected(&self) -> bool {
        self.selected == "true"
    }

    /// Declared size, 0 when unknown.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.length.parse().unwrap_or(0)
    }
}

/// Push notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Job the event is about.
    pub gid: String,
}

/// Download daemon contract.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Aria2Client: Send + Sync {
    /// Queues a download and returns its gid.
    async fn create_task(
        &self,
        download: &Download,
        options: &Map<String, Value>,
    ) -> Result<String, Aria2Error>;

    /// Current status of a download.
    async fn status(&self, download: &Download) -> Result<StatusInfo, Aria2Error>;

    /// Removes a download.
    async fn cancel(&self, download: &Download) -> Result<(), Aria2Error>;

    /// Restricts a torrent download to the given 1-based file indexes.
    async fn select(&self, download: &Download, files: &[i64]) -> Result<(), Aria2Error>;
}

/// Client used while offline download is not configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledClient;

#[async_trait]
impl Aria2Client for DisabledClient {
    async fn create_task(
        &self,
        _download: &Download,
        _options: &Map<String, Value>,
    ) -> Result<String, Aria2Error> {
        Err(Aria2Error::NotEnabled)
    }

    async fn status(&self, _download: &Download) -> Result<StatusInfo, Aria2Error> {
        Err(Aria2Error::NotEnabled)
    }

    async fn cancel(&self, _download: &Download) -> Result<(), Aria2Error> {
        Err(Aria2Error::NotEnabled)
    }

    async fn select(&self, _download: &Download, _files: &[i64]) -> Result<(), Aria2Error> {
        Err(Aria2Error::NotEnabled)
    }
}

#[derive(Debug, Deserialize)]
struct RpcFault {
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcFault>,
}

impl<T> RpcResponse<T> {
    fn into_result(self) -> Result<T, Aria2Error> {
        match (self.result, self.error) {
            (_, Some(fault)) => Err(Aria2Error::Rpc {
                code: fault.code,
                message: fault.message,
            }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(Aria2Error::Decode("response has neither result nor error".to_string())),
        }
    }
}

/// JSON-RPC 2.0 over HTTP.
pub struct RpcClient {
    client: Client,
    endpoint: Url,
    token: String,
    options: Map<String, Value>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Client for the daemon at `server`. The path is always `/jsonrpc`.
    /// `options` are added to every new download.
    pub fn new(
        server: &str,
        token: impl Into<String>,
        timeout: Duration,
        options: Map<String, Value>,
    ) -> Result<Self, Aria2Error> {
        let mut endpoint =
            Url::parse(server).map_err(|e| Aria2Error::Config(format!("invalid rpc url: {e}")))?;
        endpoint.set_path("/jsonrpc");
        let client = Client::builder()
            .build()
            .map_err(|e| Aria2Error::Config(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            token: token.into(),
            options,
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    /// RPC endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request(&self, method: &str, params: Vec<Value>) -> Value {
        let mut all = Vec::with_capacity(params.len() + 1);
        all.push(Value::String(format!("token:{}", self.token)));
        all.extend(params);
        json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed).to_string(),
            "method": method,
            "params": all,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, Aria2Error> {
        let body = self.request(method, params);
        let response: RpcResponse<T> = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        response.into_result()
    }
}

#[async_trait]
impl Aria2Client for RpcClient {
    async fn create_task(
        &self,
        download: &Download,
        options: &Map<String, Value>,
    ) -> Result<String, Aria2Error> {
        let mut merged = self.options.clone();
        merged.extend(options.iter().map(|(k, v)| (k.clone(), v.clone())));
        let gid: String = self
            .call("aria2.addUri", vec![json!([download.source]), Value::Object(merged)])
            .await?;
        if gid.is_empty() {
            return Err(Aria2Error::Decode("daemon returned an empty gid".to_string()));
        }
        Ok(gid)
    }

    async fn status(&self, download: &Download) -> Result<StatusInfo, Aria2Error> {
        self.call("aria2.tellStatus", vec![json!(download.gid)]).await
    }

    async fn cancel(&self, download: &Download) -> Result<(), Aria2Error> {
        let removed: Result<String, Aria2Error> =
            self.call("aria2.remove", vec![json!(download.gid)]).await;
        if let Err(e) = &removed {
            tracing::warn!(gid = %download.gid, error = %e, "failed to cancel download");
        }
        removed.map(|_| ())
    }

    async fn select(&self, download: &Download, files: &[i64]) -> Result<(), Aria2Error> {
        let selected = files
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let _: String = self
            .call(
                "aria2.changeOption",
                vec![json!(download.gid), json!({ "select-file": selected })],
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RpcClient {
        RpcClient::new("http://127.0.0.1:6800/rpc", "secret", Duration::from_secs(5), Map::new())
            .expect("client")
    }

    #[test]
    fn test_endpoint_path_is_forced() {
        assert_eq!(client().endpoint().as_str(), "http://127.0.0.1:6800/jsonrpc");
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let err = RpcClient::new("not a url", "", Duration::from_secs(1), Map::new()).unwrap_err();
        assert!(matches!(err, Aria2Error::Config(_)));
    }

    #[test]
    fn test_request_carries_token_first() {
        let client = client();
        let body = client.request("aria2.tellStatus", vec![json!("abc")]);
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["method"], "aria2.tellStatus");
        assert_eq!(body["params"], json!(["token:secret", "abc"]));

        let next = client.request("aria2.remove", Vec::new());
        assert_ne!(body["id"], next["id"]);
    }

    #[test]
    fn test_response_decoding() {
        let ok: RpcResponse<String> = serde_json::from_value(json!({"id": "1", "result": "gid1"})).expect("json");
        assert_eq!(ok.into_result().expect("result"), "gid1");

        let fault: RpcResponse<String> = serde_json::from_value(
            json!({"id": "1", "error": {"code": 1, "message": "GID not found"}}),
        )
        .expect("json");
        assert!(matches!(
            fault.into_result(),
            Err(Aria2Error::Rpc { code: 1, message }) if message == "GID not found"
        ));
    }

    #[test]
    fn test_status_decoding() {
        let status: StatusInfo = serde_json::from_value(json!({
            "gid": "2089b05ecca3d829",
            "status": "active",
            "totalLength": "34896138",
            "completedLength": "34896138",
            "downloadSpeed": "1024",
            "followedBy": ["abc"],
            "dir": "/tmp/aria2/1",
            "files": [
                {"index": "1", "path": "/tmp/aria2/1/a.iso", "length": "100", "selected": "true"},
                {"index": "2", "path": "/tmp/aria2/1/b.nfo", "length": "5", "selected": "false"}
            ]
        }))
        .expect("json");

        assert_eq!(status.followed_by, vec!["abc".to_string()]);
        assert_eq!(status.selected_paths(), vec!["/tmp/aria2/1/a.iso".to_string()]);
        assert_eq!(status.files[0].size(), 100);
    }

    #[tokio::test]
    async fn test_disabled_client_refuses_everything() {
        let download = crate::testing::fixtures::download(1, "gid");
        assert!(matches!(DisabledClient.status(&download).await, Err(Aria2Error::NotEnabled)));
        assert!(matches!(DisabledClient.cancel(&download).await, Err(Aria2Error::NotEnabled)));
    }
}
