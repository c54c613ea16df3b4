//! Remote peer handler.
//!
//! Talks to a peer server's `/api/v3/slave/*` endpoints. Every request is
//! signed with the policy's secret key.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::io::ReaderStream;
use url::Url;

use super::{
    ByteStream, ContentResponse, DeleteError, DriverContext, DriverError, Handler, ObjectInfo,
    ObjectMeta, PutOptions, SourceOptions, UploadCredential,
};
use crate::auth::HmacSigner;
use crate::model::Policy;

const UPLOAD_PATH: &str = "/api/v3/slave/upload";

/// Upload policy understood by peers, carried base64-encoded in `X-Policy`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadPolicy {
    /// Directory on the peer.
    pub save_path: String,
    /// File name on the peer.
    pub file_name: String,
    /// Whether the peer may rename.
    pub auto_rename: bool,
    /// Size limit in bytes.
    pub max_size: u64,
    /// Allowed extensions.
    #[serde(default)]
    pub allowed_extension: Vec<String>,
    /// Where the peer reports completion.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub callback_url: String,
}

impl UploadPolicy {
    fn encode(&self) -> Result<String, DriverError> {
        let json = serde_json::to_vec(self).map_err(|e| DriverError::io(e.to_string()))?;
        Ok(STANDARD.encode(json))
    }
}

#[derive(Debug, Deserialize)]
struct PeerResponse {
    code: i32,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: String,
}

impl PeerResponse {
    fn into_result(self) -> Result<Value, DriverError> {
        if self.code == 0 {
            Ok(self.data)
        } else {
            let detail = if self.error.is_empty() {
                self.msg
            } else {
                self.error
            };
            Err(DriverError::remote(format!("code {}: {detail}", self.code)))
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DeleteRequest {
    files: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ListRequest<'a> {
    path: &'a str,
    recursive: bool,
}

/// Stores objects on a peer server.
pub struct RemoteHandler {
    policy: Policy,
    server: Url,
    signer: HmacSigner,
    client: Client,
    ctx: DriverContext,
}

impl RemoteHandler {
    /// Creates a handler for `policy.server`.
    pub fn new(policy: Policy, ctx: DriverContext) -> Result<Self, DriverError> {
        let server = Url::parse(&policy.server)
            .map_err(|e| DriverError::config(format!("invalid peer address: {e}")))?;
        let client = Client::builder()
            .timeout(ctx.slave_api_timeout)
            .build()
            .map_err(|e| DriverError::config(e.to_string()))?;
        let signer = HmacSigner::new(&policy.secret_key);
        Ok(Self {
            policy,
            server,
            signer,
            client,
            ctx,
        })
    }

    fn api_url(&self, route: &str) -> Result<Url, DriverError> {
        self.server
            .join(route)
            .map_err(|e| DriverError::config(e.to_string()))
    }

    fn sign_ttl(&self) -> i64 {
        i64::try_from(self.ctx.slave_api_timeout.as_secs()).unwrap_or(60)
    }

    async fn signed_post(&self, route: &str, body: String) -> Result<Value, DriverError> {
        let auth = self.signer.sign_request(route, None, &body, self.sign_ttl());
        let resp = self
            .client
            .post(self.api_url(route)?)
            .header("Authorization", auth)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;
        decode(resp).await?.into_result()
    }

    fn credential(&self, policy: &UploadPolicy, ttl: i64) -> Result<UploadCredential, DriverError> {
        let encoded = policy.encode()?;
        let token = self.signer.sign_request(UPLOAD_PATH, Some(&encoded), "", ttl);
        Ok(UploadCredential {
            token,
            policy: encoded,
            ..UploadCredential::default()
        })
    }

    fn signed_file_url(
        &self,
        controller: &str,
        path: &str,
        name: &str,
        ttl: i64,
        speed: i64,
    ) -> Result<String, DriverError> {
        let base = if self.policy.base_url.is_empty() {
            self.server.clone()
        } else {
            Url::parse(&self.policy.base_url).map_err(|e| DriverError::config(e.to_string()))?
        };
        let encoded = URL_SAFE_NO_PAD.encode(path);
        let route = format!("{controller}/{speed}/{encoded}/{name}");
        let url = base
            .join(&route)
            .map_err(|e| DriverError::config(e.to_string()))?;
        self.signer
            .sign_uri(url.as_str(), ttl)
            .map_err(|e| DriverError::config(e.to_string()))
    }
}

async fn decode(resp: reqwest::Response) -> Result<PeerResponse, DriverError> {
    if resp.status() != StatusCode::OK {
        return Err(DriverError::remote(format!(
            "unexpected status {}",
            resp.status()
        )));
    }
    resp.json::<PeerResponse>()
        .await
        .map_err(|e| DriverError::remote(format!("malformed response: {e}")))
}

fn split_dst(dst: &str) -> (String, String) {
    match dst.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((dir, name)) => (dir.to_string(), name.to_string()),
        None => (".".to_string(), dst.to_string()),
    }
}

#[async_trait]
impl Handler for RemoteHandler {
    async fn put(
        &self,
        stream: ByteStream,
        dst: &str,
        size: u64,
        opts: PutOptions,
    ) -> Result<(), DriverError> {
        let (save_path, file_name) = split_dst(dst);
        let credential = self.credential(
            &UploadPolicy {
                save_path,
                file_name: file_name.clone(),
                auto_rename: false,
                max_size: size,
                ..UploadPolicy::default()
            },
            self.ctx.upload_credential_timeout,
        )?;

        let body = reqwest::Body::wrap_stream(ReaderStream::new(stream));
        let resp = self
            .client
            .post(self.api_url(UPLOAD_PATH)?)
            .header("Authorization", credential.token)
            .header("X-Policy", credential.policy)
            .header(
                "X-FileName",
                url::form_urlencoded::byte_serialize(file_name.as_bytes()).collect::<String>(),
            )
            .header(
                "X-Overwrite",
                if opts.disable_overwrite { "false" } else { "true" },
            )
            .header("Content-Length", size)
            .body(body)
            .send()
            .await?;
        decode(resp).await?.into_result().map(|_| ())
    }

    async fn delete(&self, paths: &[String]) -> Result<(), DeleteError> {
        let body = serde_json::to_string(&DeleteRequest {
            files: paths.to_vec(),
        })
        .map_err(|e| DeleteError {
            failed: paths.to_vec(),
            source: DriverError::io(e.to_string()),
        })?;

        let auth = self
            .signer
            .sign_request("/api/v3/slave/delete", None, &body, self.sign_ttl());
        let url = self.api_url("/api/v3/slave/delete").map_err(|source| DeleteError {
            failed: paths.to_vec(),
            source,
        })?;
        let result = async {
            let resp = self
                .client
                .post(url)
                .header("Authorization", auth)
                .header("Content-Type", "application/json")
                .body(body)
                .send()
                .await?;
            decode(resp).await
        }
        .await;

        let resp = result.map_err(|source| DeleteError {
            failed: paths.to_vec(),
            source,
        })?;
        if resp.code == 0 {
            return Ok(());
        }

        let failed = resp
            .data
            .as_str()
            .and_then(|raw| serde_json::from_str::<DeleteRequest>(raw).ok())
            .map_or_else(|| paths.to_vec(), |r| r.files);
        Err(DeleteError {
            failed,
            source: DriverError::remote(resp.error),
        })
    }

    async fn get(&self, path: &str) -> Result<ByteStream, DriverError> {
        let url = self.signed_file_url("/api/v3/slave/download", path, "file", 0, 0)?;
        let resp = self.client.get(url).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(DriverError::remote(format!(
                "unexpected status {}",
                resp.status()
            )));
        }
        let stream = futures::TryStreamExt::map_err(resp.bytes_stream(), std::io::Error::other);
        Ok(Box::pin(tokio_util::io::StreamReader::new(stream)))
    }

    async fn thumb(&self, path: &str) -> Result<ContentResponse, DriverError> {
        let encoded = URL_SAFE_NO_PAD.encode(path);
        let url = self.api_url(&format!("/api/v3/slave/thumb/{encoded}"))?;
        let signed = self
            .signer
            .sign_uri(url.as_str(), self.ctx.preview_timeout)
            .map_err(|e| DriverError::config(e.to_string()))?;
        Ok(ContentResponse::Redirect(signed))
    }

    async fn source(&self, path: &str, opts: SourceOptions) -> Result<String, DriverError> {
        let controller = if opts.is_download {
            "/api/v3/slave/download"
        } else {
            "/api/v3/slave/source"
        };
        self.signed_file_url(controller, path, &opts.file.name, opts.ttl, opts.speed)
    }

    async fn token(
        &self,
        ttl: i64,
        callback_key: &str,
        _save_path: &str,
    ) -> Result<UploadCredential, DriverError> {
        let callback = self
            .ctx
            .site_url
            .join(&format!("/api/v3/callback/remote/{callback_key}"))
            .map_err(|e| DriverError::config(e.to_string()))?;
        let policy = UploadPolicy {
            save_path: self.policy.dir_name_rule.clone(),
            file_name: self.policy.file_name_rule.clone(),
            auto_rename: self.policy.auto_rename,
            max_size: self.policy.max_size,
            allowed_extension: self.policy.options.file_type.clone(),
            callback_url: callback.to_string(),
        };
        let mut credential = self.credential(&policy, ttl)?;
        credential.url = self.api_url(UPLOAD_PATH)?.to_string();
        credential.callback = callback.to_string();
        Ok(credential)
    }

    async fn list(&self, base: &str, recursive: bool) -> Result<Vec<ObjectInfo>, DriverError> {
        let body = serde_json::to_string(&ListRequest {
            path: base,
            recursive,
        })
        .map_err(|e| DriverError::io(e.to_string()))?;
        let data = self.signed_post("/api/v3/slave/list", body).await?;
        parse_listing(data)
    }

    async fn meta(&self, _path: &str) -> Result<ObjectMeta, DriverError> {
        Err(DriverError::Unsupported("meta"))
    }
}

/// Decodes a peer listing, which may arrive as a JSON string, and drops the
/// entry for the listed base.
fn parse_listing(data: Value) -> Result<Vec<ObjectInfo>, DriverError> {
    let mut objects: Vec<ObjectInfo> = match data {
        Value::String(raw) => serde_json::from_str(&raw)
            .map_err(|e| DriverError::remote(format!("malformed listing: {e}")))?,
        Value::Null => Vec::new(),
        other => serde_json::from_value(other)
            .map_err(|e| DriverError::remote(format!("malformed listing: {e}")))?,
    };
    objects.retain(|o| !o.relative_path.is_empty() && o.relative_path != "/");
    Ok(objects)
}
