//! Object storage handler (S3-compatible and Azure Blob) using Apache OpenDAL.

use std::time::Duration;

use async_trait::async_trait;
use opendal::{Operator, services};
use url::Url;

use super::{
    ByteStream, ContentResponse, DeleteError, DriverContext, DriverError, Handler, ObjectInfo,
    ObjectMeta, PutOptions, SourceOptions, UploadCredential, object_key, operator_delete,
    operator_get, operator_list, operator_meta, operator_put,
};
use crate::model::{Policy, PolicyType};

/// Presigned links without an explicit lifetime last one hour.
const DEFAULT_SOURCE_TTL: u64 = 3600;

/// Stores objects in a bucket or container.
pub struct ObjectHandler {
    policy: Policy,
    kind: PolicyType,
    operator: Operator,
    ctx: DriverContext,
}

impl ObjectHandler {
    /// Creates a handler for an `s3` or `azblob` policy.
    pub fn new(policy: Policy, ctx: DriverContext) -> Result<Self, DriverError> {
        let kind = policy
            .kind()
            .ok_or_else(|| DriverError::UnknownPolicyType(policy.policy_type.clone()))?;
        let operator = Self::create_operator(&policy, kind)?;
        Ok(Self {
            policy,
            kind,
            operator,
            ctx,
        })
    }

    fn create_operator(policy: &Policy, kind: PolicyType) -> Result<Operator, DriverError> {
        let endpoint = if policy.options.server_side_endpoint.is_empty() {
            policy.server.as_str()
        } else {
            policy.options.server_side_endpoint.as_str()
        };

        let operator = match kind {
            PolicyType::S3 => {
                let region = if policy.options.region.is_empty() {
                    "us-east-1"
                } else {
                    policy.options.region.as_str()
                };
                let mut builder = services::S3::default()
                    .bucket(&policy.bucket_name)
                    .access_key_id(&policy.access_key)
                    .secret_access_key(&policy.secret_key)
                    .region(region);
                if !endpoint.is_empty() {
                    builder = builder.endpoint(endpoint);
                }
                Operator::new(builder).map(|b| b.finish())
            }
            PolicyType::Azblob => {
                let mut builder = services::Azblob::default()
                    .account_name(&policy.access_key)
                    .account_key(&policy.secret_key)
                    .container(&policy.bucket_name);
                if !endpoint.is_empty() {
                    builder = builder.endpoint(endpoint);
                }
                Operator::new(builder).map(|b| b.finish())
            }
            PolicyType::Local | PolicyType::Remote => {
                return Err(DriverError::config(format!(
                    "policy type {} is not an object store",
                    kind.as_str()
                )));
            }
        };

        operator.map_err(|e| DriverError::config(e.to_string()))
    }

    /// Applies public-bucket and CDN rewrites to a presigned URL.
    fn finalize_url(&self, presigned: &str) -> Result<String, DriverError> {
        let mut url = Url::parse(presigned).map_err(|e| DriverError::io(e.to_string()))?;
        if !self.policy.is_private {
            url.set_query(None);
        }
        if !self.policy.base_url.is_empty() {
            let cdn = Url::parse(&self.policy.base_url)
                .map_err(|e| DriverError::config(format!("invalid CDN base url: {e}")))?;
            url.set_scheme(cdn.scheme())
                .map_err(|()| DriverError::config("CDN scheme cannot replace object scheme"))?;
            url.set_host(cdn.host_str())
                .map_err(|e| DriverError::config(e.to_string()))?;
            url.set_port(cdn.port())
                .map_err(|()| DriverError::config("CDN port cannot be applied"))?;
        }
        Ok(url.to_string())
    }
}

#[async_trait]
impl Handler for ObjectHandler {
    async fn put(
        &self,
        stream: ByteStream,
        dst: &str,
        _size: u64,
        opts: PutOptions,
    ) -> Result<(), DriverError> {
        operator_put(&self.operator, stream, dst, opts).await
    }

    async fn delete(&self, paths: &[String]) -> Result<(), DeleteError> {
        operator_delete(&self.operator, paths).await
    }

    async fn get(&self, path: &str) -> Result<ByteStream, DriverError> {
        operator_get(&self.operator, path).await
    }

    async fn thumb(&self, _path: &str) -> Result<ContentResponse, DriverError> {
        Err(DriverError::Unsupported("thumb"))
    }

    async fn source(&self, path: &str, opts: SourceOptions) -> Result<String, DriverError> {
        let ttl = u64::try_from(opts.ttl)
            .ok()
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_SOURCE_TTL);
        let disposition = format!(
            "attachment; filename=\"{}\"",
            url::form_urlencoded::byte_serialize(opts.file.name.as_bytes()).collect::<String>()
        );

        let presigned = self
            .operator
            .presign_read_with(&object_key(path), Duration::from_secs(ttl))
            .override_content_disposition(&disposition)
            .await?;
        self.finalize_url(&presigned.uri().to_string())
    }

    async fn token(
        &self,
        ttl: i64,
        callback_key: &str,
        save_path: &str,
    ) -> Result<UploadCredential, DriverError> {
        let ttl = u64::try_from(ttl).unwrap_or(DEFAULT_SOURCE_TTL);
        let presigned = self
            .operator
            .presign_write(&object_key(save_path), Duration::from_secs(ttl))
            .await?;
        let callback = self
            .ctx
            .site_url
            .join(&format!(
                "/api/v3/callback/{}/{callback_key}",
                self.kind.as_str()
            ))
            .map_err(|e| DriverError::config(e.to_string()))?;

        Ok(UploadCredential {
            url: presigned.uri().to_string(),
            path: save_path.to_string(),
            callback: callback.to_string(),
            ..UploadCredential::default()
        })
    }

    async fn list(&self, base: &str, recursive: bool) -> Result<Vec<ObjectInfo>, DriverError> {
        operator_list(&self.operator, base, recursive).await
    }

    async fn meta(&self, path: &str) -> Result<ObjectMeta, DriverError> {
        operator_meta(&self.operator, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;

    fn s3_policy(is_private: bool, base_url: &str) -> Policy {
        let mut policy = fixtures::local_policy(2);
        policy.policy_type = "s3".to_string();
        policy.server = "https://s3.example.com".to_string();
        policy.bucket_name = "bucket".to_string();
        policy.access_key = "ak".to_string();
        policy.secret_key = "sk".to_string();
        policy.is_private = is_private;
        policy.base_url = base_url.to_string();
        policy
    }

    fn handler(policy: Policy) -> ObjectHandler {
        let dir = std::env::temp_dir();
        ObjectHandler::new(policy, fixtures::driver_context(&dir)).expect("handler")
    }

    #[test]
    fn test_public_bucket_strips_query() {
        let handler = handler(s3_policy(false, ""));
        let url = handler
            .finalize_url("https://s3.example.com/bucket/a.txt?X-Amz-Signature=abc")
            .expect("url");
        assert_eq!(url, "https://s3.example.com/bucket/a.txt");
    }

    #[test]
    fn test_private_bucket_keeps_signature_and_cdn_rewrites_host() {
        let handler = handler(s3_policy(true, "http://cdn.example.net"));
        let url = handler
            .finalize_url("https://s3.example.com/bucket/a.txt?X-Amz-Signature=abc")
            .expect("url");
        assert_eq!(url, "http://cdn.example.net/bucket/a.txt?X-Amz-Signature=abc");
    }

    #[tokio::test]
    async fn test_thumb_unsupported() {
        let handler = handler(s3_policy(true, ""));
        assert!(matches!(
            handler.thumb("a.png").await,
            Err(DriverError::Unsupported("thumb"))
        ));
    }

    #[tokio::test]
    async fn test_presigned_source_and_token() {
        let handler = handler(s3_policy(true, ""));
        let file = fixtures::file(1, "report.pdf", 1);
        let url = handler
            .source(
                "1/report.pdf",
                SourceOptions {
                    ttl: 0,
                    is_download: true,
                    speed: 0,
                    file,
                },
            )
            .await
            .expect("source");
        assert!(url.contains("X-Amz-Signature"));
        assert!(url.contains("response-content-disposition"));

        let credential = handler.token(600, "cbkey", "1/report.pdf").await.expect("token");
        assert_eq!(credential.path, "1/report.pdf");
        assert_eq!(
            credential.callback,
            "http://localhost:5212/api/v3/callback/s3/cbkey"
        );
        assert!(credential.url.contains("X-Amz-Signature"));
    }

    fn memory_backed(policy: Policy) -> ObjectHandler {
        let mut handler = handler(policy);
        handler.operator = Operator::new(services::Memory::default())
            .expect("memory operator")
            .finish();
        handler
    }

    #[tokio::test]
    async fn test_list_excludes_base() {
        let handler = memory_backed(s3_policy(true, ""));
        for (key, data) in [("1/a.txt", "a"), ("1/sub/b.txt", "bb"), ("2/c.txt", "c")] {
            handler
                .operator
                .write(key, data.as_bytes().to_vec())
                .await
                .expect("write");
        }

        let flat = handler.list("/1", false).await.expect("list");
        let paths: Vec<&str> = flat.iter().map(|o| o.relative_path.as_str()).collect();
        assert!(paths.contains(&"a.txt"));
        assert!(paths.contains(&"sub"));
        assert!(!paths.iter().any(|p| p.is_empty() || *p == "1"));

        let deep = handler.list("/1", true).await.expect("list");
        assert!(deep.iter().all(|o| !o.relative_path.is_empty() && o.source != "1"));
        let b = deep
            .iter()
            .find(|o| o.relative_path == "sub/b.txt")
            .expect("nested object");
        assert_eq!((b.name.as_str(), b.size, b.is_dir), ("b.txt", 2, false));
        assert!(!deep.iter().any(|o| o.source.starts_with("2/")));
    }

    #[tokio::test]
    async fn test_meta_reports_stored_size() {
        let handler = memory_backed(s3_policy(true, ""));
        handler
            .operator
            .write("1/a.txt", b"0123456789".to_vec())
            .await
            .expect("write");

        let meta = handler.meta("/1/a.txt").await.expect("meta");
        assert_eq!(meta.size, 10);
        assert!(matches!(
            handler.meta("1/missing.txt").await,
            Err(DriverError::NotFound(_))
        ));
    }
}
