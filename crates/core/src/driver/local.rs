//! Local disk handler.

use async_trait::async_trait;
use opendal::{Operator, services};

use super::{
    ByteStream, ContentResponse, DeleteError, DriverContext, DriverError, Handler, ObjectInfo,
    ObjectMeta, PutOptions, SourceOptions, UploadCredential, operator_delete, operator_get,
    operator_list, operator_meta, operator_put,
};
use crate::model::{Policy, random_string};

/// Cache key prefix for download sessions.
pub const DOWNLOAD_SESSION_PREFIX: &str = "download_";

/// Stores objects under the configured upload root.
pub struct LocalHandler {
    policy: Policy,
    operator: Operator,
    ctx: DriverContext,
}

impl LocalHandler {
    /// Creates a handler rooted at `ctx.upload_root`.
    pub fn new(policy: Policy, ctx: DriverContext) -> Result<Self, DriverError> {
        let root = ctx
            .upload_root
            .to_str()
            .ok_or_else(|| DriverError::config("upload root is not valid UTF-8"))?;
        let operator = Operator::new(services::Fs::default().root(root))
            .map_err(|e| DriverError::config(e.to_string()))?
            .finish();
        Ok(Self {
            policy,
            operator,
            ctx,
        })
    }

    fn thumb_path(&self, path: &str) -> String {
        format!("{path}{}", self.ctx.thumb_suffix)
    }
}

#[async_trait]
impl Handler for LocalHandler {
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
        let with_thumbs: Vec<String> = paths
            .iter()
            .flat_map(|p| [p.clone(), self.thumb_path(p)])
            .collect();
        operator_delete(&self.operator, &with_thumbs)
            .await
            .map_err(|mut e| {
                let suffix = &self.ctx.thumb_suffix;
                e.failed.retain(|p| !p.ends_with(suffix.as_str()));
                e
            })
            .or_else(|e| if e.failed.is_empty() { Ok(()) } else { Err(e) })
    }

    async fn get(&self, path: &str) -> Result<ByteStream, DriverError> {
        operator_get(&self.operator, path).await
    }

    async fn thumb(&self, path: &str) -> Result<ContentResponse, DriverError> {
        let stream = operator_get(&self.operator, &self.thumb_path(path)).await?;
        Ok(ContentResponse::Stream(stream))
    }

    async fn source(&self, _path: &str, opts: SourceOptions) -> Result<String, DriverError> {
        let route = if opts.is_download {
            let session = random_string(16);
            let ttl = u64::try_from(opts.ttl)
                .ok()
                .filter(|t| *t > 0)
                .map(std::time::Duration::from_secs);
            self.ctx
                .cache
                .set_as(&format!("{DOWNLOAD_SESSION_PREFIX}{session}"), &opts.file, ttl)
                .await
                .map_err(|e| DriverError::io(e.to_string()))?;
            format!("/api/v3/file/download/{session}")
        } else {
            format!("/api/v3/file/get/{}/{}", opts.file.id, opts.file.name)
        };

        let url = self
            .ctx
            .site_url
            .join(&route)
            .map_err(|e| DriverError::config(e.to_string()))?;
        self.ctx
            .signer
            .sign_uri(url.as_str(), opts.ttl)
            .map_err(|e| DriverError::config(e.to_string()))
    }

    async fn token(
        &self,
        _ttl: i64,
        _callback_key: &str,
        _save_path: &str,
    ) -> Result<UploadCredential, DriverError> {
        tracing::trace!(policy_id = self.policy.id, "local policy uses server-side upload");
        Ok(UploadCredential::default())
    }

    async fn list(&self, base: &str, recursive: bool) -> Result<Vec<ObjectInfo>, DriverError> {
        let suffix = &self.ctx.thumb_suffix;
        let mut objects = operator_list(&self.operator, base, recursive).await?;
        objects.retain(|o| o.is_dir || !o.name.ends_with(suffix.as_str()));
        Ok(objects)
    }

    async fn meta(&self, path: &str) -> Result<ObjectMeta, DriverError> {
        operator_meta(&self.operator, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use std::io::Cursor;
    use tokio::io::AsyncReadExt;

    fn handler(dir: &tempfile::TempDir) -> LocalHandler {
        let ctx = fixtures::driver_context(dir.path());
        LocalHandler::new(fixtures::local_policy(1), ctx).expect("handler")
    }

    fn bytes(data: &'static [u8]) -> ByteStream {
        Box::pin(Cursor::new(data))
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let handler = handler(&dir);

        handler
            .put(bytes(b"hello"), "/1/docs/a.txt", 5, PutOptions::default())
            .await
            .expect("put");

        let mut out = String::new();
        handler
            .get("/1/docs/a.txt")
            .await
            .expect("get")
            .read_to_string(&mut out)
            .await
            .expect("read");
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_put_respects_disable_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let handler = handler(&dir);
        handler
            .put(bytes(b"a"), "x.txt", 1, PutOptions::default())
            .await
            .expect("put");

        let err = handler
            .put(
                bytes(b"b"),
                "x.txt",
                1,
                PutOptions {
                    disable_overwrite: true,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Exists(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_thumbnail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let handler = handler(&dir);
        handler
            .put(bytes(b"img"), "p.png", 3, PutOptions::default())
            .await
            .expect("put");
        handler
            .put(bytes(b"thumb"), "p.png._thumb", 5, PutOptions::default())
            .await
            .expect("put thumb");

        handler.delete(&["p.png".to_string()]).await.expect("delete");
        assert!(!dir.path().join("p.png").exists());
        assert!(!dir.path().join("p.png._thumb").exists());
    }

    #[tokio::test]
    async fn test_list_excludes_base() {
        let dir = tempfile::tempdir().expect("tempdir");
        let handler = handler(&dir);
        handler
            .put(bytes(b"1"), "base/a.txt", 1, PutOptions::default())
            .await
            .expect("put");
        handler
            .put(bytes(b"22"), "base/sub/b.txt", 2, PutOptions::default())
            .await
            .expect("put");

        let shallow = handler.list("/base", false).await.expect("list");
        assert!(shallow.iter().all(|o| !o.relative_path.is_empty() && o.source != "base"));
        assert!(shallow.iter().any(|o| o.name == "a.txt" && o.size == 1));
        assert!(shallow.iter().any(|o| o.name == "sub" && o.is_dir));

        let deep = handler.list("/base", true).await.expect("list");
        assert!(deep.iter().any(|o| o.relative_path == "sub/b.txt" && o.size == 2));

        let root = handler.list("/", false).await.expect("list");
        assert!(root.iter().all(|o| !o.relative_path.is_empty()));
    }

    #[tokio::test]
    async fn test_download_source_creates_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = fixtures::driver_context(dir.path());
        let cache = ctx.cache.clone();
        let handler = LocalHandler::new(fixtures::local_policy(1), ctx).expect("handler");
        let file = fixtures::file(9, "a.txt", 1);

        let url = handler
            .source(
                &file.source_name,
                SourceOptions {
                    ttl: 60,
                    is_download: true,
                    speed: 0,
                    file: file.clone(),
                },
            )
            .await
            .expect("source");
        assert!(url.starts_with("http://localhost:5212/api/v3/file/download/"));
        assert!(url.contains("sign="));

        let session = url
            .trim_start_matches("http://localhost:5212/api/v3/file/download/")
            .split('?')
            .next()
            .expect("session")
            .to_string();
        let cached: Option<crate::model::File> = cache
            .get_as(&format!("{DOWNLOAD_SESSION_PREFIX}{session}"))
            .await;
        assert_eq!(cached.map(|f| f.id), Some(9));
    }
}
