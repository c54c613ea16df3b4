//! Thumbnail generation and delivery.

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};
use thiserror::Error;
use tokio::io::AsyncReadExt;

use super::validator::is_in_extension_list;
use super::{FileSystem, FsError};
use crate::driver::{ContentResponse, Handler, PutOptions};
use crate::model::File;
use crate::repository::FileRepository;
use crate::setting::SettingStore;

/// Extensions the thumbnailer understands.
pub const HANDLED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

/// Whether `name` has an extension the thumbnailer understands.
#[must_use]
pub fn is_image_name(name: &str) -> bool {
    let handled: Vec<String> = HANDLED_EXTENSIONS.iter().map(ToString::to_string).collect();
    is_in_extension_list(&handled, name)
}

/// Thumbnail rendering errors.
#[derive(Debug, Error)]
pub enum ThumbError {
    /// The source could not be decoded.
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// The thumbnail could not be encoded.
    #[error("failed to encode thumbnail: {0}")]
    Encode(String),
}

/// A rendered thumbnail.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    /// Encoded thumbnail bytes.
    pub data: Vec<u8>,
    /// Width of the source image.
    pub width: u32,
    /// Height of the source image.
    pub height: u32,
}

/// Image codec seam.
pub trait Thumbnailer: Send + Sync {
    /// Renders a thumbnail fitting `max_width` x `max_height`.
    fn render(
        &self,
        source: &[u8],
        name: &str,
        max_width: u32,
        max_height: u32,
    ) -> Result<Thumbnail, ThumbError>;
}

/// [`Thumbnailer`] backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageThumbnailer;

impl Thumbnailer for ImageThumbnailer {
    fn render(
        &self,
        source: &[u8],
        name: &str,
        max_width: u32,
        max_height: u32,
    ) -> Result<Thumbnail, ThumbError> {
        let img = image::load_from_memory(source).map_err(|e| ThumbError::Decode(e.to_string()))?;
        let (width, height) = (img.width(), img.height());
        let thumb = img.thumbnail(max_width, max_height);

        let lower = name.to_lowercase();
        let (encoded, format) = if lower.ends_with(".png") || lower.ends_with(".gif") {
            (thumb, ImageFormat::Png)
        } else {
            (DynamicImage::ImageRgb8(thumb.to_rgb8()), ImageFormat::Jpeg)
        };

        let mut data = Vec::new();
        encoded
            .write_to(&mut Cursor::new(&mut data), format)
            .map_err(|e| ThumbError::Encode(e.to_string()))?;
        Ok(Thumbnail {
            data,
            width,
            height,
        })
    }
}

/// Thumbnail delivery with its cache lifetime.
#[derive(Debug)]
pub struct ThumbResponse {
    /// Redirect or stream.
    pub content: ContentResponse,
    /// Seconds clients may cache the response.
    pub max_age: i64,
}

/// Everything needed to render one thumbnail off the request path.
struct ThumbJob {
    handler: Arc<dyn Handler>,
    files: Arc<dyn FileRepository>,
    settings: SettingStore,
    thumbnailer: Arc<dyn Thumbnailer>,
    suffix: String,
}

impl ThumbJob {
    /// Renders and stores the thumbnail, recording `"w,h"` on the row.
    /// Failures are logged; the file is returned unchanged.
    async fn run(self, mut file: File) -> File {
        if !is_image_name(&file.name) {
            return file;
        }

        let mut source = Vec::new();
        let read = match self.handler.get(&file.source_name).await {
            Ok(mut stream) => stream.read_to_end(&mut source).await.map_err(FsError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = read {
            tracing::debug!(file_id = file.id, error = %e, "cannot open thumbnail source");
            return file;
        }

        let width = u32::try_from(self.settings.get_u64("thumb_width", 400).await).unwrap_or(400);
        let height = u32::try_from(self.settings.get_u64("thumb_height", 300).await).unwrap_or(300);
        let thumbnailer = self.thumbnailer.clone();
        let name = file.name.clone();
        let rendered = tokio::task::spawn_blocking(move || {
            thumbnailer.render(&source, &name, width, height)
        })
        .await;

        let thumb = match rendered {
            Ok(Ok(thumb)) => thumb,
            Ok(Err(e)) => {
                tracing::warn!(path = %file.source_name, error = %e, "cannot parse image for thumbnail");
                return file;
            }
            Err(e) => {
                tracing::warn!(path = %file.source_name, error = %e, "thumbnail task failed");
                return file;
            }
        };

        let thumb_path = format!("{}{}", file.source_name, self.suffix);
        let size = u64::try_from(thumb.data.len()).unwrap_or(u64::MAX);
        if let Err(e) = self
            .handler
            .put(
                Box::pin(Cursor::new(thumb.data)),
                &thumb_path,
                size,
                PutOptions::default(),
            )
            .await
        {
            tracing::warn!(path = %thumb_path, error = %e, "cannot save thumbnail");
            return file;
        }

        let pic_info = format!("{},{}", thumb.width, thumb.height);
        if file.id > 0 {
            if let Err(e) = self.files.update_pic_info(file.id, &pic_info).await {
                tracing::warn!(file_id = file.id, error = %e, "cannot record image size");
                let _ = self.handler.delete(&[thumb_path]).await;
                return file;
            }
        }
        file.pic_info = pic_info;
        file
    }
}

impl FileSystem {
    fn thumb_job(&self) -> ThumbJob {
        ThumbJob {
            handler: self.handler.clone(),
            files: self.deps.repos.files.clone(),
            settings: self.deps.settings.clone(),
            thumbnailer: self.deps.thumbnailer.clone(),
            suffix: self.deps.thumb_suffix.clone(),
        }
    }

    /// Renders the thumbnail of `file` with the current handler.
    pub async fn generate_thumbnail(&self, file: File) -> File {
        self.thumb_job().run(file).await
    }

    /// Renders the thumbnail of `file` in the background.
    pub(super) fn spawn_thumbnail(&self, file: File) {
        let job = self.thumb_job();
        tokio::spawn(async move {
            job.run(file).await;
        });
    }

    /// Delivers the thumbnail of one of the user's files. A local policy
    /// whose thumbnail is missing gets it regenerated in the background.
    pub async fn get_thumb(&mut self, id: i64) -> Result<ThumbResponse, FsError> {
        self.reset_file_id_if_not_exist(id).await?;
        let file = self.file_target[0].clone();
        if file.pic_info.is_empty() {
            return Err(FsError::ObjectNotExist);
        }

        match self.handler.thumb(&file.source_name).await {
            Ok(content) => Ok(ThumbResponse {
                content,
                max_age: self.deps.settings.get_int("preview_timeout", 60).await,
            }),
            Err(e) => {
                if self.policy.is_thumb_generate_needed() {
                    self.spawn_thumbnail(file);
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryHandler, MemoryStore, fixtures};
    use image::{Rgb, RgbImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 10, 10]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .expect("encode");
        out
    }

    #[test]
    fn test_is_image_name() {
        assert!(is_image_name("a.PNG"));
        assert!(is_image_name("b.jpeg"));
        assert!(!is_image_name("c.webp"));
        assert!(!is_image_name("png"));
    }

    #[test]
    fn test_render_keeps_source_dimensions() {
        let thumb = ImageThumbnailer
            .render(&png(800, 600), "a.png", 400, 300)
            .expect("render");
        assert_eq!((thumb.width, thumb.height), (800, 600));

        let decoded = image::load_from_memory(&thumb.data).expect("decode");
        assert!(decoded.width() <= 400 && decoded.height() <= 300);
    }

    #[test]
    fn test_render_rejects_garbage() {
        let err = ImageThumbnailer.render(b"not an image", "a.jpg", 10, 10);
        assert!(matches!(err, Err(ThumbError::Decode(_))));
    }

    #[tokio::test]
    async fn test_generate_thumbnail_records_pic_info() {
        let store = MemoryStore::with_user(1_000_000);
        let handler = MemoryHandler::new();
        let file = store.seed_file(1, "a.png", 10);
        handler.insert(&file.source_name, &png(40, 20));

        let fs = fixtures::fs(&store, handler.clone()).await;
        let file = fs.generate_thumbnail(file).await;

        assert_eq!(file.pic_info, "40,20");
        assert_eq!(store.file(file.id).map(|f| f.pic_info), Some("40,20".to_string()));
        assert!(handler.object(&format!("{}._thumb", file.source_name)).is_some());
    }

    #[tokio::test]
    async fn test_get_thumb_requires_pic_info() {
        let store = MemoryStore::with_user(1_000_000);
        let file = store.seed_file(1, "a.txt", 10);
        let mut fs = fixtures::fs(&store, MemoryHandler::new()).await;

        let err = fs.get_thumb(file.id).await.unwrap_err();
        assert!(matches!(err, FsError::ObjectNotExist));
    }

    #[tokio::test]
    async fn test_get_thumb_streams_stored_thumbnail() {
        let store = MemoryStore::with_user(1_000_000);
        let handler = MemoryHandler::new();
        let file = store.seed_file(1, "a.png", 10);
        store.set_pic_info(file.id, "40,20");
        handler.insert(&format!("{}._thumb", file.source_name), b"thumb");

        let mut fs = fixtures::fs(&store, handler).await;
        let res = fs.get_thumb(file.id).await.expect("thumb");
        assert!(matches!(res.content, ContentResponse::Stream(_)));
        assert_eq!(res.max_age, 60);
    }
}
