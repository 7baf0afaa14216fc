//! Static file streaming.

use std::io;
use std::path::{Component, Path, PathBuf};

use axum::http::StatusCode;
use tokio_util::io::ReaderStream;

use crate::http::payload::ByteStream;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("invalid asset path `{0}`")]
    InvalidPath(String),
    #[error("asset not found: {0}")]
    NotFound(String),
    #[error("failed to open asset `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl AssetError {
    pub fn status(&self) -> StatusCode {
        match self {
            AssetError::InvalidPath(_) | AssetError::NotFound(_) => StatusCode::NOT_FOUND,
            AssetError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// An opened file, ready to pipe.
pub struct Asset {
    pub stream: ByteStream,
    pub content_type: String,
    pub len: u64,
}

/// Files under one root directory.
#[derive(Debug, Clone)]
pub struct Assets {
    root: PathBuf,
}

impl Assets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join `relative` onto the root, refusing anything that could escape it.
    fn resolve(&self, relative: &str) -> Result<PathBuf, AssetError> {
        let invalid = || AssetError::InvalidPath(relative.to_string());
        if relative.is_empty() || relative.contains('\\') || relative.contains('\0') {
            return Err(invalid());
        }
        let path = Path::new(relative);
        if !path.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(invalid());
        }
        Ok(self.root.join(path))
    }

    pub async fn open(&self, relative: &str) -> Result<Asset, AssetError> {
        let path = self.resolve(relative)?;
        let io_error = |source: io::Error| match source.kind() {
            io::ErrorKind::NotFound => AssetError::NotFound(relative.to_string()),
            _ => AssetError::Io {
                path: relative.to_string(),
                source,
            },
        };

        let file = tokio::fs::File::open(&path).await.map_err(io_error)?;
        let metadata = file.metadata().await.map_err(io_error)?;
        if !metadata.is_file() {
            return Err(AssetError::NotFound(relative.to_string()));
        }

        Ok(Asset {
            stream: Box::pin(ReaderStream::new(file)),
            content_type: mime_guess::from_path(&path)
                .first_or_octet_stream()
                .to_string(),
            len: metadata.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;

    fn assets_with(files: &[(&str, &str)]) -> (tempfile::TempDir, Assets) {
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
        let assets = Assets::new(dir.path());
        (dir, assets)
    }

    #[tokio::test]
    async fn test_open_streams_file() {
        let (_dir, assets) = assets_with(&[("build/site.css", "body { margin: 0 }")]);
        let asset = assets.open("build/site.css").await.unwrap();
        assert_eq!(asset.content_type, "text/css");
        assert_eq!(asset.len, 18);

        let chunks: Vec<_> = asset.stream.try_collect().await.unwrap();
        assert_eq!(chunks.concat(), b"body { margin: 0 }");
    }

    #[tokio::test]
    async fn test_traversal_is_rejected() {
        let (_dir, assets) = assets_with(&[]);
        for path in ["../secret", "img/../../secret", "/etc/passwd", "a\\b", "./x", ""] {
            let err = assets.open(path).await.err().unwrap();
            assert!(matches!(err, AssetError::InvalidPath(_)), "{path}");
            assert_eq!(err.status(), StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn test_missing_and_directories_are_not_found() {
        let (_dir, assets) = assets_with(&[("img/a.png", "png")]);
        assert!(matches!(assets.open("img/b.png").await, Err(AssetError::NotFound(_))));
        assert!(matches!(assets.open("img").await, Err(AssetError::NotFound(_))));
    }
}
