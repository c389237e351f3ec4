//! Reference content read from a local directory tree.
//!
//! ```text
//! {root}/{x-y}/html/body.txt              parent text
//! {root}/{x-y}/{c}/html/body.txt          child text
//! {root}/{x-y}/{c}/images/hexagram.jpg    image
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{ContentStore, ReferenceContent};
use crate::core::coordinate::{Coordinate, IMAGE_FILE_NAME};
use crate::utilities::errors::{OracleError, OracleResult};

const TEXT_FILE: &str = "body.txt";

/// Content store over a data directory.
#[derive(Debug, Clone)]
pub struct LocalContentStore {
    root: PathBuf,
}

impl LocalContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn parent_text_path(&self, coord: &Coordinate) -> PathBuf {
        self.root.join(coord.parent_key()).join("html").join(TEXT_FILE)
    }

    fn child_dir(&self, coord: &Coordinate) -> PathBuf {
        self.root.join(coord.parent_key()).join(coord.child_key())
    }

    fn child_text_path(&self, coord: &Coordinate) -> PathBuf {
        self.child_dir(coord).join("html").join(TEXT_FILE)
    }

    fn image_path(&self, coord: &Coordinate) -> PathBuf {
        self.child_dir(coord).join("images").join(IMAGE_FILE_NAME)
    }
}

async fn read_text(path: &Path) -> OracleResult<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) if !text.trim().is_empty() => Ok(text),
        Ok(_) => Err(OracleError::not_found(format!("Empty text file {}", path.display()))),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(OracleError::not_found(format!("Missing {}", path.display())))
        }
        Err(e) => Err(OracleError::store(format!("Cannot read {}: {}", path.display(), e))),
    }
}

#[async_trait]
impl ContentStore for LocalContentStore {
    async fn fetch(&self, coord: &Coordinate) -> OracleResult<ReferenceContent> {
        let parent_text = read_text(&self.parent_text_path(coord)).await?;
        let child_text = read_text(&self.child_text_path(coord)).await?;

        let image = self.image_path(coord);
        if !tokio::fs::try_exists(&image).await.unwrap_or(false) {
            return Err(OracleError::not_found(format!("Missing {}", image.display())));
        }

        log::debug!("Loaded local content for {} from {}", coord, self.root.display());
        Ok(ReferenceContent {
            parent_text,
            child_text,
            image_url: image.to_string_lossy().into_owned(),
        })
    }
}
