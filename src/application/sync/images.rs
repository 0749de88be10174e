//! Downloads referenced images once and names them by content hash.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

use crate::infra::imaging;

use super::error::SyncError;
use super::source::ContentSource;

pub const MANIFEST_FILE: &str = ".manifest.json";
const HASH_PREFIX_LEN: usize = 16;

/// What the sync remembers about one localized image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    pub file: String,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    pub sha256: String,
}

/// Stable source key (URL without query or fragment) to asset.
pub type Manifest = BTreeMap<String, ImageAsset>;

/// Signed links change their query string on every request; the path does not.
pub fn stable_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    }
}

pub fn read_manifest(images_dir: &Path) -> Manifest {
    let path = images_dir.join(MANIFEST_FILE);
    match std::fs::read(&path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            warn!(
                target = "folio::sync",
                path = %path.display(),
                error = %err,
                "ignoring unreadable image manifest"
            );
            Manifest::new()
        }),
        Err(_) => Manifest::new(),
    }
}

/// Per-run image state: the previous manifest to reuse from and the next one
/// being assembled.
pub struct ImageLocalizer<'a> {
    source: &'a dyn ContentSource,
    images_dir: PathBuf,
    previous: Manifest,
    next: Manifest,
    files: BTreeMap<String, Bytes>,
    pub downloaded: usize,
    pub reused: usize,
}

impl<'a> ImageLocalizer<'a> {
    pub fn new(source: &'a dyn ContentSource, images_dir: impl Into<PathBuf>) -> Self {
        let images_dir = images_dir.into();
        let previous = read_manifest(&images_dir);
        Self {
            source,
            images_dir,
            previous,
            next: Manifest::new(),
            files: BTreeMap::new(),
            downloaded: 0,
            reused: 0,
        }
    }

    /// Make `url` available locally and describe the result.
    pub async fn localize(&mut self, url: &str) -> Result<ImageAsset, SyncError> {
        let key = stable_key(url);
        if let Some(asset) = self.next.get(&key) {
            return Ok(asset.clone());
        }

        if let Some(asset) = self.previous.get(&key).cloned() {
            if let Some(bytes) = self.read_existing(&asset) {
                debug!(target = "folio::sync", file = %asset.file, "reusing image");
                self.reused += 1;
                self.files.insert(asset.file.clone(), bytes);
                self.next.insert(key, asset.clone());
                return Ok(asset);
            }
        }

        let bytes = self
            .source
            .download(url)
            .await
            .map_err(|err| SyncError::Image {
                url: key.clone(),
                message: err.to_string(),
            })?;
        let asset = describe(bytes.clone()).await.map_err(|message| SyncError::Image {
            url: key.clone(),
            message,
        })?;

        self.downloaded += 1;
        self.files.insert(asset.file.clone(), bytes);
        self.next.insert(key, asset.clone());
        Ok(asset)
    }

    /// Keep a previous asset whose file name appears in `markdown`. Used when a
    /// page fails and its old document is carried over.
    pub fn carry_referenced(&mut self, markdown: &str) {
        let carried: Vec<(String, ImageAsset)> = self
            .previous
            .iter()
            .filter(|(key, asset)| !self.next.contains_key(*key) && markdown.contains(&asset.file))
            .map(|(key, asset)| (key.clone(), asset.clone()))
            .collect();
        for (key, asset) in carried {
            if let Some(bytes) = self.read_existing(&asset) {
                self.files.insert(asset.file.clone(), bytes);
                self.next.insert(key, asset);
            }
        }
    }

    /// Every image file plus the manifest, ready for the writer.
    pub fn into_files(self) -> Result<BTreeMap<String, Bytes>, SyncError> {
        let mut files = self.files;
        let manifest = serde_json::to_vec_pretty(&self.next).map_err(SyncError::Manifest)?;
        files.insert(MANIFEST_FILE.to_string(), Bytes::from(manifest));
        Ok(files)
    }

    fn read_existing(&self, asset: &ImageAsset) -> Option<Bytes> {
        let bytes = std::fs::read(self.images_dir.join(&asset.file)).ok()?;
        (hex_digest(&bytes) == asset.sha256).then(|| Bytes::from(bytes))
    }
}

async fn describe(bytes: Bytes) -> Result<ImageAsset, String> {
    tokio::task::spawn_blocking(move || {
        let info = imaging::inspect(&bytes).map_err(|err| err.to_string())?;
        let sha256 = hex_digest(&bytes);
        let placeholder = match imaging::placeholder_data_uri(&bytes) {
            Ok(uri) => Some(uri),
            Err(err) => {
                warn!(target = "folio::sync", error = %err, "placeholder generation failed");
                None
            }
        };
        Ok(ImageAsset {
            file: format!("{}.{}", &sha256[..HASH_PREFIX_LEN], info.extension),
            width: info.width,
            height: info.height,
            placeholder,
            sha256,
        })
    })
    .await
    .map_err(|err| err.to_string())?
}

pub fn hex_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
