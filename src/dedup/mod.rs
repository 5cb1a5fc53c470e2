//! Media deduplication using perceptual hashing.
//!
//! Every downloaded media file is copied into one flat media store. Raster
//! images are fingerprinted first; an image that looks like one already in
//! the store is mapped onto that copy instead of being stored again. The
//! resulting [`CanonicalMapping`] is what the content rewriter consumes.

pub mod index;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use img_hash::{HashAlg, HasherConfig};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::archiver::sanitize_filename;
use crate::config::{ArchiveLayout, Config, DedupIndexKind};
use crate::constants::ASSETS_DIR;
use crate::fetch::sniff;
use crate::fs_utils::{collect_files, relative_key, write_atomic, PARTIAL_SUFFIX};

pub use index::{build_index, BucketedIndex, FingerprintIndex, LinearIndex};

/// Archive-relative original path → canonical file name in the media store.
pub type CanonicalMapping = BTreeMap<String, String>;

/// Side length of the hash grid; 8×8 gives a 64-bit fingerprint.
const HASH_SIZE: u32 = 8;

/// A 64-bit DCT perceptual hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub const BITS: u32 = 64;

    /// Number of differing bits.
    #[must_use]
    pub fn distance(self, other: Self) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

/// Compute the perceptual fingerprint of an encoded image.
///
/// # Errors
///
/// Returns an error if the image cannot be decoded.
pub fn compute_fingerprint(data: &[u8]) -> Result<Fingerprint> {
    let img = img_hash::image::load_from_memory(data).context("Failed to decode image")?;
    let hasher = HasherConfig::new()
        .hash_size(HASH_SIZE, HASH_SIZE)
        .hash_alg(HashAlg::Mean)
        .preproc_dct()
        .to_hasher();

    let hash = hasher.hash_image(&img);
    let bytes: [u8; 8] = hash
        .as_bytes()
        .try_into()
        .map_err(|_| anyhow!("Unexpected hash length: {}", hash.as_bytes().len()))?;
    Ok(Fingerprint(u64::from_be_bytes(bytes)))
}

/// Counters for one deduplication run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DedupSummary {
    pub files: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub undecodable: usize,
    /// Listed but could not be read; left out of the mapping.
    pub unreadable: usize,
}

/// Walks the downloaded posts and builds the media store and mapping.
pub struct MediaDeduplicator {
    layout: ArchiveLayout,
    threshold: u32,
    index_kind: DedupIndexKind,
}

impl MediaDeduplicator {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            layout: config.layout(),
            threshold: config.hash_difference_threshold,
            index_kind: config.dedup_index,
        }
    }

    /// Deduplicate every media file under the posts directory and write the
    /// mapping file.
    ///
    /// # Errors
    ///
    /// Returns an error if the posts directory cannot be walked or the store
    /// cannot be written.
    pub async fn run(&self) -> Result<(CanonicalMapping, DedupSummary)> {
        let posts_dir = self.layout.posts_dir();
        let store_dir = self.layout.media_store_dir();
        tokio::fs::create_dir_all(&store_dir)
            .await
            .with_context(|| format!("Failed to create media store: {}", store_dir.display()))?;

        let files: Vec<PathBuf> = collect_files(&posts_dir, &[Path::new(ASSETS_DIR)])
            .await?
            .into_iter()
            .filter(|path| is_media_candidate(path))
            .collect();
        info!(files = files.len(), threshold = self.threshold, "Deduplicating media");

        let mut index = build_index(self.index_kind, self.threshold);
        let mut names = CanonicalNames::default();
        let mut mapping = CanonicalMapping::new();
        let mut summary = DedupSummary::default();

        for path in files {
            summary.files += 1;
            let key = relative_key(&self.layout.root, &path);
            let data = match tokio::fs::read(&path).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %key, "Could not read media file, skipping: {e}");
                    summary.unreadable += 1;
                    continue;
                }
            };

            let is_raster = sniff::sniff(&data).is_some_and(|s| s.is_raster_image());
            let (data, fingerprint) = if is_raster {
                let (data, result) = tokio::task::spawn_blocking(move || {
                    let result = compute_fingerprint(&data);
                    (data, result)
                })
                .await
                .context("Fingerprint task panicked")?;

                match result {
                    Ok(fp) => (data, Some(fp)),
                    Err(e) => {
                        warn!(path = %key, "Could not fingerprint image, copying as-is: {e:#}");
                        summary.undecodable += 1;
                        (data, None)
                    }
                }
            } else {
                (data, None)
            };

            if let Some(fp) = fingerprint {
                if let Some(canonical) = index.find_match(fp, self.threshold) {
                    debug!(path = %key, canonical = %canonical, "Duplicate image");
                    mapping.insert(key, canonical.to_string());
                    summary.duplicates += 1;
                    continue;
                }
            }

            let canonical = names.allocate(&key);
            let dest = store_dir.join(&canonical);
            write_atomic(&dest, &data)
                .await
                .with_context(|| format!("Failed to store media file: {}", dest.display()))?;

            if let Some(fp) = fingerprint {
                index.insert(fp, canonical.clone());
            }
            mapping.insert(key, canonical);
            summary.stored += 1;
        }

        write_mapping(&self.layout.file_map(), &mapping).await?;

        info!(
            files = summary.files,
            stored = summary.stored,
            duplicates = summary.duplicates,
            undecodable = summary.undecodable,
            unreadable = summary.unreadable,
            "Media deduplication complete"
        );

        Ok((mapping, summary))
    }
}

/// Documents, popup viewers and partial downloads are not media.
fn is_media_candidate(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    extension != "html" && extension != PARTIAL_SUFFIX && !name.contains("-popup")
}

/// Allocates unique canonical names within the media store.
#[derive(Debug, Default)]
struct CanonicalNames {
    used: HashSet<String>,
}

impl CanonicalNames {
    /// `<post-dir>_<file>` for `posts/<post-dir>/<file>`, disambiguated when
    /// taken.
    fn allocate(&mut self, key: &str) -> String {
        let mut parts = key.rsplit('/');
        let file = parts.next().unwrap_or(key);
        let post_dir = parts.next().unwrap_or("media");
        let base = sanitize_filename(&format!("{post_dir}_{file}"));

        if self.used.insert(base.clone()) {
            return base;
        }

        let (stem, ext) = match base.rfind('.') {
            Some(dot) if dot > 0 => base.split_at(dot),
            _ => (base.as_str(), ""),
        };
        let digest = &hex::encode(Sha256::digest(key.as_bytes()))[..8];

        let mut candidate = format!("{stem}_{digest}{ext}");
        let mut counter = 2;
        while !self.used.insert(candidate.clone()) {
            candidate = format!("{stem}_{digest}_{counter}{ext}");
            counter += 1;
        }
        candidate
    }
}

async fn write_mapping(path: &Path, mapping: &CanonicalMapping) -> Result<()> {
    let json = serde_json::to_string_pretty(mapping).context("Failed to serialize file map")?;
    write_atomic(path, json.as_bytes())
        .await
        .with_context(|| format!("Failed to write file map: {}", path.display()))
}

/// Load a mapping written by [`MediaDeduplicator::run`].
///
/// # Errors
///
/// Returns an error if the file is missing or not a JSON object of strings.
pub async fn load_mapping(path: &Path) -> Result<CanonicalMapping> {
    let json = tokio::fs::read_to_string(path).await.with_context(|| {
        format!(
            "File map not found at {} (run the media stage first)",
            path.display()
        )
    })?;
    serde_json::from_str(&json).with_context(|| format!("Invalid file map: {}", path.display()))
}
