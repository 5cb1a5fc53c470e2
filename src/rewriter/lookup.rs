use std::collections::HashMap;

use url::Url;

use crate::archiver::sanitize_filename;
use crate::constants::POSTS_DIR;
use crate::dedup::CanonicalMapping;

/// Stem-based index over a [`CanonicalMapping`].
///
/// Downloaded media may have gained an extension on disk that the page never
/// referenced, so lookups compare names without their extension.
#[derive(Debug, Default, Clone)]
pub struct MediaLookup {
    by_path_stem: HashMap<String, String>,
    by_file_stem: HashMap<String, String>,
}

impl MediaLookup {
    /// Index `mapping`. When several files share a bare stem, the first key in
    /// path order wins.
    #[must_use]
    pub fn new(mapping: &CanonicalMapping) -> Self {
        let mut lookup = Self::default();

        for (key, canonical) in mapping {
            let file = key.rsplit('/').next().unwrap_or(key);
            lookup
                .by_path_stem
                .entry(strip_extension(key).to_string())
                .or_insert_with(|| canonical.clone());
            lookup
                .by_file_stem
                .entry(strip_extension(file).to_string())
                .or_insert_with(|| canonical.clone());
        }

        lookup
    }

    /// Canonical name for a reference made from post `post_dir`: the exact
    /// `posts/<post_dir>/<stem>` entry first, then any file with that stem.
    #[must_use]
    pub fn resolve(&self, post_dir: &str, reference: &Url) -> Option<&str> {
        let file = reference
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())?;
        let file = sanitize_filename(file);
        let stem = strip_extension(&file);

        self.by_path_stem
            .get(&format!("{POSTS_DIR}/{post_dir}/{stem}"))
            .or_else(|| self.by_file_stem.get(stem))
            .map(String::as_str)
    }
}

fn strip_extension(name: &str) -> &str {
    let file_start = name.rfind('/').map_or(0, |slash| slash + 1);
    match name[file_start..].rfind('.') {
        Some(dot) if dot > 0 => &name[..file_start + dot],
        _ => name,
    }
}
