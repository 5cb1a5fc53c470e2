use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;

/// Suffix of in-flight downloads. Files carrying it are never treated as complete.
pub const PARTIAL_SUFFIX: &str = "part";

/// Distinguishes concurrent writers of the same destination.
static PARTIAL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `contents` to `path` via a uniquely named `.part` sibling and a
/// rename.
///
/// A crash mid-write leaves only the `.part` file behind, so existence checks
/// on `path` stay truthful. Concurrent writers of the same `path` each get
/// their own `.part` file, and the last rename wins.
///
/// # Errors
///
/// Returns an I/O error if the temporary file cannot be written, or if it
/// cannot be renamed and no other writer has produced `path` meanwhile.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let partial = partial_path(path);

    let written = async {
        let mut file = tokio::fs::File::create(&partial).await?;
        file.write_all(contents).await?;
        file.flush().await
    }
    .await;
    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }

    match tokio::fs::rename(&partial, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}

/// `<path>.<pid>-<n>.part`
fn partial_path(path: &Path) -> PathBuf {
    let n = PARTIAL_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut partial = path.as_os_str().to_os_string();
    partial.push(format!(".{}-{n}.{PARTIAL_SUFFIX}", std::process::id()));
    PathBuf::from(partial)
}

/// Find a completed download for `dest`.
///
/// Extension-less destinations get their resolved extension appended on
/// write, so a sibling `name.<ext>` also counts.
pub async fn existing_download(dest: &Path) -> Option<PathBuf> {
    if tokio::fs::try_exists(dest).await.unwrap_or(false) {
        return Some(dest.to_path_buf());
    }
    if dest.extension().is_some() {
        return None;
    }

    let parent = dest.parent()?;
    let wanted = dest.file_name()?;
    let mut entries = tokio::fs::read_dir(parent).await.ok()?;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_candidate = path.file_stem() == Some(wanted)
            && path
                .extension()
                .is_some_and(|ext| ext != PARTIAL_SUFFIX);
        if is_candidate {
            return Some(path);
        }
    }

    None
}

/// Recursively list files under `root`, sorted by path.
///
/// Symlinks are listed unless they resolve to a directory. Directories named in `skip_dirs` (matched against their path relative to
/// `root`) are not descended into.
///
/// # Errors
///
/// Returns an error if a directory cannot be read.
pub async fn collect_files(root: &Path, skip_dirs: &[&Path]) -> Result<Vec<PathBuf>> {
    // Async recursion is not allowed without boxing; use an explicit stack.
    let mut stack = vec![root.to_path_buf()];
    let mut files = Vec::new();

    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_symlink() {
                // Dangling links are listed so readers can report them.
                let is_dir = tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir());
                if !is_dir {
                    files.push(path);
                }
                continue;
            }

            if file_type.is_dir() {
                let relative = path.strip_prefix(root).unwrap_or(&path);
                if !skip_dirs.iter().any(|skip| relative == *skip) {
                    stack.push(path);
                }
                continue;
            }

            if file_type.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Archive-relative key for `path`, always with `/` separators.
#[must_use]
pub fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
