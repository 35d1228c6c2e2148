//! Crash-safe file replacement.

use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use feedlinks_shared::{FeedLinksError, Result};

/// Write `bytes` to `path` through a sibling temp file and a rename, so
/// readers see either the old or the new content.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .map_err(|e| FeedLinksError::io(&parent, e))?;

    let temp_path = parent.join(format!(".{}.tmp", Uuid::now_v7()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .map_err(|e| FeedLinksError::io(&temp_path, e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| FeedLinksError::io(&temp_path, e))?;
    file.flush()
        .await
        .map_err(|e| FeedLinksError::io(&temp_path, e))?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(FeedLinksError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replaces_existing_content_and_leaves_no_temp_files() {
        let dir = std::env::temp_dir().join(format!("feedlinks-atomic-{}", Uuid::now_v7()));
        let path = dir.join("nested").join("out.json");

        write_atomic(&path, b"first").await.expect("first write");
        write_atomic(&path, b"second").await.expect("second write");

        let content = fs::read_to_string(&path).await.expect("read back");
        assert_eq!(content, "second");

        let mut entries = fs::read_dir(dir.join("nested")).await.expect("read dir");
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.expect("entry") {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["out.json"]);
    }
}
