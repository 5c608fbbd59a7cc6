use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::Utc;

use crate::{errors::Error, Result};

// ============== Timestamp Helpers ==============

/// Today's date in UTC as `YYYY-MM-DD` (archive folder name).
pub fn iso_date_utc() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Operator-facing duration: `"1m 5s"`, or `"42s"` under a minute.
pub fn format_duration(d: Duration) -> String {
    let seconds = d.as_secs();
    let minutes = seconds / 60;
    let remaining = seconds % 60;
    if minutes > 0 {
        format!("{minutes}m {remaining}s")
    } else {
        format!("{remaining}s")
    }
}

// ============== Text Helpers ==============

/// Truncate to `max_chars` characters, appending `...` when cut.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}...")
}

// ============== Archive Helpers ==============

/// Move `files` into `sent_root/<date>/`, overwriting same-named files.
///
/// Returns the destination paths in input order. Falls back to copy + remove
/// when a rename crosses filesystems.
pub async fn archive_files(files: &[PathBuf], sent_root: &Path, date: &str) -> Result<Vec<PathBuf>> {
    let dest_dir = sent_root.join(date);
    tokio::fs::create_dir_all(&dest_dir).await?;

    let mut moved = Vec::with_capacity(files.len());
    for src in files {
        let Some(name) = src.file_name() else {
            return Err(Error::InvalidPath {
                path: src.clone(),
                reason: "no file name".to_string(),
            });
        };
        let dest = dest_dir.join(name);
        move_file(src, &dest).await?;
        moved.push(dest);
    }
    Ok(moved)
}

async fn move_file(src: &Path, dest: &Path) -> Result<()> {
    if tokio::fs::rename(src, dest).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(src, dest).await?;
    tokio::fs::remove_file(src).await?;
    Ok(())
}
