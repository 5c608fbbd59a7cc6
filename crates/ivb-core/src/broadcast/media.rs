//! File classification and promo-folder loading.

use std::path::{Path, PathBuf};

use crate::{
    messaging::types::{MediaFile, MediaKind},
    Result,
};

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm"];
pub const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

/// File that supplies the caption when present in a promo folder or upload.
pub const CAPTION_FILE: &str = "message.txt";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Photo,
    Video,
    Text,
    Document,
}

impl FileKind {
    pub fn media_kind(self) -> Option<MediaKind> {
        match self {
            FileKind::Photo => Some(MediaKind::Photo),
            FileKind::Video => Some(MediaKind::Video),
            FileKind::Text | FileKind::Document => None,
        }
    }
}

/// Classify a file by its (case-insensitive) extension.
pub fn file_kind(name: &str) -> FileKind {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Photo
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Video
    } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        FileKind::Text
    } else {
        FileKind::Document
    }
}

/// Build a media descriptor for `path` if it is a photo or video.
pub fn media_file(path: &Path, name: &str) -> Option<MediaFile> {
    if name == CAPTION_FILE {
        return None;
    }
    let kind = file_kind(name).media_kind()?;
    Some(MediaFile {
        path: path.to_path_buf(),
        kind,
        name: name.to_string(),
    })
}

/// Normalize a caption: surrounding whitespace is dropped, empty means none.
pub fn normalize_caption(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Contents of a promo folder.
#[derive(Clone, Debug, Default)]
pub struct PromoContent {
    /// Every non-hidden file name in the folder (these get archived).
    pub files: Vec<String>,
    /// Photo/video files, sorted by name.
    pub media: Vec<MediaFile>,
    pub caption: Option<String>,
}

impl PromoContent {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Read a promo folder: media files plus an optional `message.txt` caption.
///
/// Hidden files (leading `.`) and subdirectories are ignored.
pub async fn load_promo_dir(dir: &Path) -> Result<PromoContent> {
    let mut files = Vec::new();
    let mut rd = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !entry.file_type().await?.is_file() {
            continue;
        }
        files.push(name);
    }
    files.sort();

    let caption = if files.iter().any(|f| f == CAPTION_FILE) {
        let raw = tokio::fs::read_to_string(dir.join(CAPTION_FILE)).await?;
        normalize_caption(&raw)
    } else {
        None
    };

    let media = files
        .iter()
        .filter_map(|name| media_file(&dir.join(name), name))
        .collect();

    Ok(PromoContent {
        files,
        media,
        caption,
    })
}

/// Paths of every file listed in `content`, rooted at `dir`.
pub fn promo_paths(dir: &Path, content: &PromoContent) -> Vec<PathBuf> {
    content.files.iter().map(|f| dir.join(f)).collect()
}
