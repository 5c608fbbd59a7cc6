use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use axum::extract::Multipart;

use ivb_core::{
    broadcast::media::{self, CAPTION_FILE},
    messaging::types::MediaFile,
};

static JOB_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Per-job upload directory, removed (with its contents) on drop.
#[derive(Debug)]
pub struct UploadDir {
    path: PathBuf,
}

impl UploadDir {
    pub async fn create(root: &Path) -> std::io::Result<Self> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let seq = JOB_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = root.join(format!("job-{millis}-{seq}"));
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UploadDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove upload dir");
            }
        }
    }
}

/// Parsed broadcast request.
#[derive(Debug, Default)]
pub struct UploadedJob {
    pub media: Vec<MediaFile>,
    pub caption: Option<String>,
    /// `None` means "use the test config's own flag".
    pub test_mode: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid multipart request: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),
    #[error("failed to store upload: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid testMode value: {0:?}")]
    TestMode(String),
}

/// Read the multipart form into `dir`.
///
/// Fields: `caption` (text), `testMode` (bool), and any number of file parts.
/// Only photos/videos become media; an uploaded `message.txt` supplies the
/// caption when the `caption` field is empty. Other files are dropped.
///
/// Stored files get an index prefix so that parts sharing a client file name
/// do not overwrite each other; `MediaFile::name` keeps the client's name.
pub async fn read_upload(mut form: Multipart, dir: &UploadDir) -> Result<UploadedJob, UploadError> {
    let mut job = UploadedJob::default();
    let mut caption_file: Option<String> = None;

    while let Some(field) = form.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(sanitize_file_name);

        match (field_name.as_str(), file_name) {
            (_, Some(Some(name))) => {
                let bytes = field.bytes().await?;
                if name == CAPTION_FILE {
                    caption_file = Some(String::from_utf8_lossy(&bytes).into_owned());
                    continue;
                }
                let path = dir.path().join(format!("{:03}-{name}", job.media.len()));
                match media::media_file(&path, &name) {
                    Some(m) => {
                        tokio::fs::write(&path, &bytes).await?;
                        job.media.push(m);
                    }
                    None => tracing::debug!(file = %name, "ignoring non-media upload"),
                }
            }
            (_, Some(None)) => tracing::debug!("ignoring upload without a usable file name"),
            ("caption", None) => job.caption = media::normalize_caption(&field.text().await?),
            ("testMode", None) => {
                let raw = field.text().await?;
                job.test_mode = Some(parse_bool(&raw).ok_or(UploadError::TestMode(raw))?);
            }
            (other, None) => tracing::debug!(field = other, "ignoring unknown form field"),
        }
    }

    if job.caption.is_none() {
        job.caption = caption_file.as_deref().and_then(media::normalize_caption);
    }
    job.media.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(job)
}

/// Strip any client-supplied directories; reject names that are only dots.
fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(|c: char| c == '/' || c == '\\').next()?.trim();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        return None;
    }
    Some(name.to_string())
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
