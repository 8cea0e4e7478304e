//! Turn a multipart request into a video file on local disk.
//!
//! An uploaded `video` file wins over a `video_url`; the URL is only fetched
//! when no file came with the request.

use axum::extract::multipart::{Field, Multipart};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use vidscan_common::naming;

use crate::download;
use crate::error::ApiError;
use crate::AppState;

static SEQ_COUNTER: AtomicU64 = AtomicU64::new(0);

pub const NO_INPUT: &str = "no video uploaded and no URL given";

/// Fresh job identifier.
pub fn next_job_id() -> String {
    let seq = SEQ_COUNTER.fetch_add(1, Ordering::Relaxed);
    naming::job_id(Utc::now().timestamp_millis(), seq)
}

/// Source video of one job. The file is removed when this is dropped.
#[derive(Debug)]
pub struct ScratchVideo {
    pub job_id: String,
    pub path: PathBuf,
}

impl Drop for ScratchVideo {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "scratch input removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, path = %self.path.display(), "failed to remove scratch input"),
        }
    }
}

/// Read the request's fields and materialise the video under `upload_dir`.
pub async fn receive(state: &AppState, mut multipart: Multipart) -> Result<ScratchVideo, ApiError> {
    let upload_dir = Path::new(&state.config.server.upload_dir);
    let job_id = next_job_id();
    let mut video_url: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("video") => {
                let ext = naming::sanitized_extension(field.file_name());
                let path = upload_dir.join(naming::source_file_name(&job_id, &ext));
                let scratch = ScratchVideo {
                    job_id: job_id.clone(),
                    path,
                };
                let bytes = save_field(field, &scratch.path).await?;
                if bytes > 0 {
                    info!(job_id, bytes, "video uploaded");
                    return Ok(scratch);
                }
                // An empty file part is treated as no upload at all.
            }
            Some("video_url") => {
                video_url = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let Some(raw) = video_url else {
        return Err(ApiError::BadRequest(NO_INPUT.into()));
    };
    let url = download::parse_video_url(&raw)?;
    let ext = naming::sanitized_extension(download::url_file_name(&url));
    let path = upload_dir.join(naming::source_file_name(&job_id, &ext));
    let scratch = ScratchVideo { job_id, path };
    download::fetch_to_file(
        &state.http,
        &url,
        &scratch.path,
        state.config.download.max_bytes,
    )
    .await?;
    Ok(scratch)
}

async fn save_field(mut field: Field<'_>, dest: &Path) -> Result<u64, ApiError> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        written += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(written)
}
