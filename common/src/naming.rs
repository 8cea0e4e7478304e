use chrono::{DateTime, TimeZone, Utc};

fn fmt_ts(ms: i64) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now);
    dt.format("%Y%m%dT%H%M%S%3fZ").to_string()
}

/// Lowercased extension of a client-supplied file name, restricted to
/// `[a-z0-9]` and at most 5 characters. Falls back to `mp4`.
pub fn sanitized_extension(file_name: Option<&str>) -> String {
    file_name
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "mp4".into())
}

/// Identifier shared by a job's scratch input and its outputs.
/// e.g. "20260218T093000000Z_000042"
pub fn job_id(now_ms: i64, seq: u64) -> String {
    format!("{ts}_{seq:06}", ts = fmt_ts(now_ms))
}

/// Scratch file name for a job's source video, e.g. "20260218T093000000Z_000042_src.mov".
pub fn source_file_name(job_id: &str, ext: &str) -> String {
    format!("{job_id}_src.{ext}")
}

/// File name of the annotated motion video for a job.
pub fn motion_output_name(job_id: &str) -> String {
    format!("{job_id}_motion.avi")
}
