use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;
use vidscan_common::config::FfmpegConfig;

use crate::error::DecodeError;

/// Stream properties of the first video stream in a file.
///
/// `width` and `height` are the displayed geometry: ffmpeg applies the
/// stream's rotation when decoding, so a 90° stream comes out transposed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Display rotation in degrees, normalised into 0..360.
    pub rotation: u32,
    pub fps: f64,
    /// Container-reported frame count; many muxers leave it unset.
    pub frame_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    #[serde(default)]
    side_data_list: Vec<SideData>,
    #[serde(default)]
    tags: StreamTags,
}

#[derive(Debug, Deserialize)]
struct SideData {
    rotation: Option<f64>,
}

/// Older muxers carry rotation as a `rotate` tag instead of a display matrix.
#[derive(Debug, Default, Deserialize)]
struct StreamTags {
    rotate: Option<String>,
}

impl ProbeStream {
    fn rotation(&self) -> u32 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|sd| sd.rotation)
            .or_else(|| self.tags.rotate.as_deref().and_then(|r| r.trim().parse().ok()))
            .unwrap_or(0.0);
        // Display matrices may report negative angles.
        (degrees.round() as i64).rem_euclid(360) as u32
    }
}

/// Run ffprobe on `path` and return the geometry of its first video stream.
pub fn probe(config: &FfmpegConfig, path: &Path) -> Result<VideoInfo, DecodeError> {
    let output = Command::new(&config.ffprobe_path)
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height,avg_frame_rate,nb_frames:stream_side_data=rotation:stream_tags=rotate",
            "-of",
            "json",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| DecodeError::Spawn {
            program: config.ffprobe_path.clone(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DecodeError::Probe(stderr.trim().to_string()));
    }

    let info = parse_probe_output(&output.stdout)
        .map_err(|e| match e {
            DecodeError::NoVideoStream(_) => DecodeError::NoVideoStream(path.display().to_string()),
            other => other,
        })?;
    debug!(
        path = %path.display(),
        width = info.width,
        height = info.height,
        rotation = info.rotation,
        fps = info.fps,
        frame_count = ?info.frame_count,
        "probed video"
    );
    Ok(info)
}

/// Parse the JSON printed by `ffprobe -of json -show_entries stream=...`.
pub fn parse_probe_output(json: &[u8]) -> Result<VideoInfo, DecodeError> {
    let parsed: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| DecodeError::Probe(e.to_string()))?;

    let stream = parsed
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| DecodeError::NoVideoStream(String::new()))?;

    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(DecodeError::Geometry { width, height });
    }

    let rotation = stream.rotation();
    let (width, height) = match rotation {
        90 | 270 => (height, width),
        _ => (width, height),
    };

    Ok(VideoInfo {
        width,
        height,
        rotation,
        fps: stream
            .avg_frame_rate
            .as_deref()
            .and_then(parse_rational)
            .unwrap_or(0.0),
        frame_count: stream
            .nb_frames
            .as_deref()
            .and_then(|n| n.parse::<u64>().ok())
            .filter(|&n| n > 0),
    })
}

/// Parse an ffprobe rational such as "30000/1001". "0/0" yields `None`.
fn parse_rational(s: &str) -> Option<f64> {
    let (num, den) = s.split_once('/').unwrap_or((s, "1"));
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    if den == 0.0 {
        return None;
    }
    Some(num / den)
}
