use crate::detector::DetectorError;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("video file not found: {0}")]
    NotFound(String),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("ffprobe failed: {0}")]
    Probe(String),
    #[error("no video stream in {0}")]
    NoVideoStream(String),
    #[error("invalid frame geometry {width}x{height}")]
    Geometry { width: u32, height: u32 },
    #[error("ffmpeg decode failed: {0}")]
    Ffmpeg(String),
    #[error("failed to read decoded frame: {0}")]
    Read(#[source] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("unsupported fourcc {0:?}")]
    UnsupportedFourcc(String),
    #[error("invalid output geometry {width}x{height}")]
    Geometry { width: u32, height: u32 },
    #[error("frame is {got_w}x{got_h}, writer expects {width}x{height}")]
    FrameSize {
        got_w: u32,
        got_h: u32,
        width: u32,
        height: u32,
    },
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("failed to write frame to ffmpeg stdin: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to wait for ffmpeg: {0}")]
    Wait(#[source] std::io::Error),
    #[error("ffmpeg exited with non-zero status: {0}")]
    FfmpegFailed(String),
}

/// Failure of a whole analysis call. No partial result accompanies it.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("need at least two frames, source yielded {decoded}")]
    InsufficientFrames { decoded: usize },
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

impl AnalysisError {
    /// Stable tag for the failure kind, used in structured reports.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Decode(_) => "decode_error",
            AnalysisError::InsufficientFrames { .. } => "insufficient_frames",
            AnalysisError::Detector(_) => "detector_error",
            AnalysisError::Encode(_) => "encode_error",
        }
    }
}
