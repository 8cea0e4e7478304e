//! Structured results handed back to callers.

use serde::Serialize;
use std::fmt;

use crate::error::AnalysisError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    AiLikely,
    RealLikely,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::AiLikely => "AI_LIKELY",
            Verdict::RealLikely => "REAL_LIKELY",
        })
    }
}

/// Outcome of one scoring pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreReport {
    /// Every decoded frame, sampled or not.
    pub total_frames_examined: u64,
    pub sampled_frames: u64,
    /// Sampled frames in which the detector found at least one box.
    pub detected_frames: u64,
    pub detection_ratio: f64,
    pub avg_variance: f64,
    /// 0..=100, two decimals.
    pub score: f64,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MotionStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

/// Outcome of one motion-annotation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MotionReport {
    pub status: MotionStatus,
    /// Frame-pair transitions processed after the first pair.
    pub frames_analyzed: u64,
    pub motion_detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl MotionReport {
    pub fn success(frames_analyzed: u64, motion_detected: bool) -> Self {
        Self {
            status: MotionStatus::Success,
            frames_analyzed,
            motion_detected,
            error: None,
        }
    }

    pub fn failure(err: &AnalysisError) -> Self {
        Self {
            status: MotionStatus::Error,
            frames_analyzed: 0,
            motion_detected: false,
            error: Some(ErrorInfo {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == MotionStatus::Success
    }
}

impl From<Result<MotionReport, AnalysisError>> for MotionReport {
    fn from(result: Result<MotionReport, AnalysisError>) -> Self {
        match result {
            Ok(report) => report,
            Err(e) => MotionReport::failure(&e),
        }
    }
}
