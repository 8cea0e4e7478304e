//! Frame sampler + scorer.
//!
//! Every `SAMPLE_STRIDE`-th decoded frame goes through the detector and a
//! pixel-variance statistic; the two are blended into a 0..100 score.

use std::path::Path;
use tracing::{debug, info};
use vidscan_common::config::FfmpegConfig;

use crate::detector::{any_boxes, ObjectDetector};
use crate::error::AnalysisError;
use crate::report::{ScoreReport, Verdict};
use crate::video::{FfmpegReader, Frame, FrameSource};

/// Analyse frame indices 0, 30, 60, ...
pub const SAMPLE_STRIDE: u64 = 30;
/// Score contribution of the detection ratio.
pub const DETECTION_WEIGHT: f64 = 50.0;
/// Score contribution of `1 - avg_variance`.
pub const UNIFORMITY_WEIGHT: f64 = 50.0;
/// Scores at or above this are `AI_LIKELY`.
pub const VERDICT_THRESHOLD: f64 = 50.0;
pub const MAX_SCORE: f64 = 100.0;

/// Population variance of every channel value in the frame.
pub fn pixel_variance(frame: &Frame) -> f64 {
    let raw = frame.as_raw();
    if raw.is_empty() {
        return 0.0;
    }
    let (sum, sum_sq) = raw.iter().fold((0u64, 0u64), |(s, sq), &v| {
        let v = v as u64;
        (s + v, sq + v * v)
    });
    let n = raw.len() as f64;
    let mean = sum as f64 / n;
    (sum_sq as f64 / n - mean * mean).max(0.0)
}

/// Pixel variance divided by width × height × 3.
pub fn normalized_variance(frame: &Frame) -> f64 {
    let (width, height) = frame.dimensions();
    let denom = width as f64 * height as f64 * 3.0;
    if denom == 0.0 {
        return 0.0;
    }
    pixel_variance(frame) / denom
}

/// Running statistics of one scoring pass.
#[derive(Debug, Default)]
pub struct ScoreAccumulator {
    frame_index: u64,
    detected_frames: u64,
    variance_scores: Vec<f64>,
}

impl ScoreAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the frame about to be observed is a sampled one.
    pub fn is_sample_due(&self) -> bool {
        self.frame_index % SAMPLE_STRIDE == 0
    }

    /// Record a sampled frame's detector outcome and normalized variance.
    pub fn record_sample(&mut self, detected: bool, variance: f64) {
        if detected {
            self.detected_frames += 1;
        }
        self.variance_scores.push(variance);
    }

    /// Advance past the current frame, sampled or not.
    pub fn advance(&mut self) {
        self.frame_index += 1;
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn finish(self) -> ScoreReport {
        let sampled_frames = self.variance_scores.len() as u64;
        let avg_variance = if self.variance_scores.is_empty() {
            0.0
        } else {
            self.variance_scores.iter().sum::<f64>() / self.variance_scores.len() as f64
        };
        // The ratio is over all decoded frames, not only the sampled ones.
        let detection_ratio = self.detected_frames as f64 / self.frame_index.max(1) as f64;
        let score = compute_score(detection_ratio, avg_variance);

        ScoreReport {
            total_frames_examined: self.frame_index,
            sampled_frames,
            detected_frames: self.detected_frames,
            detection_ratio,
            avg_variance,
            score,
            verdict: verdict_for(score),
        }
    }
}

/// Blend the two signals, round to two decimals and clamp to `[0, MAX_SCORE]`.
pub fn compute_score(detection_ratio: f64, avg_variance: f64) -> f64 {
    let raw = detection_ratio * DETECTION_WEIGHT + (1.0 - avg_variance) * UNIFORMITY_WEIGHT;
    round2(raw).clamp(0.0, MAX_SCORE)
}

pub fn verdict_for(score: f64) -> Verdict {
    if score >= VERDICT_THRESHOLD {
        Verdict::AiLikely
    } else {
        Verdict::RealLikely
    }
}

/// Two decimals, exact ties to even (50.125 -> 50.12).
fn round2(x: f64) -> f64 {
    (x * 100.0).round_ties_even() / 100.0
}

/// Run the sampling loop over `source`. Any decode or detector failure
/// aborts the whole pass.
pub fn score_video<S, D>(source: &mut S, detector: &mut D) -> Result<ScoreReport, AnalysisError>
where
    S: FrameSource + ?Sized,
    D: ObjectDetector + ?Sized,
{
    let mut acc = ScoreAccumulator::new();

    while let Some(frame) = source.read_frame()? {
        if acc.is_sample_due() {
            let results = detector.detect(&frame)?;
            let detected = any_boxes(&results);
            let variance = normalized_variance(&frame);
            debug!(
                frame_index = acc.frame_index(),
                detected,
                variance,
                "sampled frame"
            );
            acc.record_sample(detected, variance);
        }
        acc.advance();
    }

    let report = acc.finish();
    info!(
        detector = detector.name(),
        frames = report.total_frames_examined,
        sampled = report.sampled_frames,
        detected = report.detected_frames,
        score = report.score,
        verdict = %report.verdict,
        "scoring complete"
    );
    Ok(report)
}

/// Decode the file at `path` with ffmpeg and score it.
pub fn score_file<D>(
    ffmpeg: &FfmpegConfig,
    path: &Path,
    detector: &mut D,
) -> Result<ScoreReport, AnalysisError>
where
    D: ObjectDetector + ?Sized,
{
    let mut reader = FfmpegReader::open(ffmpeg, path)?;
    score_video(&mut reader, detector)
}
