//! Video analysis: an AI-likelihood scorer and a motion annotator, both
//! driven over frame-sequential sources.

pub mod detector;
pub mod error;
pub mod motion;
pub mod report;
pub mod scorer;
pub mod video;

pub use detector::{load_detector, ObjectDetector};
pub use error::{AnalysisError, DecodeError, EncodeError};
pub use motion::{analyze_motion_file, annotate_motion};
pub use report::{MotionReport, MotionStatus, ScoreReport, Verdict};
pub use scorer::{score_file, score_video};
