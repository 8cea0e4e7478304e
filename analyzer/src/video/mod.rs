//! Frame-sequential video I/O.
//!
//! Decoding and encoding are delegated to ffmpeg subprocesses speaking raw
//! RGB24 over pipes. The pipelines only see the [`FrameSource`] and
//! [`FrameSink`] traits, so tests drive them with in-memory frames.

mod probe;
mod reader;
mod stderr;
mod writer;

pub use probe::{parse_probe_output, probe, VideoInfo};
pub use reader::FfmpegReader;
pub use writer::{check_ffmpeg_available, FfmpegWriter, FourCc};

use crate::error::{DecodeError, EncodeError};

/// One decoded frame: packed 8-bit RGB, row-major.
pub type Frame = image::RgbImage;

/// Ordered source of frames with fixed geometry.
pub trait FrameSource {
    /// (width, height) of every frame this source yields.
    fn geometry(&self) -> (u32, u32);

    /// Next frame, or `None` at end of stream.
    fn read_frame(&mut self) -> Result<Option<Frame>, DecodeError>;
}

/// Destination for encoded frames.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), EncodeError>;

    /// Flush and close the output. Dropping a sink without calling this
    /// abandons the output.
    fn finish(self) -> Result<(), EncodeError>
    where
        Self: Sized;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory source that yields a fixed list of frames.
    pub struct VecSource {
        frames: VecDeque<Frame>,
        geometry: (u32, u32),
    }

    impl VecSource {
        pub fn new(frames: Vec<Frame>) -> Self {
            let geometry = frames
                .first()
                .map(|f| f.dimensions())
                .unwrap_or((0, 0));
            Self {
                frames: frames.into(),
                geometry,
            }
        }
    }

    impl FrameSource for VecSource {
        fn geometry(&self) -> (u32, u32) {
            self.geometry
        }

        fn read_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
            Ok(self.frames.pop_front())
        }
    }

    /// Source that fails on the n-th read.
    pub struct FailingSource {
        pub inner: VecSource,
        pub fail_at: usize,
        pub reads: usize,
    }

    impl FrameSource for FailingSource {
        fn geometry(&self) -> (u32, u32) {
            self.inner.geometry()
        }

        fn read_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
            let n = self.reads;
            self.reads += 1;
            if n == self.fail_at {
                return Err(DecodeError::Ffmpeg("corrupt packet".into()));
            }
            self.inner.read_frame()
        }
    }

    /// Sink that keeps every written frame.
    #[derive(Default)]
    pub struct VecSink {
        pub frames: Vec<Frame>,
        pub finished: bool,
    }

    impl FrameSink for &mut VecSink {
        fn write_frame(&mut self, frame: &Frame) -> Result<(), EncodeError> {
            self.frames.push(frame.clone());
            Ok(())
        }

        fn finish(self) -> Result<(), EncodeError> {
            self.finished = true;
            Ok(())
        }
    }

    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        Frame::from_pixel(width, height, image::Rgb(rgb))
    }

    /// Write an executable shell script standing in for ffmpeg or ffprobe.
    #[cfg(unix)]
    pub fn fake_tool(dir: &std::path::Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }
}
