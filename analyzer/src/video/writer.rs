use std::ffi::OsString;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use tracing::{debug, info, warn};
use vidscan_common::config::FfmpegConfig;

use super::stderr::StderrDrain;
use super::{Frame, FrameSink};
use crate::error::EncodeError;

/// Four-character codec code selecting the output encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCc([u8; 4]);

impl FourCc {
    pub const XVID: FourCc = FourCc(*b"XVID");
    pub const MJPG: FourCc = FourCc(*b"MJPG");
    pub const MP4V: FourCc = FourCc(*b"mp4v");
    pub const AVC1: FourCc = FourCc(*b"avc1");

    pub fn new(code: [u8; 4]) -> Self {
        Self(code)
    }

    /// ffmpeg output arguments implementing this codec.
    fn encoder_args(&self) -> Result<&'static [&'static str], EncodeError> {
        let mut code = self.0;
        code.make_ascii_uppercase();
        let args: &'static [&'static str] = match &code {
            b"XVID" => &["-c:v", "mpeg4", "-vtag", "xvid", "-q:v", "5"],
            b"MJPG" => &["-c:v", "mjpeg", "-q:v", "3"],
            b"MP4V" | b"FMP4" => &["-c:v", "mpeg4", "-q:v", "5"],
            b"AVC1" | b"H264" | b"X264" => &["-c:v", "libx264", "-preset", "fast", "-crf", "23"],
            _ => return Err(EncodeError::UnsupportedFourcc(self.to_string())),
        };
        Ok(args)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Encodes frames by piping raw RGB24 into an ffmpeg subprocess.
///
/// Dropping the writer without [`FrameSink::finish`] kills ffmpeg and leaves
/// whatever it had written.
#[derive(Debug)]
pub struct FfmpegWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr: StderrDrain,
    output_path: PathBuf,
    width: u32,
    height: u32,
    frame_count: u64,
    finished: bool,
}

impl FfmpegWriter {
    /// Spawn ffmpeg ready to receive `width`x`height` frames at `fps`.
    pub fn open(
        config: &FfmpegConfig,
        output_path: &Path,
        fourcc: FourCc,
        fps: f64,
        width: u32,
        height: u32,
    ) -> Result<Self, EncodeError> {
        if width == 0 || height == 0 {
            return Err(EncodeError::Geometry { width, height });
        }
        let codec_args = fourcc.encoder_args()?;

        let mut child = Command::new(&config.ffmpeg_path)
            .args(encode_args(output_path, codec_args, fps, width, height))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| EncodeError::Spawn {
                program: config.ffmpeg_path.clone(),
                source,
            })?;

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EncodeError::FfmpegFailed("could not get stdin handle".into()));
        };
        let stderr = StderrDrain::spawn(child.stderr.take());

        debug!(
            %fourcc,
            fps,
            width,
            height,
            output = %output_path.display(),
            "ffmpeg encoder started"
        );

        Ok(Self {
            child,
            stdin: Some(stdin),
            stderr,
            output_path: output_path.to_path_buf(),
            width,
            height,
            frame_count: 0,
            finished: false,
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Remove whatever ffmpeg wrote so far.
    fn discard_output(&self) {
        match std::fs::remove_file(&self.output_path) {
            Ok(()) => debug!(output = %self.output_path.display(), "partial output removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                error = %e,
                output = %self.output_path.display(),
                "failed to remove partial output"
            ),
        }
    }
}

impl FrameSink for FfmpegWriter {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), EncodeError> {
        let (got_w, got_h) = frame.dimensions();
        if (got_w, got_h) != (self.width, self.height) {
            return Err(EncodeError::FrameSize {
                got_w,
                got_h,
                width: self.width,
                height: self.height,
            });
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EncodeError::FfmpegFailed("stdin already closed".into()))?;
        stdin
            .write_all(frame.as_raw())
            .map_err(EncodeError::Write)?;
        self.frame_count += 1;
        Ok(())
    }

    fn finish(mut self) -> Result<(), EncodeError> {
        // Closing stdin tells ffmpeg there are no more frames.
        drop(self.stdin.take());
        self.finished = true;

        let status = self.child.wait().map_err(EncodeError::Wait)?;
        let stderr = self.stderr.collect();
        if !status.success() {
            self.discard_output();
            return Err(EncodeError::FfmpegFailed(format!("{status}: {}", stderr.trim())));
        }

        info!(
            frame_count = self.frame_count,
            output = %self.output_path.display(),
            "encoding complete"
        );
        Ok(())
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.stderr.collect();
        self.discard_output();
        warn!(
            frame_count = self.frame_count,
            output = %self.output_path.display(),
            "encoder dropped before finish; partial output removed"
        );
    }
}

fn encode_args(
    output_path: &Path,
    codec_args: &[&str],
    fps: f64,
    width: u32,
    height: u32,
) -> Vec<OsString> {
    let size = format!("{width}x{height}");
    let rate = fps.to_string();
    let mut args: Vec<OsString> = [
        "-nostdin", "-v", "error", "-y",
        "-f", "rawvideo",
        "-pix_fmt", "rgb24",
        "-s", &size,
        "-r", &rate,
        "-i", "pipe:0",
    ]
    .into_iter()
    .map(OsString::from)
    .collect();
    args.extend(codec_args.iter().map(OsString::from));
    args.extend(["-pix_fmt", "yuv420p"].into_iter().map(OsString::from));
    args.push(output_path.as_os_str().to_owned());
    args
}

/// Check whether ffmpeg is available. Logs a warning if not found.
pub fn check_ffmpeg_available(config: &FfmpegConfig) -> bool {
    match Command::new(&config.ffmpeg_path)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
    {
        Ok(out) if out.status.success() => {
            debug!(path = config.ffmpeg_path, "ffmpeg is available");
            true
        }
        Ok(_) => {
            warn!(path = config.ffmpeg_path, "ffmpeg returned non-zero for -version; decoding may fail");
            false
        }
        Err(e) => {
            warn!(
                path = config.ffmpeg_path,
                error = %e,
                "ffmpeg not found; video analysis will fail until it is installed"
            );
            false
        }
    }
}
