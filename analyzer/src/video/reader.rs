use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};
use tracing::{debug, info, warn};
use vidscan_common::config::FfmpegConfig;

use super::probe::{probe, VideoInfo};
use super::stderr::StderrDrain;
use super::{Frame, FrameSource};
use crate::error::DecodeError;

/// Decodes a video file by piping ffmpeg's rawvideo RGB24 output.
///
/// The ffmpeg child is killed and reaped when the reader is dropped, so an
/// early return from a pipeline never leaks the process.
#[derive(Debug)]
pub struct FfmpegReader {
    child: Child,
    stdout: ChildStdout,
    stderr: StderrDrain,
    info: VideoInfo,
    frame_len: usize,
    frames_read: u64,
    exhausted: bool,
}

impl FfmpegReader {
    /// Probe `path` and start decoding it.
    pub fn open(config: &FfmpegConfig, path: &Path) -> Result<Self, DecodeError> {
        if !path.is_file() {
            return Err(DecodeError::NotFound(path.display().to_string()));
        }

        let info = probe(config, path)?;
        let frame_len = info.width as usize * info.height as usize * 3;

        let mut child = Command::new(&config.ffmpeg_path)
            .args(decode_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| DecodeError::Spawn {
                program: config.ffmpeg_path.clone(),
                source,
            })?;

        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DecodeError::Ffmpeg("could not get stdout handle".into()));
        };
        let stderr = StderrDrain::spawn(child.stderr.take());

        info!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps = info.fps,
            "opened video for decoding"
        );

        Ok(Self {
            child,
            stdout,
            stderr,
            info,
            frame_len,
            frames_read: 0,
            exhausted: false,
        })
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Fill `buf` from stdout. Returns the number of bytes read, which is
    /// short only at end of stream.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize, DecodeError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(DecodeError::Read(e)),
            }
        }
        Ok(filled)
    }

    /// Reap ffmpeg after stdout hit EOF and turn a failed exit into an error.
    fn finish_stream(&mut self) -> Result<(), DecodeError> {
        self.exhausted = true;
        let status = self.child.wait().map_err(DecodeError::Read)?;
        let stderr = self.stderr.collect();
        if status.success() {
            debug!(frames = self.frames_read, "decoder reached end of stream");
            return Ok(());
        }
        Err(DecodeError::Ffmpeg(format!("{status}: {}", stderr.trim())))
    }
}

impl FrameSource for FfmpegReader {
    fn geometry(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }

    fn read_frame(&mut self) -> Result<Option<Frame>, DecodeError> {
        if self.exhausted {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.frame_len];
        let filled = self.read_full(&mut buf)?;

        if filled < self.frame_len {
            if filled > 0 {
                warn!(
                    bytes = filled,
                    expected = self.frame_len,
                    "discarding truncated trailing frame"
                );
            }
            self.finish_stream()?;
            return Ok(None);
        }

        self.frames_read += 1;
        let frame = Frame::from_raw(self.info.width, self.info.height, buf).ok_or(
            DecodeError::Geometry {
                width: self.info.width,
                height: self.info.height,
            },
        )?;
        Ok(Some(frame))
    }
}

impl Drop for FfmpegReader {
    fn drop(&mut self) {
        if self.exhausted {
            return;
        }
        // Stopped before end of stream: ffmpeg may be blocked on a full pipe.
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.stderr.collect();
        debug!(frames = self.frames_read, "decoder closed early");
    }
}

fn decode_args(path: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-nostdin", "-v", "error", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(path.as_os_str().to_owned());
    args.extend(
        ["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"]
            .into_iter()
            .map(OsString::from),
    );
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        let config = FfmpegConfig::default();
        let err = FfmpegReader::open(&config, Path::new("/nonexistent/clip.mp4")).unwrap_err();
        assert!(matches!(err, DecodeError::NotFound(_)));
    }

    #[test]
    fn directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = FfmpegConfig::default();
        let err = FfmpegReader::open(&config, dir.path()).unwrap_err();
        assert!(matches!(err, DecodeError::NotFound(_)));
    }

    #[test]
    fn decode_args_emit_rgb24_on_stdout() {
        let args = decode_args(Path::new("in put.mov"));
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input + 1], "in put.mov");
        assert!(args.windows(2).any(|w| w == ["-pix_fmt", "rgb24"]));
        assert_eq!(args.last().map(String::as_str), Some("-"));
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, decoder_body: &str) -> FfmpegConfig {
        use crate::video::testing::fake_tool;
        FfmpegConfig {
            ffprobe_path: fake_tool(
                dir,
                "ffprobe",
                r#"echo '{"streams":[{"width":4,"height":4,"avg_frame_rate":"25/1"}]}'"#,
            ),
            ffmpeg_path: fake_tool(dir, "ffmpeg", decoder_body),
        }
    }

    #[cfg(unix)]
    #[test]
    fn noisy_stderr_does_not_stall_decoding() {
        let dir = tempfile::tempdir().unwrap();
        // 200 KB of diagnostics, well past a pipe buffer, then one 4x4 frame.
        let config = fake_ffmpeg(
            dir.path(),
            "head -c 200000 /dev/zero | tr '\\0' 'e' >&2\nprintf '%048d' 0",
        );
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"stub").unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = FfmpegReader::open(&config, &input).and_then(|mut reader| {
                let mut frames = 0;
                while reader.read_frame()?.is_some() {
                    frames += 1;
                }
                Ok((frames, reader.frames_read(), reader.info().width))
            });
            let _ = tx.send(result);
        });

        let result = rx
            .recv_timeout(std::time::Duration::from_secs(10))
            .expect("decoder stalled on a full stderr pipe");
        assert_eq!(result.unwrap(), (1, 1, 4));
    }

    #[cfg(unix)]
    #[test]
    fn failed_decode_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_ffmpeg(
            dir.path(),
            "echo 'Invalid data found when processing input' >&2\nexit 1",
        );
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"stub").unwrap();

        let mut reader = FfmpegReader::open(&config, &input).unwrap();
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(&err, DecodeError::Ffmpeg(msg) if msg.contains("Invalid data found")));
        assert_eq!(reader.frames_read(), 0);
    }
}
