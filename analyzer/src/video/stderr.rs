use std::io::{ErrorKind, Read};
use std::process::ChildStderr;
use std::thread::JoinHandle;

/// Bytes of ffmpeg diagnostics kept for error messages; the rest is read
/// and discarded so the child never blocks on a full stderr pipe.
const KEEP_BYTES: usize = 16 * 1024;

/// Background reader for a child's stderr.
#[derive(Debug)]
pub(crate) struct StderrDrain {
    handle: Option<JoinHandle<String>>,
}

impl StderrDrain {
    pub(crate) fn spawn(pipe: Option<ChildStderr>) -> Self {
        let handle = pipe.and_then(|pipe| {
            std::thread::Builder::new()
                .name("ffmpeg-stderr".into())
                .spawn(move || drain(pipe))
                .ok()
        });
        Self { handle }
    }

    /// Wait for the child to close stderr and return what was kept.
    pub(crate) fn collect(&mut self) -> String {
        self.handle
            .take()
            .and_then(|h| h.join().ok())
            .unwrap_or_default()
    }
}

fn drain(mut pipe: impl Read) -> String {
    let mut kept = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                let room = KEEP_BYTES.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&kept).into_owned()
}
