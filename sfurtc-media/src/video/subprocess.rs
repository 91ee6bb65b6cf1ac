//! Software decoding through an external decoder process
//!
//! Annex-B NAL units are written to the child's stdin. A dedicated reader
//! thread cuts its stdout into fixed-size I420 pictures and keeps only the
//! newest one; a picture nobody collected before the next arrives is dropped.

use super::decoder::{DecodedFrame, SoftwareDecoder};
use crate::error::{MediaError, MediaResult};
use parking_lot::Mutex;
use sfurtc_core::h264::START_CODE;
use std::io::{ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Command line of the decoder process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubprocessConfig {
    /// Executable
    pub program: String,
    /// Arguments; the process must read H.264 Annex-B on stdin and write raw I420 on stdout
    pub args: Vec<String>,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            args: [
                "-hide_banner",
                "-loglevel",
                "error",
                "-flags",
                "low_delay",
                "-f",
                "h264",
                "-i",
                "pipe:0",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "yuv420p",
                "pipe:1",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// One-slot buffer holding the newest decoded picture
#[derive(Debug, Default)]
pub struct LatestFrame {
    slot: Mutex<Option<DecodedFrame>>,
    produced: AtomicU64,
    dropped: AtomicU64,
}

impl LatestFrame {
    /// Store a picture, replacing any uncollected one
    pub fn publish(&self, frame: DecodedFrame) {
        self.produced.fetch_add(1, Ordering::Relaxed);
        if self.slot.lock().replace(frame).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Collect the newest picture
    pub fn take(&self) -> Option<DecodedFrame> {
        self.slot.lock().take()
    }

    /// Pictures published so far
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::Relaxed)
    }

    /// Pictures replaced before being collected
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Running {
    child: Child,
    stdin: ChildStdin,
    reader: Option<thread::JoinHandle<()>>,
}

/// Decoder backed by an external process
pub struct SubprocessDecoder {
    config: SubprocessConfig,
    latest: Arc<LatestFrame>,
    running: Option<Running>,
    buf: Vec<u8>,
}

impl SubprocessDecoder {
    /// Create a decoder; the process starts on [`SoftwareDecoder::initialize`]
    pub fn new(config: SubprocessConfig) -> Self {
        Self {
            config,
            latest: Arc::new(LatestFrame::default()),
            running: None,
            buf: Vec::new(),
        }
    }

    /// Shared latest-picture slot
    pub fn latest(&self) -> Arc<LatestFrame> {
        self.latest.clone()
    }

    fn write_nal(&mut self, nal: &[u8]) -> MediaResult<()> {
        let running = self.running.as_mut().ok_or_else(|| MediaError::InvalidState {
            message: "decoder process not running".to_string(),
        })?;
        self.buf.clear();
        self.buf.extend_from_slice(&START_CODE);
        self.buf.extend_from_slice(nal);
        running
            .stdin
            .write_all(&self.buf)
            .and_then(|_| running.stdin.flush())
            .map_err(|e| MediaError::Process {
                command: self.config.program.clone(),
                message: format!("write to decoder failed: {}", e),
            })
    }
}

impl SoftwareDecoder for SubprocessDecoder {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    fn initialize(&mut self, width: u32, height: u32, sps: &[u8], pps: &[u8]) -> MediaResult<()> {
        self.dispose();

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| MediaError::Process {
                command: self.config.program.clone(),
                message: format!("spawn failed: {}", e),
            })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(MediaError::Process {
                    command: self.config.program.clone(),
                    message: "decoder pipes unavailable".to_string(),
                });
            }
        };

        let frame_size = DecodedFrame::i420_size(width, height);
        let latest = self.latest.clone();
        let reader = match thread::Builder::new()
            .name("sfurtc-decoder-reader".to_string())
            .spawn(move || read_frames(stdout, width, height, frame_size, latest))
        {
            Ok(reader) => reader,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        };

        info!(
            "decoder process {} started for {}x{}",
            self.config.program, width, height
        );
        self.running = Some(Running {
            child,
            stdin,
            reader: Some(reader),
        });

        self.write_nal(sps)?;
        self.write_nal(pps)
    }

    fn decode(&mut self, nal: &[u8], _is_keyframe: bool) -> MediaResult<Option<DecodedFrame>> {
        self.write_nal(nal)?;
        Ok(self.latest.take())
    }

    fn dispose(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        // closing stdin lets the process drain and exit
        drop(running.stdin);
        if let Err(e) = running.child.kill() {
            if e.kind() != ErrorKind::InvalidInput {
                debug!("decoder process kill: {}", e);
            }
        }
        let _ = running.child.wait();
        if let Some(reader) = running.reader.take() {
            if reader.join().is_err() {
                warn!("decoder reader thread panicked");
            }
        }
    }
}

impl Drop for SubprocessDecoder {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn read_frames(
    mut stdout: impl Read,
    width: u32,
    height: u32,
    frame_size: usize,
    latest: Arc<LatestFrame>,
) {
    loop {
        let mut data = vec![0u8; frame_size];
        match stdout.read_exact(&mut data) {
            Ok(()) => latest.publish(DecodedFrame {
                width,
                height,
                data,
            }),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => {
                debug!("decoder output closed: {}", e);
                break;
            }
        }
    }
    debug!(
        "decoder reader exiting after {} frames ({} dropped)",
        latest.produced(),
        latest.dropped()
    );
}
