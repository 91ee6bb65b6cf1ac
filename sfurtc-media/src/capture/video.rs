//! Outbound video: capture-process supervision and access-unit delivery
//!
//! The capture tool is started with `--encode` and writes AVCC to stdout. A
//! reader thread converts it to Annex-B access units and hands each one to
//! the send sink with the RTP timestamp increment for the configured rate.

use super::avcc::AvccReader;
use super::{CaptureEvent, CaptureEventHandler, EncodedVideoFrame, EncodedVideoSink};
use crate::error::{MediaError, MediaResult};
use sfurtc_core::{AccessUnit, StreamRole};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// What a video capture process captures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    /// Display by index
    Display(u32),
    /// Camera by device path or index
    Camera(String),
}

/// Video capture configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoCaptureConfig {
    /// Capture tool executable
    pub program: String,
    /// Source to capture
    pub source: VideoSource,
    /// Output width
    pub width: u32,
    /// Output height
    pub height: u32,
    /// Frames per second
    pub fps: u32,
    /// Encoder bitrate in Mbps
    pub bitrate_mbps: u32,
}

impl VideoCaptureConfig {
    /// Camera defaults: 640x480 at 15 fps, 2 Mbps
    pub fn camera(program: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            source: VideoSource::Camera(device.into()),
            width: 640,
            height: 480,
            fps: 15,
            bitrate_mbps: 2,
        }
    }

    /// Screen defaults: 1920x1080 at 30 fps, 6 Mbps
    pub fn screen(program: impl Into<String>, display: u32) -> Self {
        Self {
            program: program.into(),
            source: VideoSource::Display(display),
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate_mbps: 6,
        }
    }

    /// Stream role fed by this source
    pub fn role(&self) -> StreamRole {
        match self.source {
            VideoSource::Display(_) => StreamRole::ScreenShare,
            VideoSource::Camera(_) => StreamRole::Camera,
        }
    }

    /// RTP timestamp increment per frame on the 90 kHz clock
    pub fn timestamp_increment(&self) -> u32 {
        90_000 / self.fps.max(1)
    }

    /// Command-line arguments for the capture tool
    pub fn args(&self) -> Vec<String> {
        let mut args = match &self.source {
            VideoSource::Display(index) => vec!["--display".to_string(), index.to_string()],
            VideoSource::Camera(device) => vec!["--camera".to_string(), device.clone()],
        };
        args.extend([
            "--width".to_string(),
            self.width.to_string(),
            "--height".to_string(),
            self.height.to_string(),
            "--fps".to_string(),
            self.fps.to_string(),
            "--encode".to_string(),
            "--bitrate".to_string(),
            self.bitrate_mbps.to_string(),
        ]);
        args
    }

    fn validate(&self) -> MediaResult<()> {
        if self.width == 0 || self.height == 0 || self.fps == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: format!(
                    "invalid capture format {}x{} @ {} fps",
                    self.width, self.height, self.fps
                ),
            });
        }
        Ok(())
    }
}

/// Forward access units to the sink with a fixed timestamp increment
pub fn pump_access_units(
    reader: impl Read,
    role: StreamRole,
    timestamp_increment: u32,
    sink: &dyn EncodedVideoSink,
    running: &AtomicBool,
    frames: &AtomicU64,
) -> MediaResult<()> {
    for access_unit in AvccReader::new(reader) {
        if !running.load(Ordering::Relaxed) {
            break;
        }
        let access_unit = access_unit?;
        frames.fetch_add(1, Ordering::Relaxed);
        sink.send_video(EncodedVideoFrame {
            role,
            access_unit,
            timestamp_increment,
        });
    }
    Ok(())
}

/// Supervised capture process feeding one video role
pub struct VideoCapturePipeline {
    config: VideoCaptureConfig,
    child: Option<Child>,
    reader: Option<thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
}

impl VideoCapturePipeline {
    /// Create a stopped pipeline
    pub fn new(config: VideoCaptureConfig) -> MediaResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            child: None,
            reader: None,
            running: Arc::new(AtomicBool::new(false)),
            frames: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Configuration
    pub fn config(&self) -> &VideoCaptureConfig {
        &self.config
    }

    /// Whether the capture process is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Access units delivered so far
    pub fn frames_sent(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Start the capture process and its reader thread
    pub fn start(
        &mut self,
        sink: Arc<dyn EncodedVideoSink>,
        events: Option<CaptureEventHandler>,
    ) -> MediaResult<()> {
        if self.is_running() {
            return Err(MediaError::InvalidState {
                message: format!("{} capture already running", self.config.role()),
            });
        }
        self.start_with_args(self.config.args(), sink, events)
    }

    /// Start with explicit arguments instead of the generated ones
    pub fn start_with_args(
        &mut self,
        args: Vec<String>,
        sink: Arc<dyn EncodedVideoSink>,
        events: Option<CaptureEventHandler>,
    ) -> MediaResult<()> {
        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| MediaError::Process {
                command: self.config.program.clone(),
                message: format!("spawn failed: {}", e),
            })?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(MediaError::Process {
                command: self.config.program.clone(),
                message: "stdout unavailable".to_string(),
            });
        };

        let role = self.config.role();
        let increment = self.config.timestamp_increment();
        let running = self.running.clone();
        let frames = self.frames.clone();
        running.store(true, Ordering::Relaxed);

        let spawned = thread::Builder::new()
            .name(format!("sfurtc-{}-capture", role))
            .spawn(move || {
                let result =
                    pump_access_units(stdout, role, increment, sink.as_ref(), &running, &frames);
                let was_running = running.swap(false, Ordering::Relaxed);
                let reason = match result {
                    Ok(()) => "capture process ended".to_string(),
                    Err(e) => {
                        warn!("{} capture stream error: {}", role, e);
                        e.to_string()
                    }
                };
                debug!("{} capture reader exiting: {}", role, reason);
                if was_running {
                    if let Some(handler) = events {
                        handler(CaptureEvent::Stopped { role, reason });
                    }
                }
            });
        let reader = match spawned {
            Ok(reader) => reader,
            Err(e) => {
                self.running.store(false, Ordering::Relaxed);
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        };

        info!(
            "{} capture started: {}x{} @ {} fps",
            role, self.config.width, self.config.height, self.config.fps
        );
        self.child = Some(child);
        self.reader = Some(reader);
        Ok(())
    }

    /// Stop the process and join the reader
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("{} capture reader panicked", self.config.role());
            }
        }
    }
}

impl Drop for VideoCapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Deliver access units produced in-process (for hosts with their own encoder)
pub fn send_access_unit(
    sink: &dyn EncodedVideoSink,
    role: StreamRole,
    access_unit: AccessUnit,
    timestamp_increment: u32,
) {
    sink.send_video(EncodedVideoFrame {
        role,
        access_unit,
        timestamp_increment,
    });
}
