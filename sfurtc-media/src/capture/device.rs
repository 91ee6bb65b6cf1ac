//! Microphone input through cpal

use super::audio::AudioSendPipeline;
use crate::error::{MediaError, MediaResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread;
use tracing::{info, warn};

/// Names of the available input devices
pub fn input_device_names() -> MediaResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices().map_err(|e| MediaError::AudioDevice {
        message: format!("Failed to enumerate devices: {}", e),
    })?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Running microphone stream
///
/// The cpal stream is not `Send`, so it is owned by a dedicated thread that
/// keeps it alive until [`CpalMicrophone::stop`].
pub struct CpalMicrophone {
    running: Arc<AtomicBool>,
    skipped: Arc<AtomicU64>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CpalMicrophone {
    /// Open an input device (default when `device_name` is `None`) feeding `pipeline`
    pub fn start(
        pipeline: Arc<Mutex<AudioSendPipeline>>,
        device_name: Option<String>,
        sample_rate: u32,
    ) -> MediaResult<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let skipped = Arc::new(AtomicU64::new(0));
        let (ready_tx, ready_rx) = std_mpsc::channel::<MediaResult<()>>();
        let thread_running = running.clone();
        let thread_skipped = skipped.clone();

        let handle = thread::Builder::new()
            .name("sfurtc-microphone".to_string())
            .spawn(move || {
                let stream =
                    match build_input(pipeline, device_name.as_deref(), sample_rate, thread_skipped)
                    {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                let _ = ready_tx.send(Ok(()));
                while thread_running.load(Ordering::Relaxed) {
                    thread::park();
                }
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("microphone capture started at {} Hz", sample_rate);
                Ok(Self {
                    running,
                    skipped,
                    thread: Some(handle),
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(MediaError::AudioDevice {
                message: "microphone thread exited during startup".to_string(),
            }),
        }
    }

    /// Callbacks skipped because the pipeline was busy
    pub fn skipped_callbacks(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Stop capturing
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                warn!("microphone thread panicked");
            }
        }
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input(
    pipeline: Arc<Mutex<AudioSendPipeline>>,
    device_name: Option<&str>,
    sample_rate: u32,
    skipped: Arc<AtomicU64>,
) -> MediaResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| MediaError::AudioDevice {
                message: format!("Failed to enumerate devices: {}", e),
            })?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| MediaError::DeviceNotFound {
                device_id: name.to_string(),
            })?,
        None => host
            .default_input_device()
            .ok_or_else(|| MediaError::DeviceNotFound {
                device_id: "default input device".to_string(),
            })?,
    };

    let supported = device
        .default_input_config()
        .map_err(|e| MediaError::AudioDevice {
            message: format!("Failed to get default input config: {}", e),
        })?;
    let channels = supported.channels();
    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let on_error = |err| warn!("audio capture stream error: {}", err);

    // the callback must not wait on the pipeline lock
    let stream = match supported.sample_format() {
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| match pipeline.try_lock() {
                Some(mut pipeline) => pipeline.push_pcm(data, channels),
                None => {
                    skipped.fetch_add(1, Ordering::Relaxed);
                }
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::F32 => {
            let mut scratch = Vec::new();
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    scratch.clear();
                    scratch.extend(
                        data.iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                    );
                    match pipeline.try_lock() {
                        Some(mut pipeline) => pipeline.push_pcm(&scratch, channels),
                        None => {
                            skipped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                },
                on_error,
                None,
            )
        }
        sample_format => {
            return Err(MediaError::AudioDevice {
                message: format!("Unsupported sample format: {:?}", sample_format),
            })
        }
    }
    .map_err(|e| MediaError::AudioDevice {
        message: format!("Failed to build input stream: {}", e),
    })?;

    stream.play().map_err(|e| MediaError::AudioDevice {
        message: format!("Failed to start stream: {}", e),
    })?;
    Ok(stream)
}
