//! Audio output sinks
//!
//! The mixer hands every forwarded packet to an [`AudioSink`]. Sinks either
//! pass packets on (to a host application over a channel) or play them out
//! locally through cpal.

use crate::codecs::{AudioPayloadCodec, OpusConfig, PathCodecs};
use crate::gain::soft_clip;
use bytes::Bytes;
use parking_lot::Mutex;
use sfurtc_core::{AudioEncoding, ParticipantId, StreamRole};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Packet forwarded by the mixer toward the output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixedPacket {
    /// Sending participant, when known
    pub participant: Option<ParticipantId>,
    /// Stream role (microphone or screen audio)
    pub role: StreamRole,
    /// Payload encoding
    pub encoding: AudioEncoding,
    /// Wire SSRC
    pub ssrc: u32,
    /// RTP sequence number
    pub sequence: u16,
    /// RTP timestamp
    pub timestamp: u32,
    /// RTP marker bit
    pub marker: bool,
    /// Encoded payload (scaled or original)
    pub payload: Bytes,
}

/// Destination for mixed audio
pub trait AudioSink: Send + Sync {
    /// Accept one packet; must not block
    fn deliver(&self, packet: MixedPacket);

    /// Drop buffered audio for a stream that went away
    fn flush_ssrc(&self, _ssrc: u32) {}

    /// Drop all buffered audio
    fn flush(&self) {}
}

/// Sink that forwards packets over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelAudioSink {
    sender: mpsc::UnboundedSender<MixedPacket>,
}

impl ChannelAudioSink {
    /// Create the sink and the receiving half
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MixedPacket>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl AudioSink for ChannelAudioSink {
    fn deliver(&self, packet: MixedPacket) {
        if self.sender.send(packet).is_err() {
            debug!("audio sink receiver dropped");
        }
    }
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAudioSink;

impl AudioSink for NullAudioSink {
    fn deliver(&self, _packet: MixedPacket) {}
}

/// Ring buffer for managing playback timing
#[derive(Debug)]
struct AudioBuffer {
    samples: Vec<i16>,
    read_pos: usize,
    write_pos: usize,
    capacity: usize,
    underruns: u64,
    overflows: u64,
}

impl AudioBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
            capacity,
            underruns: 0,
            overflows: 0,
        }
    }

    fn write(&mut self, data: &[i16]) -> usize {
        let to_write = data.len().min(self.available_write());
        if to_write < data.len() {
            self.overflows += 1;
        }
        for &sample in &data[..to_write] {
            self.samples[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.capacity;
        }
        to_write
    }

    /// Add buffered samples onto `out`; returns how many were available
    fn mix_into(&mut self, out: &mut [i32]) -> usize {
        let to_read = out.len().min(self.available_read());
        if to_read < out.len() {
            self.underruns += 1;
        }
        for slot in out.iter_mut().take(to_read) {
            *slot += self.samples[self.read_pos] as i32;
            self.read_pos = (self.read_pos + 1) % self.capacity;
        }
        to_read
    }

    fn available_read(&self) -> usize {
        if self.write_pos >= self.read_pos {
            self.write_pos - self.read_pos
        } else {
            self.capacity - self.read_pos + self.write_pos
        }
    }

    fn available_write(&self) -> usize {
        self.capacity - self.available_read() - 1
    }
}

/// Playout statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayoutStats {
    /// Streams currently buffered
    pub active_streams: usize,
    /// Packets decoded into the buffers
    pub packets_decoded: u64,
    /// Packets that failed to decode
    pub decode_failures: u64,
    /// Reads that ran short of data
    pub underruns: u64,
    /// Writes that did not fit
    pub overflows: u64,
}

struct PlayoutStream {
    codecs: PathCodecs,
    buffer: AudioBuffer,
}

/// Per-stream decode and summing stage in front of an output device
pub struct PlayoutMixer {
    opus: OpusConfig,
    capacity: usize,
    streams: HashMap<u32, PlayoutStream>,
    packets_decoded: u64,
    decode_failures: u64,
    retired_underruns: u64,
    retired_overflows: u64,
}

impl PlayoutMixer {
    /// Create a playout stage; `buffer_ms` bounds the per-stream latency
    pub fn new(opus: OpusConfig, buffer_ms: u32) -> Self {
        let capacity =
            (opus.sample_rate as usize * opus.channels as usize * buffer_ms as usize) / 1000 + 1;
        Self {
            opus,
            capacity,
            streams: HashMap::new(),
            packets_decoded: 0,
            decode_failures: 0,
            retired_underruns: 0,
            retired_overflows: 0,
        }
    }

    /// Decode a packet into its stream buffer
    pub fn push(&mut self, packet: &MixedPacket) {
        if !self.streams.contains_key(&packet.ssrc) {
            match PathCodecs::new(self.opus.clone()) {
                Ok(codecs) => {
                    self.streams.insert(
                        packet.ssrc,
                        PlayoutStream {
                            codecs,
                            buffer: AudioBuffer::new(self.capacity),
                        },
                    );
                }
                Err(e) => {
                    warn!("playout decoder for ssrc {} unavailable: {}", packet.ssrc, e);
                    self.decode_failures += 1;
                    return;
                }
            }
        }
        let Some(stream) = self.streams.get_mut(&packet.ssrc) else {
            return;
        };
        match stream.codecs.codec_for(packet.encoding).decode(&packet.payload) {
            Ok(pcm) => {
                let pcm = match packet.encoding {
                    // G.711 is mono at 8 kHz; upsample and spread to the output layout
                    AudioEncoding::Pcmu | AudioEncoding::Pcma => {
                        upsample_mono(&pcm, self.opus.sample_rate / 8000, self.opus.channels)
                    }
                    AudioEncoding::Opus => pcm,
                };
                stream.buffer.write(&pcm);
                self.packets_decoded += 1;
            }
            Err(e) => {
                debug!("playout decode failed for ssrc {}: {}", packet.ssrc, e);
                self.decode_failures += 1;
            }
        }
    }

    /// Sum all streams into `out`, silence where nothing is buffered
    pub fn render(&mut self, out: &mut [i16]) {
        let mut acc = vec![0i32; out.len()];
        for stream in self.streams.values_mut() {
            stream.buffer.mix_into(&mut acc);
        }
        for (dst, &sum) in out.iter_mut().zip(acc.iter()) {
            *dst = soft_clip(sum as f32);
        }
    }

    /// Forget a stream
    pub fn remove(&mut self, ssrc: u32) {
        if let Some(stream) = self.streams.remove(&ssrc) {
            self.retired_underruns += stream.buffer.underruns;
            self.retired_overflows += stream.buffer.overflows;
        }
    }

    /// Forget every stream
    pub fn clear(&mut self) {
        let ssrcs: Vec<u32> = self.streams.keys().copied().collect();
        for ssrc in ssrcs {
            self.remove(ssrc);
        }
    }

    /// Playout counters
    pub fn stats(&self) -> PlayoutStats {
        PlayoutStats {
            active_streams: self.streams.len(),
            packets_decoded: self.packets_decoded,
            decode_failures: self.decode_failures,
            underruns: self.retired_underruns
                + self.streams.values().map(|s| s.buffer.underruns).sum::<u64>(),
            overflows: self.retired_overflows
                + self.streams.values().map(|s| s.buffer.overflows).sum::<u64>(),
        }
    }
}

fn upsample_mono(pcm: &[i16], factor: u32, channels: u8) -> Vec<i16> {
    let factor = factor.max(1) as usize;
    let channels = channels.max(1) as usize;
    let mut out = Vec::with_capacity(pcm.len() * factor * channels);
    for &sample in pcm {
        for _ in 0..factor * channels {
            out.push(sample);
        }
    }
    out
}

/// Sink feeding a shared [`PlayoutMixer`]
#[derive(Clone)]
pub struct PlayoutSink {
    playout: Arc<Mutex<PlayoutMixer>>,
}

impl PlayoutSink {
    /// Wrap a playout stage
    pub fn new(playout: PlayoutMixer) -> Self {
        Self {
            playout: Arc::new(Mutex::new(playout)),
        }
    }

    /// Shared playout stage, read by the output callback
    pub fn playout(&self) -> Arc<Mutex<PlayoutMixer>> {
        self.playout.clone()
    }
}

impl AudioSink for PlayoutSink {
    fn deliver(&self, packet: MixedPacket) {
        self.playout.lock().push(&packet);
    }

    fn flush_ssrc(&self, ssrc: u32) {
        self.playout.lock().remove(ssrc);
    }

    fn flush(&self) {
        self.playout.lock().clear();
    }
}

#[cfg(feature = "devices")]
pub use device::CpalPlayback;

#[cfg(feature = "devices")]
mod device {
    use super::PlayoutMixer;
    use crate::error::{MediaError, MediaResult};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc as std_mpsc, Arc};
    use std::thread;
    use tracing::{info, warn};

    /// Output stream driving a [`PlayoutMixer`] from the device callback
    ///
    /// cpal streams are not `Send`, so the stream lives on a dedicated thread
    /// that parks until [`CpalPlayback::stop`].
    pub struct CpalPlayback {
        running: Arc<AtomicBool>,
        thread: Option<thread::JoinHandle<()>>,
    }

    impl CpalPlayback {
        /// Open the output device (default when `device_name` is `None`) and start playing
        pub fn start(
            playout: Arc<Mutex<PlayoutMixer>>,
            device_name: Option<String>,
            sample_rate: u32,
            channels: u16,
        ) -> MediaResult<Self> {
            let running = Arc::new(AtomicBool::new(true));
            let (ready_tx, ready_rx) = std_mpsc::channel::<MediaResult<()>>();
            let thread_running = running.clone();

            let handle = thread::Builder::new()
                .name("sfurtc-playback".to_string())
                .spawn(move || {
                    let stream =
                        match build_stream(playout, device_name.as_deref(), sample_rate, channels) {
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
                    info!("audio playback started at {} Hz, {} channels", sample_rate, channels);
                    Ok(Self {
                        running,
                        thread: Some(handle),
                    })
                }
                Ok(Err(e)) => {
                    let _ = handle.join();
                    Err(e)
                }
                Err(_) => Err(MediaError::AudioDevice {
                    message: "playback thread exited during startup".to_string(),
                }),
            }
        }

        /// Whether the stream is running
        pub fn is_running(&self) -> bool {
            self.running.load(Ordering::Relaxed)
        }

        /// Stop the stream and join its thread
        pub fn stop(&mut self) {
            self.running.store(false, Ordering::Relaxed);
            if let Some(handle) = self.thread.take() {
                handle.thread().unpark();
                if handle.join().is_err() {
                    warn!("playback thread panicked");
                }
            }
        }
    }

    impl Drop for CpalPlayback {
        fn drop(&mut self) {
            self.stop();
        }
    }

    fn build_stream(
        playout: Arc<Mutex<PlayoutMixer>>,
        device_name: Option<&str>,
        sample_rate: u32,
        channels: u16,
    ) -> MediaResult<cpal::Stream> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .output_devices()
                .map_err(|e| MediaError::AudioDevice {
                    message: format!("Failed to enumerate devices: {}", e),
                })?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| MediaError::DeviceNotFound {
                    device_id: name.to_string(),
                })?,
            None => host
                .default_output_device()
                .ok_or_else(|| MediaError::DeviceNotFound {
                    device_id: "default output device".to_string(),
                })?,
        };

        let supported = device
            .default_output_config()
            .map_err(|e| MediaError::AudioDevice {
                message: format!("Failed to get default output config: {}", e),
            })?;
        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let on_error = |err| warn!("audio render stream error: {}", err);

        let stream = match supported.sample_format() {
            cpal::SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    playout.lock().render(data);
                },
                on_error,
                None,
            ),
            cpal::SampleFormat::F32 => {
                let mut scratch = Vec::new();
                device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        scratch.resize(data.len(), 0i16);
                        playout.lock().render(&mut scratch);
                        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
                            *dst = src as f32 / i16::MAX as f32;
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
            message: format!("Failed to build output stream: {}", e),
        })?;

        stream.play().map_err(|e| MediaError::AudioDevice {
            message: format!("Failed to start stream: {}", e),
        })?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcmu_packet(ssrc: u32, byte: u8, len: usize) -> MixedPacket {
        MixedPacket {
            participant: None,
            role: StreamRole::Microphone,
            encoding: AudioEncoding::Pcmu,
            ssrc,
            sequence: 0,
            timestamp: 0,
            marker: false,
            payload: Bytes::from(vec![byte; len]),
        }
    }

    #[test]
    fn test_audio_buffer_underrun_counted() {
        let mut buffer = AudioBuffer::new(8);
        assert_eq!(buffer.write(&[1, 2, 3]), 3);
        let mut out = vec![0i32; 5];
        assert_eq!(buffer.mix_into(&mut out), 3);
        assert_eq!(out, vec![1, 2, 3, 0, 0]);
        assert_eq!(buffer.underruns, 1);
    }

    #[test]
    fn test_audio_buffer_overflow_counted() {
        let mut buffer = AudioBuffer::new(4);
        assert_eq!(buffer.write(&[1, 2, 3, 4, 5]), 3);
        assert_eq!(buffer.overflows, 1);
    }

    #[test]
    fn test_playout_sums_streams() {
        let config = OpusConfig {
            channels: 1,
            ..OpusConfig::default()
        };
        let mut playout = PlayoutMixer::new(config, 100);
        // 0xFE decodes to +8 in µ-law
        playout.push(&pcmu_packet(1, 0xFE, 10));
        playout.push(&pcmu_packet(2, 0xFE, 10));
        let mut out = vec![0i16; 60];
        playout.render(&mut out);
        assert!(out.iter().all(|&s| s == 16));
        assert_eq!(playout.stats().active_streams, 2);

        playout.remove(1);
        assert_eq!(playout.stats().active_streams, 1);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelAudioSink::new();
        sink.deliver(pcmu_packet(9, 0xFF, 4));
        let packet = rx.recv().await.unwrap();
        assert_eq!(packet.ssrc, 9);
    }
}
