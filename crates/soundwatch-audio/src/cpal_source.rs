//! Microphone-backed [`FrameSource`] built on cpal.
//!
//! The device callback only converts to mono i16 and try-sends into a
//! bounded channel; framing, pooling, and the ring write all happen on the
//! capture thread. Nothing in the callback takes a lock, and a full channel
//! drops the chunk and counts it rather than stalling the device.
//!
//! cpal streams are not `Send` on every backend, so construction is expected
//! to happen on the thread that will pull frames (the capture thread passes
//! a factory closure in for exactly this reason).

use crate::frame::{AudioFrame, FramePool};
use crate::source::FrameSource;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use soundwatch_foundation::AudioError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CHUNK_QUEUE_DEPTH: usize = 32;
const POLL_TIMEOUT: Duration = Duration::from_millis(250);

pub struct CpalSource {
    _stream: cpal::Stream,
    rx: Receiver<Vec<i16>>,
    disconnected: Arc<AtomicBool>,
    dropped_samples: Arc<AtomicU64>,
    pending: VecDeque<i16>,
    pool: FramePool,
    sample_rate: u32,
    frame_samples: usize,
    samples_emitted: u64,
}

impl CpalSource {
    /// Opens `device_name` (or the host default) and starts the input
    /// stream. The device must offer `sample_rate` natively; there is no
    /// resampler behind this, a mismatch is a configuration error.
    pub fn open(
        device_name: Option<&str>,
        sample_rate: u32,
        pool: FramePool,
    ) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .input_devices()
                .map_err(|_| AudioError::DeviceNotFound {
                    name: Some(name.to_string()),
                })?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or(AudioError::DeviceNotFound {
                    name: Some(name.to_string()),
                })?,
            None => host
                .default_input_device()
                .ok_or(AudioError::DeviceNotFound { name: None })?,
        };
        let device_label = device.name().unwrap_or_else(|_| "<unnamed>".into());

        let mut candidates: Vec<_> = device
            .supported_input_configs()?
            .filter(|range| {
                range.min_sample_rate().0 <= sample_rate
                    && sample_rate <= range.max_sample_rate().0
            })
            .collect();
        if candidates.is_empty() {
            let actual = device
                .default_input_config()
                .map(|c| c.sample_rate().0)
                .unwrap_or(0);
            return Err(AudioError::SampleRateMismatch {
                required: sample_rate,
                actual,
            });
        }
        // Prefer formats we convert cheaply, then the fewest channels.
        let format_rank = |f: SampleFormat| match f {
            SampleFormat::I16 => 0,
            SampleFormat::U16 => 1,
            SampleFormat::F32 => 2,
            _ => 3,
        };
        candidates.sort_by_key(|r| (format_rank(r.sample_format()), r.channels()));
        let chosen = candidates.remove(0).with_sample_rate(SampleRate(sample_rate));
        let sample_format = chosen.sample_format();
        let channels = chosen.channels() as usize;
        let config: StreamConfig = chosen.into();

        let (tx, rx) = crossbeam_channel::bounded::<Vec<i16>>(CHUNK_QUEUE_DEPTH);
        let disconnected = Arc::new(AtomicBool::new(false));
        let dropped_samples = Arc::new(AtomicU64::new(0));

        let stream = match sample_format {
            SampleFormat::I16 => build_stream::<i16>(
                &device,
                &config,
                channels,
                tx,
                Arc::clone(&disconnected),
                Arc::clone(&dropped_samples),
                |s| s,
            )?,
            SampleFormat::U16 => build_stream::<u16>(
                &device,
                &config,
                channels,
                tx,
                Arc::clone(&disconnected),
                Arc::clone(&dropped_samples),
                |s| (s as i32 - 32768) as i16,
            )?,
            SampleFormat::F32 => build_stream::<f32>(
                &device,
                &config,
                channels,
                tx,
                Arc::clone(&disconnected),
                Arc::clone(&dropped_samples),
                |s| (s.clamp(-1.0, 1.0) * 32767.0) as i16,
            )?,
            other => {
                return Err(AudioError::FormatNotSupported {
                    format: format!("{other:?}"),
                })
            }
        };
        stream.play()?;

        tracing::info!(
            device = device_label.as_str(),
            rate = sample_rate,
            channels,
            format = ?sample_format,
            "input stream started"
        );

        let frame_samples = pool.frame_len();
        Ok(Self {
            _stream: stream,
            rx,
            disconnected,
            dropped_samples,
            pending: VecDeque::with_capacity(frame_samples * 2),
            pool,
            sample_rate,
            frame_samples,
            samples_emitted: 0,
        })
    }
}

impl FrameSource for CpalSource {
    fn next_frame(&mut self) -> Result<AudioFrame, AudioError> {
        while self.pending.len() < self.frame_samples {
            if self.disconnected.load(Ordering::SeqCst) {
                return Err(AudioError::DeviceDisconnected);
            }
            match self.rx.recv_timeout(POLL_TIMEOUT) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(AudioError::NoDataTimeout {
                        duration: POLL_TIMEOUT,
                    })
                }
                Err(RecvTimeoutError::Disconnected) => return Err(AudioError::SourceClosed),
            }
        }

        let mut buf = self.pool.acquire().ok_or(AudioError::PoolExhausted {
            slots: self.pool.slot_count(),
        })?;
        for s in buf.iter_mut() {
            *s = self.pending.pop_front().unwrap_or(0);
        }
        let timestamp_ms = self.samples_emitted * 1000 / self.sample_rate as u64;
        self.samples_emitted += self.frame_samples as u64;
        Ok(AudioFrame::new(buf, timestamp_ms))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    fn dropped_frames(&self) -> u64 {
        self.dropped_samples.load(Ordering::Relaxed) / self.frame_samples as u64
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    channels: usize,
    tx: Sender<Vec<i16>>,
    disconnected: Arc<AtomicBool>,
    dropped_samples: Arc<AtomicU64>,
    convert: impl Fn(T) -> i16 + Send + 'static,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + Send + 'static,
{
    let err_fn = move |err: cpal::StreamError| {
        tracing::error!("Input stream error: {}", err);
        disconnected.store(true, Ordering::SeqCst);
    };
    let data_fn = move |data: &[T], _: &cpal::InputCallbackInfo| {
        let mut mono = Vec::with_capacity(data.len() / channels.max(1));
        if channels <= 1 {
            mono.extend(data.iter().map(|&s| convert(s)));
        } else {
            for group in data.chunks_exact(channels) {
                let sum: i32 = group.iter().map(|&s| convert(s) as i32).sum();
                mono.push((sum / channels as i32) as i16);
            }
        }
        if let Err(TrySendError::Full(lost)) = tx.try_send(mono) {
            dropped_samples.fetch_add(lost.len() as u64, Ordering::Relaxed);
        }
    };
    let stream = device.build_input_stream(config, data_fn, err_fn, None)?;
    Ok(stream)
}

/// Input device names, for `--list-devices`.
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
        Err(e) => {
            tracing::warn!("Could not enumerate input devices: {}", e);
            Vec::new()
        }
    }
}
