//! Streaming task: ring reader to encoded packets.
//!
//! Independent of the detection path. Pulls fixed frames from its own
//! ring cursor, A-law encodes them, and hands sequenced packets to the
//! transport channel. A frame is only ever emitted whole; if the ring
//! holds less than one frame the task waits for the next tick.

use soundwatch_audio::RingReader;
use soundwatch_codec::{EncodedAudioPacket, Packetizer, StreamConfig};
use soundwatch_telemetry::PipelineMetrics;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, trace, warn};

pub struct StreamerTask {
    reader: RingReader,
    frame_samples: usize,
    packetizer: Packetizer,
    metrics: PipelineMetrics,
    packet_tx: mpsc::Sender<EncodedAudioPacket>,
}

impl StreamerTask {
    pub fn spawn(
        reader: RingReader,
        config: &StreamConfig,
        sample_rate: u32,
        ssrc: u32,
        metrics: PipelineMetrics,
        packet_tx: mpsc::Sender<EncodedAudioPacket>,
    ) -> JoinHandle<()> {
        let task = Self {
            reader,
            frame_samples: config.frame_samples,
            packetizer: Packetizer::new(config.payload_type, ssrc),
            metrics,
            packet_tx,
        };
        let period = Duration::from_millis(
            (config.frame_samples as u64 * 1000 / sample_rate as u64).max(1),
        );
        tokio::spawn(task.run(period))
    }

    async fn run(mut self, period: Duration) {
        let mut pcm = vec![0i16; self.frame_samples];
        let mut ticker = tokio::time::interval(period);
        let mut overruns_seen = 0u64;
        info!(
            frame_samples = self.frame_samples,
            period_ms = period.as_millis() as u64,
            "streamer task started"
        );

        loop {
            ticker.tick().await;

            let overruns = self.reader.overruns();
            if overruns > overruns_seen {
                self.metrics.add_ring_overruns(overruns - overruns_seen);
                overruns_seen = overruns;
            }

            let mut sent = false;
            while self.reader.available() >= self.frame_samples {
                let got = self.reader.read(&mut pcm);
                if got < self.frame_samples {
                    break;
                }
                let packet = self.packetizer.packetize(&pcm);
                self.metrics.packets_emitted.fetch_add(1, Ordering::Relaxed);
                if self.packet_tx.send(packet).await.is_err() {
                    warn!("packet receiver dropped, streamer exiting");
                    return;
                }
                sent = true;
            }

            if !sent {
                self.metrics
                    .streamer_underruns
                    .fetch_add(1, Ordering::Relaxed);
                trace!("no full frame available this tick");
            }
        }
    }
}
