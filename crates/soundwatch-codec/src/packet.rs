//! Fixed-layout packet framing for the encoded stream.
//!
//! The 12-byte header matches the RTP wire layout (version 2, no
//! padding, no extensions, zero CSRCs) so off-the-shelf tooling can
//! inspect captures, but packets travel over whatever transport the
//! application wires up.

use crate::alaw::encode_frame;
use serde::{Deserialize, Serialize};
use soundwatch_foundation::ConfigError;
use thiserror::Error;

/// Serialized header length in bytes.
pub const HEADER_LEN: usize = 12;

/// RTP version carried in the top two bits of the first byte.
const VERSION: u8 = 2;

#[derive(Debug, Error)]
pub enum PacketError {
    #[error("packet truncated: {len} bytes, header needs {HEADER_LEN}")]
    Truncated { len: usize },
    #[error("unsupported packet version {version}")]
    UnsupportedVersion { version: u8 },
}

/// Streaming parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Samples per packet. At 16 kHz the default of 320 gives one
    /// packet every 20 ms.
    pub frame_samples: usize,
    /// RTP payload type. 8 is the assigned number for A-law (PCMA).
    pub payload_type: u8,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_samples: 320,
            payload_type: 8,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_samples == 0 {
            return Err(ConfigError::new("frame_samples", "must be positive"));
        }
        if self.payload_type > 127 {
            return Err(ConfigError::new(
                "payload_type",
                format!("must fit in 7 bits, got {}", self.payload_type),
            ));
        }
        Ok(())
    }
}

/// Parsed or to-be-written packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub payload_type: u8,
    /// Packet counter, wrapping at `u16::MAX`.
    pub sequence: u16,
    /// Sample-clock timestamp: samples streamed before this packet.
    pub timestamp: u32,
    /// Stream identifier, fixed for the lifetime of one session.
    pub ssrc: u32,
}

impl PacketHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = VERSION << 6;
        buf[1] = self.payload_type & 0x7F;
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }

    pub fn parse(buf: &[u8]) -> Result<PacketHeader, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::Truncated { len: buf.len() });
        }
        let version = buf[0] >> 6;
        if version != VERSION {
            return Err(PacketError::UnsupportedVersion { version });
        }
        Ok(PacketHeader {
            payload_type: buf[1] & 0x7F,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

/// One encoded frame ready for transport.
#[derive(Debug, Clone)]
pub struct EncodedAudioPacket {
    pub header: PacketHeader,
    /// A-law payload, one byte per sample.
    pub payload: Vec<u8>,
}

impl EncodedAudioPacket {
    /// Header and payload as one contiguous datagram.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// Stamps consecutive PCM frames into sequenced, timestamped packets.
pub struct Packetizer {
    payload_type: u8,
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
}

impl Packetizer {
    pub fn new(payload_type: u8, ssrc: u32) -> Self {
        Self::with_clock(payload_type, ssrc, 0, 0)
    }

    /// Resume a stream at a given sequence number and sample timestamp.
    pub fn with_clock(payload_type: u8, ssrc: u32, sequence: u16, timestamp: u32) -> Self {
        Self {
            payload_type,
            ssrc,
            sequence,
            timestamp,
        }
    }

    /// Encode one PCM frame and stamp it. The timestamp advances by the
    /// frame length in samples, the sequence by one, both wrapping.
    pub fn packetize(&mut self, pcm: &[i16]) -> EncodedAudioPacket {
        let mut payload = Vec::with_capacity(pcm.len());
        encode_frame(pcm, &mut payload);

        let header = PacketHeader {
            payload_type: self.payload_type,
            sequence: self.sequence,
            timestamp: self.timestamp,
            ssrc: self.ssrc,
        };
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(pcm.len() as u32);

        EncodedAudioPacket { header, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_big_endian_rtp() {
        let header = PacketHeader {
            payload_type: 8,
            sequence: 0x0102,
            timestamp: 0x0A0B0C0D,
            ssrc: 0xDEADBEEF,
        };
        assert_eq!(
            header.to_bytes(),
            [0x80, 0x08, 0x01, 0x02, 0x0A, 0x0B, 0x0C, 0x0D, 0xDE, 0xAD, 0xBE, 0xEF]
        );
    }

    #[test]
    fn header_round_trips() {
        let header = PacketHeader {
            payload_type: 96,
            sequence: 65000,
            timestamp: 4_000_000_000,
            ssrc: 0x1234_5678,
        };
        let parsed = PacketHeader::parse(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn parse_rejects_short_and_wrong_version() {
        match PacketHeader::parse(&[0x80; 11]) {
            Err(PacketError::Truncated { len }) => assert_eq!(len, 11),
            other => panic!("expected Truncated, got {other:?}"),
        }

        let mut bytes = PacketHeader {
            payload_type: 8,
            sequence: 0,
            timestamp: 0,
            ssrc: 0,
        }
        .to_bytes();
        bytes[0] = 0x40;
        match PacketHeader::parse(&bytes) {
            Err(PacketError::UnsupportedVersion { version }) => assert_eq!(version, 1),
            other => panic!("expected UnsupportedVersion, got {other:?}"),
        }
    }

    #[test]
    fn packetizer_stamps_consecutive_frames() {
        let mut packetizer = Packetizer::new(8, 0xABCD_EF01);
        let frame = vec![0i16; 320];

        let first = packetizer.packetize(&frame);
        assert_eq!(first.header.sequence, 0);
        assert_eq!(first.header.timestamp, 0);
        assert_eq!(first.payload.len(), 320);
        assert!(first.payload.iter().all(|&b| b == 0xD5));

        let second = packetizer.packetize(&frame);
        assert_eq!(second.header.sequence, 1);
        assert_eq!(second.header.timestamp, 320);
        assert_eq!(second.header.ssrc, 0xABCD_EF01);
    }

    #[test]
    fn counters_wrap_without_panic() {
        let mut packetizer = Packetizer::with_clock(8, 1, u16::MAX, u32::MAX - 100);
        let frame = vec![0i16; 320];

        let first = packetizer.packetize(&frame);
        assert_eq!(first.header.sequence, u16::MAX);
        assert_eq!(first.header.timestamp, u32::MAX - 100);

        let second = packetizer.packetize(&frame);
        assert_eq!(second.header.sequence, 0);
        assert_eq!(second.header.timestamp, 219);
    }

    #[test]
    fn datagram_concatenates_header_and_payload() {
        let mut packetizer = Packetizer::new(8, 7);
        let packet = packetizer.packetize(&[0i16; 4]);
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN + 4);
        assert_eq!(&bytes[HEADER_LEN..], &[0xD5; 4]);
    }
}
