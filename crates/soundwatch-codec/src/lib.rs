pub mod alaw;
pub mod packet;

pub use alaw::{alaw_decode, alaw_encode, encode_frame};
pub use packet::{EncodedAudioPacket, PacketError, PacketHeader, Packetizer, StreamConfig};
