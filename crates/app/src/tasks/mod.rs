pub mod detector;
pub mod streamer;
