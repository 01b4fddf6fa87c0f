pub mod capture;
pub mod cpal_source;
pub mod frame;
pub mod ring;
pub mod source;
pub mod watchdog;

// Public API
pub use capture::{CaptureThread, SourceInfo};
pub use cpal_source::{list_input_devices, CpalSource};
pub use frame::{measure_levels, AudioFrame, FramePool, PooledBuf};
pub use ring::{AudioRing, RingReader, RingWriter};
pub use source::{FrameSource, Signal, SyntheticSource};
pub use watchdog::WatchdogTimer;
