pub mod capture;
pub mod clock;
pub mod cpal_capture;
pub mod device_spec;
pub mod factory;
pub mod ffmpeg;
pub mod synthetic;

pub use capture::{BackendKind, CaptureStream, DeviceDescriptor, PcmChunk, ReadOutcome, StreamFormat};
pub use clock::{PauseLedger, SessionClock};
pub use factory::{open_capture, CaptureDefaults};
