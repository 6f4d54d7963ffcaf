pub mod controller;
pub mod devices;
pub mod track;

pub use controller::{LocalMediaController, LocalMediaState};
pub use devices::{CaptureDevices, DevicePermissions, SampleDevices};
pub use track::{LocalTrack, MediaStream, TrackKind, TrackSource};
