pub mod config;
pub mod endpoint;
pub mod error;
pub mod paths;
pub mod process;
pub mod recording;

pub use config::Config;
pub use endpoint::{EndpointRegistry, HostRecord, LaunchLock};
pub use error::{Error, Result};
pub use paths::Paths;
pub use recording::{RecordingInfo, RecordingStore};
