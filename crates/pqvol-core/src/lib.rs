pub mod config;
pub mod error;
pub mod types;

pub use config::PqvolConfig;
pub use error::{ConfigError, ErrorKind};
pub use types::{VolumeId, VolumeState};
