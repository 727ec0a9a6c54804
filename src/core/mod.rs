pub mod build_id;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod retry;
pub mod traits;

pub use build_id::*;
pub use config::{Engine, PublishSettings, PublisherConfig};
pub use config_loader::{ConfigLoadOptions, ConfigLoader, ConfigValidationResult};
pub use error::*;
pub use retry::*;
pub use traits::*;
