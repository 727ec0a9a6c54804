pub mod core;
pub mod orchestration;
pub mod registry;
pub mod security;

#[cfg(test)]
pub(crate) mod testing;

pub use self::core::*;
pub use orchestration::{PublishOptions, PublishPlan, Publisher, RunReport, retry_failed_destinations};
pub use registry::ContainerCliClient;
pub use security::{CommandError, EnvCredentialProvider, SafeCommandExecutor};
