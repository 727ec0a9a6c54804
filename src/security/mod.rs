pub mod command_executor;
pub mod credentials;

pub use command_executor::{CommandError, CommandOutput, SafeCommandExecutor};
pub use credentials::{EnvCredentialProvider, StaticCredentialProvider, mask_secrets, mask_token};
