pub mod container_cli;

pub use container_cli::ContainerCliClient;
