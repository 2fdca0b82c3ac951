pub mod config;
pub mod dispatcher;
pub mod docker;
pub mod engine;
pub mod error;
pub mod health;
pub mod limits;
pub mod metrics;
pub mod runtime;
pub mod sandbox;
pub mod workspace;

pub use config::{MountSource, WorkerConfig};
pub use dispatcher::Dispatcher;
pub use docker::DockerRuntime;
pub use engine::JobExecutor;
pub use error::SandboxError;
pub use runtime::{ContainerRuntime, ContainerSpec};
pub use sandbox::Sandbox;
