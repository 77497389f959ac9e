pub mod config;
pub mod error;
pub mod fragment;
pub mod provisioner;
pub mod sandbox;
pub mod telemetry;

#[cfg(feature = "server")]
pub mod server;

pub use error::ProvisionError;
pub use fragment::{CallerContext, ExecutionResult, FragmentDescriptor};
pub use provisioner::SessionProvisioner;
