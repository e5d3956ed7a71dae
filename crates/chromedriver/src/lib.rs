//! Install chromedriver on demand and run it as a supervised child process.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = chromedriver::Config::from_env()?;
//! let supervisor = chromedriver::Supervisor::from_config(&config)?;
//! let mut server = supervisor.start().await?;
//! println!("webdriver at {}", server.url());
//! server.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
mod fetch;
mod install;
mod port_alloc;
mod server;
#[cfg(test)]
mod test_support;

pub use chromedriver_core::{Config, ConfigError, InstallTarget, Platform};
pub use error::{EntryCopyError, FetchError, InstallError, StartError, StopError};
pub use fetch::{Archive, ArchiveFetcher, HttpZipFetcher};
pub use install::{InstallState, Provisioner};
pub use port_alloc::{EphemeralPorts, PortAllocator, allocate_tcp_port};
pub use server::{
    LOOPBACK_HOST, LaunchOptions, PORT_FLAG, Readiness, ServerHandle, Supervisor, server_url,
};
