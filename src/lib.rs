//! Per-thread filesystem impersonation for multi-user storage gateways.
//!
//! A storage daemon runs as root (or with CAP_SETUID/CAP_SETGID) and serves
//! many users. Before each filesystem operation the serving thread switches
//! its filesystem uid/gid and supplementary groups to the requesting user,
//! so the kernel enforces that user's permissions, then restores its own.
//!
//! # Layout
//!
//! - [`credentials`]: kernel seam, capability gate, RAII identity guards
//! - [`identity`]: principals, user lookups, minimum-id policy
//! - [`resolver`]: supplementary group resolution after `EACCES`
//! - [`impersonate`]: scoped entry points tying the above together
//! - [`gateway`]: per-request wrapper around a [`backend::StorageBackend`]
//!
//! # Example
//!
//! ```no_run
//! use multiuser::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::new().umask(0o022);
//! let impersonator = Impersonator::system(&config);
//! let backend = Arc::new(LocalBackend::new("/srv/data"));
//! let gateway = Gateway::new(backend, impersonator, config)?;
//!
//! let env = RequestEnv::new(ClientEntity::new("ztn").with_name("alice"));
//! let response = gateway.handle(
//!     Some(&env),
//!     &Request::Mkdir { path: "/exp1/run7".into(), mode: 0o700 },
//! );
//! assert!(response.is_ok());
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod cli;
pub mod commands;
pub mod config;
pub mod credentials;
pub mod gateway;
pub mod identity;
pub mod impersonate;
pub mod resolver;
#[cfg(any(test, feature = "testing"))]
#[doc(hidden)]
pub mod testing;

pub use config::{ConfigError, GatewayConfig};
pub use credentials::{IdentityGuard, RootOverrideGuard, ThreadCredentials};
pub use gateway::{AsyncGateway, Gateway, GatewayError};
pub use identity::{Identity, IdentityError, Principal};
pub use impersonate::Impersonator;
pub use resolver::{Resolution, ResolveError, SupplementalGroupResolver};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::backend::{FileStat, LocalBackend, Request, Response, StorageBackend};
    pub use crate::config::GatewayConfig;
    pub use crate::credentials::{KernelCredentials, ThreadCredentials};
    pub use crate::gateway::{AsyncGateway, Gateway};
    pub use crate::identity::{ClientEntity, Identity, Principal, RequestEnv};
    pub use crate::impersonate::Impersonator;
}
