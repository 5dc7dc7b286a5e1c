//! Per-request impersonation around a storage backend.
//!
//! `Gateway::handle` is what a multi-user daemon calls for every filesystem
//! request. It maps the request's client to a principal, runs the backend
//! operation under that principal's fs credentials, and on `EACCES` retries
//! once with the supplementary group that owns the governing node.

mod pool;

pub use pool::AsyncGateway;

use crate::backend::{Request, Response, StorageBackend};
use crate::config::{ConfigError, GatewayConfig};
use crate::credentials::CapabilityError;
use crate::identity::{Identity, Principal, RequestEnv};
use crate::impersonate::Impersonator;

use nix::sys::stat::Mode;
use std::borrow::Cow;
use std::sync::Arc;

/// Startup failures. Any of these means the daemon must not serve requests.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("multiuser support disabled: {0}")]
    Capabilities(#[from] CapabilityError),
}

/// Widen a private mkdir mode so the configured umask decides the result.
///
/// Clients commonly create directories with 0700; under a shared-group
/// deployment the site umask should apply instead.
pub fn mkdir_mode(mode: u32, umask: Option<u32>) -> u32 {
    match umask {
        Some(_) if mode & 0o777 == 0o700 => mode | 0o777,
        _ => mode,
    }
}

pub struct Gateway<B: StorageBackend> {
    backend: Arc<B>,
    impersonator: Impersonator,
    config: GatewayConfig,
}

impl<B: StorageBackend> Gateway<B> {
    /// Validate `config`, check capabilities, then apply its umask.
    ///
    /// A gateway that fails to start leaves the process umask untouched.
    pub fn new(
        backend: Arc<B>,
        impersonator: Impersonator,
        config: GatewayConfig,
    ) -> Result<Self, GatewayError> {
        config.validate()?;

        if let Err(e) = impersonator.ensure_capabilities() {
            tracing::error!(target: "gateway", error = %e, "multiuser support disabled");
            return Err(e.into());
        }

        if let Some(umask) = config.umask {
            let previous = nix::sys::stat::umask(Mode::from_bits_truncate(umask));
            tracing::info!(
                target: "gateway",
                umask = %format!("{umask:#o}"),
                previous = %format!("{:#o}", previous.bits()),
                "set process umask"
            );
        }
        tracing::info!(target: "gateway", cluster_manager = config.cluster_manager, "multiuser gateway ready");

        Ok(Self {
            backend,
            impersonator,
            config,
        })
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn impersonator(&self) -> &Impersonator {
        &self.impersonator
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run `request` on behalf of the client in `env`.
    ///
    /// `env == None` marks an internal call, which runs as the daemon.
    pub fn handle(&self, env: Option<&RequestEnv>, request: &Request) -> Response {
        let request = self.adjust(request);

        let Some(env) = env else {
            return self.handle_internal(&request);
        };

        let principal = match env.principal() {
            Ok(principal) => principal,
            Err(e) => {
                tracing::warn!(target: "gateway", op = request.op_name(), error = %e, "request denied");
                return Response::error(e.errno());
            }
        };

        let Principal::User(username) = &principal else {
            return match self.impersonator.enter(&principal) {
                Ok(_guard) => self.backend.handle_request(&request),
                Err(e) => Response::error(e.errno()),
            };
        };

        let identity = match self.impersonator.identity(username) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(target: "gateway", user = %username, op = request.op_name(), error = %e, "request denied");
                return Response::error(e.errno());
            }
        };

        let response = match self.run_as(&identity, &request) {
            Ok(response) => response,
            Err(errno) => return Response::error(errno),
        };

        if response.errno() == Some(libc::EACCES) && self.config.supplementary_group_retry {
            return self
                .retry_with_group(username, &identity, &request)
                .unwrap_or(response);
        }
        response
    }

    fn adjust<'r>(&self, request: &'r Request) -> Cow<'r, Request> {
        match request {
            Request::Mkdir { path, mode } => {
                let widened = mkdir_mode(*mode, self.config.umask);
                if widened == *mode {
                    return Cow::Borrowed(request);
                }
                tracing::debug!(
                    target: "gateway",
                    path = %path.display(),
                    mode = %format!("{mode:#o}"),
                    widened = %format!("{widened:#o}"),
                    "widening private mkdir mode"
                );
                Cow::Owned(Request::Mkdir {
                    path: path.clone(),
                    mode: widened,
                })
            }
            _ => Cow::Borrowed(request),
        }
    }

    fn handle_internal(&self, request: &Request) -> Response {
        if self.config.cluster_manager && matches!(request, Request::Stat { .. }) {
            return match self
                .impersonator
                .with_root_override(|| self.backend.handle_request(request))
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(target: "gateway", error = ?e, "root override for internal stat failed");
                    Response::from_io(&e)
                }
            };
        }
        self.backend.handle_request(request)
    }

    /// Run one request under `identity`. `Err` carries the errno of a failed
    /// identity switch.
    fn run_as(&self, identity: &Identity, request: &Request) -> Result<Response, i32> {
        let _guard = self.impersonator.enter_identity(identity).map_err(|e| {
            tracing::warn!(target: "gateway", uid = identity.uid, op = request.op_name(), error = %e, "identity switch refused");
            e.errno()
        })?;
        Ok(self.backend.handle_request(request))
    }

    /// Resolve a supplementary group for the request path and retry once.
    /// `None` keeps the original response.
    fn retry_with_group(
        &self,
        username: &str,
        identity: &Identity,
        request: &Request,
    ) -> Option<Response> {
        let path = request.path();
        let resolution = match self.impersonator.resolve_supplementary_group(
            self.backend.as_ref(),
            username,
            identity.gid,
            path,
        ) {
            Ok(resolution) => resolution,
            Err(e) => {
                tracing::debug!(target: "gateway", user = username, path = %path.display(), kind = e.kind(), error = %e, "no supplementary group retry");
                return None;
            }
        };

        if resolution.gid == identity.gid {
            return None;
        }

        tracing::debug!(
            target: "gateway",
            user = username,
            path = %path.display(),
            gid = resolution.gid,
            op = request.op_name(),
            "retrying with supplementary group"
        );

        let retry_identity = identity.with_active_gid(resolution.gid);
        let _guard = match self.impersonator.enter_identity(&retry_identity) {
            Ok(guard) => guard,
            Err(e) => return Some(Response::error(e.errno())),
        };
        let response = self.backend.handle_request(request);

        if response.is_ok() && request.creates_node() && !resolution.sticky_gid {
            // The node was created with the retry group; hand it back to the
            // user's primary group.
            if let Err(e) = self.backend.chown(path, None, Some(identity.gid)) {
                tracing::warn!(
                    target: "gateway",
                    path = %path.display(),
                    gid = identity.gid,
                    error = ?e,
                    "failed to reset group of new node"
                );
            }
        }

        Some(response)
    }
}
