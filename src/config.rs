//! Gateway configuration.

use serde::Deserialize;

/// Lowest uid that may be impersonated; anything below is a system account.
const DEFAULT_MIN_UID: u32 = 500;

/// Lowest primary gid that may be impersonated.
const DEFAULT_MIN_GID: u32 = 500;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("umask {0:#o} is not a valid umask value")]
    InvalidUmask(u32),

    #[error("min_uid must be non-zero; uid 0 can never be impersonated")]
    RootUidAllowed,
}

/// Configuration for the multi-user gateway.
///
/// Can be deserialized from the embedding daemon's own configuration;
/// missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Minimum uid a request may be mapped to.
    pub min_uid: u32,

    /// Minimum primary gid a request may be mapped to.
    pub min_gid: u32,

    /// Process umask applied when the gateway starts.
    pub umask: Option<u32>,

    /// This process is the cluster manager: internal stats bypass fs
    /// permissions so it can advertise any existing file.
    pub cluster_manager: bool,

    /// On `EACCES`, look for a supplementary group that grants access and
    /// retry the operation once with it active.
    pub supplementary_group_retry: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            min_uid: DEFAULT_MIN_UID,
            min_gid: DEFAULT_MIN_GID,
            umask: None,
            cluster_manager: false,
            supplementary_group_retry: true,
        }
    }
}

impl GatewayConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum uid.
    pub fn min_uid(mut self, uid: u32) -> Self {
        self.min_uid = uid;
        self
    }

    /// Set the minimum gid.
    pub fn min_gid(mut self, gid: u32) -> Self {
        self.min_gid = gid;
        self
    }

    /// Set the process umask.
    pub fn umask(mut self, umask: u32) -> Self {
        self.umask = Some(umask);
        self
    }

    /// Mark this process as the cluster manager.
    pub fn cluster_manager(mut self, enabled: bool) -> Self {
        self.cluster_manager = enabled;
        self
    }

    /// Enable or disable the supplementary group retry.
    pub fn supplementary_group_retry(mut self, enabled: bool) -> Self {
        self.supplementary_group_retry = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(umask) = self.umask {
            if umask > 0o777 {
                return Err(ConfigError::InvalidUmask(umask));
            }
        }
        if self.min_uid == 0 {
            return Err(ConfigError::RootUidAllowed);
        }
        Ok(())
    }
}
