//! Mapping an authenticated client to the user it acts as.

use super::IdentityError;
use std::collections::HashMap;

/// Attribute carrying the username mapped from a token.
pub const REQUEST_NAME_ATTR: &str = "request.name";

/// Attribute set to `"1"` when a GSI client was mapped through a gridmap file.
pub const GRIDMAP_NAME_ATTR: &str = "gridmap.name";

/// Authenticated client as seen by the request layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientEntity {
    /// Authentication protocol, e.g. `"ztn"`, `"gsi"`, `"unix"`.
    pub protocol: String,
    /// Mapped name, if the protocol produced one.
    pub name: Option<String>,
    /// Virtual organization, set when VOMS mapped the client.
    pub vorg: Option<String>,
    /// Extra attributes attached by the security layer.
    pub attributes: HashMap<String, String>,
}

impl ClientEntity {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_vorg(mut self, vorg: impl Into<String>) -> Self {
        self.vorg = Some(vorg.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// A GSI client counts as mapped if VOMS or a gridmap file named it.
    /// A bare DN (or DN hash) is not a local user.
    fn is_gsi_mapped(&self) -> bool {
        self.vorg.is_some()
            || self
                .attributes
                .get(GRIDMAP_NAME_ATTR)
                .is_some_and(|v| v == "1")
    }
}

/// Per-request environment handed down by the request layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestEnv {
    pub client: Option<ClientEntity>,
}

impl RequestEnv {
    pub fn new(client: ClientEntity) -> Self {
        Self {
            client: Some(client),
        }
    }

    /// Env with no security entity attached.
    pub fn without_client() -> Self {
        Self { client: None }
    }

    pub fn principal(&self) -> Result<Principal, IdentityError> {
        match &self.client {
            Some(client) => Ok(Principal::from_entity(client)),
            None => {
                tracing::warn!(target: "identity", "no security entity object provided");
                Err(IdentityError::NoPrincipal)
            }
        }
    }
}

/// Who an operation runs as.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    /// No usable user; run as the daemon's own identity.
    Anonymous,
    User(String),
}

impl Principal {
    pub fn user(name: impl Into<String>) -> Self {
        Self::User(name.into())
    }

    /// Extract the principal from a client entity.
    ///
    /// A token-mapped `request.name` wins over the entity's name.
    pub fn from_entity(client: &ClientEntity) -> Self {
        let username = client
            .attributes
            .get(REQUEST_NAME_ATTR)
            .filter(|n| !n.is_empty())
            .or(client.name.as_ref().filter(|n| !n.is_empty()));

        let Some(username) = username else {
            tracing::info!(target: "identity", protocol = %client.protocol, "anonymous client; no user set");
            return Self::Anonymous;
        };

        if client.protocol == "gsi" && !client.is_gsi_mapped() {
            tracing::info!(target: "identity", "anonymous GSI client; user not mapped");
            return Self::Anonymous;
        }

        Self::User(username.clone())
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::User(name) => Some(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_name_preferred() {
        let client = ClientEntity::new("ztn")
            .with_name("bearer")
            .with_attribute(REQUEST_NAME_ATTR, "alice");
        assert_eq!(Principal::from_entity(&client), Principal::user("alice"));
    }

    #[test]
    fn test_falls_back_to_name() {
        let client = ClientEntity::new("unix").with_name("bob");
        assert_eq!(Principal::from_entity(&client), Principal::user("bob"));
        assert_eq!(Principal::from_entity(&client).username(), Some("bob"));
    }

    #[test]
    fn test_no_name_is_anonymous() {
        let client = ClientEntity::new("unix").with_name("");
        assert_eq!(Principal::from_entity(&client), Principal::Anonymous);
        assert_eq!(Principal::Anonymous.username(), None);
    }

    #[test]
    fn test_unmapped_gsi_is_anonymous() {
        let dn = ClientEntity::new("gsi").with_name("/DC=org/CN=Alice");
        assert_eq!(Principal::from_entity(&dn), Principal::Anonymous);

        let gridmap = dn.clone().with_attribute(GRIDMAP_NAME_ATTR, "1");
        assert_eq!(
            Principal::from_entity(&gridmap),
            Principal::user("/DC=org/CN=Alice")
        );

        let voms = ClientEntity::new("gsi").with_name("alice").with_vorg("cms");
        assert_eq!(Principal::from_entity(&voms), Principal::user("alice"));
    }

    #[test]
    fn test_env_without_client() {
        let env = RequestEnv::without_client();
        assert!(matches!(env.principal(), Err(IdentityError::NoPrincipal)));
    }
}
