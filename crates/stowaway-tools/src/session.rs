//! Registry authentication for one chart
//!
//! A [`RegistrySession`] remembers which (client, registry) pairs have logged
//! in. Logins are serialized behind one async mutex that stays held across
//! logout, password fetch and login, so concurrent workers asking for the
//! same target trigger a single login.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use stowaway_core::ImageReference;
use tokio::sync::{Mutex, OnceCell};

use crate::error::{Result, ToolError};
use crate::registry::Scope;
use crate::toolbox::Toolbox;

/// Which tool holds the credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Client {
    Engine,
    PackageManager,
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Client::Engine => f.write_str("container engine"),
            Client::PackageManager => f.write_str("package manager"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthTarget {
    pub client: Client,
    pub registry: String,
}

impl AuthTarget {
    pub fn engine(registry: impl Into<String>) -> Self {
        Self {
            client: Client::Engine,
            registry: registry.into(),
        }
    }

    pub fn package_manager(registry: impl Into<String>) -> Self {
        Self {
            client: Client::PackageManager,
            registry: registry.into(),
        }
    }
}

impl fmt::Display for AuthTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.client, self.registry)
    }
}

/// Login behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthSettings {
    /// Public registries that still require a login
    pub authenticated_public: Vec<String>,
    /// Region of the public registry's API
    pub public_region: String,
    pub username: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            authenticated_public: vec!["public.ecr.aws".to_string()],
            public_region: "us-east-1".to_string(),
            username: "AWS".to_string(),
        }
    }
}

/// Per-chart authentication state
pub struct RegistrySession {
    tools: Toolbox,
    settings: AuthSettings,
    authenticated: Mutex<HashSet<AuthTarget>>,
    private_registry: OnceCell<String>,
}

impl RegistrySession {
    pub fn new(tools: Toolbox, settings: AuthSettings) -> Self {
        Self {
            tools,
            settings,
            authenticated: Mutex::new(HashSet::new()),
            private_registry: OnceCell::new(),
        }
    }

    pub fn tools(&self) -> &Toolbox {
        &self.tools
    }

    /// Private registry base URL, resolved on first use
    pub async fn private_registry(&self) -> Result<&str> {
        let url = self
            .private_registry
            .get_or_try_init(|| async {
                let url = self.tools.registry.private_registry_url().await?;
                tracing::info!(registry = %url, "resolved private registry");
                Ok::<_, ToolError>(url.trim_end_matches('/').to_string())
            })
            .await?;
        Ok(url)
    }

    pub fn is_authenticated_public(&self, registry: &str) -> bool {
        self.settings.authenticated_public.iter().any(|r| r == registry)
    }

    pub async fn is_authenticated(&self, target: &AuthTarget) -> bool {
        self.authenticated.lock().await.contains(target)
    }

    /// Log `target` in unless it already is
    pub async fn ensure(&self, target: &AuthTarget) -> Result<()> {
        let mut authenticated = self.authenticated.lock().await;
        if authenticated.contains(target) {
            return Ok(());
        }

        let scope = if self.is_authenticated_public(&target.registry) {
            Scope::Public {
                region: self.settings.public_region.clone(),
            }
        } else {
            Scope::Private
        };

        match self.login(target, &scope).await {
            Ok(()) => {
                tracing::info!(auth = %target, "authenticated");
                authenticated.insert(target.clone());
                Ok(())
            }
            Err(e) => {
                tracing::error!(auth = %target, error = %e, "authentication failed");
                Err(ToolError::Authentication {
                    registry: target.registry.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn login(&self, target: &AuthTarget, scope: &Scope) -> Result<()> {
        match target.client {
            Client::Engine => {
                self.tools.engine.logout(&target.registry).await;
                let password = self.tools.registry.login_password(scope).await?;
                self.tools
                    .engine
                    .login(&target.registry, &self.settings.username, &password)
                    .await
            }
            Client::PackageManager => {
                let password = self.tools.registry.login_password(scope).await?;
                self.tools
                    .package_manager
                    .registry_login(&target.registry, &self.settings.username, &password)
                    .await
            }
        }
    }

    /// Make sure the container engine can reach `image`'s registry
    ///
    /// Only authenticated public hosts and the private registry need a login.
    /// Returns whether a login was required.
    pub async fn ensure_engine_for(&self, image: &ImageReference) -> Result<bool> {
        let Some(registry) = image.registry_host() else {
            return Ok(false);
        };
        if !self.is_authenticated_public(registry) && registry != self.private_registry().await? {
            return Ok(false);
        }
        self.ensure(&AuthTarget::engine(registry)).await?;
        Ok(true)
    }

    /// Log the container engine into the private registry
    pub async fn ensure_private_engine(&self) -> Result<()> {
        let registry = self.private_registry().await?.to_string();
        self.ensure(&AuthTarget::engine(registry)).await
    }

    /// Log the package manager into the private registry
    pub async fn ensure_private_package_manager(&self) -> Result<()> {
        let registry = self.private_registry().await?.to_string();
        self.ensure(&AuthTarget::package_manager(registry)).await
    }
}
