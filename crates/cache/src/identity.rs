//! Acting-user resolution for saves

use std::collections::HashMap;
use std::sync::RwLock;
use trophy_cache_core::constants::LEGACY_USER_ID;
use trophy_cache_core::{Provider, UserIdentity};

use crate::config::CacheConfig;

/// Live session state of the host application (logged-in accounts)
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, provider: Provider) -> Option<UserIdentity>;
}

/// Session resolver backed by a map the host updates as accounts log in/out
#[derive(Debug, Default)]
pub struct SessionIdentities {
    accounts: RwLock<HashMap<Provider, UserIdentity>>,
}

impl SessionIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, provider: Provider, identity: UserIdentity) {
        if let Ok(mut accounts) = self.accounts.write() {
            accounts.insert(provider, identity);
        }
    }

    pub fn clear(&self, provider: Provider) {
        if let Ok(mut accounts) = self.accounts.write() {
            accounts.remove(&provider);
        }
    }
}

impl IdentityResolver for SessionIdentities {
    fn resolve(&self, provider: Provider) -> Option<UserIdentity> {
        self.accounts.read().ok()?.get(&provider).cloned()
    }
}

/// Live session first, then saved settings, then the `legacy` sentinel
pub fn resolve_identity(
    session: Option<&dyn IdentityResolver>,
    config: &CacheConfig,
    provider: Provider,
) -> UserIdentity {
    session
        .and_then(|s| s.resolve(provider))
        .filter(|identity| !identity.external_user_id.trim().is_empty())
        .or_else(|| config.saved_identity(provider))
        .unwrap_or_else(|| UserIdentity::new(LEGACY_USER_ID))
}
