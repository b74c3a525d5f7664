//! Access controller: a predicate capability gating what may be appended
//! or joined into a log. Policy lives entirely outside the core (spec §9:
//! "pass a capability object with one operation; do not bake policy into
//! the core").

use crate::entry::Entry;
use crate::identity::IdentityProvider;
use async_trait::async_trait;

/// `canAppend(entry, identityProvider) -> bool` (spec §6).
#[async_trait]
pub trait AccessController: Send + Sync {
    async fn can_append(&self, entry: &Entry, provider: &dyn IdentityProvider) -> bool;
}

/// The default access controller: permits every entry (spec §6: "Default
/// implementation permits all").
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl AccessController for AllowAll {
    async fn can_append(&self, _entry: &Entry, _provider: &dyn IdentityProvider) -> bool {
        true
    }
}

/// An access controller that permits appends only from a fixed allow-list
/// of author ids, matching the kind of policy `canAppend` is meant to
/// express without baking it into the core.
#[derive(Debug, Clone)]
pub struct AllowListAccess {
    allowed_ids: Vec<String>,
}

impl AllowListAccess {
    pub fn new(allowed_ids: Vec<String>) -> AllowListAccess {
        AllowListAccess { allowed_ids }
    }
}

#[async_trait]
impl AccessController for AllowListAccess {
    async fn can_append(&self, entry: &Entry, _provider: &dyn IdentityProvider) -> bool {
        self.allowed_ids.iter().any(|id| id == entry.identity_id())
    }
}
