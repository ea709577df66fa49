//! Share links: token issuance, resolution and revocation for the
//! `ShareLink` entity. The Drive CRUD service that owns the rest of an
//! item's lifecycle is out of scope here; this is only the part of the
//! entity's invariants the core itself must uphold. Password enforcement
//! is left to the external service (see DESIGN.md).

use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{ChiralError, ChiralResult};

#[derive(Debug, Clone)]
pub struct ShareLink {
    pub token: String,
    pub item_id: String,
    pub has_password: bool,
    pub is_public: bool,
    pub download_count: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Owns the token → item mapping; globally unique tokens, unresolvable
/// once revoked.
pub struct ShareRegistry {
    links: HashMap<String, ShareLink>,
}

impl ShareRegistry {
    pub fn new() -> Self {
        ShareRegistry { links: HashMap::new() }
    }

    pub fn create(&mut self, item_id: String, has_password: bool, is_public: bool) -> ShareLink {
        let token = Uuid::new_v4().to_string();
        let link = ShareLink {
            token: token.clone(),
            item_id,
            has_password,
            is_public,
            download_count: 0,
            created_at: chrono::Utc::now(),
        };
        self.links.insert(token, link.clone());
        link
    }

    pub fn resolve(&mut self, token: &str) -> ChiralResult<&ShareLink> {
        self.links
            .get_mut(token)
            .map(|link| {
                link.download_count += 1;
                &*link
            })
            .ok_or_else(|| ChiralError::NotFound(format!("share link {token} is unknown or revoked")))
    }

    pub fn revoke(&mut self, token: &str) -> ChiralResult<()> {
        self.links
            .remove(token)
            .map(|_| ())
            .ok_or_else(|| ChiralError::NotFound(format!("share link {token} is unknown or already revoked")))
    }
}

impl Default for ShareRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revoked_token_is_unresolvable() {
        let mut registry = ShareRegistry::new();
        let link = registry.create("item1".to_string(), false, true);
        registry.revoke(&link.token).unwrap();

        let result = registry.resolve(&link.token);
        assert!(matches!(result, Err(ChiralError::NotFound(_))));
    }

    #[test]
    fn resolve_increments_download_count() {
        let mut registry = ShareRegistry::new();
        let link = registry.create("item1".to_string(), false, true);
        registry.resolve(&link.token).unwrap();
        registry.resolve(&link.token).unwrap();

        assert_eq!(registry.links.get(&link.token).unwrap().download_count, 2);
    }
}
