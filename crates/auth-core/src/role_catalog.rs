//! Minimal role-by-reference resolution. Most translation schemas grant
//! roles by inline string key; this exists for the rarer case where a
//! schema references a role by id (`RoleRef`) instead.

use crate::models::{Role, RoleTable};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait RoleCatalog: Send + Sync {
    async fn resolve(&self, role_id: Uuid) -> Option<Role>;
}

pub struct InMemoryRoleCatalog {
    roles: RoleTable,
}

impl InMemoryRoleCatalog {
    pub fn new(roles: RoleTable) -> Self {
        Self { roles }
    }

    pub fn empty() -> Self {
        Self {
            roles: RoleTable::new(),
        }
    }
}

#[async_trait]
impl RoleCatalog for InMemoryRoleCatalog {
    async fn resolve(&self, role_id: Uuid) -> Option<Role> {
        self.roles.get(&role_id).cloned()
    }
}

pub type SharedRoleCatalog = Arc<dyn RoleCatalog>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_known_role() {
        let id = Uuid::new_v4();
        let mut roles = RoleTable::new();
        roles.insert(
            id,
            Role {
                id,
                name: "admin".to_string(),
                permissions: vec!["*".to_string()],
            },
        );
        let catalog = InMemoryRoleCatalog::new(roles);
        let resolved = catalog.resolve(id).await;
        assert_eq!(resolved.unwrap().name, "admin");
    }

    #[tokio::test]
    async fn unknown_role_resolves_to_none() {
        let catalog = InMemoryRoleCatalog::empty();
        assert!(catalog.resolve(Uuid::new_v4()).await.is_none());
    }
}
