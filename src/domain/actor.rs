use super::ids::UserId;
use super::ports::PermissionResolver;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Applicant,
    Staff,
}

/// Immutable snapshot of the permission names granted to an actor for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet(BTreeSet<String>);

impl PermissionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, permission: &str) -> bool {
        self.0.contains(permission)
    }

    pub fn contains_any(&self, permissions: &[&str]) -> bool {
        permissions.iter().any(|p| self.contains(p))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Whoever is acting on the admissions pipeline in the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub kind: ActorKind,
    permissions: PermissionSet,
}

impl Actor {
    pub fn new(id: UserId, kind: ActorKind, permissions: PermissionSet) -> Self {
        Self {
            id,
            kind,
            permissions,
        }
    }

    pub fn applicant(id: UserId) -> Self {
        Self::new(id, ActorKind::Applicant, PermissionSet::empty())
    }

    /// Builds the actor from a permission snapshot taken once, up front.
    pub async fn resolve(
        resolver: &dyn PermissionResolver,
        id: UserId,
        kind: ActorKind,
    ) -> Result<Self> {
        let permissions = resolver.resolve_permissions(id, kind).await?;
        Ok(Self::new(id, kind, permissions))
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }
}

/// Anything with a single owning user.
pub trait Owned {
    fn owner_id(&self) -> UserId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_set_lookup() {
        let set: PermissionSet = ["application.review", "payment.verify"]
            .into_iter()
            .collect();
        assert!(set.contains("payment.verify"));
        assert!(!set.contains("application.approve"));
        assert!(set.contains_any(&["application.approve", "application.review"]));
        assert!(!set.contains_any(&[]));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_applicant_has_no_permissions() {
        let actor = Actor::applicant(UserId::new());
        assert_eq!(actor.kind, ActorKind::Applicant);
        assert!(actor.permissions().is_empty());
    }
}
