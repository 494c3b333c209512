//! Approval-level resolution.
//!
//! Levels compose upward: level 3 satisfies any requirement of 3 or below.
//! The resolver is a trait so the engine never hardcodes role membership;
//! the production implementation reads the approval_grants table.
//!
//! Grants carry optional plant/area/line/machine scope columns. They are
//! stored and administered but not consulted here: the source system never
//! enforced narrow-scope precedence consistently, and strict enforcement is
//! deferred pending product clarification. This trait is the seam where it
//! would land.

use std::sync::Arc;

use async_trait::async_trait;

use super::db::DbHandle;
use super::error::WorkflowError;

#[async_trait]
pub trait PermissionResolver: Send + Sync {
    /// Highest active approval level (1-4) held by the person.
    /// A person with no grant is a level-1 reporter.
    async fn approval_level(&self, person_id: i64) -> Result<i64, WorkflowError>;

    async fn has_level(&self, person_id: i64, required: i64) -> Result<bool, WorkflowError> {
        Ok(self.approval_level(person_id).await? >= required)
    }
}

/// Resolver backed by the approval_grants table.
pub struct GrantResolver {
    db: DbHandle,
}

impl GrantResolver {
    pub fn new(db: DbHandle) -> Arc<Self> {
        Arc::new(Self { db })
    }
}

#[async_trait]
impl PermissionResolver for GrantResolver {
    async fn approval_level(&self, person_id: i64) -> Result<i64, WorkflowError> {
        self.db
            .call(move |db| db.max_active_level(person_id))
            .await
    }
}
