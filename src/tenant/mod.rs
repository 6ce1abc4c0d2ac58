//! Tenant Scope Manager
//!
//! Every tenant-table access runs inside a [`TenantScope::with_scope`] call:
//! the scope opens a transaction, marks it with the organization id via
//! `set_config('app.current_org', ..., true)` so row-level policies see the
//! tenant, hands the body a [`TenantTx`] accessor, commits on `Ok` and rolls
//! back on `Err`. The setting is transaction-local, so teardown is guaranteed
//! on every exit path — there is no ambient tenant state to leak.
//!
//! [`TenantTx`] has no public constructor. The only way to obtain one is from
//! inside `with_scope`, which makes "mutated tenant data outside a scope" a
//! compile-time impossibility rather than a code-review rule.

use futures::future::BoxFuture;
use sqlx::postgres::PgConnection;
use sqlx::{PgPool, Postgres, Transaction};

use crate::core_types::{OrgId, UserId};
use crate::error::CoreError;

/// Per-transaction tenant context. Always passed explicitly; never ambient.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub org_id: OrgId,
    pub acting_user: UserId,
    /// Audit reason, recorded with history rows and activity events.
    pub reason: String,
}

impl TenantContext {
    pub fn new(org_id: OrgId, acting_user: UserId, reason: impl Into<String>) -> Self {
        Self {
            org_id,
            acting_user,
            reason: reason.into(),
        }
    }
}

/// Transaction-bound accessor for tenant-owned tables.
///
/// Obtainable only inside [`TenantScope::with_scope`].
pub struct TenantTx {
    tx: Transaction<'static, Postgres>,
}

impl TenantTx {
    async fn begin(pool: &PgPool, ctx: &TenantContext) -> Result<Self, CoreError> {
        let mut tx = pool.begin().await?;

        // Transaction-local tenant marker for row-level security policies.
        sqlx::query("SELECT set_config('app.current_org', $1, true)")
            .bind(ctx.org_id.to_string())
            .execute(&mut *tx)
            .await?;

        Ok(Self { tx })
    }

    /// The executor for queries inside this scope.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

/// Opens tenant-scoped transactions over a shared pool.
#[derive(Clone)]
pub struct TenantScope {
    pool: PgPool,
}

impl TenantScope {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run `body` inside one tenant-scoped transaction.
    ///
    /// Commits when the body returns `Ok`, rolls back when it returns `Err`.
    /// Nested business mutations belonging to one logical step must share the
    /// same scope call so they cannot half-commit.
    pub async fn with_scope<T, F>(&self, ctx: &TenantContext, body: F) -> Result<T, CoreError>
    where
        T: Send,
        F: for<'a> FnOnce(&'a mut TenantTx) -> BoxFuture<'a, Result<T, CoreError>> + Send,
    {
        let mut scoped = TenantTx::begin(&self.pool, ctx).await?;

        match body(&mut scoped).await {
            Ok(value) => {
                scoped.tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = scoped.tx.rollback().await {
                    tracing::error!(
                        org_id = %ctx.org_id,
                        error = %rollback_err,
                        "rollback failed after scoped body error"
                    );
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_context_carries_audit_fields() {
        let org = Uuid::new_v4();
        let user = Uuid::new_v4();
        let ctx = TenantContext::new(org, user, "monthly billing run");
        assert_eq!(ctx.org_id, org);
        assert_eq!(ctx.acting_user, user);
        assert_eq!(ctx.reason, "monthly billing run");
    }
}
