//! Endpoint → required-role authorization, cached in memory.
//!
//! The rule table is loaded from a [`PolicySource`] on the first check and
//! reused for the rest of the process lifetime. Endpoints without a rule are
//! open to any authenticated caller.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::OnceCell;

use crate::error::PolicyError;
use crate::source::PolicySource;

type RoleMap = HashMap<String, String>;

/// Lazily loaded, exactly-once initialized view of the access-rule table.
///
/// Concurrent first callers share one load; a failed load caches nothing and
/// the next check tries again.
pub struct AccessPolicyCache {
    source: Arc<dyn PolicySource>,
    slot: RwLock<Arc<OnceCell<RoleMap>>>,
}

impl AccessPolicyCache {
    pub fn new(source: Arc<dyn PolicySource>) -> Self {
        Self {
            source,
            slot: RwLock::new(Arc::new(OnceCell::new())),
        }
    }

    /// Returns whether `role` may call `endpoint`.
    ///
    /// No rule for `endpoint` means `true`; otherwise `role` must equal the
    /// rule's role exactly.
    ///
    /// # Errors
    ///
    /// - [`PolicyError::Load`] if the rule table has not been loaded yet and
    ///   the source fails.
    pub async fn is_authorized(&self, endpoint: &str, role: &str) -> Result<bool, PolicyError> {
        self.with_rules(|rules| match rules.get(endpoint) {
            None => true,
            Some(required) => required == role,
        })
        .await
    }

    /// Number of rules in the loaded table, loading it if needed.
    pub async fn rule_count(&self) -> Result<usize, PolicyError> {
        self.with_rules(HashMap::len).await
    }

    /// Drops the cached table. The next check reloads it from the source.
    pub fn invalidate(&self) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Arc::new(OnceCell::new());
        tracing::info!("access policy invalidated");
    }

    async fn with_rules<R>(&self, f: impl FnOnce(&RoleMap) -> R) -> Result<R, PolicyError> {
        let cell = self
            .slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let rules = cell.get_or_try_init(|| self.load()).await?;
        Ok(f(rules))
    }

    async fn load(&self) -> Result<RoleMap, PolicyError> {
        let rules = self.source.list_rules().await.map_err(|e| {
            tracing::error!(error = %e, "failed to load access rules");
            PolicyError::Load(e)
        })?;

        let map: RoleMap = rules
            .into_iter()
            .map(|rule| (rule.endpoint_address, rule.role))
            .collect();

        tracing::info!(rules = map.len(), "access policy loaded");
        Ok(map)
    }
}
