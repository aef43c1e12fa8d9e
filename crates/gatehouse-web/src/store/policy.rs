use async_trait::async_trait;
use gatehouse_core::{AccessRule, PolicySource, SourceError};

/// Serves the `[[access_rules]]` table from the server config.
pub struct ConfigPolicySource {
    rules: Vec<AccessRule>,
}

impl ConfigPolicySource {
    pub fn new(rules: Vec<AccessRule>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl PolicySource for ConfigPolicySource {
    async fn list_rules(&self) -> Result<Vec<AccessRule>, SourceError> {
        tracing::debug!(count = self.rules.len(), "listing configured access rules");
        Ok(self.rules.clone())
    }
}
