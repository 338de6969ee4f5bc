//! Per-turn assembly of the home context snapshot.

use std::sync::Arc;

use chrono::Local;
use tracing::debug;

use crate::home::{HomeContext, PromptBudget, StateError, StateRegistry};

/// Format for the snapshot timestamp, e.g. "09:30 AM on Friday August 22, 2026".
pub const TIMESTAMP_FORMAT: &str = "%I:%M %p on %A %B %d, %Y";

/// Builds one [`HomeContext`] per conversation turn from the host registry.
pub struct ContextBuilder {
    registry: Arc<dyn StateRegistry>,
    home_name: String,
}

impl ContextBuilder {
    pub fn new(registry: Arc<dyn StateRegistry>, home_name: impl Into<String>) -> Self {
        Self {
            registry,
            home_name: home_name.into(),
        }
    }

    pub fn home_name(&self) -> &str {
        &self.home_name
    }

    /// Read the registry and produce a snapshot trimmed to `budget`.
    ///
    /// The timestamp is captured here, once, so later renders of the
    /// returned context are reproducible.
    pub async fn build(&self, budget: &PromptBudget) -> Result<HomeContext, StateError> {
        let areas = self.registry.areas().await?;
        let devices = self.registry.devices().await?;
        let states = self.registry.entity_states().await?;
        let captured_at = Local::now().format(TIMESTAMP_FORMAT).to_string();

        let mut context = HomeContext::new(
            self.home_name.clone(),
            captured_at,
            areas,
            devices,
            states,
        );
        let trimmed = context.trim_to_budget(budget);
        if !trimmed.is_noop() {
            debug!(
                attributes_cleared = trimmed.attributes_cleared,
                devices_dropped = trimmed.devices_dropped,
                budget_chars = budget.max_chars(),
                "trimmed home context to fit prompt budget"
            );
        }
        Ok(context)
    }
}
