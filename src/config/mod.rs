//! Agent configuration: validated options and atomically shared settings.

pub mod types;

pub use types::{
    ConfigError, ConfigErrors, MaxTokens, MirostatMode, RequestConfig, DEFAULT_CTX_SIZE,
    DEFAULT_MAX_TOKENS, DEFAULT_MIROSTAT_ETA, DEFAULT_MIROSTAT_MODE, DEFAULT_MIROSTAT_TAU,
    DEFAULT_MODEL, DEFAULT_REPEAT_PENALTY, DEFAULT_TEMPERATURE, DEFAULT_TIMEOUT_SECS,
    DEFAULT_TOP_K, DEFAULT_TOP_P, OPT_CHAT_MODEL, OPT_CTX_SIZE, OPT_MAX_TOKENS,
    OPT_MIROSTAT_ETA, OPT_MIROSTAT_MODE, OPT_MIROSTAT_TAU, OPT_PROMPT, OPT_REPEAT_PENALTY,
    OPT_TEMPERATURE, OPT_TIMEOUT, OPT_TOP_K, OPT_TOP_P,
};

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::prompt::{PromptTemplate, DEFAULT_SYSTEM_PROMPT};

/// The request config and prompt template that one turn runs with.
///
/// Always installed and replaced as a unit so a turn can never pair a new
/// template with an old request config.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub request: RequestConfig,
    pub template: PromptTemplate,
}

impl AgentSettings {
    /// Validate a full option set, including the `prompt` template source.
    ///
    /// Template syntax problems are reported as a [`ConfigError`] on the
    /// `prompt` field, alongside whatever else is wrong, so the host sees
    /// the complete picture in one response.
    pub fn from_options(options: &Value) -> Result<Self, ConfigErrors> {
        let mut errors = Vec::new();

        let request = RequestConfig::from_options(options).unwrap_or_else(|e| {
            errors.extend(e.errors);
            RequestConfig::default()
        });

        let prompt_source = match options.get(OPT_PROMPT) {
            None => DEFAULT_SYSTEM_PROMPT.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                errors.push(ConfigError::new(
                    OPT_PROMPT,
                    format!("expected a string, got {other}"),
                ));
                DEFAULT_SYSTEM_PROMPT.to_string()
            }
        };

        match (PromptTemplate::new(prompt_source), errors.is_empty()) {
            (Ok(template), true) => Ok(Self { request, template }),
            (Ok(_), false) => Err(ConfigErrors { errors }),
            (Err(e), _) => {
                errors.push(ConfigError::new(OPT_PROMPT, e.to_string()));
                Err(ConfigErrors { errors })
            }
        }
    }

    /// Serialize back to the raw option key set, `prompt` included.
    pub fn to_options(&self) -> Value {
        let mut options = self.request.to_options();
        if let Value::Object(ref mut map) = options {
            map.insert(
                OPT_PROMPT.to_string(),
                Value::String(self.template.source().to_string()),
            );
        }
        options
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            request: RequestConfig::default(),
            template: PromptTemplate::default(),
        }
    }
}

/// Handle to the settings shared by all turns.
///
/// Reads take a cheap [`Arc`] snapshot under a short read lock; a turn works
/// from its snapshot for its whole lifetime. [`SharedSettings::apply`] swaps
/// in a freshly validated settings value wholesale, so concurrent readers
/// see either the old settings or the new ones, never a mix.
#[derive(Clone)]
pub struct SharedSettings {
    inner: Arc<RwLock<Arc<AgentSettings>>>,
}

impl SharedSettings {
    pub fn new(settings: AgentSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(settings))),
        }
    }

    /// Validate `options` and install them as the starting settings.
    pub fn from_options(options: &Value) -> Result<Self, ConfigErrors> {
        Ok(Self::new(AgentSettings::from_options(options)?))
    }

    /// The settings as of now. The returned snapshot stays valid and
    /// unchanged even if `apply` runs concurrently.
    pub fn snapshot(&self) -> Arc<AgentSettings> {
        Arc::clone(&self.inner.read())
    }

    /// Validate and atomically install a new option set.
    ///
    /// On any validation failure nothing is installed and the previous
    /// settings stay in effect untouched.
    pub fn apply(&self, options: &Value) -> Result<(), ConfigErrors> {
        let next = AgentSettings::from_options(options)?;
        *self.inner.write() = Arc::new(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ==================== settings validation tests ====================

    #[test]
    fn test_empty_options_build_default_settings() {
        let settings = AgentSettings::from_options(&json!({})).unwrap();
        assert_eq!(settings.request, RequestConfig::default());
        assert_eq!(settings.template.source(), DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_custom_prompt_accepted() {
        let settings = AgentSettings::from_options(&json!({
            "prompt": "You run {{ home_name }}.",
        }))
        .unwrap();
        assert_eq!(settings.template.source(), "You run {{ home_name }}.");
    }

    #[test]
    fn test_bad_prompt_syntax_reported_on_prompt_field() {
        let errors = AgentSettings::from_options(&json!({
            "prompt": "{% for %}",
        }))
        .unwrap_err();
        assert_eq!(errors.fields(), vec![OPT_PROMPT]);
    }

    #[test]
    fn test_prompt_error_collected_with_field_errors() {
        let errors = AgentSettings::from_options(&json!({
            "temperature": 9,
            "prompt": "{% for %}",
        }))
        .unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.fields().contains(&OPT_TEMPERATURE));
        assert!(errors.fields().contains(&OPT_PROMPT));
    }

    #[test]
    fn test_non_string_prompt_rejected() {
        let errors = AgentSettings::from_options(&json!({ "prompt": 7 })).unwrap_err();
        assert_eq!(errors.fields(), vec![OPT_PROMPT]);
    }

    #[test]
    fn test_settings_round_trip() {
        let settings = AgentSettings::from_options(&json!({
            "chat_model": "mistral:7b",
            "prompt": "Hello {{ home_name }}",
        }))
        .unwrap();
        let rebuilt = AgentSettings::from_options(&settings.to_options()).unwrap();
        assert_eq!(rebuilt.request, settings.request);
        assert_eq!(rebuilt.template.source(), settings.template.source());
    }

    // ==================== shared settings tests ====================

    #[test]
    fn test_apply_replaces_snapshot() {
        let shared = SharedSettings::from_options(&json!({})).unwrap();
        let before = shared.snapshot();
        shared
            .apply(&json!({ "chat_model": "mistral:7b" }))
            .unwrap();
        let after = shared.snapshot();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(before.request.model, DEFAULT_MODEL);
        assert_eq!(after.request.model, "mistral:7b");
    }

    #[test]
    fn test_failed_apply_keeps_previous_settings() {
        let shared = SharedSettings::from_options(&json!({
            "chat_model": "mistral:7b",
        }))
        .unwrap();
        let before = shared.snapshot();

        let errors = shared
            .apply(&json!({ "chat_model": "phi3", "temperature": 99 }))
            .unwrap_err();
        assert_eq!(errors.fields(), vec![OPT_TEMPERATURE]);

        let after = shared.snapshot();
        assert!(Arc::ptr_eq(&before, &after), "nothing installed on failure");
        assert_eq!(after.request.model, "mistral:7b");
    }

    #[test]
    fn test_apply_reports_unrepresentable_timeout() {
        // A host can hand us any float here; it must land in the error
        // report, with the running settings untouched.
        let shared = SharedSettings::from_options(&json!({})).unwrap();
        let errors = shared.apply(&json!({ "timeout": 1e300 })).unwrap_err();
        assert_eq!(errors.fields(), vec![OPT_TIMEOUT]);
        assert_eq!(
            shared.snapshot().request.api_timeout,
            std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_old_snapshot_survives_apply() {
        let shared = SharedSettings::from_options(&json!({})).unwrap();
        let held = shared.snapshot();
        shared.apply(&json!({ "ctx_size": 8192 })).unwrap();
        // A turn still holding the old snapshot keeps reading old values
        assert_eq!(held.request.context_size, DEFAULT_CTX_SIZE);
        assert_eq!(shared.snapshot().request.context_size, 8192);
    }
}
