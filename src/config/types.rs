//! Typed model request configuration and option validation.
//!
//! Options arrive from the host as a raw JSON map keyed by the names below.
//! Validation is strict and total: every invalid field is reported, values
//! are never clamped into range, and defaults apply only to fields that are
//! absent altogether.

use std::fmt;
use std::time::Duration;

use serde_json::{json, Map, Value};

pub const OPT_CHAT_MODEL: &str = "chat_model";
pub const OPT_CTX_SIZE: &str = "ctx_size";
pub const OPT_MAX_TOKENS: &str = "max_tokens";
pub const OPT_MIROSTAT_MODE: &str = "mirostat_mode";
pub const OPT_MIROSTAT_ETA: &str = "mirostat_eta";
pub const OPT_MIROSTAT_TAU: &str = "mirostat_tau";
pub const OPT_TEMPERATURE: &str = "temperature";
pub const OPT_REPEAT_PENALTY: &str = "repeat_penalty";
pub const OPT_TOP_K: &str = "top_k";
pub const OPT_TOP_P: &str = "top_p";
pub const OPT_TIMEOUT: &str = "timeout";
pub const OPT_PROMPT: &str = "prompt";

pub const DEFAULT_MODEL: &str = "llama2:latest";
pub const DEFAULT_CTX_SIZE: u32 = 2048;
pub const DEFAULT_MAX_TOKENS: MaxTokens = MaxTokens::Limited(128);
pub const DEFAULT_MIROSTAT_MODE: MirostatMode = MirostatMode::Off;
pub const DEFAULT_MIROSTAT_ETA: f64 = 0.1;
pub const DEFAULT_MIROSTAT_TAU: f64 = 5.0;
pub const DEFAULT_TEMPERATURE: f64 = 0.8;
pub const DEFAULT_REPEAT_PENALTY: f64 = 1.1;
pub const DEFAULT_TOP_K: u32 = 40;
pub const DEFAULT_TOP_P: f64 = 0.9;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// A single rejected option, named after the offending key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("option \"{field}\": {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Everything wrong with an option set, collected in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigErrors {
    pub errors: Vec<ConfigError>,
}

impl ConfigErrors {
    pub fn single(error: ConfigError) -> Self {
        Self {
            errors: vec![error],
        }
    }

    /// The offending field names, in report order.
    pub fn fields(&self) -> Vec<&'static str> {
        self.errors.iter().map(|e| e.field).collect()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid options: ")?;
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

/// Completion length limit. The wire encodes [`MaxTokens::Unbounded`] as -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxTokens {
    Limited(u32),
    Unbounded,
}

impl MaxTokens {
    /// Wire sentinel for "no limit".
    pub const UNBOUNDED_SENTINEL: i64 = -1;

    pub fn from_sentinel(raw: i64) -> Result<Self, String> {
        if raw == Self::UNBOUNDED_SENTINEL {
            Ok(Self::Unbounded)
        } else if raw >= 1 {
            u32::try_from(raw)
                .map(Self::Limited)
                .map_err(|_| format!("out of range: {raw}"))
        } else {
            Err(format!(
                "must be a positive integer, or {} for no limit, got {raw}",
                Self::UNBOUNDED_SENTINEL
            ))
        }
    }

    pub fn to_sentinel(self) -> i64 {
        match self {
            Self::Limited(n) => i64::from(n),
            Self::Unbounded => Self::UNBOUNDED_SENTINEL,
        }
    }
}

/// Mirostat sampling mode.
///
/// Hosts hand the mode over either as an integer or as the string form
/// their select widgets produce; both are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirostatMode {
    Off,
    V1,
    V2,
}

impl MirostatMode {
    pub fn from_option(value: &Value) -> Result<Self, String> {
        let raw = match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        match raw {
            Some(0) => Ok(Self::Off),
            Some(1) => Ok(Self::V1),
            Some(2) => Ok(Self::V2),
            _ => Err(format!("must be 0, 1 or 2, got {value}")),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}

/// Validated parameters for one completion request.
///
/// Immutable once built; option changes produce a fresh value rather than
/// mutating one in place. Mirostat eta and tau are validated even when the
/// mode is [`MirostatMode::Off`], so switching the mode on later cannot
/// surface stale invalid values.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    pub model: String,
    pub context_size: u32,
    pub max_tokens: MaxTokens,
    pub mirostat: MirostatMode,
    pub mirostat_eta: f64,
    pub mirostat_tau: f64,
    pub temperature: f64,
    pub repeat_penalty: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub api_timeout: Duration,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            context_size: DEFAULT_CTX_SIZE,
            max_tokens: DEFAULT_MAX_TOKENS,
            mirostat: DEFAULT_MIROSTAT_MODE,
            mirostat_eta: DEFAULT_MIROSTAT_ETA,
            mirostat_tau: DEFAULT_MIROSTAT_TAU,
            temperature: DEFAULT_TEMPERATURE,
            repeat_penalty: DEFAULT_REPEAT_PENALTY,
            top_k: DEFAULT_TOP_K,
            top_p: DEFAULT_TOP_P,
            api_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl RequestConfig {
    /// Validate a raw option map into a config.
    ///
    /// Collects every failure rather than stopping at the first, so a host
    /// options form can surface all of them at once. Keys this crate does
    /// not know are ignored.
    pub fn from_options(options: &Value) -> Result<Self, ConfigErrors> {
        let map = match options.as_object() {
            Some(map) => map,
            None => {
                return Err(ConfigErrors::single(ConfigError::new(
                    "options",
                    format!("expected an object, got {options}"),
                )))
            }
        };

        let mut errors = Vec::new();
        let mut config = RequestConfig::default();

        apply(&mut config.model, model_field(map), &mut errors);
        apply(
            &mut config.context_size,
            u32_field(map, OPT_CTX_SIZE, 1),
            &mut errors,
        );
        apply(&mut config.max_tokens, max_tokens_field(map), &mut errors);
        apply(&mut config.mirostat, mirostat_field(map), &mut errors);
        apply(
            &mut config.mirostat_eta,
            f64_min_field(map, OPT_MIROSTAT_ETA, 0.0),
            &mut errors,
        );
        apply(
            &mut config.mirostat_tau,
            f64_min_field(map, OPT_MIROSTAT_TAU, 0.0),
            &mut errors,
        );
        apply(
            &mut config.temperature,
            f64_range_field(map, OPT_TEMPERATURE, 0.0, 2.0),
            &mut errors,
        );
        apply(
            &mut config.repeat_penalty,
            f64_min_field(map, OPT_REPEAT_PENALTY, 0.0),
            &mut errors,
        );
        apply(&mut config.top_k, u32_field(map, OPT_TOP_K, 0), &mut errors);
        apply(
            &mut config.top_p,
            f64_range_field(map, OPT_TOP_P, 0.0, 1.0),
            &mut errors,
        );
        apply(&mut config.api_timeout, timeout_field(map), &mut errors);

        if errors.is_empty() {
            Ok(config)
        } else {
            Err(ConfigErrors { errors })
        }
    }

    /// Serialize back to the raw option key set.
    ///
    /// `from_options(&config.to_options())` reproduces `config` exactly.
    pub fn to_options(&self) -> Value {
        let mut map = Map::new();
        map.insert(OPT_CHAT_MODEL.to_string(), json!(self.model));
        map.insert(OPT_CTX_SIZE.to_string(), json!(self.context_size));
        map.insert(
            OPT_MAX_TOKENS.to_string(),
            json!(self.max_tokens.to_sentinel()),
        );
        map.insert(OPT_MIROSTAT_MODE.to_string(), json!(self.mirostat.as_u8()));
        map.insert(OPT_MIROSTAT_ETA.to_string(), json!(self.mirostat_eta));
        map.insert(OPT_MIROSTAT_TAU.to_string(), json!(self.mirostat_tau));
        map.insert(OPT_TEMPERATURE.to_string(), json!(self.temperature));
        map.insert(OPT_REPEAT_PENALTY.to_string(), json!(self.repeat_penalty));
        map.insert(OPT_TOP_K.to_string(), json!(self.top_k));
        map.insert(OPT_TOP_P.to_string(), json!(self.top_p));
        map.insert(
            OPT_TIMEOUT.to_string(),
            timeout_secs_value(self.api_timeout),
        );
        Value::Object(map)
    }
}

fn timeout_secs_value(timeout: Duration) -> Value {
    let secs = timeout.as_secs_f64();
    if secs.fract() == 0.0 {
        json!(secs as u64)
    } else {
        json!(secs)
    }
}

fn apply<T>(target: &mut T, parsed: Result<Option<T>, ConfigError>, errors: &mut Vec<ConfigError>) {
    match parsed {
        Ok(Some(value)) => *target = value,
        Ok(None) => {}
        Err(error) => errors.push(error),
    }
}

fn type_error(field: &'static str, expected: &str, value: &Value) -> ConfigError {
    ConfigError::new(field, format!("expected {expected}, got {value}"))
}

fn model_field(map: &Map<String, Value>) -> Result<Option<String>, ConfigError> {
    match map.get(OPT_CHAT_MODEL) {
        None => Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.clone())),
        Some(Value::String(_)) => Err(ConfigError::new(
            OPT_CHAT_MODEL,
            "model name must not be empty",
        )),
        Some(other) => Err(type_error(OPT_CHAT_MODEL, "a string", other)),
    }
}

fn u32_field(
    map: &Map<String, Value>,
    field: &'static str,
    min: u32,
) -> Result<Option<u32>, ConfigError> {
    match map.get(field) {
        None => Ok(None),
        Some(value) => {
            let raw = value
                .as_i64()
                .ok_or_else(|| type_error(field, "an integer", value))?;
            if raw < i64::from(min) {
                return Err(ConfigError::new(
                    field,
                    format!("must be at least {min}, got {raw}"),
                ));
            }
            u32::try_from(raw)
                .map(Some)
                .map_err(|_| ConfigError::new(field, format!("out of range: {raw}")))
        }
    }
}

fn max_tokens_field(map: &Map<String, Value>) -> Result<Option<MaxTokens>, ConfigError> {
    match map.get(OPT_MAX_TOKENS) {
        None => Ok(None),
        Some(value) => {
            let raw = value
                .as_i64()
                .ok_or_else(|| type_error(OPT_MAX_TOKENS, "an integer", value))?;
            MaxTokens::from_sentinel(raw)
                .map(Some)
                .map_err(|reason| ConfigError::new(OPT_MAX_TOKENS, reason))
        }
    }
}

fn mirostat_field(map: &Map<String, Value>) -> Result<Option<MirostatMode>, ConfigError> {
    match map.get(OPT_MIROSTAT_MODE) {
        None => Ok(None),
        Some(value) => MirostatMode::from_option(value)
            .map(Some)
            .map_err(|reason| ConfigError::new(OPT_MIROSTAT_MODE, reason)),
    }
}

fn f64_min_field(
    map: &Map<String, Value>,
    field: &'static str,
    min: f64,
) -> Result<Option<f64>, ConfigError> {
    match map.get(field) {
        None => Ok(None),
        Some(value) => {
            let raw = value
                .as_f64()
                .ok_or_else(|| type_error(field, "a number", value))?;
            if raw < min {
                return Err(ConfigError::new(
                    field,
                    format!("must be at least {min}, got {raw}"),
                ));
            }
            Ok(Some(raw))
        }
    }
}

fn f64_range_field(
    map: &Map<String, Value>,
    field: &'static str,
    min: f64,
    max: f64,
) -> Result<Option<f64>, ConfigError> {
    match map.get(field) {
        None => Ok(None),
        Some(value) => {
            let raw = value
                .as_f64()
                .ok_or_else(|| type_error(field, "a number", value))?;
            if raw < min || raw > max {
                return Err(ConfigError::new(
                    field,
                    format!("must be between {min} and {max}, got {raw}"),
                ));
            }
            Ok(Some(raw))
        }
    }
}

fn timeout_field(map: &Map<String, Value>) -> Result<Option<Duration>, ConfigError> {
    match map.get(OPT_TIMEOUT) {
        None => Ok(None),
        Some(value) => {
            let secs = value
                .as_f64()
                .ok_or_else(|| type_error(OPT_TIMEOUT, "a number", value))?;
            if secs <= 0.0 {
                return Err(ConfigError::new(
                    OPT_TIMEOUT,
                    format!("must be greater than zero, got {secs}"),
                ));
            }
            // try_from_secs_f64 rejects values a Duration cannot hold; a
            // positive value under half a nanosecond rounds to zero and is
            // rejected like an explicit zero.
            match Duration::try_from_secs_f64(secs) {
                Ok(timeout) if !timeout.is_zero() => Ok(Some(timeout)),
                _ => Err(ConfigError::new(
                    OPT_TIMEOUT,
                    format!("must be a representable number of seconds, got {secs}"),
                )),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== default tests ====================

    #[test]
    fn test_empty_options_give_defaults() {
        let config = RequestConfig::from_options(&json!({})).unwrap();
        assert_eq!(config, RequestConfig::default());
        assert_eq!(config.model, "llama2:latest");
        assert_eq!(config.context_size, 2048);
        assert_eq!(config.max_tokens, MaxTokens::Limited(128));
        assert_eq!(config.mirostat, MirostatMode::Off);
        assert_eq!(config.api_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_defaults_only_for_absent_fields() {
        let config = RequestConfig::from_options(&json!({
            "temperature": 0.2,
        }))
        .unwrap();
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.top_p, DEFAULT_TOP_P);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = RequestConfig::from_options(&json!({
            "base_url": "http://example.invalid:11434",
            "some_future_option": true,
        }))
        .unwrap();
        assert_eq!(config, RequestConfig::default());
    }

    // ==================== full parse tests ====================

    #[test]
    fn test_all_fields_parsed() {
        let config = RequestConfig::from_options(&json!({
            "chat_model": "mistral:7b",
            "ctx_size": 4096,
            "max_tokens": 256,
            "mirostat_mode": 2,
            "mirostat_eta": 0.2,
            "mirostat_tau": 4.0,
            "temperature": 0.5,
            "repeat_penalty": 1.3,
            "top_k": 50,
            "top_p": 0.95,
            "timeout": 90,
        }))
        .unwrap();
        assert_eq!(config.model, "mistral:7b");
        assert_eq!(config.context_size, 4096);
        assert_eq!(config.max_tokens, MaxTokens::Limited(256));
        assert_eq!(config.mirostat, MirostatMode::V2);
        assert_eq!(config.mirostat_eta, 0.2);
        assert_eq!(config.mirostat_tau, 4.0);
        assert_eq!(config.temperature, 0.5);
        assert_eq!(config.repeat_penalty, 1.3);
        assert_eq!(config.top_k, 50);
        assert_eq!(config.top_p, 0.95);
        assert_eq!(config.api_timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_unbounded_max_tokens_sentinel() {
        let config = RequestConfig::from_options(&json!({ "max_tokens": -1 })).unwrap();
        assert_eq!(config.max_tokens, MaxTokens::Unbounded);
        assert_eq!(config.max_tokens.to_sentinel(), -1);
    }

    #[test]
    fn test_mirostat_mode_accepts_string_form() {
        let config = RequestConfig::from_options(&json!({ "mirostat_mode": "1" })).unwrap();
        assert_eq!(config.mirostat, MirostatMode::V1);
        let config = RequestConfig::from_options(&json!({ "mirostat_mode": "0" })).unwrap();
        assert_eq!(config.mirostat, MirostatMode::Off);
    }

    #[test]
    fn test_fractional_timeout() {
        let config = RequestConfig::from_options(&json!({ "timeout": 2.5 })).unwrap();
        assert_eq!(config.api_timeout, Duration::from_millis(2500));
    }

    // ==================== rejection tests ====================

    #[test]
    fn test_rejections_name_the_field() {
        let cases: Vec<(Value, &str)> = vec![
            (json!({ "chat_model": "" }), OPT_CHAT_MODEL),
            (json!({ "chat_model": 42 }), OPT_CHAT_MODEL),
            (json!({ "ctx_size": 0 }), OPT_CTX_SIZE),
            (json!({ "ctx_size": "big" }), OPT_CTX_SIZE),
            (json!({ "max_tokens": 0 }), OPT_MAX_TOKENS),
            (json!({ "max_tokens": -2 }), OPT_MAX_TOKENS),
            (json!({ "max_tokens": 12.5 }), OPT_MAX_TOKENS),
            (json!({ "mirostat_mode": 3 }), OPT_MIROSTAT_MODE),
            (json!({ "mirostat_mode": "v1" }), OPT_MIROSTAT_MODE),
            (json!({ "mirostat_eta": -0.1 }), OPT_MIROSTAT_ETA),
            (json!({ "mirostat_tau": -1 }), OPT_MIROSTAT_TAU),
            (json!({ "temperature": 2.5 }), OPT_TEMPERATURE),
            (json!({ "temperature": -0.1 }), OPT_TEMPERATURE),
            (json!({ "repeat_penalty": -0.5 }), OPT_REPEAT_PENALTY),
            (json!({ "top_k": -3 }), OPT_TOP_K),
            (json!({ "top_k": 1.5 }), OPT_TOP_K),
            (json!({ "top_p": 1.01 }), OPT_TOP_P),
            (json!({ "top_p": -0.01 }), OPT_TOP_P),
            (json!({ "timeout": 0 }), OPT_TIMEOUT),
            (json!({ "timeout": -5 }), OPT_TIMEOUT),
            (json!({ "timeout": "soon" }), OPT_TIMEOUT),
            (json!({ "timeout": 1e300 }), OPT_TIMEOUT),
        ];
        for (options, field) in cases {
            let errors = RequestConfig::from_options(&options)
                .expect_err(&format!("{options} must be rejected"));
            assert_eq!(errors.len(), 1, "one error for {options}");
            assert_eq!(errors.errors[0].field, field, "field for {options}");
        }
    }

    #[test]
    fn test_extreme_timeout_magnitudes_rejected() {
        // 1e300 and 1e20 overflow what a Duration can hold; 1e-10 rounds
        // to zero nanoseconds. All three must come back as field errors.
        for secs in [1e300, 1e20, 1e-10] {
            let errors = RequestConfig::from_options(&json!({ "timeout": secs }))
                .expect_err(&format!("timeout {secs} must be rejected"));
            assert_eq!(errors.len(), 1, "one error for timeout {secs}");
            assert_eq!(errors.errors[0].field, OPT_TIMEOUT);
            assert!(
                errors.errors[0].reason.contains("representable"),
                "reason names the failure for {secs}: {}",
                errors.errors[0].reason
            );
        }
    }

    #[test]
    fn test_out_of_range_is_never_clamped() {
        let errors = RequestConfig::from_options(&json!({ "temperature": 3.0 })).unwrap_err();
        assert!(errors.errors[0].reason.contains("between 0 and 2"));
        // And the valid boundary values pass untouched
        let config = RequestConfig::from_options(&json!({ "temperature": 2.0 })).unwrap();
        assert_eq!(config.temperature, 2.0);
        let config = RequestConfig::from_options(&json!({ "temperature": 0 })).unwrap();
        assert_eq!(config.temperature, 0.0);
    }

    #[test]
    fn test_top_values_of_zero_accepted() {
        // 0 disables top-k and top-p rather than being out of range
        let config = RequestConfig::from_options(&json!({ "top_k": 0, "top_p": 0.0 })).unwrap();
        assert_eq!(config.top_k, 0);
        assert_eq!(config.top_p, 0.0);
    }

    #[test]
    fn test_eta_and_tau_checked_while_mirostat_off() {
        let errors = RequestConfig::from_options(&json!({
            "mirostat_mode": 0,
            "mirostat_eta": "fast",
            "mirostat_tau": -2.0,
        }))
        .unwrap_err();
        assert_eq!(errors.fields(), vec![OPT_MIROSTAT_ETA, OPT_MIROSTAT_TAU]);
    }

    #[test]
    fn test_all_errors_collected_in_one_pass() {
        let errors = RequestConfig::from_options(&json!({
            "chat_model": "",
            "ctx_size": -1,
            "temperature": 9,
            "top_p": 2,
        }))
        .unwrap_err();
        assert_eq!(errors.len(), 4);
        let fields = errors.fields();
        assert!(fields.contains(&OPT_CHAT_MODEL));
        assert!(fields.contains(&OPT_CTX_SIZE));
        assert!(fields.contains(&OPT_TEMPERATURE));
        assert!(fields.contains(&OPT_TOP_P));
    }

    #[test]
    fn test_non_object_options_rejected() {
        let errors = RequestConfig::from_options(&json!("fast please")).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.errors[0].field, "options");
    }

    #[test]
    fn test_error_display_lists_everything() {
        let errors = RequestConfig::from_options(&json!({
            "temperature": 5,
            "top_k": -1,
        }))
        .unwrap_err();
        let text = errors.to_string();
        assert!(text.contains("temperature"));
        assert!(text.contains("top_k"));
    }

    // ==================== round-trip tests ====================

    #[test]
    fn test_round_trip_defaults() {
        let config = RequestConfig::default();
        let reparsed = RequestConfig::from_options(&config.to_options()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_round_trip_custom_values() {
        let config = RequestConfig::from_options(&json!({
            "chat_model": "mistral:7b",
            "ctx_size": 8192,
            "max_tokens": -1,
            "mirostat_mode": "2",
            "mirostat_eta": 0.05,
            "mirostat_tau": 6.5,
            "temperature": 1.25,
            "repeat_penalty": 0.0,
            "top_k": 0,
            "top_p": 1.0,
            "timeout": 12.5,
        }))
        .unwrap();
        let reparsed = RequestConfig::from_options(&config.to_options()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_to_options_uses_wire_sentinel() {
        let mut config = RequestConfig::default();
        config.max_tokens = MaxTokens::Unbounded;
        let options = config.to_options();
        assert_eq!(options[OPT_MAX_TOKENS], json!(-1));
    }
}
