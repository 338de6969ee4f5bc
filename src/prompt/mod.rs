//! System prompt templates and rendering.
//!
//! A [`PromptTemplate`] is compiled once when options are applied, so bad
//! syntax is caught before any turn runs, and rendered once per turn against
//! a [`HomeContext`] snapshot. Rendering is strict: a template referencing a
//! field the context does not define fails instead of silently emitting
//! nothing.

use minijinja::{Environment, UndefinedBehavior};
use serde_json::{json, Value};

use crate::home::{Device, HomeContext};

/// Template name under which the system prompt is registered.
const TEMPLATE_NAME: &str = "system_prompt";

/// Built-in system prompt.
///
/// Presents the home the way the assistant expects it: devices grouped by
/// area, then scenes, scripts and automations as their own lists.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are 'Jarvis', a helpful assistant that can control the devices in this home.
The home is called {{ home_name }}. The current time and date is {{ current_time }}.

List of devices in this home, grouped by area, listed with their entity id, name, and current state:
{%- for group in device_groups %}
  {{ group.name }}:
  {%- for entity in group.entities %}
  - {{ entity.entity_id }} {{ entity.name }} - {{ entity.state }}
  {%- endfor %}
{%- endfor %}

List of scenes in this home, listed with their entity id and name:
{%- for entity in scenes %}
  - {{ entity.entity_id }} {{ entity.name }}
{%- endfor %}

List of scripts in this home, listed with their entity id and name:
{%- for entity in scripts %}
  - {{ entity.entity_id }} {{ entity.name }}
{%- endfor %}

List of automations in this home, listed with their entity id, name, and current state:
{%- for entity in automations %}
  - {{ entity.entity_id }} {{ entity.name }} - {{ entity.state }}
{%- endfor %}

Answer the user's questions about the world truthfully.
"#;

/// Template failures, split by when they can surface.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// Rejected while compiling the template source.
    #[error("template syntax error: {0}")]
    Syntax(String),
    /// Raised while rendering against a context, e.g. an undefined field.
    #[error("template render failed: {0}")]
    Render(String),
}

/// A syntax-checked system prompt template.
///
/// Construction fails on invalid syntax. Rendering is a pure function of
/// the template source and the context: no clock, no randomness, no
/// mutation of either input.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    source: String,
}

impl PromptTemplate {
    pub fn new(source: impl Into<String>) -> Result<Self, TemplateError> {
        let source = source.into();
        {
            let mut env = Environment::new();
            env.add_template(TEMPLATE_NAME, &source)
                .map_err(|e| TemplateError::Syntax(e.to_string()))?;
        }
        Ok(Self { source })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render the template against a home context snapshot.
    pub fn render(&self, context: &HomeContext) -> Result<String, TemplateError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_template(TEMPLATE_NAME, &self.source)
            .map_err(|e| TemplateError::Syntax(e.to_string()))?;
        let template = env
            .get_template(TEMPLATE_NAME)
            .map_err(|e| TemplateError::Render(e.to_string()))?;
        template
            .render(context_value(context))
            .map_err(|e| TemplateError::Render(e.to_string()))
    }
}

impl Default for PromptTemplate {
    /// The built-in assistant prompt. The source is a compile-time
    /// constant covered by the syntax tests, so no validation runs here.
    fn default() -> Self {
        Self {
            source: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Fields the template can reference.
///
/// Entity rows are uniform across all groups so custom templates can index
/// any field on any row without tripping strict undefined checks.
fn context_value(context: &HomeContext) -> Value {
    let grouped = context.grouped();
    let device_groups: Vec<Value> = grouped
        .areas
        .iter()
        .map(|group| {
            json!({
                "name": group.name,
                "entities": entity_rows(context, &group.devices),
            })
        })
        .collect();

    json!({
        "home_name": context.home_name,
        "current_time": context.captured_at,
        "device_groups": device_groups,
        "scenes": entity_rows(context, &grouped.scenes),
        "scripts": entity_rows(context, &grouped.scripts),
        "automations": entity_rows(context, &grouped.automations),
    })
}

fn entity_rows(context: &HomeContext, devices: &[&Device]) -> Vec<Value> {
    devices
        .iter()
        .map(|device| {
            let attributes = context
                .states
                .get(&device.id)
                .map(|entity| json!(entity.attributes))
                .unwrap_or_else(|| json!({}));
            json!({
                "entity_id": device.id,
                "name": device.name,
                "state": context.state_of(&device.id),
                "attributes": attributes,
                "aliases": device.aliases,
            })
        })
        .collect()
}

/// Cut `text` down to at most `max_chars` characters, on a character
/// boundary. Returns whether anything was cut.
pub fn clip_chars(text: String, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => {
            let mut clipped = text;
            clipped.truncate(cut);
            (clipped, true)
        }
        None => (text, false),
    }
}
