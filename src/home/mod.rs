//! Home state model and bounded context assembly.
//!
//! The host exposes its area/device graph and entity states through the
//! [`StateRegistry`] trait. [`ContextBuilder`] turns one read of that registry
//! into an immutable [`HomeContext`] snapshot, trimmed so its rendered form
//! fits within a [`PromptBudget`] derived from the model's context window.

pub mod builder;

pub use builder::ContextBuilder;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Group name for devices whose area is unset or unknown.
pub const FALLBACK_AREA: &str = "No Area";

/// Rough number of prompt characters per model token.
pub const APPROX_CHARS_PER_TOKEN: usize = 4;

/// Estimated per-device line overhead (separators, indentation).
const ROW_OVERHEAD: usize = 8;

/// Estimated per-group header overhead.
const HEADER_OVERHEAD: usize = 4;

/// Errors raised while reading home state from the host.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("home state registry unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of the host's area/device registry and entity states.
///
/// Implemented by the embedding host. All three reads happen once per
/// conversation turn; implementations should return a consistent snapshot.
#[async_trait]
pub trait StateRegistry: Send + Sync {
    /// All areas of the home, in the host's display order.
    async fn areas(&self) -> Result<Vec<Area>, StateError>;

    /// All exposed devices, in the host's display order.
    async fn devices(&self) -> Result<Vec<Device>, StateError>;

    /// Current state for every exposed entity, keyed by entity id.
    async fn entity_states(&self) -> Result<BTreeMap<String, EntityState>, StateError>;
}

/// An area of the home (room, floor, zone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Area {
    pub id: String,
    pub name: String,
}

/// An exposed device. `id` is the entity id in `domain.object` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    /// Area the device belongs to, if any. Unknown ids group under
    /// [`FALLBACK_AREA`].
    pub area_id: Option<String>,
    pub name: String,
    pub domain: String,
    /// Alternative spoken names for the device.
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Current state of an entity plus its attribute map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    pub state: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl EntityState {
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// Immutable snapshot of home state for a single conversation turn.
///
/// Built once per turn by [`ContextBuilder`] and handed to the prompt
/// renderer. The timestamp is captured at build time so that rendering the
/// same context twice yields identical output.
#[derive(Debug, Clone, PartialEq)]
pub struct HomeContext {
    /// Display name of the home.
    pub home_name: String,
    /// Human-readable time the snapshot was taken.
    pub captured_at: String,
    pub areas: Vec<Area>,
    pub devices: Vec<Device>,
    pub states: BTreeMap<String, EntityState>,
}

/// Devices of one area group, in device order.
#[derive(Debug)]
pub struct DeviceGroup<'a> {
    pub name: &'a str,
    pub devices: Vec<&'a Device>,
}

/// Area-grouped view of a context. Scenes, scripts and automations are
/// listed apart from the area groups, mirroring how the prompt presents
/// them.
#[derive(Debug)]
pub struct GroupedContext<'a> {
    pub areas: Vec<DeviceGroup<'a>>,
    pub scenes: Vec<&'a Device>,
    pub scripts: Vec<&'a Device>,
    pub automations: Vec<&'a Device>,
}

/// What a [`HomeContext::trim_to_budget`] pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrimOutcome {
    pub attributes_cleared: usize,
    pub devices_dropped: usize,
}

impl TrimOutcome {
    pub fn is_noop(&self) -> bool {
        self.attributes_cleared == 0 && self.devices_dropped == 0
    }
}

impl HomeContext {
    pub fn new(
        home_name: impl Into<String>,
        captured_at: impl Into<String>,
        areas: Vec<Area>,
        devices: Vec<Device>,
        states: BTreeMap<String, EntityState>,
    ) -> Self {
        Self {
            home_name: home_name.into(),
            captured_at: captured_at.into(),
            areas,
            devices,
            states,
        }
    }

    /// Group devices for prompt assembly.
    ///
    /// Every area appears, in registry order, even when it holds no devices.
    /// Scenes, scripts and automations form their own lists. Devices with a
    /// missing or unknown area id land in a trailing [`FALLBACK_AREA`] group.
    pub fn grouped(&self) -> GroupedContext<'_> {
        let area_index: HashMap<&str, usize> = self
            .areas
            .iter()
            .enumerate()
            .map(|(i, area)| (area.id.as_str(), i))
            .collect();

        let mut areas: Vec<DeviceGroup<'_>> = self
            .areas
            .iter()
            .map(|area| DeviceGroup {
                name: area.name.as_str(),
                devices: Vec::new(),
            })
            .collect();
        let mut fallback: Vec<&Device> = Vec::new();
        let mut scenes = Vec::new();
        let mut scripts = Vec::new();
        let mut automations = Vec::new();

        for device in &self.devices {
            match device.domain.as_str() {
                "scene" => scenes.push(device),
                "script" => scripts.push(device),
                "automation" => automations.push(device),
                _ => {
                    let slot = device
                        .area_id
                        .as_deref()
                        .and_then(|id| area_index.get(id).copied());
                    match slot {
                        Some(i) => areas[i].devices.push(device),
                        None => fallback.push(device),
                    }
                }
            }
        }

        if !fallback.is_empty() {
            areas.push(DeviceGroup {
                name: FALLBACK_AREA,
                devices: fallback,
            });
        }

        GroupedContext {
            areas,
            scenes,
            scripts,
            automations,
        }
    }

    /// State of an entity, or "unknown" when the host reported none.
    pub fn state_of(&self, entity_id: &str) -> &str {
        self.states
            .get(entity_id)
            .map(|s| s.state.as_str())
            .unwrap_or("unknown")
    }

    /// Estimated rendered footprint of the context payload, in characters.
    ///
    /// Counts group headers and one line per device (entity id, name, state,
    /// aliases and the serialized attribute map). Fixed template text is
    /// not the context's to account for.
    pub fn estimated_chars(&self) -> usize {
        let grouped = self.grouped();
        let mut total = 0;

        for group in &grouped.areas {
            total += group.name.len() + HEADER_OVERHEAD;
            for device in &group.devices {
                total += self.device_row_chars(device);
            }
        }
        for list in [&grouped.scenes, &grouped.scripts, &grouped.automations] {
            if !list.is_empty() {
                total += HEADER_OVERHEAD;
            }
            for device in list.iter() {
                total += self.device_row_chars(device);
            }
        }
        total
    }

    fn device_row_chars(&self, device: &Device) -> usize {
        let (state_len, attr_len) = match self.states.get(&device.id) {
            Some(entity) => (entity.state.len(), attributes_chars(&entity.attributes)),
            None => ("unknown".len(), 0),
        };
        let alias_len: usize = device.aliases.iter().map(|a| a.len() + 2).sum();
        device.id.len() + device.name.len() + state_len + attr_len + alias_len + ROW_OVERHEAD
    }

    /// Shrink the context until its estimated footprint fits `budget`.
    ///
    /// Attribute detail goes first: the attribute map with the largest
    /// serialized footprint is cleared (its key set stays, values go),
    /// repeating until the context fits or no attributes remain. Only then
    /// are whole devices dropped, always from the most populated group and
    /// always from the end of that group, and never the last device of a
    /// group. Areas are never removed. Ties resolve by entity id and group
    /// order, so trimming the same context twice gives the same result.
    pub fn trim_to_budget(&mut self, budget: &PromptBudget) -> TrimOutcome {
        let mut outcome = TrimOutcome::default();

        while self.estimated_chars() > budget.max_chars() {
            let victim = self
                .states
                .iter()
                .filter(|(_, entity)| entity.attributes.values().any(|v| !v.is_null()))
                .map(|(id, entity)| (attributes_chars(&entity.attributes), id.clone()))
                .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)));
            match victim {
                Some((_, id)) => {
                    if let Some(entity) = self.states.get_mut(&id) {
                        for value in entity.attributes.values_mut() {
                            *value = Value::Null;
                        }
                    }
                    outcome.attributes_cleared += 1;
                }
                None => break,
            }
        }

        while self.estimated_chars() > budget.max_chars() {
            let victim = {
                let grouped = self.grouped();
                let mut candidates: Vec<&[&Device]> = Vec::new();
                for group in &grouped.areas {
                    candidates.push(&group.devices);
                }
                candidates.push(&grouped.scenes);
                candidates.push(&grouped.scripts);
                candidates.push(&grouped.automations);

                candidates
                    .into_iter()
                    .filter(|devices| devices.len() > 1)
                    .max_by_key(|devices| devices.len())
                    .and_then(|devices| devices.last())
                    .map(|device| device.id.clone())
            };
            match victim {
                Some(id) => {
                    self.devices.retain(|d| d.id != id);
                    self.states.remove(&id);
                    outcome.devices_dropped += 1;
                }
                None => break,
            }
        }

        outcome
    }
}

fn attributes_chars(attributes: &BTreeMap<String, Value>) -> usize {
    if attributes.is_empty() {
        return 0;
    }
    serde_json::to_string(attributes).map(|s| s.len()).unwrap_or(0)
}

/// Character allowance for the home-state portion of the system prompt.
///
/// Derived from the model's context window: roughly four characters per
/// token, with a quarter of the window held back for the fixed template
/// text, the user utterance and the completion lead-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptBudget {
    window_chars: usize,
    max_chars: usize,
}

impl PromptBudget {
    /// Budget for a model context window of `context_size` tokens.
    pub fn for_context_size(context_size: u32) -> Self {
        let window_chars = context_size as usize * APPROX_CHARS_PER_TOKEN;
        Self {
            window_chars,
            max_chars: window_chars - window_chars / 4,
        }
    }

    /// Budget with an explicit character cap on the context payload.
    pub fn from_chars(max_chars: usize) -> Self {
        Self {
            window_chars: max_chars + max_chars / 3,
            max_chars,
        }
    }

    /// Cap on the context payload.
    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Cap on the whole rendered prompt.
    pub fn window_chars(&self) -> usize {
        self.window_chars
    }
}
