// gateway/src/profile.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::registry::RegistryError;

/// A capability domain bound to one remote tool endpoint.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Ordered; ids are unique within a profile.
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub endpoint: String,
    /// Passed through to the endpoint untouched.
    #[serde(default)]
    pub configuration: BTreeMap<String, Value>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_version() -> String { "1.0.0".into() }
fn default_active() -> bool { true }

impl Profile {
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.id.trim().is_empty() {
            return Err(RegistryError::Invalid("profile id must not be empty".into()));
        }
        if self.endpoint.trim().is_empty() {
            return Err(RegistryError::Invalid(format!("profile '{}' has no endpoint", self.id)));
        }
        check_capabilities(&self.id, &self.capabilities)
    }
}

pub(crate) fn check_capabilities(profile_id: &str, caps: &[String]) -> Result<(), RegistryError> {
    let mut seen = BTreeSet::new();
    for c in caps {
        if !seen.insert(c.as_str()) {
            return Err(RegistryError::Invalid(format!("profile '{profile_id}' lists capability '{c}' twice")));
        }
    }
    Ok(())
}

/// Partial update; `None` leaves the field as it is. The id is immutable.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub version: Option<String>,
    pub capabilities: Option<Vec<String>>,
    pub endpoint: Option<String>,
    pub configuration: Option<BTreeMap<String, Value>>,
    pub is_active: Option<bool>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool { *self == Self::default() }

    /// Merge onto a copy of `base`, returning the post-merge record.
    pub fn apply(&self, base: &Profile) -> Result<Profile, RegistryError> {
        let mut p = base.clone();
        macro_rules! ov { ($field:ident) => { if let Some(v) = &self.$field { p.$field = v.clone(); } } }
        ov!(name);
        ov!(description);
        ov!(icon);
        ov!(version);
        ov!(capabilities);
        ov!(endpoint);
        ov!(configuration);
        if let Some(active) = self.is_active { p.is_active = active; }
        p.validate()?;
        Ok(p)
    }
}

fn builtin(id: &str, name: &str, description: &str, icon: &str, caps: &[&str], configuration: Value) -> Profile {
    let configuration = match configuration {
        Value::Object(map) => map.into_iter().collect(),
        _ => BTreeMap::new(),
    };
    Profile {
        id: id.into(),
        name: name.into(),
        description: description.into(),
        icon: icon.into(),
        version: default_version(),
        capabilities: caps.iter().map(|c| c.to_string()).collect(),
        endpoint: format!("http://localhost:3001/mcp/{id}"),
        configuration,
        is_active: true,
    }
}

/// Catalog used when no profiles are configured.
pub fn builtin_profiles() -> Vec<Profile> {
    use serde_json::json;
    vec![
        builtin("weather", "Weather Assistant", "Get weather information and forecasts", "🌤️",
            &["weather_current", "weather_forecast", "weather_alerts"],
            json!({"api_endpoint": "/weather", "cache_duration": 300})),
        builtin("calendar", "Calendar Manager", "Manage your calendar events and reminders", "📅",
            &["calendar_read", "calendar_write", "reminders"],
            json!({"api_endpoint": "/calendar", "sync_enabled": true})),
        builtin("notes", "Notes Assistant", "Create and manage your notes", "📝",
            &["notes_create", "notes_read", "notes_search"],
            json!({"api_endpoint": "/notes", "markdown_enabled": true})),
        builtin("tasks", "Task Manager", "Organize and track your tasks", "✅",
            &["tasks_create", "tasks_update", "tasks_complete"],
            json!({"api_endpoint": "/tasks", "priority_levels": ["low", "medium", "high"]})),
    ]
}
