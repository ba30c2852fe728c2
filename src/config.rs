//! Plugin configuration slots, loading and example generation.
//!
//! Each plugin may register one configuration object. The file holds one
//! section per plugin name; sections for unknown names are ignored and
//! fields missing from a section keep the value the plugin was built with.

use crate::error::{HostError, Result};
use config::{Environment, File, FileFormat, Map, Source, Value};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Name → configuration slot mapping, as held by the registry.
pub type Configurations = BTreeMap<String, Arc<dyn ConfigSlot>>;

/// Type-erased configuration object.
pub trait ConfigSlot: Send + Sync {
    /// Current value as a JSON tree.
    fn snapshot(&self) -> Result<serde_json::Value>;

    /// Replaces the value with `section`, a complete tree for the slot's
    /// type. `key` names the plugin in errors.
    fn load(&self, key: &str, section: serde_json::Value) -> Result<()>;
}

/// Shared, typed configuration object.
///
/// The plugin keeps one clone and reads it during `init`/`run`; the host
/// registers another clone and fills it from the configuration file.
pub struct Slot<T> {
    value: Arc<RwLock<T>>,
}

impl<T> Slot<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(value)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.value.read()
    }

    pub fn set(&self, value: T) {
        *self.value.write() = value;
    }
}

impl<T: Clone> Slot<T> {
    pub fn get(&self) -> T {
        self.value.read().clone()
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<T: Default> Default for Slot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Slot").field(&*self.value.read()).finish()
    }
}

impl<T> ConfigSlot for Slot<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn snapshot(&self) -> Result<serde_json::Value> {
        serde_json::to_value(&*self.value.read())
            .map_err(|e| HostError::Serialization(e.to_string()))
    }

    fn load(&self, key: &str, section: serde_json::Value) -> Result<()> {
        let value: T = serde_json::from_value(section)
            .map_err(|e| HostError::config_file(key.to_string(), e.to_string()))?;
        self.set(value);
        Ok(())
    }
}

impl<T> From<Slot<T>> for Arc<dyn ConfigSlot>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn from(slot: Slot<T>) -> Self {
        Arc::new(slot)
    }
}

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Picks the format from the file extension, TOML when unknown.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }

    fn file_format(self) -> FileFormat {
        match self {
            ConfigFormat::Toml => FileFormat::Toml,
            ConfigFormat::Json => FileFormat::Json,
        }
    }
}

/// Loads and writes the plugin configuration file.
#[derive(Debug, Clone, Default)]
pub struct Configurator {
    format: Option<ConfigFormat>,
    env_prefix: Option<String>,
}

impl Configurator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces a format instead of looking at the file extension.
    pub fn with_format(mut self, format: ConfigFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Lets `<PREFIX>_<PLUGIN>__<FIELD>` environment variables override the
    /// file.
    pub fn with_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    fn format_for(&self, path: &Path) -> ConfigFormat {
        self.format.unwrap_or_else(|| ConfigFormat::from_path(path))
    }

    /// Populates every slot from `path`.
    pub fn load(&self, path: &Path, configs: &Configurations) -> Result<()> {
        if configs.is_empty() {
            return Ok(());
        }

        let path_str = path.to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        // Sources are collected one by one: merging them through a builder
        // would fold every key to lower case.
        let file = File::new(&path_str, self.format_for(path).file_format())
            .required(true)
            .collect()?;
        let overrides = match &self.env_prefix {
            Some(prefix) => Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .collect()?,
            None => Map::new(),
        };

        for (name, slot) in configs {
            // Current values act as defaults for fields the file leaves out
            let mut section = slot.snapshot()?;
            if let Some(value) = file.get(name) {
                merge(&mut section, to_json(name, value.clone())?);
            }

            let env_name = name.to_lowercase();
            for (key, value) in &overrides {
                let Some((plugin, field)) = key.split_once('.') else {
                    continue;
                };
                if plugin == env_name {
                    debug!(plugin = %name, field, "Configuration overridden from environment");
                    set_path(&mut section, field, to_json(name, value.clone())?);
                }
            }

            slot.load(name, section)?;
        }

        info!("Configuration loaded from {}", path_str);
        Ok(())
    }

    /// Renders the mapping in the format used for `path`.
    pub fn render_for(&self, path: &Path, configs: &Configurations) -> Result<String> {
        render(self.format_for(path), configs)
    }

    /// Writes the current values of every slot as an example file.
    pub fn write_example(&self, path: &Path, configs: &Configurations) -> Result<()> {
        let content = self.render_for(path, configs)?;
        std::fs::write(path, content)?;
        info!("Configuration example written to {}", path.display());
        Ok(())
    }
}

/// Renders the current values of every slot.
pub fn render(format: ConfigFormat, configs: &Configurations) -> Result<String> {
    let values = snapshot_all(configs)?;
    match format {
        ConfigFormat::Json => serde_json::to_string_pretty(&values)
            .map_err(|e| HostError::Serialization(e.to_string())),
        ConfigFormat::Toml => {
            // TOML has no null, unset optional fields are simply left out
            let values: BTreeMap<String, serde_json::Value> = values
                .into_iter()
                .map(|(name, value)| (name, strip_nulls(value)))
                .collect();
            toml::to_string_pretty(&values).map_err(|e| HostError::Serialization(e.to_string()))
        }
    }
}

fn to_json(name: &str, value: Value) -> Result<serde_json::Value> {
    value
        .try_deserialize()
        .map_err(|e| HostError::config_file(name.to_string(), e.to_string()))
}

/// Overlays `overlay` onto `base`, descending into tables present in both.
fn merge(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Sets a dotted, lower-cased environment path, matching existing field
/// names without regard to case.
fn set_path(section: &mut serde_json::Value, path: &str, value: serde_json::Value) {
    let mut target = section;
    for segment in path.split('.') {
        if !target.is_object() {
            *target = serde_json::Value::Object(serde_json::Map::new());
        }
        let serde_json::Value::Object(fields) = target else {
            return;
        };
        let key = fields
            .keys()
            .find(|key| key.to_lowercase() == segment)
            .cloned()
            .unwrap_or_else(|| segment.to_string());
        target = fields.entry(key).or_insert(serde_json::Value::Null);
    }
    *target = value;
}

fn snapshot_all(configs: &Configurations) -> Result<BTreeMap<String, serde_json::Value>> {
    configs
        .iter()
        .map(|(name, slot)| Ok((name.clone(), slot.snapshot()?)))
        .collect()
}

fn strip_nulls(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(strip_nulls).collect())
        }
        other => other,
    }
}
