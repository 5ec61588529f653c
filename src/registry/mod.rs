//! Model registries: which states a device model exposes and how each one is
//! read off the wire.
//!
//! A registry is a list of [`ModelFamily`] entries. Each family names one or
//! more model ids and a shared spec. Resolving a model binds every
//! [`SpecEntry`] for that concrete model, producing a [`ResolvedModel`] with
//! ready-to-use descriptors.

pub mod ble;
pub mod zigbee;

use crate::convert::{Conversion, Converter, ModelRef};
use crate::state::{DisplayMeta, StateDescriptor, StateKind, ValueMap, WireKey};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub manufacturer: Option<String>,
    pub name: String,
    #[serde(default)]
    pub market_model: Option<String>,
}

impl ModelInfo {
    pub fn new(manufacturer: &str, name: &str, market_model: Option<&str>) -> Self {
        Self {
            manufacturer: Some(manufacturer.to_string()),
            name: name.to_string(),
            market_model: market_model.map(str::to_string),
        }
    }

    /// "Manufacturer Name", or just the name when there is no manufacturer.
    pub fn display_name(&self) -> String {
        match &self.manufacturer {
            Some(manufacturer) => format!("{} {}", manufacturer, self.name),
            None => self.name.clone(),
        }
    }
}

/// One line of a model family's spec.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SpecEntry {
    /// Wire key the state reads; absent for states fed the whole message
    #[serde(default)]
    pub resource: Option<WireKey>,
    /// Name under which the value is retained by the gateway
    #[serde(default)]
    pub property: Option<String>,
    pub kind: StateKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub meta: Option<DisplayMeta>,
    #[serde(default)]
    pub value_map: Option<ValueMap>,
    #[serde(default)]
    pub depends_on: Option<Vec<String>>,
    /// Conversion steps; without any the state never decodes a value
    #[serde(default)]
    pub converters: Option<Vec<Converter>>,
}

impl SpecEntry {
    pub fn new(resource: Option<&str>, property: Option<&str>, kind: StateKind) -> Self {
        Self {
            resource: resource.map(WireKey::resource),
            property: property.map(str::to_string),
            kind,
            name: None,
            meta: None,
            value_map: None,
            depends_on: None,
            converters: None,
        }
    }

    /// Entry keyed by a binary-event id.
    pub fn event(eid: u32, kind: StateKind) -> Self {
        Self {
            resource: Some(WireKey::Event(eid)),
            ..Self::new(None, None, kind)
        }
    }

    pub fn named(mut self, name: &str, label: &str) -> Self {
        self.name = Some(name.to_string());
        self.meta = Some(DisplayMeta {
            label: Some(label.to_string()),
            ..DisplayMeta::default()
        });
        self
    }

    pub fn value_map(mut self, value_map: ValueMap) -> Self {
        self.value_map = Some(value_map);
        self
    }

    pub fn depends_on(mut self, names: &[&str]) -> Self {
        self.depends_on = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn converters(mut self, converters: &[Converter]) -> Self {
        self.converters = Some(converters.to_vec());
        self
    }

    /// Build the descriptor for one concrete model.
    pub fn bind(&self, model: ModelRef<'_>) -> BoundEntry {
        let mut descriptor = self.kind.descriptor();
        if let Some(name) = &self.name {
            descriptor = descriptor.renamed(name);
        }
        if let Some(meta) = &self.meta {
            descriptor = descriptor.with_meta(meta);
        }

        let chain = match &self.converters {
            Some(converters) => converters.iter().flat_map(|c| c.bind(model)).collect(),
            None => vec![Conversion::Discard],
        };

        let descriptor = descriptor
            .replace_value_map(self.value_map.clone())
            .replace_depends_on(self.depends_on.clone())
            .bind(self.resource.clone(), chain);

        BoundEntry {
            property: self.property.clone(),
            state: Arc::new(descriptor),
        }
    }
}

/// Model ids sharing one spec.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelFamily {
    #[serde(deserialize_with = "models_from_map")]
    pub models: Vec<(String, ModelInfo)>,
    #[serde(default)]
    pub spec: Vec<SpecEntry>,
}

impl ModelFamily {
    pub fn new(models: &[(&str, &str, &str, Option<&str>)], spec: Vec<SpecEntry>) -> Self {
        Self {
            models: models
                .iter()
                .map(|(id, manufacturer, name, market)| {
                    (id.to_string(), ModelInfo::new(manufacturer, name, *market))
                })
                .collect(),
            spec,
        }
    }

    pub fn info(&self, model: &str) -> Option<&ModelInfo> {
        self.models
            .iter()
            .find(|(id, _)| id == model)
            .map(|(_, info)| info)
    }
}

fn models_from_map<'de, D>(deserializer: D) -> Result<Vec<(String, ModelInfo)>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let map = BTreeMap::<String, ModelInfo>::deserialize(deserializer)?;
    Ok(map.into_iter().collect())
}

/// A spec entry bound to a concrete model.
#[derive(Debug, Clone)]
pub struct BoundEntry {
    pub property: Option<String>,
    pub state: Arc<StateDescriptor>,
}

impl BoundEntry {
    pub fn resource(&self) -> Option<&WireKey> {
        self.state.binding()
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedModel {
    pub manufacturer: Option<String>,
    pub name: String,
    pub model: String,
    pub spec: Vec<BoundEntry>,
}

impl ResolvedModel {
    pub fn state(&self, name: &str) -> Option<&Arc<StateDescriptor>> {
        self.spec
            .iter()
            .map(|entry| &entry.state)
            .find(|state| state.name() == name)
    }

    /// Drop states by name, e.g. the options-gated debug states.
    pub fn without(mut self, excluded: &[&str]) -> Self {
        self.spec
            .retain(|entry| !excluded.contains(&entry.state.name()));
        self
    }
}

pub(crate) fn resolve(
    family: &ModelFamily,
    id: &str,
    info: &ModelInfo,
    model: ModelRef<'_>,
) -> ResolvedModel {
    ResolvedModel {
        manufacturer: info.manufacturer.clone(),
        name: info.display_name(),
        model: info.market_model.clone().unwrap_or_else(|| id.to_string()),
        spec: family.spec.iter().map(|entry| entry.bind(model)).collect(),
    }
}
