//! State descriptor: one named, typed device property.
//!
//! Every device spec is a list of descriptors. A descriptor carries its display
//! metadata, an optional value map between wire values and canonical values,
//! the names of other states its setter reads, and the behavior used when a
//! new value is applied. Binding a descriptor to a wire key and a conversion
//! chain is what turns a catalogue template into a model-specific entry.

use super::context::Context;
use super::store::StateSink;
use super::timers::{TimerKey, TimerRegistry};
use crate::convert::{Conversion, apply_chain, as_number, loose_eq, number, truthy};
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

/// Occupancy timeout used when the device has none configured.
pub const DEFAULT_OCCUPANCY_TIMEOUT_SECS: f64 = 60.0;

/// The no-motion counter stops once it passes this many seconds.
pub const NO_MOTION_CAP_SECS: f64 = 1800.0;

const MAX_TIMEOUT_SECS: f64 = u32::MAX as f64;

static TYPE_BOOLEAN_ROLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(sensor|indicator|button|switch)").expect("valid role regex"));
static TYPE_NUMBER_ROLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(value|level)").expect("valid role regex"));
static READABLE_ROLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(state|sensor|indicator|value|level|switch)(\.\w*)*$").expect("valid role regex")
});
static WRITABLE_ROLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(state|button|level|switch)(\.\w*)*$").expect("valid role regex"));

/// Lumi resource path such as `4.1.85`.
static LUMI_RESOURCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+.){2}\d+$").expect("valid resource regex"));
/// MIoT property such as `2.1` (siid.piid).
static MIOT_RESOURCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+.\d+$").expect("valid resource regex"));

/// Identifier of a value on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireKey {
    /// Binary-event id
    Event(u32),
    /// Dotted resource path or `siid.piid`
    Resource(String),
}

impl WireKey {
    pub fn resource(path: &str) -> Self {
        WireKey::Resource(path.to_string())
    }

    pub fn to_value(&self) -> Value {
        match self {
            WireKey::Event(eid) => json!(eid),
            WireKey::Resource(path) => Value::String(path.clone()),
        }
    }
}

impl fmt::Display for WireKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireKey::Event(eid) => write!(f, "0x{:04X}", eid),
            WireKey::Resource(path) => f.write_str(path),
        }
    }
}

/// A raw `(key, value)` pair taken from an inbound message.
pub type WirePair = (WireKey, Value);

/// Value type of a state as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    Number,
    String,
}

/// Display metadata. Unset fields fall back to role-based defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayMeta {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub data_type: Option<DataType>,
    #[serde(default)]
    pub readable: Option<bool>,
    #[serde(default)]
    pub writable: Option<bool>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub enum_labels: Option<BTreeMap<String, String>>,
}

impl DisplayMeta {
    pub fn new(label: &str, role: &str) -> Self {
        Self {
            label: Some(label.to_string()),
            role: Some(role.to_string()),
            ..Self::default()
        }
    }

    pub fn unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.readable = Some(true);
        self.writable = Some(false);
        self
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = Some(writable);
        self
    }

    pub fn enum_labels(mut self, labels: &[(&str, &str)]) -> Self {
        self.enum_labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    /// Overlay fields set in `patch` onto this metadata.
    pub fn merge(mut self, patch: &DisplayMeta) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if patch.$field.is_some() { self.$field = patch.$field.clone(); })*
            };
        }
        take!(label, role, data_type, readable, writable, unit, min, max, enum_labels);
        self
    }
}

/// Fully resolved metadata handed to the host when a state is created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateObject {
    pub name: Option<String>,
    pub role: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    pub read: bool,
    pub write: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub states: Option<BTreeMap<String, String>>,
}

/// Bidirectional table between wire values and canonical values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "(Vec<Value>, Vec<Value>)", into = "(Vec<Value>, Vec<Value>)")]
pub struct ValueMap {
    pairs: Vec<(Value, Value)>,
}

impl ValueMap {
    pub fn from_pairs(pairs: Vec<(Value, Value)>) -> Self {
        Self { pairs }
    }

    /// The common `0/1 <-> false/true` table.
    pub fn boolean() -> Self {
        Self::from_pairs(vec![(json!(0), json!(false)), (json!(1), json!(true))])
    }

    /// `0/1 <-> true/false`, used where 0 means the active state.
    pub fn inverted_boolean() -> Self {
        Self::from_pairs(vec![(json!(0), json!(true)), (json!(1), json!(false))])
    }

    pub fn outer(&self) -> impl Iterator<Item = &Value> {
        self.pairs.iter().map(|(outer, _)| outer)
    }

    pub fn canonical(&self) -> impl Iterator<Item = &Value> {
        self.pairs.iter().map(|(_, canonical)| canonical)
    }

    /// Wire value to canonical value.
    pub fn left(&self, outer: &Value) -> Option<Value> {
        self.pairs
            .iter()
            .find(|(o, _)| loose_eq(o, outer))
            .map(|(_, c)| c.clone())
    }

    /// Canonical value back to wire value.
    pub fn right(&self, canonical: &Value) -> Option<Value> {
        self.pairs
            .iter()
            .find(|(_, c)| loose_eq(c, canonical))
            .map(|(o, _)| o.clone())
    }
}

impl TryFrom<(Vec<Value>, Vec<Value>)> for ValueMap {
    type Error = String;

    fn try_from((outer, canonical): (Vec<Value>, Vec<Value>)) -> Result<Self, Self::Error> {
        if outer.len() != canonical.len() {
            return Err(format!(
                "value map sides differ in length ({} vs {})",
                outer.len(),
                canonical.len()
            ));
        }
        Ok(Self::from_pairs(outer.into_iter().zip(canonical).collect()))
    }
}

impl From<ValueMap> for (Vec<Value>, Vec<Value>) {
    fn from(map: ValueMap) -> Self {
        map.pairs.into_iter().unzip()
    }
}

/// How a descriptor applies a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Behavior {
    /// Emit the new value as is
    #[default]
    Plain,
    /// Emit the value; a truthy value (re)arms a one-shot reset to false
    Occupancy,
    /// Count seconds since the last motion on a repeating timer
    NoMotion,
    /// Merge the new JSON document into the stored one
    DebugAccumulator,
}

#[derive(Debug, Clone)]
pub struct StateDescriptor {
    name: String,
    meta: DisplayMeta,
    value_map: Option<ValueMap>,
    depends_on: Vec<String>,
    behavior: Behavior,
    binding: Option<WireKey>,
    chain: Vec<Conversion>,
}

impl StateDescriptor {
    pub fn new(name: &str, meta: DisplayMeta) -> Self {
        Self {
            name: name.to_string(),
            meta,
            value_map: None,
            depends_on: Vec::new(),
            behavior: Behavior::Plain,
            binding: None,
            chain: Vec::new(),
        }
    }

    pub fn with_value_map(mut self, value_map: ValueMap) -> Self {
        self.value_map = Some(value_map);
        self
    }

    pub fn with_depends_on(mut self, names: &[&str]) -> Self {
        self.depends_on = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn renamed(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_meta(mut self, patch: &DisplayMeta) -> Self {
        self.meta = self.meta.merge(patch);
        self
    }

    pub fn replace_value_map(mut self, value_map: Option<ValueMap>) -> Self {
        if value_map.is_some() {
            self.value_map = value_map;
        }
        self
    }

    pub fn replace_depends_on(mut self, names: Option<Vec<String>>) -> Self {
        if let Some(names) = names {
            self.depends_on = names;
        }
        self
    }

    /// Attach the wire key and the model's resolved conversion chain.
    pub fn bind(mut self, binding: Option<WireKey>, chain: Vec<Conversion>) -> Self {
        self.binding = binding;
        self.chain = chain;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn meta(&self) -> &DisplayMeta {
        &self.meta
    }

    pub fn value_map(&self) -> Option<&ValueMap> {
        self.value_map.as_ref()
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    pub fn binding(&self) -> Option<&WireKey> {
        self.binding.as_ref()
    }

    pub fn chain(&self) -> &[Conversion] {
        &self.chain
    }

    /// Conversion chain then value map. `None` means nothing to update.
    pub fn normalize_left(&self, raw: &Value) -> Option<Value> {
        let converted = apply_chain(&self.chain, raw)?;
        match &self.value_map {
            Some(map) => map.left(&converted),
            None => Some(converted),
        }
    }

    /// Inverse value map for outbound values.
    pub fn normalize_right(&self, value: &Value) -> Option<Value> {
        match &self.value_map {
            Some(map) => map.right(value),
            None => Some(value.clone()),
        }
    }

    /// Decode this state from the full list of pairs in a message.
    ///
    /// A bound descriptor reads the last pair carrying its key. An unbound one
    /// receives the whole list as `[[key, value], ..]`.
    pub fn decode(&self, pairs: &[WirePair]) -> Option<Value> {
        match &self.binding {
            Some(key) => pairs
                .iter()
                .filter(|(k, _)| k == key)
                .last()
                .and_then(|(_, raw)| self.normalize_left(raw)),
            None => {
                let raw = Value::Array(
                    pairs
                        .iter()
                        .map(|(k, v)| Value::Array(vec![k.to_value(), v.clone()]))
                        .collect(),
                );
                self.normalize_left(&raw)
            }
        }
    }

    /// Wire parameters for writing `value` to the device.
    pub fn encode(&self, value: &Value) -> Option<Map<String, Value>> {
        let Some(WireKey::Resource(resource)) = &self.binding else {
            return None;
        };
        let Some(wire_value) = self.normalize_right(value) else {
            debug!("[State] {} has no wire value for {}", self.name, value);
            return None;
        };

        let mut params = Map::new();
        if LUMI_RESOURCE.is_match(resource) {
            params.insert(
                "params".to_string(),
                json!([{"res_name": resource, "value": wire_value}]),
            );
        } else if MIOT_RESOURCE.is_match(resource) {
            let mut ids = resource.split(|c: char| !c.is_ascii_digit());
            let siid: u64 = ids.next()?.parse().ok()?;
            let piid: u64 = ids.next()?.parse().ok()?;
            params.insert(
                "mi_spec".to_string(),
                json!([{"siid": siid, "piid": piid, "value": wire_value}]),
            );
        } else {
            return None;
        }
        Some(params)
    }

    /// Metadata with role-based defaults filled in.
    pub fn state_object(&self) -> StateObject {
        let role = self.meta.role.clone().unwrap_or_else(|| "state".to_string());

        let default_type = if TYPE_BOOLEAN_ROLE.is_match(&role) {
            DataType::Boolean
        } else if TYPE_NUMBER_ROLE.is_match(&role) {
            DataType::Number
        } else {
            DataType::String
        };

        StateObject {
            name: self.meta.label.clone(),
            data_type: self.meta.data_type.unwrap_or(default_type),
            read: self
                .meta
                .readable
                .unwrap_or_else(|| READABLE_ROLE.is_match(&role)),
            write: self
                .meta
                .writable
                .unwrap_or_else(|| WRITABLE_ROLE.is_match(&role)),
            unit: self.meta.unit.clone(),
            min: self.meta.min,
            max: self.meta.max,
            states: self.meta.enum_labels.clone(),
            role,
        }
    }

    /// Apply the context to this state, emitting values and arming timers.
    pub fn setter(
        &self,
        device_id: &str,
        sink: &Arc<dyn StateSink>,
        context: &Context,
        timers: &mut TimerRegistry,
    ) {
        match self.behavior {
            Behavior::Plain => {
                if let Some(value) = context.new_value(&self.name) {
                    sink.emit(device_id, &self.name, value.clone());
                }
            }
            Behavior::Occupancy => self.set_occupancy(device_id, sink, context, timers),
            Behavior::NoMotion => self.set_no_motion(device_id, sink, context, timers),
            Behavior::DebugAccumulator => {
                let source = self.dependency(0);
                let old = context.old_value(source).and_then(Value::as_str);
                let new = context.new_value(source).and_then(Value::as_str);
                sink.emit(
                    device_id,
                    &self.name,
                    Value::String(merge_debug_output(old, new)),
                );
            }
        }
    }

    fn dependency(&self, index: usize) -> &str {
        self.depends_on
            .get(index)
            .map(String::as_str)
            .unwrap_or(&self.name)
    }

    fn timeout_secs(&self, context: &Context) -> f64 {
        let source = self.dependency(1);
        context
            .old_value(source)
            .or_else(|| context.new_value(source))
            .and_then(as_number)
            .filter(|secs| *secs > 0.0 && *secs <= MAX_TIMEOUT_SECS)
            .unwrap_or(DEFAULT_OCCUPANCY_TIMEOUT_SECS)
    }

    fn set_occupancy(
        &self,
        device_id: &str,
        sink: &Arc<dyn StateSink>,
        context: &Context,
        timers: &mut TimerRegistry,
    ) {
        let value = context.new_value(self.dependency(0)).cloned();

        if value.as_ref().is_some_and(truthy) {
            let timeout = self.timeout_secs(context);
            let sink = Arc::clone(sink);
            let device = device_id.to_string();
            let name = self.name.clone();
            timers.schedule_once(
                TimerKey::new(device_id, &self.name),
                Duration::from_secs_f64(timeout),
                move || sink.emit(&device, &name, json!(false)),
            );
        }

        if let Some(value) = value {
            sink.emit(device_id, &self.name, value);
        }
    }

    fn set_no_motion(
        &self,
        device_id: &str,
        sink: &Arc<dyn StateSink>,
        context: &Context,
        timers: &mut TimerRegistry,
    ) {
        let triggered = context.new_value(self.dependency(0)).is_some_and(truthy);
        if !triggered {
            return;
        }

        let timeout = self.timeout_secs(context);
        let tick_sink = Arc::clone(sink);
        let device = device_id.to_string();
        let name = self.name.clone();
        let mut counter = timeout;
        timers.schedule_repeating(
            TimerKey::new(device_id, &self.name),
            Duration::from_secs_f64(timeout),
            move || {
                tick_sink.emit(&device, &name, number(counter));
                if counter > NO_MOTION_CAP_SECS {
                    return ControlFlow::Break(());
                }
                counter += timeout;
                ControlFlow::Continue(())
            },
        );

        sink.emit(device_id, &self.name, json!(0));
    }
}

/// Merge two debug documents. Newer scalar fields win; array fields are
/// unioned and sorted in natural order.
pub fn merge_debug_output(old: Option<&str>, new: Option<&str>) -> String {
    let old = parse_document(old);
    let new = parse_document(new);

    let mut merged = old.clone();
    for (key, value) in &new {
        let combined = match (merged.get(key), value) {
            (Some(Value::Array(previous)), Value::Array(incoming)) => {
                Value::Array(union_sorted(previous, incoming))
            }
            (None, Value::Array(incoming)) => Value::Array(union_sorted(&[], incoming)),
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }

    Value::Object(merged).to_string()
}

fn parse_document(raw: Option<&str>) -> Map<String, Value> {
    match raw.map(serde_json::from_str::<Value>) {
        Some(Ok(Value::Object(map))) => map,
        Some(Ok(_)) | None => Map::new(),
        Some(Err(e)) => {
            debug!("[State] Ignoring malformed debug document: {}", e);
            Map::new()
        }
    }
}

fn union_sorted(previous: &[Value], incoming: &[Value]) -> Vec<Value> {
    let mut items: Vec<Value> = Vec::with_capacity(previous.len() + incoming.len());
    for item in previous.iter().chain(incoming) {
        if !items.contains(item) {
            items.push(item.clone());
        }
    }
    items.sort_by(|a, b| natural_cmp(&sort_key(a), &sort_key(b)));
    items
}

fn sort_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compare strings with embedded numbers by numeric value ("2" < "10").
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = Chunks::new(a);
    let mut right = Chunks::new(b);

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let order = match (is_digits(x), is_digits(y)) {
                    (true, true) => {
                        let x = x.trim_start_matches('0');
                        let y = y.trim_start_matches('0');
                        x.len().cmp(&y.len()).then_with(|| x.cmp(y))
                    }
                    _ => x.cmp(y),
                };
                if order != Ordering::Equal {
                    return order;
                }
            }
        }
    }
}

fn is_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

/// Splits a string into alternating digit and non-digit runs.
struct Chunks<'a> {
    rest: &'a str,
}

impl<'a> Chunks<'a> {
    fn new(s: &'a str) -> Self {
        Self { rest: s }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let first = self.rest.chars().next()?;
        let digit = first.is_ascii_digit();
        let end = self
            .rest
            .find(|c: char| c.is_ascii_digit() != digit)
            .unwrap_or(self.rest.len());
        let (chunk, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(chunk)
    }
}
