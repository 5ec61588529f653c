use serde_json::Value;
use std::collections::HashMap;

/// Previous and incoming value of one state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextEntry {
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Everything a setter can see about a device while applying one message:
/// the stored state values overlaid with the values decoded from it.
#[derive(Debug, Clone, Default)]
pub struct Context {
    entries: HashMap<String, ContextEntry>,
}

impl Context {
    /// Seed from the values currently stored for the device.
    pub fn from_current(current: HashMap<String, Value>) -> Self {
        let entries = current
            .into_iter()
            .map(|(name, value)| {
                (
                    name,
                    ContextEntry {
                        old: Some(value),
                        new: None,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Record the decoded value of `name`. A missing value still creates the
    /// entry so dependants can see that the state took part in the message.
    pub fn set_new(&mut self, name: &str, value: Option<Value>) {
        self.entries.entry(name.to_string()).or_default().new = value;
    }

    pub fn entry(&self, name: &str) -> Option<&ContextEntry> {
        self.entries.get(name)
    }

    pub fn old_value(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).and_then(|e| e.old.as_ref())
    }

    pub fn new_value(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).and_then(|e| e.new.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_current_values_become_old() {
        let mut current = HashMap::new();
        current.insert("occupancy_timeout".to_string(), json!(90));
        current.insert("occupancy".to_string(), json!(false));

        let mut ctx = Context::from_current(current);
        ctx.set_new("occupancy", Some(json!(true)));
        ctx.set_new("no_motion", None);

        assert_eq!(ctx.old_value("occupancy_timeout"), Some(&json!(90)));
        assert_eq!(ctx.new_value("occupancy_timeout"), None);
        assert_eq!(ctx.old_value("occupancy"), Some(&json!(false)));
        assert_eq!(ctx.new_value("occupancy"), Some(&json!(true)));
        assert!(ctx.entry("no_motion").is_some());
        assert_eq!(ctx.len(), 3);
    }
}
