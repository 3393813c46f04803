//! Storage backend for host defined resources

use std::collections::HashMap;

use super::{PropertyError, PropertyValue};

/// Values of non-foundational resources, keyed by resource and optional resId.
///
/// The responder reads and writes through this trait so hosts can back
/// resources with their own state.
pub trait PropertyStore: Send {
    fn get(&self, resource: &str, res_id: Option<&str>) -> Option<PropertyValue>;

    fn set(
        &mut self,
        resource: &str,
        res_id: Option<&str>,
        value: PropertyValue,
    ) -> Result<(), PropertyError>;

    fn remove(&mut self, resource: &str, res_id: Option<&str>) -> Option<PropertyValue>;
}

/// In-memory store, the default backend
#[derive(Debug, Default)]
pub struct MemoryPropertyStore {
    values: HashMap<(String, Option<String>), PropertyValue>,
}

impl MemoryPropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn key(resource: &str, res_id: Option<&str>) -> (String, Option<String>) {
    (resource.to_string(), res_id.map(str::to_string))
}

impl PropertyStore for MemoryPropertyStore {
    fn get(&self, resource: &str, res_id: Option<&str>) -> Option<PropertyValue> {
        self.values.get(&key(resource, res_id)).cloned()
    }

    fn set(
        &mut self,
        resource: &str,
        res_id: Option<&str>,
        value: PropertyValue,
    ) -> Result<(), PropertyError> {
        self.values.insert(key(resource, res_id), value);
        Ok(())
    }

    fn remove(&mut self, resource: &str, res_id: Option<&str>) -> Option<PropertyValue> {
        self.values.remove(&key(resource, res_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::JsonValue;

    #[test]
    fn test_values_are_superseded_per_res_id() {
        let mut store = MemoryPropertyStore::new();
        let a = PropertyValue::json("X", &JsonValue::from(1i64));
        let b = PropertyValue::json("X", &JsonValue::from(2i64));
        store.set("X", None, a.clone()).unwrap();
        store.set("X", Some("7"), b.clone()).unwrap();
        assert_eq!(store.get("X", None), Some(a));
        assert_eq!(store.get("X", Some("7")), Some(b.clone()));

        let c = PropertyValue::json("X", &JsonValue::from(3i64));
        store.set("X", Some("7"), c.clone()).unwrap();
        assert_eq!(store.get("X", Some("7")), Some(c));
        assert_eq!(store.len(), 2);

        assert!(store.remove("X", None).is_some());
        assert!(store.get("X", None).is_none());
    }
}
