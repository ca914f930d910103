use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_MAX_STACK: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemType {
    pub name: String,
    pub max_stack: u32,
}

#[derive(Debug, Clone)]
pub struct ItemTypeIndex {
    types: HashMap<String, ItemType>,
    default_max_stack: u32,
}

impl Default for ItemTypeIndex {
    fn default() -> Self {
        Self::with_default_max_stack(DEFAULT_MAX_STACK)
    }
}

impl ItemTypeIndex {
    pub fn with_default_max_stack(default_max_stack: u32) -> Self {
        Self {
            types: HashMap::new(),
            default_max_stack: default_max_stack.max(1),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ItemType> {
        self.types.get(&normalize(name))
    }

    pub fn insert(&mut self, item: ItemType) -> Result<(), String> {
        let key = normalize(&item.name);
        if key.is_empty() {
            return Err("item type name is empty".to_string());
        }
        if item.max_stack == 0 {
            return Err(format!("item type {} has zero max stack", item.name));
        }
        if self.types.contains_key(&key) {
            return Err(format!("item type {} already exists", item.name));
        }
        self.types.insert(key, item);
        Ok(())
    }

    /// Unknown types fall back to the index default.
    pub fn max_stack(&self, name: &str) -> u32 {
        self.get(name)
            .map(|item| item.max_stack)
            .unwrap_or(self.default_max_stack)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

pub fn build_item_types(types: &[ItemType], default_max_stack: u32) -> ItemTypeIndex {
    let mut index = ItemTypeIndex::with_default_max_stack(default_max_stack);
    for item in types {
        if let Err(err) = index.insert(item.clone()) {
            crate::telemetry::logging::log_error(&format!("item type table: {}", err));
        }
    }
    index
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}
