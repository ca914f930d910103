use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Type name the host uses for an unoccupied slot.
pub const EMPTY_TYPE: &str = "AIR";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub type_name: String,
    pub count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lore: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub enchantments: BTreeMap<String, u16>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub damage: u32,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl ItemRecord {
    pub fn new(type_name: impl Into<String>, count: u32) -> Self {
        Self {
            type_name: type_name.into(),
            count,
            display_name: None,
            lore: Vec::new(),
            enchantments: BTreeMap::new(),
            damage: 0,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_enchantment(mut self, name: impl Into<String>, level: u16) -> Self {
        self.enchantments.insert(name.into(), level);
        self
    }

    pub fn is_empty_type(&self) -> bool {
        self.type_name.trim().is_empty() || self.type_name.eq_ignore_ascii_case(EMPTY_TYPE)
    }
}

/// Counts occupied slots in a container snapshot.
pub fn count_present(slots: &[Option<ItemRecord>]) -> usize {
    slots
        .iter()
        .filter(|slot| matches!(slot, Some(item) if !item.is_empty_type() && item.count > 0))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_type_matches_air_and_blank() {
        assert!(ItemRecord::new("AIR", 1).is_empty_type());
        assert!(ItemRecord::new("air", 1).is_empty_type());
        assert!(ItemRecord::new("  ", 1).is_empty_type());
        assert!(!ItemRecord::new("STONE", 1).is_empty_type());
    }

    #[test]
    fn count_present_skips_empty_slots() {
        let slots = vec![
            Some(ItemRecord::new("STONE", 3)),
            None,
            Some(ItemRecord::new("AIR", 1)),
            Some(ItemRecord::new("DIRT", 0)),
            Some(ItemRecord::new("DIRT", 1)),
        ];
        assert_eq!(count_present(&slots), 2);
    }
}
