use crate::entities::item::ItemRecord;
use crate::entities::item_types::ItemTypeIndex;

/// Decides whether an item is safe to persist or apply. Used on both
/// sides of the codec so a corrupted count never round-trips.
#[derive(Debug, Clone, Default)]
pub struct ItemValidator {
    types: ItemTypeIndex,
}

impl ItemValidator {
    pub fn new(types: ItemTypeIndex) -> Self {
        Self { types }
    }

    pub fn types(&self) -> &ItemTypeIndex {
        &self.types
    }

    pub fn is_valid(&self, item: Option<&ItemRecord>) -> bool {
        let Some(item) = item else {
            return false;
        };
        if item.is_empty_type() || item.count == 0 {
            return false;
        }
        item.count <= self.types.max_stack(&item.type_name)
    }

    /// Replaces every invalid slot with an explicit empty marker, keeping
    /// slot positions addressable by index.
    pub fn sanitize(&self, slots: &[Option<ItemRecord>]) -> Vec<Option<ItemRecord>> {
        slots
            .iter()
            .map(|slot| {
                if self.is_valid(slot.as_ref()) {
                    slot.clone()
                } else {
                    None
                }
            })
            .collect()
    }
}
