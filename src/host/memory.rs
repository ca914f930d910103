use crate::entities::inventory::{ArmorSlot, ContainerKind, CONTAINER_KINDS};
use crate::entities::item::{ItemRecord, PlayerId};
use crate::entities::stats::Vitals;
use crate::host::LiveActor;
use std::collections::HashSet;

/// Actor held entirely in memory. Used for dry-run applies and as a
/// stand-in host; individual containers or armor slots can be made to
/// refuse writes.
#[derive(Debug, Clone)]
pub struct MemoryActor {
    id: PlayerId,
    connected: bool,
    containers: [Vec<Option<ItemRecord>>; 4],
    vitals: Vitals,
    refused_containers: HashSet<ContainerKind>,
    refused_armor: HashSet<ArmorSlot>,
    mutations: usize,
}

impl MemoryActor {
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            connected: true,
            containers: CONTAINER_KINDS.map(|kind| vec![None; kind.size()]),
            vitals: Vitals::default(),
            refused_containers: HashSet::new(),
            refused_armor: HashSet::new(),
            mutations: 0,
        }
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn refuse_container(&mut self, kind: ContainerKind) {
        self.refused_containers.insert(kind);
    }

    pub fn refuse_armor(&mut self, slot: ArmorSlot) {
        self.refused_armor.insert(slot);
    }

    /// Number of container and vitals writes performed so far.
    pub fn mutations(&self) -> usize {
        self.mutations
    }

    pub fn slot(&self, kind: ContainerKind, index: usize) -> Option<&ItemRecord> {
        self.containers[kind.index()]
            .get(index)
            .and_then(|slot| slot.as_ref())
    }

    pub fn put(&mut self, kind: ContainerKind, index: usize, item: ItemRecord) {
        if let Some(slot) = self.containers[kind.index()].get_mut(index) {
            *slot = Some(item);
        }
    }

    fn write(
        &mut self,
        kind: ContainerKind,
        index: usize,
        item: Option<ItemRecord>,
    ) -> Result<(), String> {
        if self.refused_containers.contains(&kind) {
            return Err(format!("{} refuses writes", kind.label()));
        }
        let slot = self.containers[kind.index()]
            .get_mut(index)
            .ok_or_else(|| format!("{} slot {} out of range", kind.label(), index))?;
        *slot = item;
        self.mutations += 1;
        Ok(())
    }
}

impl LiveActor for MemoryActor {
    fn player_id(&self) -> PlayerId {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn contents(&self, kind: ContainerKind) -> Vec<Option<ItemRecord>> {
        self.containers[kind.index()].clone()
    }

    fn clear(&mut self, kind: ContainerKind) {
        self.containers[kind.index()] = vec![None; kind.size()];
        self.mutations += 1;
    }

    fn set_slot(
        &mut self,
        kind: ContainerKind,
        index: usize,
        item: Option<ItemRecord>,
    ) -> Result<(), String> {
        self.write(kind, index, item)
    }

    fn set_armor(&mut self, slot: ArmorSlot, item: Option<ItemRecord>) -> Result<(), String> {
        if self.refused_armor.contains(&slot) {
            return Err(format!("armor slot {:?} refuses writes", slot));
        }
        self.write(ContainerKind::Armor, slot.index(), item)
    }

    fn vitals(&self) -> Vitals {
        self.vitals
    }

    fn set_max_health(&mut self, value: u32) -> Result<(), String> {
        if value == 0 {
            return Err("max health must be positive".to_string());
        }
        self.vitals.max_health = value;
        self.vitals.health = self.vitals.health.min(value);
        self.mutations += 1;
        Ok(())
    }

    fn set_health(&mut self, value: u32) -> Result<(), String> {
        if value > self.vitals.max_health {
            return Err(format!(
                "health {} above max health {}",
                value, self.vitals.max_health
            ));
        }
        self.vitals.health = value;
        self.mutations += 1;
        Ok(())
    }

    fn set_food(&mut self, value: u32) {
        self.vitals.food = value;
        self.mutations += 1;
    }

    fn set_experience(&mut self, experience: u64, level: u32) {
        self.vitals.experience = experience;
        self.vitals.level = level;
        self.mutations += 1;
    }
}
