//! Boundary to the host game process: the live actor handle and the tick
//! scheduler. Everything here is implemented by the host; `MemoryActor`
//! and `TickScheduler` are in-process implementations.

pub mod memory;
pub mod scheduler;

use crate::entities::inventory::{ArmorSlot, ContainerKind, CONTAINER_KINDS};
use crate::entities::item::{ItemRecord, PlayerId};
use crate::entities::stats::Vitals;

/// Hosts sharing an actor behind a mutex must lock it before the player
/// record it belongs to, never while holding the record lock.
pub trait LiveActor {
    fn player_id(&self) -> PlayerId;

    fn is_connected(&self) -> bool;

    /// Current slots of a container, `kind.size()` long.
    fn contents(&self, kind: ContainerKind) -> Vec<Option<ItemRecord>>;

    fn clear(&mut self, kind: ContainerKind);

    fn set_slot(
        &mut self,
        kind: ContainerKind,
        index: usize,
        item: Option<ItemRecord>,
    ) -> Result<(), String>;

    fn set_armor(&mut self, slot: ArmorSlot, item: Option<ItemRecord>) -> Result<(), String>;

    fn vitals(&self) -> Vitals;

    /// Must settle before `set_health` is called.
    fn set_max_health(&mut self, value: u32) -> Result<(), String>;

    fn set_health(&mut self, value: u32) -> Result<(), String>;

    fn set_food(&mut self, value: u32);

    fn set_experience(&mut self, experience: u64, level: u32);

    fn snapshot_contents(&self) -> [Vec<Option<ItemRecord>>; 4] {
        CONTAINER_KINDS.map(|kind| self.contents(kind))
    }
}
