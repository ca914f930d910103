#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContainerKind {
    Main,
    Armor,
    Auxiliary,
    OffHand,
}

impl ContainerKind {
    pub fn size(self) -> usize {
        match self {
            ContainerKind::Main => 36,
            ContainerKind::Armor => ArmorSlot::COUNT,
            ContainerKind::Auxiliary => 27,
            ContainerKind::OffHand => 1,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ContainerKind::Main => "inventory",
            ContainerKind::Armor => "armor",
            ContainerKind::Auxiliary => "ender_chest",
            ContainerKind::OffHand => "off_hand",
        }
    }

    pub fn index(self) -> usize {
        match self {
            ContainerKind::Main => 0,
            ContainerKind::Armor => 1,
            ContainerKind::Auxiliary => 2,
            ContainerKind::OffHand => 3,
        }
    }
}

pub const CONTAINER_KINDS: [ContainerKind; 4] = [
    ContainerKind::Main,
    ContainerKind::Armor,
    ContainerKind::Auxiliary,
    ContainerKind::OffHand,
];

/// Armor slot roles, ordered as they are stored in the armor container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArmorSlot {
    Boots,
    Leggings,
    Chestplate,
    Helmet,
}

impl ArmorSlot {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        match self {
            ArmorSlot::Boots => 0,
            ArmorSlot::Leggings => 1,
            ArmorSlot::Chestplate => 2,
            ArmorSlot::Helmet => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(ArmorSlot::Boots),
            1 => Some(ArmorSlot::Leggings),
            2 => Some(ArmorSlot::Chestplate),
            3 => Some(ArmorSlot::Helmet),
            _ => None,
        }
    }
}

pub const ARMOR_SLOTS: [ArmorSlot; 4] = [
    ArmorSlot::Boots,
    ArmorSlot::Leggings,
    ArmorSlot::Chestplate,
    ArmorSlot::Helmet,
];

/// One serialized blob per container, indexed by `ContainerKind::index`.
/// An empty string is the canonical "no data" value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerBlobs {
    blobs: [String; 4],
}

impl ContainerBlobs {
    pub fn get(&self, kind: ContainerKind) -> &str {
        &self.blobs[kind.index()]
    }

    pub fn set(&mut self, kind: ContainerKind, blob: String) {
        self.blobs[kind.index()] = blob;
    }

    pub fn has(&self, kind: ContainerKind) -> bool {
        !self.blobs[kind.index()].is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.iter().all(|blob| blob.is_empty())
    }
}
