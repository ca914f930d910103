use crate::entities::inventory::{ContainerBlobs, ContainerKind, CONTAINER_KINDS};
use crate::entities::item::{ItemRecord, PlayerId};
use crate::entities::stats::Vitals;
use crate::persistence::backup;
use crate::persistence::codec::{count_encoded_items, CodecError, ContainerCodec};
use crate::persistence::combat_logout::{CombatLogout, CombatLogoutState, Transition};
use crate::telemetry::logging;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub type Document = BTreeMap<String, String>;

/// Per-record mutual-exclusion flag. A second `try_begin` while a token
/// is alive fails; dropping the token clears the flag.
#[derive(Debug, Default)]
pub struct InFlight(Arc<AtomicBool>);

#[derive(Debug)]
pub struct InFlightToken(Arc<AtomicBool>);

impl InFlight {
    pub fn try_begin(&self) -> Option<InFlightToken> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightToken(Arc::clone(&self.0)))
    }

    pub fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Drop for InFlightToken {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Items owed to the participant after a death, kept apart from the main
/// containers. `count` always matches the occupied slots in `serialized`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RespawnItems {
    serialized: String,
    count: usize,
    timestamp: u64,
}

impl RespawnItems {
    pub fn serialized(&self) -> &str {
        &self.serialized
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeOutcome {
    Written,
    /// Another encode holds the write guard; nothing changed.
    Rejected,
    /// Every tier failed for this container; live and backup blobs untouched.
    Failed(ContainerKind),
}

impl EncodeOutcome {
    pub fn is_written(self) -> bool {
        self == EncodeOutcome::Written
    }
}

#[derive(Debug)]
pub struct PlayerRecord {
    identity: PlayerId,
    pub name: String,
    pub first_seen: u64,
    pub last_seen: u64,
    pub vitals: Vitals,
    pub alignment: i32,
    pub balance: u64,
    pub guild: Option<String>,
    pub buddies: Vec<PlayerId>,
    pub quest_values: BTreeMap<String, i64>,
    pub(crate) containers: ContainerBlobs,
    pub(crate) backups: ContainerBlobs,
    inventory_saved_at: u64,
    combat_logout: CombatLogout,
    respawn: RespawnItems,
    write_guard: InFlight,
    apply_guard: InFlight,
}

impl PlayerRecord {
    pub fn new(identity: PlayerId, name: String, now: u64) -> Self {
        Self {
            identity,
            name,
            first_seen: now,
            last_seen: now,
            vitals: Vitals::default(),
            alignment: 0,
            balance: 0,
            guild: None,
            buddies: Vec::new(),
            quest_values: BTreeMap::new(),
            containers: ContainerBlobs::default(),
            backups: ContainerBlobs::default(),
            inventory_saved_at: 0,
            combat_logout: CombatLogout::default(),
            respawn: RespawnItems::default(),
            write_guard: InFlight::default(),
            apply_guard: InFlight::default(),
        }
    }

    pub fn identity(&self) -> PlayerId {
        self.identity
    }

    pub fn blob(&self, kind: ContainerKind) -> &str {
        self.containers.get(kind)
    }

    pub fn backup_blob(&self, kind: ContainerKind) -> &str {
        self.backups.get(kind)
    }

    pub fn has_inventory_data(&self) -> bool {
        !self.containers.is_empty()
    }

    pub fn inventory_saved_at(&self) -> u64 {
        self.inventory_saved_at
    }

    pub fn write_guard(&self) -> &InFlight {
        &self.write_guard
    }

    pub fn apply_guard(&self) -> &InFlight {
        &self.apply_guard
    }

    pub fn is_new_participant(&self, now: u64, grace_millis: u64) -> bool {
        now.saturating_sub(self.first_seen) <= grace_millis
    }

    /// Encodes all four containers and writes them only if every one
    /// succeeded. The backup snapshot happens just before the write.
    pub fn encode_containers(
        &mut self,
        contents: &[Vec<Option<ItemRecord>>; 4],
        codec: &ContainerCodec,
        now: u64,
    ) -> EncodeOutcome {
        let Some(_token) = self.write_guard.try_begin() else {
            logging::log_error(&format!(
                "encode rejected for {}: write already in progress",
                self.identity.0
            ));
            return EncodeOutcome::Rejected;
        };
        match encode_all(contents, codec) {
            Ok(blobs) => {
                self.commit_encoded(blobs, now);
                EncodeOutcome::Written
            }
            Err((kind, err)) => {
                logging::log_error(&format!(
                    "encode failed for {} {}: {}, keeping previous blobs",
                    self.identity.0,
                    kind.label(),
                    err
                ));
                EncodeOutcome::Failed(kind)
            }
        }
    }

    pub(crate) fn commit_encoded(&mut self, blobs: [String; 4], now: u64) {
        backup::snapshot(self);
        for (kind, blob) in CONTAINER_KINDS.into_iter().zip(blobs) {
            self.containers.set(kind, blob);
        }
        self.inventory_saved_at = now;
        logging::log_persistence(&format!("encoded containers for {}", self.identity.0));
    }

    pub fn combat_logout(&self) -> &CombatLogout {
        &self.combat_logout
    }

    pub fn set_combat_logout_state(&mut self, state: CombatLogoutState, now: u64) -> Transition {
        self.combat_logout.transition(state, self.alignment, now)
    }

    pub fn respawn(&self) -> &RespawnItems {
        &self.respawn
    }

    pub fn has_respawn_items(&self) -> bool {
        self.respawn.count > 0 && !self.respawn.serialized.is_empty()
    }

    pub fn respawn_item_count(&self) -> usize {
        self.respawn.count
    }

    /// Stores the valid items compacted into consecutive slots. An empty or
    /// all-invalid list clears the respawn state. Returns false, leaving the
    /// previous state in place, when encoding fails.
    pub fn set_respawn_items(
        &mut self,
        items: &[ItemRecord],
        codec: &ContainerCodec,
        now: u64,
    ) -> bool {
        let valid: Vec<Option<ItemRecord>> = items
            .iter()
            .filter(|item| codec.validator().is_valid(Some(*item)))
            .cloned()
            .map(Some)
            .collect();
        if valid.is_empty() {
            self.clear_respawn_items();
            return true;
        }
        match codec.encode(&valid, "respawn") {
            Ok(encoded) => {
                self.respawn = RespawnItems {
                    serialized: encoded.blob,
                    count: valid.len(),
                    timestamp: now,
                };
                true
            }
            Err(err) => {
                logging::log_error(&format!(
                    "respawn items for {} not stored: {}",
                    self.identity.0, err
                ));
                false
            }
        }
    }

    /// Returns fresh copies; the stored blob is left as is.
    pub fn respawn_items(&self, codec: &ContainerCodec) -> Vec<ItemRecord> {
        if !self.has_respawn_items() {
            return Vec::new();
        }
        codec.decode_items(&self.respawn.serialized)
    }

    pub fn clear_respawn_items(&mut self) {
        self.respawn = RespawnItems::default();
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        let mut put = |key: &str, value: String| {
            doc.insert(key.to_string(), value);
        };
        put(KEY_IDENTITY, self.identity.0.to_string());
        put(KEY_NAME, self.name.clone());
        put(KEY_FIRST_SEEN, self.first_seen.to_string());
        put(KEY_LAST_SEEN, self.last_seen.to_string());
        put(KEY_HEALTH, self.vitals.health.to_string());
        put(KEY_MAX_HEALTH, self.vitals.max_health.to_string());
        put(KEY_FOOD, self.vitals.food.to_string());
        put(KEY_EXPERIENCE, self.vitals.experience.to_string());
        put(KEY_LEVEL, self.vitals.level.to_string());
        put(KEY_ALIGNMENT, self.alignment.to_string());
        put(KEY_BALANCE, self.balance.to_string());
        put(KEY_GUILD, self.guild.clone().unwrap_or_default());
        put(
            KEY_BUDDIES,
            self.buddies
                .iter()
                .map(|id| id.0.to_string())
                .collect::<Vec<_>>()
                .join(","),
        );
        put(
            KEY_QUEST_VALUES,
            self.quest_values
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect::<Vec<_>>()
                .join(","),
        );
        for kind in CONTAINER_KINDS {
            put(kind.label(), self.containers.get(kind).to_string());
            put(backup_key(kind).as_str(), self.backups.get(kind).to_string());
        }
        put(KEY_INVENTORY_SAVED_AT, self.inventory_saved_at.to_string());
        put(
            KEY_COMBAT_LOGOUT_STATE,
            self.combat_logout.state().as_str().to_string(),
        );
        put(
            KEY_COMBAT_LOGOUT_AT,
            self.combat_logout.timestamp().to_string(),
        );
        put(
            KEY_COMBAT_LOGOUT_ALIGNMENT,
            self.combat_logout
                .alignment()
                .map(|value| value.to_string())
                .unwrap_or_default(),
        );
        put(KEY_RESPAWN_ITEMS, self.respawn.serialized.clone());
        put(KEY_RESPAWN_ITEM_COUNT, self.respawn.count.to_string());
        put(KEY_RESPAWN_ITEMS_AT, self.respawn.timestamp.to_string());
        doc
    }

    /// Rebuilds a record; transient guards always start cleared. Missing or
    /// empty keys take their defaults.
    pub fn from_document(doc: &Document) -> Result<Self, String> {
        let identity = PlayerId(
            parse_field::<u32>(doc, KEY_IDENTITY)?
                .ok_or_else(|| "document missing identity".to_string())?,
        );
        let first_seen = parse_field(doc, KEY_FIRST_SEEN)?.unwrap_or(0);
        let mut record = PlayerRecord::new(identity, text(doc, KEY_NAME).to_string(), first_seen);
        record.last_seen = parse_field(doc, KEY_LAST_SEEN)?.unwrap_or(first_seen);
        let defaults = Vitals::default();
        record.vitals = Vitals {
            health: parse_field(doc, KEY_HEALTH)?.unwrap_or(defaults.health),
            max_health: parse_field(doc, KEY_MAX_HEALTH)?.unwrap_or(defaults.max_health),
            food: parse_field(doc, KEY_FOOD)?.unwrap_or(defaults.food),
            experience: parse_field(doc, KEY_EXPERIENCE)?.unwrap_or(defaults.experience),
            level: parse_field(doc, KEY_LEVEL)?.unwrap_or(defaults.level),
        };
        record.alignment = parse_field(doc, KEY_ALIGNMENT)?.unwrap_or(0);
        record.balance = parse_field(doc, KEY_BALANCE)?.unwrap_or(0);
        let guild = text(doc, KEY_GUILD);
        record.guild = (!guild.is_empty()).then(|| guild.to_string());
        for entry in text(doc, KEY_BUDDIES).split(',').filter(|e| !e.is_empty()) {
            let id = entry
                .trim()
                .parse()
                .map_err(|_| format!("invalid buddy id {:?}", entry))?;
            record.buddies.push(PlayerId(id));
        }
        for entry in text(doc, KEY_QUEST_VALUES).split(',').filter(|e| !e.is_empty()) {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| format!("invalid quest value {:?}", entry))?;
            let value = value
                .trim()
                .parse()
                .map_err(|_| format!("invalid quest value {:?}", entry))?;
            record.quest_values.insert(key.trim().to_string(), value);
        }
        for kind in CONTAINER_KINDS {
            record
                .containers
                .set(kind, text(doc, kind.label()).to_string());
            record
                .backups
                .set(kind, text(doc, &backup_key(kind)).to_string());
        }
        record.inventory_saved_at = parse_field(doc, KEY_INVENTORY_SAVED_AT)?.unwrap_or(0);
        let state = CombatLogoutState::parse(text(doc, KEY_COMBAT_LOGOUT_STATE)).ok_or_else(
            || {
                format!(
                    "invalid combat logout state {:?}",
                    text(doc, KEY_COMBAT_LOGOUT_STATE)
                )
            },
        )?;
        record.combat_logout = CombatLogout::restore(
            state,
            parse_field(doc, KEY_COMBAT_LOGOUT_AT)?.unwrap_or(0),
            parse_field(doc, KEY_COMBAT_LOGOUT_ALIGNMENT)?,
        );
        let serialized = text(doc, KEY_RESPAWN_ITEMS).to_string();
        let declared: usize = parse_field(doc, KEY_RESPAWN_ITEM_COUNT)?.unwrap_or(0);
        if !serialized.is_empty() {
            // The stored count is only a hint; the blob decides.
            match count_encoded_items(&serialized) {
                Some(count) if count > 0 => {
                    if count != declared {
                        logging::log_error(&format!(
                            "respawn items for {}: stored count {} but blob holds {}",
                            identity.0, declared, count
                        ));
                    }
                    record.respawn = RespawnItems {
                        serialized,
                        count,
                        timestamp: parse_field(doc, KEY_RESPAWN_ITEMS_AT)?.unwrap_or(0),
                    };
                }
                _ => logging::log_error(&format!(
                    "respawn items for {} unreadable or empty, dropped",
                    identity.0
                )),
            }
        }
        Ok(record)
    }
}

/// Pure part of an encode: produces all four blobs or names the first
/// container whose tiers all failed.
pub fn encode_all(
    contents: &[Vec<Option<ItemRecord>>; 4],
    codec: &ContainerCodec,
) -> Result<[String; 4], (ContainerKind, CodecError)> {
    let mut blobs: [String; 4] = Default::default();
    for kind in CONTAINER_KINDS {
        let encoded = codec
            .encode(&contents[kind.index()], kind.label())
            .map_err(|err| (kind, err))?;
        blobs[kind.index()] = encoded.blob;
    }
    Ok(blobs)
}

const KEY_IDENTITY: &str = "identity";
const KEY_NAME: &str = "name";
const KEY_FIRST_SEEN: &str = "first_seen";
const KEY_LAST_SEEN: &str = "last_seen";
const KEY_HEALTH: &str = "health";
const KEY_MAX_HEALTH: &str = "max_health";
const KEY_FOOD: &str = "food";
const KEY_EXPERIENCE: &str = "experience";
const KEY_LEVEL: &str = "level";
const KEY_ALIGNMENT: &str = "alignment";
const KEY_BALANCE: &str = "balance";
const KEY_GUILD: &str = "guild";
const KEY_BUDDIES: &str = "buddies";
const KEY_QUEST_VALUES: &str = "quest_values";
const KEY_INVENTORY_SAVED_AT: &str = "inventory_saved_at";
const KEY_COMBAT_LOGOUT_STATE: &str = "combat_logout_state";
const KEY_COMBAT_LOGOUT_AT: &str = "combat_logout_at";
const KEY_COMBAT_LOGOUT_ALIGNMENT: &str = "combat_logout_alignment";
const KEY_RESPAWN_ITEMS: &str = "respawn_items";
const KEY_RESPAWN_ITEM_COUNT: &str = "respawn_item_count";
const KEY_RESPAWN_ITEMS_AT: &str = "respawn_items_at";

fn backup_key(kind: ContainerKind) -> String {
    format!("{}_backup", kind.label())
}

fn text<'a>(doc: &'a Document, key: &str) -> &'a str {
    doc.get(key).map(|value| value.as_str()).unwrap_or("")
}

fn parse_field<T: std::str::FromStr>(doc: &Document, key: &str) -> Result<Option<T>, String> {
    let value = text(doc, key).trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| format!("invalid value for {}: {:?}", key, value))
}
