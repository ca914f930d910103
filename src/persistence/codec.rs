use crate::entities::item::{count_present, ItemRecord};
use crate::entities::validator::ItemValidator;
use crate::telemetry::logging;
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use std::fmt::Write as _;

pub const FULL_MARKER: &str = "F1:";
pub const TYPE_ONLY_MARKER: &str = "T3:";
pub const DEFAULT_MAX_FULL_BYTES: usize = 256 * 1024;
/// Upper bound on a declared slot total; larger values are treated as corruption.
const MAX_DECLARED_SLOTS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Full,
    IndexTypeCount,
    TypeOnly,
}

impl Tier {
    pub fn label(self) -> &'static str {
        match self {
            Tier::Full => "full",
            Tier::IndexTypeCount => "index/type/count",
            Tier::TypeOnly => "type-only",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    Serialize(String),
    TooLarge { bytes: usize, limit: usize },
    Unrepresentable(String),
    Format(String),
    Checksum,
    WrongTier,
    Exhausted(String),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Serialize(msg) => write!(f, "serialize failed: {}", msg),
            CodecError::TooLarge { bytes, limit } => {
                write!(f, "payload of {} bytes exceeds limit {}", bytes, limit)
            }
            CodecError::Unrepresentable(name) => {
                write!(f, "type name {:?} cannot be represented", name)
            }
            CodecError::Format(msg) => write!(f, "malformed blob: {}", msg),
            CodecError::Checksum => write!(f, "checksum mismatch"),
            CodecError::WrongTier => write!(f, "blob belongs to another tier"),
            CodecError::Exhausted(last) => write!(f, "all tiers failed, last: {}", last),
        }
    }
}

impl std::error::Error for CodecError {}

/// One encoding strategy. Implementations are pure: no shared mutable state.
pub trait CodecTier: Send + Sync {
    fn tier(&self) -> Tier;
    fn encode(&self, slots: &[Option<ItemRecord>]) -> Result<String, CodecError>;
    fn decode(&self, blob: &str) -> Result<Vec<Option<ItemRecord>>, CodecError>;
}

/// `F1:<sha1-hex>:<base64 yaml>`, keeps every piece of item metadata.
#[derive(Debug, Clone, Copy)]
pub struct FullTier {
    pub max_bytes: usize,
}

impl CodecTier for FullTier {
    fn tier(&self) -> Tier {
        Tier::Full
    }

    fn encode(&self, slots: &[Option<ItemRecord>]) -> Result<String, CodecError> {
        let yaml =
            serde_yaml::to_string(slots).map_err(|err| CodecError::Serialize(err.to_string()))?;
        if yaml.len() > self.max_bytes {
            return Err(CodecError::TooLarge {
                bytes: yaml.len(),
                limit: self.max_bytes,
            });
        }
        let digest = sha1_hex(yaml.as_bytes());
        Ok(format!(
            "{FULL_MARKER}{digest}:{}",
            BASE64_ENGINE.encode(yaml.as_bytes())
        ))
    }

    fn decode(&self, blob: &str) -> Result<Vec<Option<ItemRecord>>, CodecError> {
        let body = blob.strip_prefix(FULL_MARKER).ok_or(CodecError::WrongTier)?;
        let (digest, payload) = body
            .split_once(':')
            .ok_or_else(|| CodecError::Format("missing checksum separator".to_string()))?;
        let bytes = BASE64_ENGINE
            .decode(payload.trim())
            .map_err(|err| CodecError::Format(err.to_string()))?;
        if !sha1_hex(&bytes).eq_ignore_ascii_case(digest) {
            return Err(CodecError::Checksum);
        }
        let yaml = String::from_utf8(bytes).map_err(|err| CodecError::Format(err.to_string()))?;
        serde_yaml::from_str::<Vec<Option<ItemRecord>>>(&yaml)
            .map_err(|err| CodecError::Format(err.to_string()))
    }
}

/// `<total>;<index>:<type>:<count>,...` for occupied slots only.
#[derive(Debug, Clone, Copy)]
pub struct IndexTypeCountTier;

impl CodecTier for IndexTypeCountTier {
    fn tier(&self) -> Tier {
        Tier::IndexTypeCount
    }

    fn encode(&self, slots: &[Option<ItemRecord>]) -> Result<String, CodecError> {
        encode_flat(slots, true)
    }

    fn decode(&self, blob: &str) -> Result<Vec<Option<ItemRecord>>, CodecError> {
        if blob.starts_with(TYPE_ONLY_MARKER) || blob.starts_with(FULL_MARKER) {
            return Err(CodecError::WrongTier);
        }
        decode_flat(blob, true)
    }
}

/// `T3:<total>;<index>:<type>,...`, count implied to be 1.
#[derive(Debug, Clone, Copy)]
pub struct TypeOnlyTier;

impl CodecTier for TypeOnlyTier {
    fn tier(&self) -> Tier {
        Tier::TypeOnly
    }

    fn encode(&self, slots: &[Option<ItemRecord>]) -> Result<String, CodecError> {
        Ok(format!("{TYPE_ONLY_MARKER}{}", encode_flat(slots, false)?))
    }

    fn decode(&self, blob: &str) -> Result<Vec<Option<ItemRecord>>, CodecError> {
        let body = blob
            .strip_prefix(TYPE_ONLY_MARKER)
            .ok_or(CodecError::WrongTier)?;
        decode_flat(body, false)
    }
}

fn encode_flat(slots: &[Option<ItemRecord>], with_count: bool) -> Result<String, CodecError> {
    let mut out = format!("{};", slots.len());
    let mut first = true;
    for (index, slot) in slots.iter().enumerate() {
        let Some(item) = slot else {
            continue;
        };
        let name = item.type_name.trim();
        if name.is_empty()
            || name.contains(|c: char| matches!(c, ':' | ',' | ';') || c.is_whitespace())
        {
            return Err(CodecError::Unrepresentable(item.type_name.clone()));
        }
        if !first {
            out.push(',');
        }
        first = false;
        if with_count {
            let _ = write!(out, "{}:{}:{}", index, name, item.count);
        } else {
            let _ = write!(out, "{}:{}", index, name);
        }
    }
    Ok(out)
}

fn decode_flat(body: &str, with_count: bool) -> Result<Vec<Option<ItemRecord>>, CodecError> {
    let (total, entries) = body
        .trim()
        .split_once(';')
        .ok_or_else(|| CodecError::Format("missing slot total".to_string()))?;
    let total: usize = total
        .trim()
        .parse()
        .map_err(|_| CodecError::Format(format!("invalid slot total {:?}", total)))?;
    if total > MAX_DECLARED_SLOTS {
        return Err(CodecError::Format(format!("slot total {} out of range", total)));
    }
    let mut slots = vec![None; total];
    for entry in entries.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let parts: Vec<&str> = entry.split(':').collect();
        let expected = if with_count { 3 } else { 2 };
        if parts.len() != expected {
            return Err(CodecError::Format(format!("bad entry {:?}", entry)));
        }
        let index: usize = parts[0]
            .parse()
            .map_err(|_| CodecError::Format(format!("bad index in {:?}", entry)))?;
        if index >= total {
            return Err(CodecError::Format(format!(
                "index {} outside {} slots",
                index, total
            )));
        }
        if parts[1].is_empty() {
            return Err(CodecError::Format(format!("empty type in {:?}", entry)));
        }
        let count = if with_count {
            parts[2]
                .parse()
                .map_err(|_| CodecError::Format(format!("bad count in {:?}", entry)))?
        } else {
            1
        };
        if slots[index].is_some() {
            return Err(CodecError::Format(format!("duplicate index {}", index)));
        }
        slots[index] = Some(ItemRecord::new(parts[1], count));
    }
    Ok(slots)
}

/// Occupied slots of a blob, read with the built-in tiers and without item
/// validation. `None` when no tier can read it.
pub fn count_encoded_items(blob: &str) -> Option<usize> {
    let blob = blob.trim();
    if blob.is_empty() {
        return Some(0);
    }
    let full = FullTier {
        max_bytes: usize::MAX,
    };
    let tiers: [&dyn CodecTier; 3] = [&full, &IndexTypeCountTier, &TypeOnlyTier];
    tiers
        .iter()
        .find_map(|tier| tier.decode(blob).ok())
        .map(|slots| count_present(&slots))
}

fn sha1_hex(bytes: &[u8]) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(bytes);
    let mut out = String::with_capacity(40);
    for byte in sha1.finalize() {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub blob: String,
    pub tier: Tier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// Blob was absent or empty.
    Empty,
    Decoded(Tier),
    /// Every tier failed; slots are the all-empty fallback.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub slots: Vec<Option<ItemRecord>>,
    pub status: DecodeStatus,
}

impl Decoded {
    pub fn failed(&self) -> bool {
        self.status == DecodeStatus::Failed
    }
}

/// Encodes and decodes containers through an ordered list of tiers,
/// highest fidelity first.
pub struct ContainerCodec {
    tiers: Vec<Box<dyn CodecTier>>,
    validator: ItemValidator,
}

impl ContainerCodec {
    pub fn new(validator: ItemValidator, max_full_bytes: usize) -> Self {
        Self::with_tiers(
            validator,
            vec![
                Box::new(FullTier {
                    max_bytes: max_full_bytes,
                }),
                Box::new(IndexTypeCountTier),
                Box::new(TypeOnlyTier),
            ],
        )
    }

    pub fn with_tiers(validator: ItemValidator, tiers: Vec<Box<dyn CodecTier>>) -> Self {
        Self { tiers, validator }
    }

    pub fn validator(&self) -> &ItemValidator {
        &self.validator
    }

    pub fn encode(
        &self,
        slots: &[Option<ItemRecord>],
        context: &str,
    ) -> Result<Encoded, CodecError> {
        let clean = self.validator.sanitize(slots);
        let dropped = count_present(slots).saturating_sub(count_present(&clean));
        if dropped > 0 {
            logging::log_persistence(&format!(
                "encode {}: dropped {} invalid item(s)",
                context, dropped
            ));
        }
        let mut last_error = CodecError::Exhausted("no tiers configured".to_string());
        for tier in &self.tiers {
            match tier.encode(&clean) {
                Ok(blob) => {
                    if tier.tier() != Tier::Full {
                        logging::log_persistence(&format!(
                            "encode {}: degraded to {} tier",
                            context,
                            tier.tier().label()
                        ));
                    }
                    return Ok(Encoded {
                        blob,
                        tier: tier.tier(),
                    });
                }
                Err(err) => {
                    logging::log_persistence(&format!(
                        "encode {}: {} tier failed: {}",
                        context,
                        tier.tier().label(),
                        err
                    ));
                    last_error = err;
                }
            }
        }
        logging::log_error(&format!("encode {}: all tiers failed", context));
        Err(CodecError::Exhausted(last_error.to_string()))
    }

    /// Never fails: the result always has `expected_len` slots unless the
    /// blob is empty, in which case it is an empty sequence.
    pub fn decode(&self, blob: &str, expected_len: usize) -> Vec<Option<ItemRecord>> {
        self.decode_detailed(blob, expected_len).slots
    }

    pub fn decode_detailed(&self, blob: &str, expected_len: usize) -> Decoded {
        let blob = blob.trim();
        if blob.is_empty() {
            return Decoded {
                slots: Vec::new(),
                status: DecodeStatus::Empty,
            };
        }
        let Some((mut slots, tier)) = self.decode_tiers(blob) else {
            logging::log_error(&format!(
                "decode: all tiers failed, substituting {} empty slots",
                expected_len
            ));
            return Decoded {
                slots: vec![None; expected_len],
                status: DecodeStatus::Failed,
            };
        };
        if slots.len() != expected_len {
            logging::log_persistence(&format!(
                "decode: resized {} slots to {}",
                slots.len(),
                expected_len
            ));
            slots.resize(expected_len, None);
        }
        Decoded {
            slots,
            status: DecodeStatus::Decoded(tier),
        }
    }

    /// Valid items of a blob in slot order, using the slot total the blob
    /// itself declares. Unreadable blobs give nothing.
    pub fn decode_items(&self, blob: &str) -> Vec<ItemRecord> {
        let blob = blob.trim();
        if blob.is_empty() {
            return Vec::new();
        }
        match self.decode_tiers(blob) {
            Some((slots, _)) => slots.into_iter().flatten().collect(),
            None => {
                logging::log_error("decode: all tiers failed, no items recovered");
                Vec::new()
            }
        }
    }

    fn decode_tiers(&self, blob: &str) -> Option<(Vec<Option<ItemRecord>>, Tier)> {
        for tier in &self.tiers {
            match tier.decode(blob) {
                Ok(raw) => {
                    if tier.tier() != Tier::Full {
                        logging::log_persistence(&format!(
                            "decode: using {} tier",
                            tier.tier().label()
                        ));
                    }
                    let slots = self.validator.sanitize(&raw);
                    let dropped = count_present(&raw).saturating_sub(count_present(&slots));
                    if dropped > 0 {
                        logging::log_persistence(&format!(
                            "decode: dropped {} invalid item(s)",
                            dropped
                        ));
                    }
                    return Some((slots, tier.tier()));
                }
                Err(CodecError::WrongTier) => continue,
                Err(err) => {
                    logging::log_persistence(&format!(
                        "decode: {} tier failed: {}",
                        tier.tier().label(),
                        err
                    ));
                }
            }
        }
        None
    }
}

impl Default for ContainerCodec {
    fn default() -> Self {
        Self::new(ItemValidator::default(), DEFAULT_MAX_FULL_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenTier(Tier);

    impl CodecTier for BrokenTier {
        fn tier(&self) -> Tier {
            self.0
        }

        fn encode(&self, _slots: &[Option<ItemRecord>]) -> Result<String, CodecError> {
            Err(CodecError::Serialize("forced".to_string()))
        }

        fn decode(&self, _blob: &str) -> Result<Vec<Option<ItemRecord>>, CodecError> {
            Err(CodecError::Format("forced".to_string()))
        }
    }

    fn sample() -> Vec<Option<ItemRecord>> {
        vec![
            Some(
                ItemRecord::new("DIAMOND_SWORD", 1)
                    .with_display_name("Oathkeeper")
                    .with_enchantment("SHARPNESS", 5),
            ),
            None,
            Some(ItemRecord::new("STONE", 48)),
            None,
        ]
    }

    #[test]
    fn full_tier_roundtrip_preserves_metadata() {
        let codec = ContainerCodec::default();
        let encoded = codec.encode(&sample(), "inventory").expect("encode");
        assert_eq!(encoded.tier, Tier::Full);
        assert!(encoded.blob.starts_with(FULL_MARKER));
        let decoded = codec.decode_detailed(&encoded.blob, 4);
        assert_eq!(decoded.status, DecodeStatus::Decoded(Tier::Full));
        assert_eq!(decoded.slots, sample());
    }

    #[test]
    fn invalid_items_become_empty_markers() {
        let codec = ContainerCodec::default();
        let slots = vec![
            Some(ItemRecord::new("STONE", 500)),
            Some(ItemRecord::new("AIR", 1)),
            Some(ItemRecord::new("DIRT", 2)),
        ];
        let encoded = codec.encode(&slots, "inventory").expect("encode");
        let decoded = codec.decode(&encoded.blob, 3);
        assert_eq!(decoded, vec![None, None, Some(ItemRecord::new("DIRT", 2))]);
    }

    #[test]
    fn oversized_payload_degrades_to_index_tier() {
        let codec = ContainerCodec::new(ItemValidator::default(), 8);
        let encoded = codec.encode(&sample(), "inventory").expect("encode");
        assert_eq!(encoded.tier, Tier::IndexTypeCount);
        assert_eq!(encoded.blob, "4;0:DIAMOND_SWORD:1,2:STONE:48");
        let decoded = codec.decode_detailed(&encoded.blob, 4);
        assert_eq!(decoded.status, DecodeStatus::Decoded(Tier::IndexTypeCount));
        assert_eq!(decoded.slots[2], Some(ItemRecord::new("STONE", 48)));
        assert_eq!(decoded.slots[0], Some(ItemRecord::new("DIAMOND_SWORD", 1)));
    }

    #[test]
    fn type_only_tier_is_marked_and_implies_single_count() {
        let codec = ContainerCodec::with_tiers(
            ItemValidator::default(),
            vec![
                Box::new(BrokenTier(Tier::Full)),
                Box::new(BrokenTier(Tier::IndexTypeCount)),
                Box::new(TypeOnlyTier),
            ],
        );
        let encoded = codec.encode(&sample(), "armor").expect("encode");
        assert_eq!(encoded.tier, Tier::TypeOnly);
        assert_eq!(encoded.blob, "T3:4;0:DIAMOND_SWORD,2:STONE");

        let standard = ContainerCodec::default();
        let decoded = standard.decode_detailed(&encoded.blob, 4);
        assert_eq!(decoded.status, DecodeStatus::Decoded(Tier::TypeOnly));
        assert_eq!(decoded.slots[2], Some(ItemRecord::new("STONE", 1)));
    }

    #[test]
    fn all_tiers_failing_is_an_error() {
        let codec = ContainerCodec::with_tiers(
            ItemValidator::default(),
            vec![
                Box::new(BrokenTier(Tier::Full)),
                Box::new(BrokenTier(Tier::IndexTypeCount)),
                Box::new(BrokenTier(Tier::TypeOnly)),
            ],
        );
        let err = codec.encode(&sample(), "inventory").expect_err("must fail");
        assert!(matches!(err, CodecError::Exhausted(_)));
    }

    #[test]
    fn delimiter_in_type_name_cannot_use_flat_tiers() {
        let slots = vec![Some(ItemRecord::new("minecraft:stone", 1))];
        assert!(matches!(
            IndexTypeCountTier.encode(&slots),
            Err(CodecError::Unrepresentable(_))
        ));
        assert!(TypeOnlyTier.encode(&slots).is_err());
    }

    #[test]
    fn corrupted_full_blob_yields_requested_length() {
        let codec = ContainerCodec::default();
        let encoded = codec.encode(&sample(), "inventory").expect("encode");
        let mut corrupted: Vec<char> = encoded.blob.chars().collect();
        let last = corrupted.len() - 3;
        corrupted[last] = if corrupted[last] == 'A' { 'B' } else { 'A' };
        let corrupted: String = corrupted.into_iter().collect();

        let decoded = codec.decode_detailed(&corrupted, 4);
        assert_eq!(decoded.slots.len(), 4);
        assert!(decoded.failed());
        assert!(decoded.slots.iter().all(Option::is_none));

        let truncated = &encoded.blob[..encoded.blob.len() / 2];
        assert_eq!(codec.decode(truncated, 4).len(), 4);
    }

    #[test]
    fn garbage_decodes_to_empty_slots() {
        let codec = ContainerCodec::default();
        for blob in ["not a blob", "x;0:STONE:1", "3;7:STONE:1", "T3:2;0:", "99999999;"] {
            let decoded = codec.decode_detailed(blob, 5);
            assert!(decoded.failed(), "{} should fail", blob);
            assert_eq!(decoded.slots, vec![None; 5]);
        }
    }

    #[test]
    fn empty_blob_is_empty_sequence() {
        let codec = ContainerCodec::default();
        let decoded = codec.decode_detailed("", 36);
        assert_eq!(decoded.status, DecodeStatus::Empty);
        assert!(decoded.slots.is_empty());
        assert!(codec.decode("   ", 4).is_empty());
    }

    #[test]
    fn mismatched_length_is_truncated_or_padded() {
        let codec = ContainerCodec::default();
        assert_eq!(
            codec.decode("2;0:STONE:3", 4),
            vec![Some(ItemRecord::new("STONE", 3)), None, None, None]
        );
        assert_eq!(
            codec.decode("6;0:STONE:3,5:DIRT:1", 2),
            vec![Some(ItemRecord::new("STONE", 3)), None]
        );
    }

    #[test]
    fn decode_drops_counts_over_max_stack() {
        let codec = ContainerCodec::default();
        let decoded = codec.decode("2;0:STONE:900,1:DIRT:4", 2);
        assert_eq!(decoded, vec![None, Some(ItemRecord::new("DIRT", 4))]);
    }
}
