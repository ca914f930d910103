use crate::entities::inventory::CONTAINER_KINDS;
use crate::persistence::record::PlayerRecord;

/// Copies the live blobs into the backup fields. Called right before a
/// fresh encode is written, never after. Empty live blobs do not erase an
/// existing backup.
pub fn snapshot(record: &mut PlayerRecord) {
    for kind in CONTAINER_KINDS {
        if record.containers.has(kind) {
            let blob = record.containers.get(kind).to_string();
            record.backups.set(kind, blob);
        }
    }
}

/// Swaps the backup blobs back into the live fields. Idempotent; returns
/// false without touching anything when no backup exists.
pub fn restore(record: &mut PlayerRecord) -> bool {
    if !has_backup(record) {
        return false;
    }
    for kind in CONTAINER_KINDS {
        if record.backups.has(kind) {
            let blob = record.backups.get(kind).to_string();
            record.containers.set(kind, blob);
        }
    }
    true
}

pub fn has_backup(record: &PlayerRecord) -> bool {
    !record.backups.is_empty()
}
