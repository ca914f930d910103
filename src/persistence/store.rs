use crate::entities::inventory::CONTAINER_KINDS;
use crate::entities::item::PlayerId;
use crate::persistence::codec::{ContainerCodec, DecodeStatus, Tier};
use crate::persistence::record::{Document, PlayerRecord};
use crate::telemetry::logging;
use std::fs;
use std::path::{Path, PathBuf};

/// Player documents on disk, one YAML file per participant.
#[derive(Debug, Clone)]
pub struct SaveStore {
    root: PathBuf,
}

#[derive(Debug, Default)]
pub struct SaveValidationReport {
    pub player_files: usize,
    pub parsed: usize,
    pub skipped: usize,
    /// Blobs that only decoded through a lower tier.
    pub degraded_blobs: usize,
    /// Blobs no tier could decode.
    pub unreadable_blobs: usize,
    pub errors: Vec<String>,
    pub missing_dir: bool,
}

impl SaveStore {
    pub fn from_root(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn load_player(&self, id: PlayerId) -> Result<Option<PlayerRecord>, String> {
        let path = self.player_path(id);
        let backup_path = self.player_backup_path(id);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return self.load_player_from_backup(id, &backup_path);
            }
            Err(err) => {
                return Err(format!(
                    "player save read failed for {}: {}",
                    path.display(),
                    err
                ))
            }
        };
        match parse_record(id, &data) {
            Ok(record) => Ok(Some(record)),
            Err(err) => {
                if let Some(fallback) = self.load_player_from_backup(id, &backup_path)? {
                    logging::log_error(&format!(
                        "save parse failed for {}, using backup: {}",
                        path.display(),
                        err
                    ));
                    return Ok(Some(fallback));
                }
                Err(err)
            }
        }
    }

    /// Copies the previous file to `<id>.sav#` before writing the new one.
    pub fn save_player(&self, record: &PlayerRecord) -> Result<(), String> {
        fs::create_dir_all(self.player_dir()).map_err(|err| {
            format!(
                "player save dir create failed for {}: {}",
                self.player_dir().display(),
                err
            )
        })?;
        let id = record.identity();
        let path = self.player_path(id);
        let backup_path = self.player_backup_path(id);
        let data = serde_yaml::to_string(&record.to_document())
            .map_err(|err| format!("player save serialize failed for {}: {}", id.0, err))?;
        if path.exists() {
            fs::copy(&path, &backup_path).map_err(|err| {
                format!(
                    "player save backup failed for {}: {}",
                    backup_path.display(),
                    err
                )
            })?;
        }
        fs::write(&path, data)
            .map_err(|err| format!("player save write failed for {}: {}", path.display(), err))
    }

    /// Parses every `.sav` file and decodes each container blob, counting
    /// blobs that needed a lower tier or could not be read at all.
    pub fn validate_player_saves(&self, codec: &ContainerCodec) -> SaveValidationReport {
        let player_dir = self.player_dir();
        let entries = match fs::read_dir(&player_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return SaveValidationReport {
                    missing_dir: true,
                    ..SaveValidationReport::default()
                };
            }
            Err(err) => {
                return SaveValidationReport {
                    errors: vec![format!(
                        "player save dir read failed for {}: {}",
                        player_dir.display(),
                        err
                    )],
                    ..SaveValidationReport::default()
                };
            }
        };

        let mut report = SaveValidationReport::default();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    report.errors.push(format!(
                        "player save dir entry failed for {}: {}",
                        player_dir.display(),
                        err
                    ));
                    continue;
                }
            };
            let path = entry.path();
            let is_save = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("sav"))
                .unwrap_or(false);
            if !is_save {
                report.skipped += 1;
                continue;
            }
            report.player_files += 1;
            let Some(id) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u32>().ok())
            else {
                report.errors.push(format!(
                    "player save file name is not numeric: {}",
                    path.display()
                ));
                continue;
            };
            let data = match fs::read_to_string(&path) {
                Ok(data) => data,
                Err(err) => {
                    report.errors.push(format!(
                        "player save read failed for {}: {}",
                        path.display(),
                        err
                    ));
                    continue;
                }
            };
            let record = match parse_record(PlayerId(id), &data) {
                Ok(record) => record,
                Err(err) => {
                    report
                        .errors
                        .push(format!("player save invalid {}: {}", path.display(), err));
                    continue;
                }
            };
            for kind in CONTAINER_KINDS {
                match codec.decode_detailed(record.blob(kind), kind.size()).status {
                    DecodeStatus::Empty | DecodeStatus::Decoded(Tier::Full) => {}
                    DecodeStatus::Decoded(_) => report.degraded_blobs += 1,
                    DecodeStatus::Failed => {
                        report.unreadable_blobs += 1;
                        report.errors.push(format!(
                            "player save {} has unreadable {} blob",
                            path.display(),
                            kind.label()
                        ));
                    }
                }
            }
            report.parsed += 1;
        }

        report
    }

    fn player_dir(&self) -> PathBuf {
        self.root.join("players")
    }

    fn player_path(&self, id: PlayerId) -> PathBuf {
        self.player_dir().join(format!("{}.sav", id.0))
    }

    fn player_backup_path(&self, id: PlayerId) -> PathBuf {
        self.player_dir().join(format!("{}.sav#", id.0))
    }

    fn load_player_from_backup(
        &self,
        id: PlayerId,
        backup_path: &Path,
    ) -> Result<Option<PlayerRecord>, String> {
        let data = match fs::read_to_string(backup_path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(format!(
                    "player backup read failed for {}: {}",
                    backup_path.display(),
                    err
                ))
            }
        };
        Ok(Some(parse_record(id, &data)?))
    }
}

fn parse_record(id: PlayerId, data: &str) -> Result<PlayerRecord, String> {
    let doc: Document =
        serde_yaml::from_str(data).map_err(|err| format!("invalid document: {}", err))?;
    let record = PlayerRecord::from_document(&doc)?;
    if record.identity() != id {
        return Err(format!(
            "player save id mismatch: expected {}, got {}",
            id.0,
            record.identity().0
        ));
    }
    Ok(record)
}
