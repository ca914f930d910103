mod config;
pub mod entities;
pub mod host;
pub mod persistence;
pub mod telemetry;

pub use config::{AppConfig, Command, PersistenceConfig};
pub use entities::inventory::{ArmorSlot, ContainerKind};
pub use entities::item::{ItemRecord, PlayerId};
pub use host::scheduler::{Scheduler, TickScheduler};
pub use host::LiveActor;
pub use persistence::apply::{ApplyOutcome, ApplyResult};
pub use persistence::autosave::{AutosaveReport, AutosaveState};
pub use persistence::combat_logout::{CombatLogoutState, Transition, TransitionKind};
pub use persistence::engine::{PersistenceEngine, SharedRecord};
pub use persistence::record::{EncodeOutcome, PlayerRecord};

use entities::inventory::CONTAINER_KINDS;
use host::memory::MemoryActor;
use persistence::cache::RecordCache;
use persistence::codec::DecodeStatus;
use persistence::store::SaveStore;

pub fn run(args: &[String]) -> Result<(), String> {
    let config = config::AppConfig::from_args(args)?;
    telemetry::logging::init(&config.root)?;
    let settings = config::PersistenceConfig::load(&config.config_path)?;
    let engine = PersistenceEngine::from_config(&settings);
    let store = SaveStore::from_root(&config.root);

    match config.command {
        Command::Validate => {
            let report = store.validate_player_saves(engine.codec());
            telemetry::logging::log_persistence(&format!(
                "save validate: files={}, parsed={}, degraded={}, unreadable={}, errors={}",
                report.player_files,
                report.parsed,
                report.degraded_blobs,
                report.unreadable_blobs,
                report.errors.len()
            ));
            println!("playerstate: save validation");
            println!("- root: {}", config.root.display());
            println!("- config: {}", config.config_path.display());
            println!("- item types: {}", settings.item_types.len());
            match settings.autosave().interval_millis() {
                Some(millis) => println!("- autosave: every {}s", millis / 1000),
                None => println!("- autosave: disabled"),
            }
            if report.missing_dir {
                println!("- save players: missing players directory");
                return Ok(());
            }
            println!(
                "- save players: files={}, parsed={}, errors={}, skipped={}",
                report.player_files,
                report.parsed,
                report.errors.len(),
                report.skipped
            );
            println!(
                "- container blobs: degraded={}, unreadable={}",
                report.degraded_blobs, report.unreadable_blobs
            );
            for err in &report.errors {
                eprintln!("playerstate: save validate {}", err);
            }
            Ok(())
        }
        Command::Inspect(id) => {
            let mut cache = RecordCache::new(settings.cache_capacity, store);
            let record = cache
                .get_or_load(PlayerId(id))?
                .ok_or_else(|| format!("no save found for player {}", id))?;
            inspect(&engine, &record, id)
        }
    }
}

fn inspect(engine: &PersistenceEngine, record: &SharedRecord, id: u32) -> Result<(), String> {
    {
        let record = record
            .lock()
            .map_err(|_| "player record lock poisoned".to_string())?;
        println!("playerstate: player {}", id);
        println!("- name: {}", record.name);
        println!(
            "- seen: first={}, last={}",
            record.first_seen, record.last_seen
        );
        println!(
            "- vitals: health={}/{}, food={}, level={}, experience={}",
            record.vitals.health,
            record.vitals.max_health,
            record.vitals.food,
            record.vitals.level,
            record.vitals.experience
        );
        println!(
            "- combat logout: {} (alignment {:?})",
            record.combat_logout().state().as_str(),
            record.combat_logout().alignment()
        );
        for kind in CONTAINER_KINDS {
            let decoded = engine.codec().decode_detailed(record.blob(kind), kind.size());
            let status = match decoded.status {
                DecodeStatus::Empty => "empty".to_string(),
                DecodeStatus::Decoded(tier) => format!("{} tier", tier.label()),
                DecodeStatus::Failed => "unreadable".to_string(),
            };
            println!(
                "- {}: {} items ({}){}",
                kind.label(),
                entities::item::count_present(&decoded.slots),
                status,
                if record.backup_blob(kind).is_empty() {
                    ""
                } else {
                    ", backup present"
                }
            );
        }
        println!("- respawn items: {}", record.respawn_item_count());
    }

    let mut actor = MemoryActor::new(PlayerId(id));
    let result = engine.apply_for_reconnect(record, &mut actor, host::scheduler::now_millis());
    println!(
        "- dry-run apply: {:?}, components={}, items {}/{}",
        result.outcome, result.components_applied, result.items_present, result.items_expected
    );
    Ok(())
}
