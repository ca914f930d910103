use crate::host::LiveActor;
use crate::persistence::engine::{PersistenceEngine, SharedRecord};
use crate::persistence::record::EncodeOutcome;
use crate::persistence::store::SaveStore;
use crate::telemetry::logging;

/// Autosave period in seconds; zero turns autosave off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveConfig {
    pub interval_seconds: u64,
}

impl AutosaveConfig {
    pub fn interval_millis(self) -> Option<u64> {
        match self.interval_seconds {
            0 => None,
            secs => Some(secs.saturating_mul(1000)),
        }
    }
}

/// Tracks when the next autosave pass is due, in unix milliseconds like
/// every other timestamp of the persistence core.
#[derive(Debug, Clone)]
pub struct AutosaveState {
    interval_millis: Option<u64>,
    next_due: Option<u64>,
}

impl AutosaveState {
    pub fn new(config: AutosaveConfig, now: u64) -> Self {
        let interval_millis = config.interval_millis();
        Self {
            interval_millis,
            next_due: interval_millis.map(|interval| now.saturating_add(interval)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval_millis.is_some()
    }

    pub fn due(&self, now: u64) -> bool {
        matches!(self.next_due, Some(next) if now >= next)
    }

    pub fn mark_saved(&mut self, now: u64) {
        if let Some(interval) = self.interval_millis {
            self.next_due = Some(now.saturating_add(interval));
        }
    }

    /// Host tick entry point: runs a pass over `sessions` when one is due
    /// and schedules the next. `None` when nothing was due.
    pub fn run_if_due(
        &mut self,
        engine: &PersistenceEngine,
        store: &SaveStore,
        sessions: &[(SharedRecord, &dyn LiveActor)],
        now: u64,
    ) -> Option<AutosaveReport> {
        if !self.due(now) {
            return None;
        }
        let report = autosave_records(engine, store, sessions, now);
        self.mark_saved(now);
        Some(report)
    }
}

#[derive(Debug, Default)]
pub struct AutosaveReport {
    pub saved_players: usize,
    /// Skipped because an encode for the record was already in flight.
    pub rejected: usize,
    /// Encode failed; the record was saved with its previous blobs.
    pub encode_failures: usize,
    pub player_errors: Vec<String>,
}

/// Encodes every connected session and writes its record through the store.
pub fn autosave_records(
    engine: &PersistenceEngine,
    store: &SaveStore,
    sessions: &[(SharedRecord, &dyn LiveActor)],
    now: u64,
) -> AutosaveReport {
    let mut report = AutosaveReport::default();
    for (record, actor) in sessions {
        if !actor.is_connected() {
            continue;
        }
        match engine.encode_for_disconnect(record, *actor, now) {
            EncodeOutcome::Written => {}
            EncodeOutcome::Rejected => {
                report.rejected += 1;
                continue;
            }
            EncodeOutcome::Failed(_) => report.encode_failures += 1,
        }
        let result = match record.lock() {
            Ok(guard) => store.save_player(&guard),
            Err(_) => Err(format!(
                "player record {} lock poisoned",
                actor.player_id().0
            )),
        };
        match result {
            Ok(()) => report.saved_players += 1,
            Err(err) => report.player_errors.push(err),
        }
    }
    logging::log_persistence(&format!(
        "autosave: saved={}, rejected={}, encode_failures={}, errors={}",
        report.saved_players,
        report.rejected,
        report.encode_failures,
        report.player_errors.len()
    ));
    report
}
