use crate::config::PersistenceConfig;
use crate::entities::item::ItemRecord;
use crate::entities::item_types::build_item_types;
use crate::entities::validator::ItemValidator;
use crate::host::scheduler::{now_millis, Scheduler};
use crate::host::LiveActor;
use crate::persistence::apply::{ApplyJob, ApplyResult, ApplySettings, StepResult};
use crate::persistence::codec::ContainerCodec;
use crate::persistence::combat_logout::{CombatLogoutState, Transition};
use crate::persistence::record::{encode_all, EncodeOutcome, PlayerRecord};
use crate::telemetry::logging;
use std::sync::{Arc, Mutex, MutexGuard};

/// Lock order: when both are needed, the actor lock is taken before the
/// record lock. `encode_for_disconnect` is called with the actor already
/// borrowed, so every other path has to follow it.
pub type SharedRecord = Arc<Mutex<PlayerRecord>>;

pub type ApplyCallback = Box<dyn FnOnce(ApplyResult) + Send>;

/// Entry points used by session handlers, death handling and store adapters.
pub struct PersistenceEngine {
    codec: ContainerCodec,
    settings: ApplySettings,
}

impl PersistenceEngine {
    pub fn new(codec: ContainerCodec, settings: ApplySettings) -> Self {
        Self { codec, settings }
    }

    pub fn from_config(config: &PersistenceConfig) -> Self {
        let types = build_item_types(&config.item_types, config.default_max_stack);
        let codec = ContainerCodec::new(ItemValidator::new(types), config.max_full_bytes);
        let settings = ApplySettings {
            stage_delay_ticks: config.stage_delay_ticks,
            newcomer_grace_millis: config.newcomer_grace_millis(),
            starter_items: config.starter_items.clone(),
        };
        Self::new(codec, settings)
    }

    pub fn codec(&self) -> &ContainerCodec {
        &self.codec
    }

    pub fn settings(&self) -> &ApplySettings {
        &self.settings
    }

    /// Captures the actor's containers and vitals into the record. The
    /// record lock is not held while encoding; the write guard keeps a
    /// second encode out in the meantime.
    pub fn encode_for_disconnect(
        &self,
        record: &SharedRecord,
        actor: &dyn LiveActor,
        now: u64,
    ) -> EncodeOutcome {
        let id = actor.player_id().0;
        let token = {
            let Some(guard) = lock_record(record, "encode") else {
                return EncodeOutcome::Rejected;
            };
            guard.write_guard().try_begin()
        };
        let Some(_token) = token else {
            logging::log_error(&format!(
                "encode rejected for {}: write already in progress",
                id
            ));
            return EncodeOutcome::Rejected;
        };

        let contents = actor.snapshot_contents();
        let vitals = actor.vitals();
        let blobs = match encode_all(&contents, &self.codec) {
            Ok(blobs) => blobs,
            Err((kind, err)) => {
                logging::log_error(&format!(
                    "encode failed for {} {}: {}, keeping previous blobs",
                    id,
                    kind.label(),
                    err
                ));
                return EncodeOutcome::Failed(kind);
            }
        };

        let Some(mut guard) = lock_record(record, "encode") else {
            return EncodeOutcome::Rejected;
        };
        guard.vitals = vitals;
        guard.last_seen = now;
        guard.commit_encoded(blobs, now);
        EncodeOutcome::Written
    }

    /// Runs every apply step back to back on the calling thread.
    pub fn apply_for_reconnect(
        &self,
        record: &SharedRecord,
        actor: &mut dyn LiveActor,
        now: u64,
    ) -> ApplyResult {
        let Some(mut guard) = lock_record(record, "apply") else {
            return ApplyResult::rejected();
        };
        let job = match ApplyJob::begin(&guard) {
            Ok(job) => job,
            Err(rejected) => return rejected,
        };
        let result = job.run_to_end(&mut guard, actor, &self.codec, &self.settings, now);
        guard.last_seen = now;
        log_apply(&guard, &result);
        result
    }

    /// Starts a staged apply. Steps run on the scheduler with the configured
    /// tick delays; `on_done` is called with the final result unless the
    /// actor disconnects first, in which case the job is dropped silently.
    pub fn apply_for_reconnect_staged<A>(
        self: &Arc<Self>,
        record: &SharedRecord,
        actor: Arc<Mutex<A>>,
        scheduler: &mut dyn Scheduler,
        on_done: impl FnOnce(ApplyResult) + Send + 'static,
    ) -> Result<(), ApplyResult>
    where
        A: LiveActor + Send + 'static,
    {
        let job = {
            let Some(guard) = lock_record(record, "apply") else {
                return Err(ApplyResult::rejected());
            };
            ApplyJob::begin(&guard)?
        };
        let staged = StagedApply {
            engine: Arc::clone(self),
            record: Arc::clone(record),
            actor,
            job,
            on_done: Box::new(on_done),
        };
        scheduler.run_later(0, Box::new(move |s: &mut dyn Scheduler| staged.drive(s)));
        Ok(())
    }

    pub fn set_combat_logout_state(
        &self,
        record: &SharedRecord,
        state: CombatLogoutState,
        now: u64,
    ) -> Result<Transition, String> {
        let mut guard = record
            .lock()
            .map_err(|_| "player record lock poisoned".to_string())?;
        Ok(guard.set_combat_logout_state(state, now))
    }

    pub fn set_respawn_items(&self, record: &SharedRecord, items: &[ItemRecord], now: u64) -> bool {
        match lock_record(record, "respawn") {
            Some(mut guard) => guard.set_respawn_items(items, &self.codec, now),
            None => false,
        }
    }

    pub fn get_respawn_items(&self, record: &SharedRecord) -> Vec<ItemRecord> {
        match lock_record(record, "respawn") {
            Some(guard) => guard.respawn_items(&self.codec),
            None => Vec::new(),
        }
    }

    pub fn clear_respawn_items(&self, record: &SharedRecord) -> bool {
        match lock_record(record, "respawn") {
            Some(mut guard) => {
                guard.clear_respawn_items();
                true
            }
            None => false,
        }
    }
}

impl Default for PersistenceEngine {
    fn default() -> Self {
        Self::new(ContainerCodec::default(), ApplySettings::default())
    }
}

struct StagedApply<A> {
    engine: Arc<PersistenceEngine>,
    record: SharedRecord,
    actor: Arc<Mutex<A>>,
    job: ApplyJob,
    on_done: ApplyCallback,
}

impl<A: LiveActor + Send + 'static> StagedApply<A> {
    fn drive(mut self, scheduler: &mut dyn Scheduler) {
        loop {
            let step = {
                let Ok(mut actor) = self.actor.lock() else {
                    logging::log_error("staged apply abandoned: actor lock poisoned");
                    return;
                };
                let Some(mut record) = lock_record(&self.record, "staged apply") else {
                    return;
                };
                let step = self.job.run_step(
                    &mut record,
                    &mut *actor,
                    &self.engine.codec,
                    &self.engine.settings,
                    now_millis(),
                );
                if let StepResult::Done(result) = &step {
                    record.last_seen = now_millis();
                    log_apply(&record, result);
                }
                step
            };
            match step {
                StepResult::Continue { delay_ticks: 0 } => continue,
                StepResult::Continue { delay_ticks } => {
                    scheduler.run_later(
                        delay_ticks,
                        Box::new(move |s: &mut dyn Scheduler| self.drive(s)),
                    );
                    return;
                }
                StepResult::Done(result) => {
                    (self.on_done)(result);
                    return;
                }
                StepResult::Abandoned => return,
            }
        }
    }
}

fn lock_record<'a>(record: &'a SharedRecord, context: &str) -> Option<MutexGuard<'a, PlayerRecord>> {
    match record.lock() {
        Ok(guard) => Some(guard),
        Err(_) => {
            logging::log_error(&format!("{}: player record lock poisoned", context));
            None
        }
    }
}

fn log_apply(record: &PlayerRecord, result: &ApplyResult) {
    logging::log_persistence(&format!(
        "apply for {}: {:?}, {} components, {}/{} items",
        record.identity().0,
        result.outcome,
        result.components_applied,
        result.items_present,
        result.items_expected
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::inventory::{ArmorSlot, ContainerKind};
    use crate::entities::item::PlayerId;
    use crate::host::memory::MemoryActor;
    use crate::host::scheduler::TickScheduler;
    use crate::persistence::apply::ApplyOutcome;
    use crate::persistence::combat_logout::TransitionKind;
    use std::sync::mpsc;
    use std::time::Duration;

    fn shared(id: u32) -> SharedRecord {
        Arc::new(Mutex::new(PlayerRecord::new(
            PlayerId(id),
            format!("p{}", id),
            0,
        )))
    }

    fn stocked(id: u32) -> MemoryActor {
        let mut actor = MemoryActor::new(PlayerId(id));
        actor.put(ContainerKind::Main, 3, ItemRecord::new("OAK_LOG", 48));
        actor.put(
            ContainerKind::Armor,
            ArmorSlot::Boots.index(),
            ItemRecord::new("LEATHER_BOOTS", 1).with_enchantment("unbreaking", 2),
        );
        actor.put(ContainerKind::OffHand, 0, ItemRecord::new("TORCH", 16));
        actor.set_max_health(26).expect("max");
        actor.set_health(21).expect("health");
        actor.set_food(9);
        actor
    }

    #[test]
    fn disconnect_then_reconnect_restores_actor() {
        let engine = PersistenceEngine::default();
        let record = shared(1);
        let source = stocked(1);
        assert!(engine.encode_for_disconnect(&record, &source, 500).is_written());
        {
            let guard = record.lock().expect("record");
            assert_eq!(guard.last_seen, 500);
            assert_eq!(guard.inventory_saved_at(), 500);
            assert_eq!(guard.vitals.health, 21);
        }

        let mut target = MemoryActor::new(PlayerId(1));
        let result = engine.apply_for_reconnect(&record, &mut target, 900);
        assert!(result.success);
        assert_eq!(result.outcome, ApplyOutcome::Primary);
        assert_eq!(target.snapshot_contents(), source.snapshot_contents());
        assert_eq!(target.vitals(), source.vitals());
    }

    #[test]
    fn encode_is_rejected_while_write_in_flight() {
        let engine = PersistenceEngine::default();
        let record = shared(2);
        let token = record
            .lock()
            .expect("record")
            .write_guard()
            .try_begin()
            .expect("guard");
        assert_eq!(
            engine.encode_for_disconnect(&record, &stocked(2), 10),
            EncodeOutcome::Rejected
        );
        assert!(!record.lock().expect("record").has_inventory_data());
        drop(token);
        assert!(engine.encode_for_disconnect(&record, &stocked(2), 10).is_written());
    }

    #[test]
    fn staged_apply_runs_on_scheduler_ticks() {
        let engine = Arc::new(PersistenceEngine::default());
        let record = shared(3);
        engine.encode_for_disconnect(&record, &stocked(3), 100);

        let actor = Arc::new(Mutex::new(MemoryActor::new(PlayerId(3))));
        let results = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&results);
        let mut scheduler = TickScheduler::new();
        engine
            .apply_for_reconnect_staged(&record, Arc::clone(&actor), &mut scheduler, move |r| {
                sink.lock().expect("sink").push(r)
            })
            .expect("started");

        assert!(record.lock().expect("record").apply_guard().is_active());
        scheduler.advance(0);
        assert!(results.lock().expect("results").is_empty());
        assert_eq!(
            actor.lock().expect("actor").vitals().max_health,
            26,
            "max health lands in the first stage"
        );

        scheduler.run_until_idle(100);
        let results = results.lock().expect("results");
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(results[0].items_present, 3);
        assert_eq!(
            actor.lock().expect("actor").snapshot_contents(),
            stocked(3).snapshot_contents()
        );
        assert!(!record.lock().expect("record").apply_guard().is_active());
    }

    #[test]
    fn second_staged_apply_is_rejected_without_mutation() {
        let engine = Arc::new(PersistenceEngine::default());
        let record = shared(4);
        engine.encode_for_disconnect(&record, &stocked(4), 100);
        let actor = Arc::new(Mutex::new(MemoryActor::new(PlayerId(4))));
        let mut scheduler = TickScheduler::new();
        engine
            .apply_for_reconnect_staged(&record, Arc::clone(&actor), &mut scheduler, |_| {})
            .expect("first");

        let other = Arc::new(Mutex::new(MemoryActor::new(PlayerId(4))));
        let err = engine
            .apply_for_reconnect_staged(&record, Arc::clone(&other), &mut scheduler, |_| {})
            .expect_err("second");
        assert_eq!(err.outcome, ApplyOutcome::Rejected);

        let mut direct = MemoryActor::new(PlayerId(4));
        let err = engine.apply_for_reconnect(&record, &mut direct, 100);
        assert_eq!(err.outcome, ApplyOutcome::Rejected);
        assert_eq!(direct.mutations(), 0);

        scheduler.run_until_idle(100);
        assert_eq!(other.lock().expect("other").mutations(), 0);
    }

    #[test]
    fn staged_step_waits_for_encode_holding_actor() {
        let engine = Arc::new(PersistenceEngine::default());
        let record = shared(8);
        engine.encode_for_disconnect(&record, &stocked(8), 100);
        let actor = Arc::new(Mutex::new(stocked(8)));
        let mut scheduler = TickScheduler::new();
        engine
            .apply_for_reconnect_staged(&record, Arc::clone(&actor), &mut scheduler, |_| {})
            .expect("started");

        let (locked_tx, locked_rx) = mpsc::channel();
        let encoder = {
            let engine = Arc::clone(&engine);
            let record = Arc::clone(&record);
            let actor = Arc::clone(&actor);
            std::thread::spawn(move || {
                let held = actor.lock().expect("actor");
                locked_tx.send(()).expect("signal");
                std::thread::sleep(Duration::from_millis(150));
                engine.encode_for_disconnect(&record, &*held, 200)
            })
        };
        locked_rx.recv().expect("actor locked");

        let (done_tx, done_rx) = mpsc::channel();
        std::thread::spawn(move || {
            scheduler.advance(0);
            let _ = done_tx.send(scheduler);
        });
        let mut scheduler = done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("tick finished while encode held the actor");
        assert_eq!(encoder.join().expect("encoder"), EncodeOutcome::Written);
        assert_eq!(record.lock().expect("record").inventory_saved_at(), 200);

        scheduler.run_until_idle(100);
        assert!(!record.lock().expect("record").apply_guard().is_active());
    }

    #[test]
    fn staged_apply_abandons_on_disconnect() {
        let engine = Arc::new(PersistenceEngine::default());
        let record = shared(5);
        engine.encode_for_disconnect(&record, &stocked(5), 100);
        let actor = Arc::new(Mutex::new(MemoryActor::new(PlayerId(5))));
        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);
        let mut scheduler = TickScheduler::new();
        engine
            .apply_for_reconnect_staged(&record, Arc::clone(&actor), &mut scheduler, move |_| {
                *flag.lock().expect("flag") = true
            })
            .expect("started");
        scheduler.advance(0);
        actor.lock().expect("actor").set_connected(false);
        scheduler.run_until_idle(100);

        assert!(!*called.lock().expect("flag"));
        assert_eq!(scheduler.pending(), 0);
        assert!(!record.lock().expect("record").apply_guard().is_active());
        assert!(actor
            .lock()
            .expect("actor")
            .contents(ContainerKind::Main)
            .iter()
            .all(Option::is_none));
    }

    #[test]
    fn combat_logout_and_respawn_entry_points() {
        let engine = PersistenceEngine::default();
        let record = shared(6);
        record.lock().expect("record").alignment = 12;

        let transition = engine
            .set_combat_logout_state(&record, CombatLogoutState::Processing, 1_000)
            .expect("transition");
        assert_eq!(transition.kind, TransitionKind::Allowed);
        assert_eq!(
            record.lock().expect("record").combat_logout().alignment(),
            Some(12)
        );

        assert!(engine.set_respawn_items(&record, &[ItemRecord::new("ARROW", 2)], 1_100));
        assert_eq!(engine.get_respawn_items(&record), vec![ItemRecord::new("ARROW", 2)]);
        assert_eq!(record.lock().expect("record").respawn_item_count(), 1);
        assert!(engine.clear_respawn_items(&record));
        assert!(engine.get_respawn_items(&record).is_empty());
    }

    #[test]
    fn from_config_applies_item_types() {
        let config = PersistenceConfig {
            item_types: vec![crate::entities::item_types::ItemType {
                name: "ENDER_PEARL".to_string(),
                max_stack: 16,
            }],
            stage_delay_ticks: 4,
            ..PersistenceConfig::default()
        };
        let engine = PersistenceEngine::from_config(&config);
        assert_eq!(engine.settings().stage_delay_ticks, 4);
        let validator = engine.codec().validator();
        assert!(validator.is_valid(Some(&ItemRecord::new("ENDER_PEARL", 16))));
        assert!(!validator.is_valid(Some(&ItemRecord::new("ENDER_PEARL", 17))));
    }
}
