use crate::entities::inventory::{ContainerKind, ARMOR_SLOTS, CONTAINER_KINDS};
use crate::entities::item::{count_present, ItemRecord};
use crate::host::LiveActor;
use crate::persistence::backup;
use crate::persistence::codec::{ContainerCodec, DecodeStatus};
use crate::persistence::record::{InFlightToken, PlayerRecord};
use crate::telemetry::logging;

/// Components that must land for an attempt to count as a success.
pub const REQUIRED_COMPONENTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplySettings {
    pub stage_delay_ticks: u64,
    pub newcomer_grace_millis: u64,
    pub starter_items: Vec<ItemRecord>,
}

impl Default for ApplySettings {
    fn default() -> Self {
        Self {
            stage_delay_ticks: 2,
            newcomer_grace_millis: 5 * 60 * 1000,
            starter_items: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The stored blobs landed.
    Primary,
    /// The stored blobs failed, the backup blobs landed.
    Backup,
    /// Both failed; the actor holds the minimal default state.
    Default,
    /// Another apply was in flight; nothing was touched.
    Rejected,
    /// The actor disconnected between steps.
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyResult {
    pub success: bool,
    pub components_applied: usize,
    pub outcome: ApplyOutcome,
    pub items_expected: usize,
    pub items_present: usize,
}

impl ApplyResult {
    pub fn rejected() -> Self {
        Self {
            success: false,
            components_applied: 0,
            outcome: ApplyOutcome::Rejected,
            items_expected: 0,
            items_present: 0,
        }
    }

    fn abandoned(components_applied: usize) -> Self {
        Self {
            outcome: ApplyOutcome::Abandoned,
            components_applied,
            ..Self::rejected()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStep {
    /// Max health first so it has settled before health is set.
    Vitals,
    ClearAndMain,
    Armor,
    AuxiliaryAndOffHand,
    Settle,
    Verify,
}

impl ApplyStep {
    /// Whether the step waits one stage delay after the previous one.
    pub fn deferred(self) -> bool {
        !matches!(self, ApplyStep::Vitals | ApplyStep::Settle)
    }
}

pub const APPLY_STEPS: [ApplyStep; 6] = [
    ApplyStep::Vitals,
    ApplyStep::ClearAndMain,
    ApplyStep::Armor,
    ApplyStep::AuxiliaryAndOffHand,
    ApplyStep::Settle,
    ApplyStep::Verify,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Continue { delay_ticks: u64 },
    Done(ApplyResult),
    Abandoned,
}

#[derive(Debug, Clone, Copy, Default)]
struct ComponentResult {
    ok: bool,
    items: usize,
}

/// One in-flight apply. Holds the record's apply guard until it is
/// finished or dropped.
#[derive(Debug)]
pub struct ApplyJob {
    _token: InFlightToken,
    next: usize,
    components: [Option<ComponentResult>; 4],
    outcome: ApplyOutcome,
    items_expected: usize,
    finished: Option<ApplyResult>,
}

impl ApplyJob {
    /// Fails without side effects when another apply holds the guard.
    pub fn begin(record: &PlayerRecord) -> Result<Self, ApplyResult> {
        let Some(token) = record.apply_guard().try_begin() else {
            logging::log_error(&format!(
                "apply rejected for {}: apply already in progress",
                record.identity().0
            ));
            return Err(ApplyResult::rejected());
        };
        Ok(Self {
            _token: token,
            next: 0,
            components: [None; 4],
            outcome: ApplyOutcome::Primary,
            items_expected: 0,
            finished: None,
        })
    }

    pub fn next_step(&self) -> Option<ApplyStep> {
        APPLY_STEPS.get(self.next).copied()
    }

    fn successful_components(&self) -> usize {
        self.components
            .iter()
            .filter(|result| matches!(result, Some(ComponentResult { ok: true, .. })))
            .count()
    }

    /// Runs the next step. Every step first checks the actor is still
    /// connected and abandons silently if it is not.
    pub fn run_step(
        &mut self,
        record: &mut PlayerRecord,
        actor: &mut dyn LiveActor,
        codec: &ContainerCodec,
        settings: &ApplySettings,
        now: u64,
    ) -> StepResult {
        let Some(step) = self.next_step() else {
            return match self.finished {
                Some(result) => StepResult::Done(result),
                None => StepResult::Abandoned,
            };
        };
        if !actor.is_connected() {
            logging::log_persistence(&format!(
                "apply for {} abandoned before {:?}: actor disconnected",
                record.identity().0,
                step
            ));
            return StepResult::Abandoned;
        }
        match step {
            ApplyStep::Vitals => {
                let vitals = record.vitals.clamped();
                if let Err(err) = actor.set_max_health(vitals.max_health) {
                    logging::log_error(&format!(
                        "apply {}: max health not set: {}",
                        record.identity().0,
                        err
                    ));
                }
            }
            ApplyStep::ClearAndMain => {
                let vitals = record.vitals.clamped();
                if let Err(err) = actor.set_health(vitals.health) {
                    logging::log_error(&format!(
                        "apply {}: health not set: {}",
                        record.identity().0,
                        err
                    ));
                }
                actor.set_food(vitals.food);
                actor.set_experience(vitals.experience, vitals.level);
                clear_all(actor);
                self.run_component(ContainerKind::Main, record, actor, codec);
            }
            ApplyStep::Armor => {
                self.run_component(ContainerKind::Armor, record, actor, codec);
            }
            ApplyStep::AuxiliaryAndOffHand => {
                self.run_component(ContainerKind::Auxiliary, record, actor, codec);
                self.run_component(ContainerKind::OffHand, record, actor, codec);
            }
            ApplyStep::Settle => self.settle(record, actor, codec, settings, now),
            ApplyStep::Verify => {
                let result = self.verify(record, actor);
                self.finished = Some(result);
                self.next += 1;
                return StepResult::Done(result);
            }
        }
        self.next += 1;
        match self.next_step() {
            Some(next) if next.deferred() => StepResult::Continue {
                delay_ticks: settings.stage_delay_ticks,
            },
            _ => StepResult::Continue { delay_ticks: 0 },
        }
    }

    /// Runs every remaining step back to back, ignoring stage delays.
    pub fn run_to_end(
        mut self,
        record: &mut PlayerRecord,
        actor: &mut dyn LiveActor,
        codec: &ContainerCodec,
        settings: &ApplySettings,
        now: u64,
    ) -> ApplyResult {
        loop {
            match self.run_step(record, actor, codec, settings, now) {
                StepResult::Continue { .. } => continue,
                StepResult::Done(result) => return result,
                StepResult::Abandoned => {
                    return ApplyResult::abandoned(self.successful_components())
                }
            }
        }
    }

    fn run_component(
        &mut self,
        kind: ContainerKind,
        record: &PlayerRecord,
        actor: &mut dyn LiveActor,
        codec: &ContainerCodec,
    ) {
        let result = apply_component(kind, record, actor, codec);
        self.components[kind.index()] = Some(result);
    }

    fn settle(
        &mut self,
        record: &mut PlayerRecord,
        actor: &mut dyn LiveActor,
        codec: &ContainerCodec,
        settings: &ApplySettings,
        now: u64,
    ) {
        let id = record.identity().0;
        if self.successful_components() >= REQUIRED_COMPONENTS {
            self.outcome = ApplyOutcome::Primary;
            self.items_expected = self.expected_items();
            return;
        }
        logging::log_error(&format!(
            "apply {}: only {} of 4 components landed, trying backup",
            id,
            self.successful_components()
        ));

        if backup::has_backup(record) {
            let originals = record.containers.clone();
            backup::restore(record);
            clear_all(actor);
            for kind in CONTAINER_KINDS {
                self.run_component(kind, record, actor, codec);
            }
            if self.successful_components() >= REQUIRED_COMPONENTS {
                logging::log_persistence(&format!("apply {}: backup blobs landed", id));
                self.outcome = ApplyOutcome::Backup;
                self.items_expected = self.expected_items();
                return;
            }
            record.containers = originals;
        }

        logging::log_error(&format!(
            "apply {}: primary and backup failed, applying default state",
            id
        ));
        self.outcome = ApplyOutcome::Default;
        self.items_expected = apply_default_state(record, actor, settings, now);
    }

    fn verify(&self, record: &PlayerRecord, actor: &dyn LiveActor) -> ApplyResult {
        let id = record.identity().0;
        let present: usize = CONTAINER_KINDS
            .iter()
            .map(|kind| count_present(&actor.contents(*kind)))
            .sum();
        if self.items_expected == 0 {
            logging::log_persistence(&format!(
                "apply {}: no items expected, {} present",
                id, present
            ));
        } else if present == 0 {
            logging::log_error(&format!(
                "apply {}: expected {} items but none landed",
                id, self.items_expected
            ));
        } else {
            logging::log_persistence(&format!(
                "apply {}: {} of {} expected items present",
                id, present, self.items_expected
            ));
        }
        ApplyResult {
            success: matches!(self.outcome, ApplyOutcome::Primary | ApplyOutcome::Backup),
            components_applied: self.successful_components(),
            outcome: self.outcome,
            items_expected: self.items_expected,
            items_present: present,
        }
    }

    fn expected_items(&self) -> usize {
        self.components
            .iter()
            .flatten()
            .filter(|result| result.ok)
            .map(|result| result.items)
            .sum()
    }
}

fn clear_all(actor: &mut dyn LiveActor) {
    for kind in CONTAINER_KINDS {
        actor.clear(kind);
    }
}

/// Decodes one container and writes it onto the actor. An empty blob is a
/// successful no-op; armor pieces are written independently of each other.
fn apply_component(
    kind: ContainerKind,
    record: &PlayerRecord,
    actor: &mut dyn LiveActor,
    codec: &ContainerCodec,
) -> ComponentResult {
    let id = record.identity().0;
    let decoded = codec.decode_detailed(record.blob(kind), kind.size());
    match decoded.status {
        DecodeStatus::Empty => return ComponentResult { ok: true, items: 0 },
        DecodeStatus::Failed => {
            logging::log_error(&format!("apply {}: {} could not be decoded", id, kind.label()));
            return ComponentResult::default();
        }
        DecodeStatus::Decoded(_) => {}
    }
    let items = count_present(&decoded.slots);
    let mut failures = 0;
    if kind == ContainerKind::Armor {
        for slot in ARMOR_SLOTS {
            let piece = decoded.slots.get(slot.index()).cloned().flatten();
            if piece.is_none() {
                continue;
            }
            if let Err(err) = actor.set_armor(slot, piece) {
                logging::log_error(&format!("apply {}: armor {:?} failed: {}", id, slot, err));
                failures += 1;
            }
        }
    } else {
        for (index, slot) in decoded.slots.into_iter().enumerate() {
            if slot.is_none() {
                continue;
            }
            if let Err(err) = actor.set_slot(kind, index, slot) {
                logging::log_error(&format!(
                    "apply {}: {} slot {} failed: {}",
                    id,
                    kind.label(),
                    index,
                    err
                ));
                failures += 1;
            }
        }
    }
    ComponentResult {
        ok: failures == 0,
        items,
    }
}

/// Clears the actor and, for a participant still inside the grace window,
/// grants the starter items. Returns the number of items granted.
fn apply_default_state(
    record: &PlayerRecord,
    actor: &mut dyn LiveActor,
    settings: &ApplySettings,
    now: u64,
) -> usize {
    clear_all(actor);
    if !record.is_new_participant(now, settings.newcomer_grace_millis) {
        return 0;
    }
    let mut granted = 0;
    for (index, item) in settings
        .starter_items
        .iter()
        .take(ContainerKind::Main.size())
        .enumerate()
    {
        match actor.set_slot(ContainerKind::Main, index, Some(item.clone())) {
            Ok(()) => granted += 1,
            Err(err) => logging::log_error(&format!(
                "apply {}: starter item {} not granted: {}",
                record.identity().0,
                item.type_name,
                err
            )),
        }
    }
    granted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::inventory::ArmorSlot;
    use crate::entities::item::PlayerId;
    use crate::host::memory::MemoryActor;

    const NOW: u64 = 10_000_000;

    fn stocked_actor() -> MemoryActor {
        let mut actor = MemoryActor::new(PlayerId(5));
        actor.put(ContainerKind::Main, 0, ItemRecord::new("BREAD", 10));
        actor.put(ContainerKind::Main, 8, ItemRecord::new("TORCH", 32));
        actor.put(
            ContainerKind::Armor,
            ArmorSlot::Chestplate.index(),
            ItemRecord::new("IRON_CHESTPLATE", 1),
        );
        actor.put(ContainerKind::Auxiliary, 4, ItemRecord::new("DIAMOND", 7));
        actor.put(ContainerKind::OffHand, 0, ItemRecord::new("SHIELD", 1));
        actor
    }

    fn encoded_record(codec: &ContainerCodec) -> PlayerRecord {
        let mut record = PlayerRecord::new(PlayerId(5), "Alex".to_string(), 0);
        record.vitals.max_health = 30;
        record.vitals.health = 25;
        record.vitals.food = 14;
        let source = stocked_actor();
        assert!(record
            .encode_containers(&source.snapshot_contents(), codec, 100)
            .is_written());
        record
    }

    fn run(record: &mut PlayerRecord, actor: &mut MemoryActor, settings: &ApplySettings) -> ApplyResult {
        let codec = ContainerCodec::default();
        let job = ApplyJob::begin(record).expect("begin");
        job.run_to_end(record, actor, &codec, settings, NOW)
    }

    #[test]
    fn full_apply_restores_every_container() {
        let codec = ContainerCodec::default();
        let mut record = encoded_record(&codec);
        let mut actor = MemoryActor::new(PlayerId(5));
        let result = run(&mut record, &mut actor, &ApplySettings::default());
        assert!(result.success);
        assert_eq!(result.outcome, ApplyOutcome::Primary);
        assert_eq!(result.components_applied, 4);
        assert_eq!(result.items_expected, 5);
        assert_eq!(result.items_present, 5);
        assert_eq!(actor.snapshot_contents(), stocked_actor().snapshot_contents());
        assert_eq!(actor.vitals().max_health, 30);
        assert_eq!(actor.vitals().health, 25);
        assert_eq!(actor.vitals().food, 14);
        assert!(!record.apply_guard().is_active());
    }

    #[test]
    fn previous_contents_are_cleared() {
        let codec = ContainerCodec::default();
        let mut record = encoded_record(&codec);
        let mut actor = MemoryActor::new(PlayerId(5));
        actor.put(ContainerKind::Main, 20, ItemRecord::new("COBBLESTONE", 64));
        run(&mut record, &mut actor, &ApplySettings::default());
        assert!(actor.slot(ContainerKind::Main, 20).is_none());
    }

    #[test]
    fn armor_failure_still_succeeds_with_three_components() {
        let codec = ContainerCodec::default();
        let mut record = encoded_record(&codec);
        record
            .containers
            .set(ContainerKind::Armor, "%% corrupted %%".to_string());
        let mut actor = MemoryActor::new(PlayerId(5));
        let result = run(&mut record, &mut actor, &ApplySettings::default());
        assert!(result.success);
        assert_eq!(result.outcome, ApplyOutcome::Primary);
        assert_eq!(result.components_applied, 3);
        assert_eq!(
            actor.slot(ContainerKind::Main, 8),
            Some(&ItemRecord::new("TORCH", 32))
        );
        assert_eq!(
            actor.slot(ContainerKind::Auxiliary, 4),
            Some(&ItemRecord::new("DIAMOND", 7))
        );
        assert_eq!(
            actor.slot(ContainerKind::OffHand, 0),
            Some(&ItemRecord::new("SHIELD", 1))
        );
        assert!(actor.contents(ContainerKind::Armor).iter().all(Option::is_none));
    }

    #[test]
    fn refused_armor_piece_does_not_block_other_pieces() {
        let codec = ContainerCodec::default();
        let mut source = stocked_actor();
        source.put(
            ContainerKind::Armor,
            ArmorSlot::Helmet.index(),
            ItemRecord::new("IRON_HELMET", 1),
        );
        let mut record = PlayerRecord::new(PlayerId(5), "Alex".to_string(), 0);
        record.encode_containers(&source.snapshot_contents(), &codec, 100);

        let mut actor = MemoryActor::new(PlayerId(5));
        actor.refuse_armor(ArmorSlot::Helmet);
        let result = run(&mut record, &mut actor, &ApplySettings::default());
        assert!(result.success);
        assert_eq!(result.components_applied, 3);
        assert_eq!(
            actor.slot(ContainerKind::Armor, ArmorSlot::Chestplate.index()),
            Some(&ItemRecord::new("IRON_CHESTPLATE", 1))
        );
    }

    #[test]
    fn refused_off_hand_counts_as_one_failed_component() {
        let codec = ContainerCodec::default();
        let mut record = encoded_record(&codec);
        let mut actor = MemoryActor::new(PlayerId(5));
        actor.refuse_container(ContainerKind::OffHand);
        let result = run(&mut record, &mut actor, &ApplySettings::default());
        assert!(result.success);
        assert_eq!(result.outcome, ApplyOutcome::Primary);
        assert_eq!(result.components_applied, 3);
        assert!(actor.slot(ContainerKind::OffHand, 0).is_none());
        assert_eq!(
            actor.slot(ContainerKind::Auxiliary, 4),
            Some(&ItemRecord::new("DIAMOND", 7))
        );
    }

    #[test]
    fn falls_back_to_backup_blobs() {
        let codec = ContainerCodec::default();
        let mut record = encoded_record(&codec);
        // Second encode moves the first set into the backup fields.
        let mut later = stocked_actor();
        later.put(ContainerKind::Main, 1, ItemRecord::new("APPLE", 3));
        record.encode_containers(&later.snapshot_contents(), &codec, 200);
        for kind in [ContainerKind::Main, ContainerKind::Armor, ContainerKind::Auxiliary] {
            record.containers.set(kind, "broken".to_string());
        }

        let mut actor = MemoryActor::new(PlayerId(5));
        let result = run(&mut record, &mut actor, &ApplySettings::default());
        assert!(result.success);
        assert_eq!(result.outcome, ApplyOutcome::Backup);
        assert_eq!(result.components_applied, 4);
        assert_eq!(actor.snapshot_contents(), stocked_actor().snapshot_contents());
        assert_eq!(record.blob(ContainerKind::Main), record.backup_blob(ContainerKind::Main));
    }

    #[test]
    fn default_state_when_primary_and_backup_fail() {
        let codec = ContainerCodec::default();
        let mut record = encoded_record(&codec);
        record.encode_containers(&stocked_actor().snapshot_contents(), &codec, 200);
        for kind in CONTAINER_KINDS {
            record.containers.set(kind, "broken".to_string());
            record.backups.set(kind, "also broken".to_string());
        }
        let settings = ApplySettings {
            starter_items: vec![ItemRecord::new("WOODEN_SWORD", 1), ItemRecord::new("BREAD", 5)],
            ..ApplySettings::default()
        };

        let mut actor = stocked_actor();
        let result = run(&mut record, &mut actor, &settings);
        assert!(!result.success);
        assert_eq!(result.outcome, ApplyOutcome::Default);
        // First seen long before NOW: outside the grace window.
        assert_eq!(result.items_present, 0);
        assert_eq!(result.items_expected, 0);
        assert_eq!(record.blob(ContainerKind::Main), "broken");
    }

    #[test]
    fn newcomer_gets_starter_items_on_total_failure() {
        let mut record = PlayerRecord::new(PlayerId(6), "Newbie".to_string(), NOW - 1_000);
        record
            .containers
            .set(ContainerKind::Main, "garbage".to_string());
        record
            .containers
            .set(ContainerKind::Armor, "garbage".to_string());
        let settings = ApplySettings {
            starter_items: vec![ItemRecord::new("WOODEN_SWORD", 1), ItemRecord::new("BREAD", 5)],
            ..ApplySettings::default()
        };
        let mut actor = MemoryActor::new(PlayerId(6));
        let result = run(&mut record, &mut actor, &settings);
        assert_eq!(result.outcome, ApplyOutcome::Default);
        assert_eq!(result.items_expected, 2);
        assert_eq!(result.items_present, 2);
        assert_eq!(
            actor.slot(ContainerKind::Main, 1),
            Some(&ItemRecord::new("BREAD", 5))
        );
    }

    #[test]
    fn empty_record_is_a_successful_noop() {
        let mut record = PlayerRecord::new(PlayerId(7), "Fresh".to_string(), 0);
        let mut actor = MemoryActor::new(PlayerId(7));
        let result = run(&mut record, &mut actor, &ApplySettings::default());
        assert!(result.success);
        assert_eq!(result.components_applied, 4);
        assert_eq!(result.items_expected, 0);
    }

    #[test]
    fn second_apply_is_rejected_without_mutation() {
        let codec = ContainerCodec::default();
        let mut record = encoded_record(&codec);
        let mut actor = MemoryActor::new(PlayerId(5));
        let mut first = ApplyJob::begin(&record).expect("begin");
        let step = first.run_step(&mut record, &mut actor, &codec, &ApplySettings::default(), NOW);
        assert!(matches!(step, StepResult::Continue { .. }));

        let before = actor.mutations();
        let err = ApplyJob::begin(&record).expect_err("must reject");
        assert_eq!(err.outcome, ApplyOutcome::Rejected);
        assert_eq!(actor.mutations(), before);

        drop(first);
        assert!(ApplyJob::begin(&record).is_ok());
    }

    #[test]
    fn disconnect_between_steps_abandons() {
        let codec = ContainerCodec::default();
        let mut record = encoded_record(&codec);
        let mut actor = MemoryActor::new(PlayerId(5));
        let settings = ApplySettings::default();
        let mut job = ApplyJob::begin(&record).expect("begin");
        job.run_step(&mut record, &mut actor, &codec, &settings, NOW);
        job.run_step(&mut record, &mut actor, &codec, &settings, NOW);
        actor.set_connected(false);
        assert_eq!(
            job.run_step(&mut record, &mut actor, &codec, &settings, NOW),
            StepResult::Abandoned
        );
        assert!(actor.contents(ContainerKind::Armor).iter().all(Option::is_none));
        drop(job);
        assert!(!record.apply_guard().is_active());
    }

    #[test]
    fn deferred_steps_report_stage_delay() {
        let codec = ContainerCodec::default();
        let mut record = encoded_record(&codec);
        let mut actor = MemoryActor::new(PlayerId(5));
        let settings = ApplySettings {
            stage_delay_ticks: 7,
            ..ApplySettings::default()
        };
        let mut job = ApplyJob::begin(&record).expect("begin");
        let mut delays = Vec::new();
        loop {
            match job.run_step(&mut record, &mut actor, &codec, &settings, NOW) {
                StepResult::Continue { delay_ticks } => delays.push(delay_ticks),
                StepResult::Done(_) => break,
                StepResult::Abandoned => panic!("abandoned"),
            }
        }
        assert_eq!(delays, vec![7, 7, 7, 0, 7]);
    }
}
