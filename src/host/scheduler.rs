use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct GameTick(pub u64);

pub type Task = Box<dyn FnOnce(&mut dyn Scheduler) + Send>;

/// Host primitive that runs a callback after a number of discrete ticks.
pub trait Scheduler {
    fn now(&self) -> GameTick;

    fn run_later(&mut self, delay_ticks: u64, task: Task);
}

/// Milliseconds since the unix epoch, the unit of every persisted timestamp.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

struct Scheduled {
    due: GameTick,
    seq: u64,
    task: Task,
}

/// Min-heap by due tick, then by scheduling order.
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

/// Cooperative single-threaded scheduler advanced by the host loop.
#[derive(Default)]
pub struct TickScheduler {
    tick: GameTick,
    next_seq: u64,
    queue: BinaryHeap<Scheduled>,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Advances one tick at a time, running everything that falls due.
    /// Returns the number of tasks run.
    pub fn advance(&mut self, ticks: u64) -> usize {
        let mut ran = self.run_due();
        for _ in 0..ticks {
            self.tick.0 = self.tick.0.saturating_add(1);
            ran += self.run_due();
        }
        ran
    }

    /// Advances until the queue is empty or `max_ticks` have passed.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> usize {
        let mut ran = self.run_due();
        let mut elapsed = 0;
        while !self.queue.is_empty() && elapsed < max_ticks {
            ran += self.advance(1);
            elapsed += 1;
        }
        ran
    }

    fn run_due(&mut self) -> usize {
        let mut ran = 0;
        while self
            .queue
            .peek()
            .map_or(false, |entry| entry.due <= self.tick)
        {
            let Some(entry) = self.queue.pop() else {
                break;
            };
            (entry.task)(self);
            ran += 1;
        }
        ran
    }
}

impl Scheduler for TickScheduler {
    fn now(&self) -> GameTick {
        self.tick
    }

    fn run_later(&mut self, delay_ticks: u64, task: Task) {
        let due = GameTick(self.tick.0.saturating_add(delay_ticks));
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Scheduled { due, seq, task });
    }
}
