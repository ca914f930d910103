use crate::telemetry::logging;
use std::time::Duration;

/// Lifecycle of the item fallout from a death or combat disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CombatLogoutState {
    #[default]
    None,
    Processing,
    Processed,
    Completed,
}

impl CombatLogoutState {
    pub fn as_str(self) -> &'static str {
        match self {
            CombatLogoutState::None => "NONE",
            CombatLogoutState::Processing => "PROCESSING",
            CombatLogoutState::Processed => "PROCESSED",
            CombatLogoutState::Completed => "COMPLETED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "" | "NONE" => Some(CombatLogoutState::None),
            "PROCESSING" => Some(CombatLogoutState::Processing),
            "PROCESSED" => Some(CombatLogoutState::Processed),
            "COMPLETED" => Some(CombatLogoutState::Completed),
            _ => None,
        }
    }

    pub fn allows(self, to: CombatLogoutState) -> bool {
        use CombatLogoutState::*;
        match self {
            None => true,
            Processing => matches!(to, Processed | Completed | None),
            Processed => matches!(to, Completed | None),
            Completed => matches!(to, None | Completed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Allowed,
    /// Outside the transition table but applied anyway.
    Forced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CombatLogoutState,
    pub to: CombatLogoutState,
    pub kind: TransitionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CombatLogout {
    state: CombatLogoutState,
    /// Milliseconds since the unix epoch; zero when never transitioned.
    timestamp: u64,
    alignment: Option<i32>,
}

impl CombatLogout {
    pub fn restore(state: CombatLogoutState, timestamp: u64, alignment: Option<i32>) -> Self {
        let alignment = if state == CombatLogoutState::None {
            None
        } else {
            alignment
        };
        Self {
            state,
            timestamp,
            alignment,
        }
    }

    pub fn state(&self) -> CombatLogoutState {
        self.state
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn alignment(&self) -> Option<i32> {
        self.alignment
    }

    /// Applies the transition whether or not the table allows it; only the
    /// returned kind and the log marker differ.
    pub fn transition(
        &mut self,
        to: CombatLogoutState,
        current_alignment: i32,
        now: u64,
    ) -> Transition {
        let from = self.state;
        let kind = if from.allows(to) {
            TransitionKind::Allowed
        } else {
            TransitionKind::Forced
        };
        self.state = to;
        self.timestamp = now;
        match to {
            CombatLogoutState::Processing => self.alignment = Some(current_alignment),
            CombatLogoutState::None => self.alignment = None,
            _ => {}
        }
        match kind {
            TransitionKind::Allowed => logging::log_combat(&format!(
                "combat logout {} -> {}",
                from.as_str(),
                to.as_str()
            )),
            TransitionKind::Forced => logging::log_combat(&format!(
                "FORCED combat logout {} -> {}",
                from.as_str(),
                to.as_str()
            )),
        }
        Transition { from, to, kind }
    }

    pub fn is_pending(&self) -> bool {
        self.state != CombatLogoutState::None
    }

    pub fn is_processed(&self) -> bool {
        matches!(
            self.state,
            CombatLogoutState::Processed | CombatLogoutState::Completed
        )
    }

    pub fn age_since_transition(&self, now: u64) -> Duration {
        if self.timestamp == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(now.saturating_sub(self.timestamp))
    }
}
