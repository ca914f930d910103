#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vitals {
    pub health: u32,
    pub max_health: u32,
    pub food: u32,
    pub experience: u64,
    pub level: u32,
}

impl Default for Vitals {
    fn default() -> Self {
        Self {
            health: 20,
            max_health: 20,
            food: 20,
            experience: 0,
            level: 0,
        }
    }
}

impl Vitals {
    pub const MAX_FOOD: u32 = 20;

    /// Health never exceeds max health and a zero max health is raised to 1,
    /// so applying the result to an actor cannot be rejected.
    pub fn clamped(self) -> Self {
        let max_health = self.max_health.max(1);
        Self {
            health: self.health.min(max_health),
            max_health,
            food: self.food.min(Self::MAX_FOOD),
            ..self
        }
    }
}
