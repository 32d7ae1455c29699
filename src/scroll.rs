use serde::Serialize;

pub const UP_STEP_MIN: f64 = 200.0;
pub const DOWN_STEP_MIN: f64 = 300.0;
pub const VIEWPORT_FRACTION: f64 = 0.9;
/// Ticks without upward movement before history is considered loaded.
pub const STABLE_TICKS_TO_DOWN: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScrollMetrics {
    pub top: f64,
    pub viewport: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollPhase {
    /// Climbing to load older content above the fold.
    #[default]
    ToTop,
    /// Walking down the feed; never left once entered.
    Down,
}

impl std::fmt::Display for ScrollPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrollPhase::ToTop => write!(f, "to_top"),
            ScrollPhase::Down => write!(f, "down"),
        }
    }
}

#[derive(Debug, Default)]
pub struct ScrollController {
    phase: ScrollPhase,
    stable_ticks: u32,
}

impl ScrollController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ScrollPhase {
        self.phase
    }

    pub fn stable_ticks(&self) -> u32 {
        self.stable_ticks
    }

    /// Signed scroll delta for the next tick: negative while climbing.
    pub fn next_delta(&self, viewport: f64) -> f64 {
        match self.phase {
            ScrollPhase::ToTop => -(UP_STEP_MIN.max(VIEWPORT_FRACTION * viewport)),
            ScrollPhase::Down => DOWN_STEP_MIN.max(VIEWPORT_FRACTION * viewport),
        }
    }

    /// Feed back the position before and after an upward scroll. Returns the
    /// phase after the update.
    pub fn observe(&mut self, before: f64, after: f64) -> ScrollPhase {
        if self.phase == ScrollPhase::Down {
            return self.phase;
        }
        if after <= 0.0 || after == before {
            self.stable_ticks += 1;
        } else {
            self.stable_ticks = 0;
        }
        if self.stable_ticks >= STABLE_TICKS_TO_DOWN {
            self.phase = ScrollPhase::Down;
        }
        self.phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_sizes() {
        let c = ScrollController::new();
        assert_eq!(c.next_delta(100.0), -200.0);
        assert_eq!(c.next_delta(1000.0), -900.0);

        let mut c = ScrollController::new();
        for _ in 0..3 {
            c.observe(0.0, 0.0);
        }
        assert_eq!(c.next_delta(100.0), 300.0);
        assert_eq!(c.next_delta(1000.0), 900.0);
    }

    #[test]
    fn three_stable_ticks_switch_to_down() {
        let mut c = ScrollController::new();
        assert_eq!(c.observe(2000.0, 1100.0), ScrollPhase::ToTop);
        assert_eq!(c.stable_ticks(), 0);
        assert_eq!(c.observe(1100.0, 200.0), ScrollPhase::ToTop);
        assert_eq!(c.observe(200.0, 0.0), ScrollPhase::ToTop);
        assert_eq!(c.observe(0.0, 0.0), ScrollPhase::ToTop);
        assert_eq!(c.observe(0.0, 0.0), ScrollPhase::Down);
        assert_eq!(c.observe(0.0, 500.0), ScrollPhase::Down);
        assert_eq!(c.phase(), ScrollPhase::Down);
    }

    #[test]
    fn movement_resets_stability() {
        let mut c = ScrollController::new();
        c.observe(0.0, 0.0);
        c.observe(0.0, 0.0);
        // new content above the fold pushed the page
        c.observe(800.0, 400.0);
        assert_eq!(c.stable_ticks(), 0);
        c.observe(400.0, 400.0);
        assert_eq!(c.phase(), ScrollPhase::ToTop);
    }
}
