//! Time management utilities

/// Frame-driven clock
///
/// Advanced once per `update` with the frame delta, so every timestamp the
/// audio engine stores (cooldowns, fades) is in the same simulated timeline
/// and tests stay deterministic.
#[derive(Debug, Clone, Default)]
pub struct FrameClock {
    now_ms: f64,
    delta_ms: f32,
    frame_count: u64,
}

impl FrameClock {
    /// Create a clock at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance by a frame delta in seconds
    pub fn advance(&mut self, delta_seconds: f32) {
        let delta_ms = if delta_seconds.is_finite() {
            (delta_seconds * 1000.0).max(0.0)
        } else {
            0.0
        };
        self.delta_ms = delta_ms;
        self.now_ms += f64::from(delta_ms);
        self.frame_count += 1;
    }

    /// Current time in milliseconds
    pub fn now_ms(&self) -> f64 {
        self.now_ms
    }

    /// Duration of the last frame in milliseconds
    pub fn delta_ms(&self) -> f32 {
        self.delta_ms
    }

    /// Number of frames advanced
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}
