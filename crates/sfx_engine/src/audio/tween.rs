//! Linear parameter ramps advanced by frame time

/// Linear ramp from one value to another over a fixed duration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tween {
    from: f32,
    to: f32,
    elapsed_ms: f32,
    duration_ms: f32,
}

impl Tween {
    /// Ramp from `from` to `to`; non-positive durations finish immediately
    pub fn new(from: f32, to: f32, duration_ms: f32) -> Self {
        Self {
            from,
            to,
            elapsed_ms: 0.0,
            duration_ms: duration_ms.max(0.0),
        }
    }

    /// Target value
    pub fn target(&self) -> f32 {
        self.to
    }

    /// Value at the current position
    pub fn value(&self) -> f32 {
        if self.duration_ms <= 0.0 {
            return self.to;
        }
        let t = (self.elapsed_ms / self.duration_ms).clamp(0.0, 1.0);
        (self.to - self.from).mul_add(t, self.from)
    }

    /// Move forward by `delta_ms` and return the new value
    pub fn advance(&mut self, delta_ms: f32) -> f32 {
        if delta_ms.is_finite() && delta_ms > 0.0 {
            self.elapsed_ms = (self.elapsed_ms + delta_ms).min(self.duration_ms);
        }
        self.value()
    }

    /// Whether the ramp reached its target
    pub fn is_finished(&self) -> bool {
        self.elapsed_ms >= self.duration_ms
    }
}
