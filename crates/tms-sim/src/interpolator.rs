//! ---
//! tms_section: "11-simulation"
//! tms_subsection: "module"
//! tms_type: "source"
//! tms_scope: "code"
//! tms_description: "Frame-stepped easing of displayed quantities."
//! tms_version: "v0.1.0"
//! tms_owner: "tbd"
//! ---
/// Frames per transition used by the gauges.
pub const DEFAULT_FRAME_COUNT: u32 = 30;

/// Factory for fixed-length interpolation jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueInterpolator {
    frame_count: u32,
}

impl Default for ValueInterpolator {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_COUNT)
    }
}

impl ValueInterpolator {
    /// A frame count of zero is treated as one.
    pub fn new(frame_count: u32) -> Self {
        Self {
            frame_count: frame_count.max(1),
        }
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Begin a transition from `old_value` to `new_value`, clamping
    /// intermediate frames to `[min, max]`.
    pub fn start(&self, old_value: f64, new_value: f64, min: f64, max: f64) -> InterpolationJob {
        InterpolationJob::new(old_value, new_value, min, max, self.frame_count)
    }
}

/// One in-flight transition of a displayed quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationJob {
    old_value: f64,
    target_value: f64,
    frame_count: u32,
    frame_index: u32,
    per_frame_delta: f64,
    lower_clamp: f64,
    upper_clamp: f64,
    current: f64,
}

impl InterpolationJob {
    fn new(old_value: f64, target_value: f64, min: f64, max: f64, frame_count: u32) -> Self {
        let frame_count = frame_count.max(1);
        let (lower_clamp, upper_clamp) = if min <= max { (min, max) } else { (max, min) };
        Self {
            old_value,
            target_value,
            frame_count,
            frame_index: 0,
            per_frame_delta: (target_value - old_value) / f64::from(frame_count),
            lower_clamp,
            upper_clamp,
            current: old_value,
        }
    }

    /// Produce the next frame value.
    ///
    /// The last of the `frame_count` frames lands exactly on the target, even
    /// when the clamp bounds exclude it. Calls past the end keep returning
    /// the target.
    pub fn advance_frame(&mut self) -> f64 {
        if self.is_finished() {
            return self.current;
        }
        self.frame_index += 1;
        if self.frame_index == self.frame_count {
            self.current = self.target_value;
            return self.current;
        }

        let rising = self.per_frame_delta > 0.0;
        let still_travelling = (rising && self.current < self.target_value)
            || (!rising && self.current > self.target_value);
        if still_travelling {
            self.current += self.per_frame_delta;
        }
        if self.current < self.lower_clamp {
            self.current = self.lower_clamp;
        } else if self.current > self.upper_clamp {
            self.current = self.upper_clamp;
        }
        self.current
    }

    /// Start a new transition toward `new_value` from the last emitted value.
    pub fn retarget(&self, new_value: f64, min: f64, max: f64) -> InterpolationJob {
        InterpolationJob::new(self.current, new_value, min, max, self.frame_count)
    }

    pub fn is_finished(&self) -> bool {
        self.frame_index >= self.frame_count
    }

    /// Last emitted value, or the start value before the first frame.
    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn old_value(&self) -> f64 {
        self.old_value
    }

    pub fn target(&self) -> f64 {
        self.target_value
    }

    pub fn per_frame_delta(&self) -> f64 {
        self.per_frame_delta
    }

    pub fn frames_remaining(&self) -> u32 {
        self.frame_count - self.frame_index
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.lower_clamp, self.upper_clamp)
    }
}
