//! Ramped-parameter smoother: steps a value linearly toward a target over a fixed
//! number of samples, recomputed whenever a new target is set.

#[derive(Clone, Debug)]
pub struct LinearSmooth {
    value: f64,
    linear_value: f64,
    linear_step: f64,
    total_steps: u32,
    steps: u32,
}

impl Default for LinearSmooth {
    fn default() -> Self {
        LinearSmooth {
            value: 0.0,
            linear_value: 0.0,
            linear_step: 0.0,
            total_steps: 1,
            steps: 0,
        }
    }
}

impl LinearSmooth {
    pub fn new() -> LinearSmooth {
        LinearSmooth::default()
    }

    /// Configure the ramp length: `rate` samples/sec, `time` seconds.
    pub fn reset(&mut self, rate: f64, time: f64) {
        self.total_steps = ((rate * time).round() as u32).max(1);
        self.steps = 0;
    }

    /// Set a new target value. If `now`, jump immediately instead of ramping.
    pub fn set(&mut self, new_value: f64, now: bool) {
        if now {
            self.value = new_value;
            self.linear_value = new_value;
            self.linear_step = 0.0;
            self.steps = 0;
            return;
        }
        self.linear_value = self.value;
        self.linear_step = (new_value - self.value) / self.total_steps as f64;
        self.steps = self.total_steps;
        self.value = new_value;
    }

    /// Advance one sample, returning the current (post-step) value.
    pub fn get_next(&mut self) -> f64 {
        if self.steps > 0 {
            self.linear_value += self.linear_step;
            self.steps -= 1;
            self.linear_value
        } else {
            self.value
        }
    }

    pub fn is_constant(&self) -> bool {
        self.steps == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramps_to_target() {
        let mut s = LinearSmooth::new();
        s.reset(1000.0, 0.01); // 10 steps
        s.set(1.0, false);
        let mut last = 0.0;
        for _ in 0..10 {
            last = s.get_next();
        }
        assert!((last - 1.0).abs() < 1e-9);
        assert!(s.is_constant());
    }

    #[test]
    fn now_jumps_immediately() {
        let mut s = LinearSmooth::new();
        s.reset(1000.0, 0.01);
        s.set(5.0, true);
        assert!(s.is_constant());
        assert_eq!(s.get_next(), 5.0);
    }
}
