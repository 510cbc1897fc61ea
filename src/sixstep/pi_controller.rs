// PI (Proportional-Integral) controller for the speed loop, with anti-windup and bumpless preset

/// PI controller with conditional integration and output limiting
#[derive(Debug, Clone, Copy)]
pub struct PiController {
    /// Proportional gain
    kp: f32,
    /// Integral gain [1/s]
    ki: f32,
    /// Integral accumulator (error x seconds)
    integral: f32,
    output_min: f32,
    output_max: f32,
    /// Last calculated output
    last_output: f32,
}

impl PiController {
    /// Create a new PI controller
    ///
    /// # Arguments
    /// * `kp` - Proportional gain
    /// * `ki` - Integral gain
    /// * `output_min` - Minimum output limit
    /// * `output_max` - Maximum output limit
    pub fn new(kp: f32, ki: f32, output_min: f32, output_max: f32) -> Self {
        Self {
            kp,
            ki,
            integral: 0.0,
            output_min,
            output_max,
            last_output: 0.0,
        }
    }

    /// Run one controller step
    ///
    /// # Arguments
    /// * `error` - Reference minus measurement
    /// * `dt` - Time step (seconds)
    ///
    /// # Returns
    /// Controller output limited to `output_min..=output_max`
    pub fn update(&mut self, error: f32, dt: f32) -> f32 {
        let p_term = self.kp * error;

        // Integrate only while the previous output was not pushing further into saturation
        let pushing_high = self.last_output >= self.output_max && error > 0.0;
        let pushing_low = self.last_output <= self.output_min && error < 0.0;
        if !pushing_high && !pushing_low {
            self.integral += error * dt;
        }

        let output = p_term + self.ki * self.integral;
        self.last_output = output.clamp(self.output_min, self.output_max);
        self.last_output
    }

    /// Preset the integral so the next zero-error output equals `output`
    pub fn preset(&mut self, output: f32) {
        let output = output.clamp(self.output_min, self.output_max);
        self.integral = if self.ki != 0.0 { output / self.ki } else { 0.0 };
        self.last_output = output;
    }

    /// Reset the integral term to zero
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_output = 0.0;
    }

    /// Set the output limits
    pub fn set_limits(&mut self, output_min: f32, output_max: f32) {
        self.output_min = output_min;
        self.output_max = output_max;
    }

    pub fn set_gains(&mut self, kp: f32, ki: f32) {
        self.kp = kp;
        self.ki = ki;
    }

    pub fn output(&self) -> f32 {
        self.last_output
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    /// Check if output is currently saturated
    pub fn is_saturated(&self) -> bool {
        self.last_output <= self.output_min || self.last_output >= self.output_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proportional_only() {
        let mut pi = PiController::new(1.0, 0.0, -10.0, 10.0);
        assert_eq!(pi.update(5.0, 0.1), 5.0);
    }

    #[test]
    fn test_output_limiting() {
        let mut pi = PiController::new(1.0, 0.0, -10.0, 10.0);
        assert_eq!(pi.update(20.0, 0.1), 10.0);
        assert!(pi.is_saturated());
    }

    #[test]
    fn test_integral_accumulation() {
        let mut pi = PiController::new(0.0, 1.0, -100.0, 100.0);
        pi.update(10.0, 0.5);
        assert_eq!(pi.integral(), 5.0);
        pi.update(10.0, 0.5);
        assert_eq!(pi.integral(), 10.0);
    }

    #[test]
    fn test_anti_windup_stops_integration_when_saturated() {
        let mut pi = PiController::new(0.0, 1.0, 0.0, 1.0);
        pi.update(4.0, 0.5);
        assert_eq!(pi.output(), 1.0);
        let integral = pi.integral();
        pi.update(4.0, 0.5);
        assert_eq!(pi.integral(), integral);
        // Opposite error unwinds immediately
        pi.update(-1.0, 0.5);
        assert_eq!(pi.integral(), integral - 0.5);
    }

    #[test]
    fn test_preset_is_bumpless() {
        let mut pi = PiController::new(2.0, 4.0, 0.0, 1000.0);
        pi.preset(400.0);
        assert_eq!(pi.update(0.0, 0.001), 400.0);
    }
}
