// Shared speed reliability bookkeeping used by every speed/position estimator

/// Speed feedback base state
///
/// Holds the last average mechanical speed and counts consecutive
/// out-of-range speed measurements. Once the counter reaches
/// `max_errors` the estimator is reported unreliable until the counter
/// is explicitly reset.
#[derive(Debug, Clone, Copy)]
pub struct SpeedFeedback {
    /// Average mechanical speed [SPEED_UNIT]
    avg_mech_speed: i16,
    /// Maximum mechanical speed considered valid [SPEED_UNIT]
    max_reliable_speed: u16,
    /// Minimum mechanical speed considered valid [SPEED_UNIT]
    min_reliable_speed: u16,
    /// Consecutive out-of-range measurements
    error_count: u8,
    /// Ceiling of `error_count`
    max_errors: u8,
    /// Electrical to mechanical ratio (pole pairs)
    pole_pairs: u8,
    /// Timer ticks to speed conversion: speed = speed_conv_factor / period
    speed_conv_factor: u32,
}

impl SpeedFeedback {
    pub fn new(
        min_reliable_speed: u16,
        max_reliable_speed: u16,
        max_errors: u8,
        pole_pairs: u8,
        speed_conv_factor: u32,
    ) -> Self {
        Self {
            avg_mech_speed: 0,
            max_reliable_speed,
            min_reliable_speed,
            error_count: 0,
            max_errors,
            pole_pairs,
            speed_conv_factor,
        }
    }

    /// Check a new speed measurement and update the error counter
    ///
    /// # Returns
    /// `false` once `max_errors` consecutive measurements were out of range
    pub fn is_speed_reliable(&mut self, mech_speed: i16) -> bool {
        let abs_speed = mech_speed.unsigned_abs();
        let out_of_range =
            abs_speed > self.max_reliable_speed || abs_speed < self.min_reliable_speed;

        if self.error_count < self.max_errors {
            if out_of_range {
                self.error_count += 1;
            } else {
                self.error_count = 0;
            }
        }

        self.check()
    }

    /// Reliability without a new measurement
    #[inline]
    pub fn check(&self) -> bool {
        self.error_count != self.max_errors
    }

    pub fn reset_errors(&mut self) {
        self.error_count = 0;
    }

    pub fn error_count(&self) -> u8 {
        self.error_count
    }

    pub fn avg_mech_speed(&self) -> i16 {
        self.avg_mech_speed
    }

    pub fn set_avg_mech_speed(&mut self, speed: i16) {
        self.avg_mech_speed = speed;
    }

    pub fn pole_pairs(&self) -> u8 {
        self.pole_pairs
    }

    pub fn set_pole_pairs(&mut self, pole_pairs: u8) {
        self.pole_pairs = pole_pairs;
    }

    pub fn speed_conv_factor(&self) -> u32 {
        self.speed_conv_factor
    }

    pub fn min_reliable_speed(&self) -> u16 {
        self.min_reliable_speed
    }

    pub fn max_reliable_speed(&self) -> u16 {
        self.max_reliable_speed
    }
}
