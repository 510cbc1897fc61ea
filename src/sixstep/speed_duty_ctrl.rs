// Speed and duty controller: the pulse source for six-step commutation

use super::pi_controller::PiController;
use crate::config::DutyCtrlConfig;
use crate::fmt::*;

/// Control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DutyMode {
    /// Duty follows the (ramped) duty reference directly
    Duty,
    /// Duty is the output of the speed PI loop
    Speed,
}

/// Linear ramp in Q16.16
#[derive(Debug, Clone, Copy, Default)]
struct Ramp {
    value: i32,
    step: i32,
    remaining: u32,
    target: i32,
}

impl Ramp {
    fn start(&mut self, target: i32, ticks: u32) {
        self.target = target;
        if ticks == 0 {
            self.value = target << 16;
            self.step = 0;
            self.remaining = 0;
        } else {
            self.step = ((target << 16) - self.value) / ticks as i32;
            self.remaining = ticks;
        }
    }

    fn set(&mut self, value: i32) {
        self.start(value, 0);
    }

    fn advance(&mut self) {
        match self.remaining {
            0 => {}
            1 => {
                self.value = self.target << 16;
                self.remaining = 0;
            }
            _ => {
                self.value += self.step;
                self.remaining -= 1;
            }
        }
    }

    fn current(&self) -> i32 {
        self.value >> 16
    }
}

/// Speed/duty controller
///
/// Rev-up drives it in duty mode through [`SpeedDutyCtrl::exec_ramp`];
/// closed-loop run switches it to speed mode.
pub struct SpeedDutyCtrl {
    mode: DutyMode,
    pi: PiController,
    control_frequency_hz: u16,
    min_duty: u16,
    max_duty: u16,
    duty_ramp: Ramp,
    speed_ramp: Ramp,
    duty: u16,
}

impl SpeedDutyCtrl {
    pub fn new(config: &DutyCtrlConfig) -> Self {
        Self {
            mode: DutyMode::Duty,
            pi: PiController::new(
                config.kp,
                config.ki,
                config.min_duty as f32,
                config.max_duty as f32,
            ),
            control_frequency_hz: config.control_frequency_hz.max(1),
            min_duty: config.min_duty,
            max_duty: config.max_duty,
            duty_ramp: Ramp::default(),
            speed_ramp: Ramp::default(),
            duty: 0,
        }
    }

    pub fn set_duty_mode(&mut self) {
        self.mode = DutyMode::Duty;
    }

    /// Switch to speed mode, keeping the current duty as the loop starting point
    pub fn set_speed_mode(&mut self) {
        if self.mode != DutyMode::Speed {
            self.pi.preset(self.duty as f32);
        }
        self.mode = DutyMode::Speed;
    }

    pub fn mode(&self) -> DutyMode {
        self.mode
    }

    /// Start a linear ramp of the active reference
    ///
    /// In duty mode the target is a pulse [timer counts], in speed mode a
    /// speed [SPEED_UNIT]. A zero duration applies the target at once.
    ///
    /// # Arguments
    /// * `target` - Final reference
    /// * `duration_ms` - Ramp length
    pub fn exec_ramp(&mut self, target: i16, duration_ms: u32) {
        let ticks = (duration_ms as u64 * self.control_frequency_hz as u64 / 1_000) as u32;
        match self.mode {
            DutyMode::Duty => {
                let target = (target as i32).clamp(0, self.max_duty as i32);
                self.duty_ramp.start(target, ticks);
                if ticks == 0 {
                    self.duty = target as u16;
                }
            }
            DutyMode::Speed => self.speed_ramp.start(target as i32, ticks),
        }
        trace!("Ramp to {} over {} ticks", target, ticks);
    }

    /// Set the speed reference immediately [SPEED_UNIT]
    pub fn set_speed_reference(&mut self, speed: i16) {
        self.speed_ramp.set(speed as i32);
    }

    pub fn speed_reference(&self) -> i16 {
        self.speed_ramp.current() as i16
    }

    /// Bumpless handoff: duty and PI integral start from `duty`
    pub fn preset_duty(&mut self, duty: u16) {
        let duty = duty.min(self.max_duty);
        self.duty = duty;
        self.duty_ramp.set(duty as i32);
        self.pi.preset(duty as f32);
    }

    /// Compute the duty for this control tick
    ///
    /// # Arguments
    /// * `avg_mech_speed` - Measured average speed [SPEED_UNIT]
    pub fn calc_duty(&mut self, avg_mech_speed: i16) -> u16 {
        match self.mode {
            DutyMode::Duty => {
                self.duty_ramp.advance();
                self.duty = self.duty_ramp.current().clamp(0, self.max_duty as i32) as u16;
            }
            DutyMode::Speed => {
                self.speed_ramp.advance();
                let reference = (self.speed_ramp.current() as i16).unsigned_abs() as f32;
                let measured = avg_mech_speed.unsigned_abs() as f32;
                let dt = 1.0 / self.control_frequency_hz as f32;
                let output = self.pi.update(reference - measured, dt);
                self.duty = (output as u16).clamp(self.min_duty, self.max_duty);
            }
        }
        self.duty
    }

    pub fn duty(&self) -> u16 {
        self.duty
    }
}
