// Rev-up controller: open-loop acceleration through up to five timed phases

use super::speed_duty_ctrl::SpeedDutyCtrl;
use super::speed_feedback::SpeedFeedback;
use super::{Direction, SPEED_UNIT};
use crate::config::{ConfigError, RevUpConfig};
use crate::fmt::*;
use crate::interface::BusVoltageSensor;

/// Maximum number of rev-up phases
pub const MAX_PHASES: usize = 5;

/// Pulse correction factor at nominal bus voltage (x10)
const PULSE_FACTOR_UNITY: u16 = 10;

/// One phase of the rev-up sequence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RevUpPhase {
    /// Phase duration [ms]
    pub duration_ms: u16,
    /// Mechanical speed at the end of the phase [SPEED_UNIT], 0 for alignment
    pub target_mech_speed: i16,
    /// Pulse at nominal bus voltage [timer counts]
    pub target_pulse: u16,
}

/// Rev-up controller
///
/// The speed reference is kept in Q16.16 so per-tick increments below one
/// unit accumulate without drift. The derived speed-timer period is what
/// the open-loop commutation scheduler consumes.
pub struct RevUpController {
    phases: [RevUpPhase; MAX_PHASES],
    phase_count: u8,
    /// Phase being executed, `None` once the sequence is exhausted or stopped
    current: Option<u8>,
    /// Number of phases started since `clear`
    stage_count: u8,
    remaining_ticks: u16,
    control_frequency_hz: u16,
    direction: Direction,
    /// Speed reference, Q16.16 [SPEED_UNIT]
    speed_ref: i32,
    /// Speed reference increment per tick, Q16.16
    speed_acc: i32,
    /// Commutation period derived from the speed reference [timer ticks]
    speed_timer_period: u32,
    /// Bus voltage pulse correction (x10)
    pulse_update_factor: u16,
    nominal_bus_voltage_v: u16,
    min_startup_valid_speed: u16,
    spd: SpeedFeedback,
}

impl RevUpController {
    pub fn new(config: &RevUpConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let ticks_per_step = SPEED_UNIT as u64 * (config.speed_timer_clock_hz / 6) as u64;
        let speed_conv_factor = (ticks_per_step / config.pole_pairs as u64).min(i32::MAX as u64);

        Ok(Self {
            phases: config.phases,
            phase_count: config.phase_count,
            current: Some(0),
            stage_count: 0,
            remaining_ticks: 0,
            control_frequency_hz: config.control_frequency_hz,
            direction: Direction::Positive,
            speed_ref: 0,
            speed_acc: 0,
            speed_timer_period: speed_conv_factor as u32,
            pulse_update_factor: PULSE_FACTOR_UNITY,
            nominal_bus_voltage_v: config.nominal_bus_voltage_v,
            min_startup_valid_speed: config.min_startup_valid_speed,
            spd: SpeedFeedback::new(0, u16::MAX, 1, config.pole_pairs, speed_conv_factor as u32),
        })
    }

    /// Restart the sequence from phase 0
    ///
    /// # Arguments
    /// * `direction` - Rotation direction of the start
    /// * `sdc` - Duty controller, switched to duty mode
    pub fn clear(&mut self, direction: Direction, sdc: &mut SpeedDutyCtrl) {
        self.current = Some(0);
        self.direction = direction;
        self.stage_count = 0;
        self.speed_ref = 0;
        self.speed_acc = 0;
        self.remaining_ticks = 0;
        self.speed_timer_period = self.spd.speed_conv_factor();
        self.spd.set_avg_mech_speed(0);
        sdc.set_duty_mode();
    }

    /// Recompute the pulse correction from the present bus voltage
    ///
    /// A bus reading of 0 V keeps the previous factor.
    pub fn update_pulse<B: BusVoltageSensor>(&mut self, bus: &B) {
        let bus_v = bus.average_voltage_v();
        if bus_v != 0 {
            let factor = PULSE_FACTOR_UNITY as u32 * self.nominal_bus_voltage_v as u32 / bus_v as u32;
            self.pulse_update_factor = factor.min(u16::MAX as u32) as u16;
        }
    }

    /// Advance the rev-up by one control tick
    ///
    /// # Returns
    /// `false` once every phase has run
    pub fn exec(&mut self, sdc: &mut SpeedDutyCtrl) -> bool {
        let mut running = true;

        if self.remaining_ticks > 1 {
            self.remaining_ticks -= 1;
            self.speed_ref = self.speed_ref.wrapping_add(self.speed_acc);
        } else if self.remaining_ticks == 1 {
            // Snap to the target to drop the ramp rounding error
            self.remaining_ticks = 0;
            if let Some(phase) = self.current_phase() {
                self.speed_ref = (phase.target_mech_speed as i32) << 16;
            }
        } else {
            if self.stage_count != 0 {
                self.current = self
                    .current
                    .map(|index| index + 1)
                    .filter(|&index| index < self.phase_count);
            }

            match self.current_phase() {
                Some(phase) => {
                    self.start_phase(phase, sdc);
                    self.stage_count = self.stage_count.saturating_add(1);
                }
                None => running = false,
            }
        }

        self.update_speed_timer();
        running
    }

    fn start_phase(&mut self, phase: RevUpPhase, sdc: &mut SpeedDutyCtrl) {
        let pulse = phase.target_pulse as u32 * self.pulse_update_factor as u32
            / PULSE_FACTOR_UNITY as u32;
        sdc.exec_ramp(pulse.min(i16::MAX as u32) as i16, phase.duration_ms as u32);

        let target = (phase.target_mech_speed as i32) << 16;
        if phase.duration_ms == 0 {
            self.speed_ref = target;
            self.speed_acc = 0;
            self.remaining_ticks = 0;
        } else {
            let ticks = phase.duration_ms as u32 * self.control_frequency_hz as u32 / 1_000 + 1;
            self.remaining_ticks = ticks.min(u16::MAX as u32) as u16;
            if phase.target_mech_speed == 0 {
                self.speed_ref = 0;
                self.speed_acc = 0;
            } else {
                self.speed_acc = (target - self.speed_ref) / self.remaining_ticks as i32;
            }
        }

        debug!(
            "Rev-up phase {}: {}ms to {} pulse={}",
            self.current.unwrap_or(0),
            phase.duration_ms,
            phase.target_mech_speed,
            pulse
        );
    }

    fn update_speed_timer(&mut self) {
        if self.speed_ref == 0 {
            self.speed_timer_period = self.spd.speed_conv_factor();
            return;
        }

        let conv = self.spd.speed_conv_factor();
        let speed = self.speed_ref.unsigned_abs() >> 16;
        self.speed_timer_period = if speed == 0 { conv } else { conv / speed };

        let divisor = self.speed_timer_period.max(1) as i64 * self.direction.sign() as i64;
        let avg = (conv as i64 / divisor).clamp(i16::MIN as i64, i16::MAX as i64) as i16;
        self.spd.set_avg_mech_speed(avg);
    }

    fn current_phase(&self) -> Option<RevUpPhase> {
        self.current.map(|index| self.phases[index as usize])
    }

    /// Abort the sequence
    pub fn stop(&mut self) {
        self.current = None;
        self.remaining_ticks = 0;
        self.speed_acc = 0;
    }

    pub fn is_completed(&self) -> bool {
        self.current.is_none()
    }

    /// `true` while the current phase is a pure alignment (target speed 0)
    pub fn is_align_stage_now(&self) -> bool {
        matches!(self.current_phase(), Some(phase) if phase.target_mech_speed == 0)
    }

    /// `true` once the speed reference reaches the minimum start-up valid speed
    pub fn observer_speed_reached(&self) -> bool {
        (self.speed_ref.unsigned_abs() >> 16) >= self.min_startup_valid_speed as u32
    }

    /// Replace one phase of the sequence
    pub fn set_phase(&mut self, index: usize, phase: RevUpPhase) -> bool {
        match self.phases.get_mut(index) {
            Some(slot) => {
                *slot = phase;
                true
            }
            None => false,
        }
    }

    pub fn phase(&self, index: usize) -> Option<RevUpPhase> {
        self.phases.get(index).copied()
    }

    pub fn phase_count(&self) -> u8 {
        self.phase_count
    }

    pub fn set_phase_count(&mut self, count: u8) -> Result<(), ConfigError> {
        match count {
            0 => Err(ConfigError::NoRevUpPhases),
            n if n as usize > MAX_PHASES => Err(ConfigError::TooManyRevUpPhases(n)),
            n => {
                self.phase_count = n;
                Ok(())
            }
        }
    }

    /// Index of the phase being executed
    pub fn current_phase_index(&self) -> Option<u8> {
        self.current
    }

    /// Commutation period for the open-loop scheduler [timer ticks]
    pub fn speed_timer_period(&self) -> u32 {
        self.speed_timer_period
    }

    /// Speed reference, Q16.16 [SPEED_UNIT]
    pub fn current_speed_ref(&self) -> i32 {
        self.speed_ref
    }

    /// Open-loop speed [SPEED_UNIT]
    pub fn avg_mech_speed(&self) -> i16 {
        self.spd.avg_mech_speed()
    }

    pub fn pulse_update_factor(&self) -> u16 {
        self.pulse_update_factor
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DutyCtrlConfig;

    struct FixedBus(u16);

    impl BusVoltageSensor for FixedBus {
        fn average_voltage_v(&self) -> u16 {
            self.0
        }
        fn average_voltage_digital(&self) -> u16 {
            0
        }
    }

    fn phase(duration_ms: u16, target_mech_speed: i16, target_pulse: u16) -> RevUpPhase {
        RevUpPhase {
            duration_ms,
            target_mech_speed,
            target_pulse,
        }
    }

    fn config(phases: &[RevUpPhase]) -> RevUpConfig {
        let mut cfg = RevUpConfig {
            phases: [RevUpPhase::default(); MAX_PHASES],
            phase_count: phases.len() as u8,
            control_frequency_hz: 1_000,
            min_startup_valid_speed: 500,
            nominal_bus_voltage_v: 24,
            // conv = 10 * 1_000_000 = 10_000_000
            speed_timer_clock_hz: 6_000_000,
            pole_pairs: 1,
        };
        cfg.phases[..phases.len()].copy_from_slice(phases);
        cfg
    }

    fn sdc() -> SpeedDutyCtrl {
        SpeedDutyCtrl::new(&DutyCtrlConfig {
            control_frequency_hz: 1_000,
            kp: 1.0,
            ki: 0.0,
            min_duty: 0,
            max_duty: 1_600,
        })
    }

    #[test]
    fn test_two_phase_sequence() {
        let mut ruc = RevUpController::new(&config(&[phase(100, 1_000, 300), phase(0, 2_000, 500)]))
            .unwrap();
        let mut sdc = sdc();
        ruc.clear(Direction::Positive, &mut sdc);

        // Call 1 starts phase 0
        assert!(ruc.exec(&mut sdc));
        assert_eq!(ruc.current_phase_index(), Some(0));

        // Calls 2..=101 ramp
        let mut last = 0;
        for _ in 2..=101 {
            assert!(ruc.exec(&mut sdc));
            assert!(ruc.current_speed_ref() >= last);
            last = ruc.current_speed_ref();
        }
        assert!(last < 1_000 << 16);

        // Call 102 snaps to the target
        assert!(ruc.exec(&mut sdc));
        assert_eq!(ruc.current_speed_ref(), 1_000 << 16);
        assert_eq!(ruc.speed_timer_period(), 10_000);
        assert_eq!(ruc.avg_mech_speed(), 1_000);

        // Call 103 applies the zero-duration phase at once
        assert!(ruc.exec(&mut sdc));
        assert_eq!(ruc.current_phase_index(), Some(1));
        assert_eq!(ruc.current_speed_ref(), 2_000 << 16);
        assert_eq!(sdc.duty(), 500);

        // Call 104: sequence exhausted
        assert!(!ruc.exec(&mut sdc));
        assert!(ruc.is_completed());
    }

    #[test]
    fn test_align_phase_holds_zero_speed() {
        let mut ruc =
            RevUpController::new(&config(&[phase(5, 0, 200), phase(10, 600, 400)])).unwrap();
        let mut sdc = sdc();
        ruc.clear(Direction::Positive, &mut sdc);

        ruc.exec(&mut sdc);
        assert!(ruc.is_align_stage_now());
        for _ in 0..5 {
            ruc.exec(&mut sdc);
            assert_eq!(ruc.current_speed_ref(), 0);
            assert_eq!(ruc.speed_timer_period(), 10_000_000);
        }
        assert!(!ruc.observer_speed_reached());

        // Last tick of the alignment, then the ramp phase starts
        ruc.exec(&mut sdc);
        assert!(ruc.is_align_stage_now());
        ruc.exec(&mut sdc);
        assert!(!ruc.is_align_stage_now());
        for _ in 0..11 {
            ruc.exec(&mut sdc);
        }
        assert_eq!(ruc.current_speed_ref(), 600 << 16);
        assert!(ruc.observer_speed_reached());
    }

    #[test]
    fn test_negative_direction_speed() {
        let mut ruc = RevUpController::new(&config(&[phase(0, 1_000, 300)])).unwrap();
        let mut sdc = sdc();
        ruc.clear(Direction::Negative, &mut sdc);
        ruc.exec(&mut sdc);
        assert_eq!(ruc.avg_mech_speed(), -1_000);
        assert_eq!(ruc.speed_timer_period(), 10_000);
    }

    #[test]
    fn test_pulse_follows_bus_voltage() {
        let mut ruc = RevUpController::new(&config(&[phase(0, 100, 300)])).unwrap();
        let mut sdc = sdc();
        ruc.clear(Direction::Positive, &mut sdc);

        ruc.update_pulse(&FixedBus(0));
        assert_eq!(ruc.pulse_update_factor(), 10);

        ruc.update_pulse(&FixedBus(12));
        assert_eq!(ruc.pulse_update_factor(), 20);
        ruc.exec(&mut sdc);
        assert_eq!(sdc.duty(), 600);
    }

    #[test]
    fn test_stop_completes() {
        let mut ruc = RevUpController::new(&config(&[phase(100, 1_000, 300)])).unwrap();
        let mut sdc = sdc();
        ruc.clear(Direction::Positive, &mut sdc);
        ruc.exec(&mut sdc);
        ruc.stop();
        assert!(ruc.is_completed());
        assert!(!ruc.is_align_stage_now());
        assert!(!ruc.exec(&mut sdc));
    }

    #[test]
    fn test_zero_duration_phase_clears_ramp_rate() {
        let mut ruc = RevUpController::new(&config(&[phase(100, 1_000, 300), phase(0, 2_000, 500)]))
            .unwrap();
        let mut sdc = sdc();
        ruc.clear(Direction::Positive, &mut sdc);

        assert!(ruc.exec(&mut sdc));
        assert_ne!(ruc.speed_acc, 0);
        while ruc.current_phase_index() == Some(0) {
            assert!(ruc.exec(&mut sdc));
        }
        assert_eq!(ruc.current_phase_index(), Some(1));
        assert_eq!(ruc.speed_acc, 0);
        assert_eq!(ruc.current_speed_ref(), 2_000 << 16);
    }

    #[test]
    fn test_set_phase_bounds() {
        let mut ruc = RevUpController::new(&config(&[phase(100, 1_000, 300)])).unwrap();
        assert!(ruc.set_phase(4, phase(1, 2, 3)));
        assert!(!ruc.set_phase(5, phase(1, 2, 3)));
        assert_eq!(ruc.phase(4), Some(phase(1, 2, 3)));
        assert_eq!(ruc.set_phase_count(6), Err(ConfigError::TooManyRevUpPhases(6)));
        assert_eq!(ruc.set_phase_count(2), Ok(()));
        assert_eq!(ruc.phase_count(), 2);
    }
}
