// On-the-fly restart: catch an already spinning rotor from its BEMF zero crossings

use super::speed_feedback::SpeedFeedback;
use super::{Direction, Step, SPEED_UNIT};
use crate::config::{ConfigError, OtfConfig, OTF_FILTER_CAPACITY};
use crate::fmt::*;
use crate::interface::{BemfSensing, BusVoltageSensor, CommutationSink};

/// Crossings closer than this many PWM periods are glitches
const GLITCH_PWM_PERIODS: u64 = 3;

/// BEMF zero-crossing event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BemfCrossing {
    /// Speed timer counter at the crossing
    pub counter: u32,
    /// Speed timer auto-reload value
    pub autoreload: u32,
}

/// Low-side sensing step sequence while the rotor coasts
fn next_sensing_step(step: Step) -> Step {
    match step {
        Step::Step1 => Step::Step5,
        Step::Step2 => Step::Step4,
        Step::Step3 => Step::Step1,
        Step::Step4 => Step::Step6,
        Step::Step5 => Step::Step3,
        Step::Step6 => Step::Step2,
    }
}

/// On-the-fly controller
///
/// Senses BEMF with only the low sides switched, measures the coasting
/// speed and provides the duty that matches it for a glitch-free handoff.
pub struct OnTheFlyController {
    max_consecutive_transitions: u8,
    max_bemf_errors: u16,
    threshold_perc: u16,
    bus_to_threshold: u16,
    threshold_correction: u16,
    ls_detect_count: u16,
    ls_brake_count: u16,
    speed_timer_prescaler: u32,
    pwm_period: u32,
    low_pass_window: u8,
    direction: Direction,
    step: Step,
    ongoing: bool,
    aborted: bool,
    bemf_errors: u16,
    /// Valid crossings since `init`
    transitions: u8,
    last_counter: u32,
    /// Last valid half period [speed timer ticks]
    step_time_last: u32,
    /// Last valid half period signed by direction
    last_period: i32,
    spd: SpeedFeedback,
    /// Speed to duty factor history (duty x 65536 / speed)
    duty_conv: [u32; OTF_FILTER_CAPACITY],
    filter_index: u8,
    speed_duty_factor: u32,
}

impl OnTheFlyController {
    pub fn new(config: &OtfConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let ticks_per_step = SPEED_UNIT as u64 * (config.speed_timer_clock_hz / 6) as u64;
        let speed_conv_factor = (ticks_per_step / config.pole_pairs as u64).min(i32::MAX as u64);

        Ok(Self {
            max_consecutive_transitions: config.max_consecutive_transitions,
            max_bemf_errors: config.max_bemf_errors,
            threshold_perc: config.threshold_perc,
            bus_to_threshold: config.bus_to_threshold,
            threshold_correction: config.threshold_correction,
            ls_detect_count: config.ls_detect_count,
            ls_brake_count: config.ls_brake_count,
            speed_timer_prescaler: config.speed_timer_prescaler,
            pwm_period: config.pwm_period,
            low_pass_window: config.low_pass_window,
            direction: Direction::Positive,
            step: Step::Step2,
            ongoing: false,
            aborted: false,
            bemf_errors: 0,
            transitions: 0,
            last_counter: 0,
            step_time_last: 0,
            last_period: 0,
            spd: SpeedFeedback::new(0, u16::MAX, 1, config.pole_pairs, speed_conv_factor as u32),
            duty_conv: [0; OTF_FILTER_CAPACITY],
            filter_index: 0,
            speed_duty_factor: 0,
        })
    }

    /// Start BEMF sensing on a coasting rotor
    ///
    /// # Arguments
    /// * `direction` - Expected rotation direction
    /// * `bus` - Bus voltage, scales the BEMF threshold
    /// * `counter` - Current speed timer counter
    pub fn init<B, P>(&mut self, direction: Direction, bus: &B, hw: &mut P, counter: u32)
    where
        B: BusVoltageSensor,
        P: CommutationSink + BemfSensing,
    {
        let threshold = self.threshold_perc as u32 * bus.average_voltage_digital() as u32
            / self.bus_to_threshold as u32
            + self.threshold_correction as u32;
        hw.set_threshold(threshold.min(u16::MAX as u32) as u16);

        self.direction = direction;
        self.last_counter = counter;
        self.step = match direction {
            Direction::Positive => Step::Step2,
            Direction::Negative => Step::Step1,
        };

        hw.turn_on_low_sides(self.step, self.ls_detect_count);
        BemfSensing::start(hw, self.step);

        self.ongoing = true;
        self.aborted = false;
        self.bemf_errors = 0;
        self.transitions = 0;
        self.last_period = 0;
        info!("OTF start: threshold={}", threshold);
    }

    /// Abort sensing and brake
    pub fn clear<P: CommutationSink + BemfSensing>(&mut self, hw: &mut P) {
        BemfSensing::stop(hw);
        BemfSensing::clear(hw);
        hw.switch_off();
        hw.brake(self.ls_brake_count);
        self.ongoing = false;
        self.filter_index = 0;
    }

    /// Handle one BEMF zero crossing
    ///
    /// # Returns
    /// `true` once enough valid crossings measured the speed
    pub fn task<P: CommutationSink + BemfSensing>(
        &mut self,
        crossing: BemfCrossing,
        hw: &mut P,
    ) -> bool {
        let elapsed = if crossing.counter < self.last_counter {
            (crossing.autoreload as u64 + 1 - (self.last_counter - crossing.counter) as u64) / 2
        } else {
            (crossing.counter - self.last_counter) as u64 / 2
        };

        if elapsed * (self.speed_timer_prescaler as u64) < GLITCH_PWM_PERIODS * self.pwm_period as u64
        {
            self.bemf_errors = self.bemf_errors.saturating_add(1);
            trace!("OTF glitch: elapsed={}, errors={}", elapsed, self.bemf_errors);
        } else {
            let period = elapsed.min(i32::MAX as u64) as i32;
            self.step_time_last = period as u32;
            self.last_period = period * self.direction.sign() as i32;
            self.transitions = self.transitions.saturating_add(1);
        }

        self.last_counter = crossing.counter;
        BemfSensing::stop(hw);

        if self.transitions > self.max_consecutive_transitions {
            let avg = (self.spd.speed_conv_factor() as i64)
                .checked_div(self.last_period as i64)
                .unwrap_or(0);
            let avg = avg.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
            self.spd.set_avg_mech_speed(avg);
            info!("OTF speed reached: {}", avg);
            return true;
        }

        if self.bemf_errors < self.max_bemf_errors {
            self.step = next_sensing_step(self.step);
            hw.turn_on_low_sides(self.step, self.ls_detect_count);
            BemfSensing::start(hw, self.step);
        } else {
            warn!("OTF aborted after {} BEMF errors", self.bemf_errors);
            self.aborted = true;
        }

        false
    }

    /// Feed the low-pass filter of the speed to duty factor
    ///
    /// # Arguments
    /// * `duty` - Applied duty [timer counts]
    /// * `avg_mech_speed` - Speed measured at that duty [SPEED_UNIT]
    pub fn update_duty_conv(&mut self, duty: u16, avg_mech_speed: i16) {
        if duty == 0 || avg_mech_speed == 0 {
            return;
        }

        let speed = avg_mech_speed.unsigned_abs() as u32;
        self.duty_conv[self.filter_index as usize] = (duty as u32 * 65_536) / speed;

        let window = self.low_pass_window as usize;
        let sum: u64 = self.duty_conv[..window].iter().map(|&v| v as u64).sum();
        self.speed_duty_factor = (sum / window as u64) as u32;

        if self.filter_index < self.low_pass_window - 1 {
            self.filter_index += 1;
        } else {
            self.filter_index = 0;
        }
    }

    /// Hand the inverter over to full three-phase PWM
    pub fn switch_over<S: CommutationSink>(&mut self, sink: &mut S) {
        self.ongoing = false;
        sink.enable_outputs();
    }

    /// Duty that matches the measured speed [timer counts]
    pub fn calc_speed_reference(&self) -> u16 {
        let speed = self.spd.avg_mech_speed().unsigned_abs() as u64;
        let duty = self.speed_duty_factor as u64 * speed / 65_536;
        duty.min(u16::MAX as u64) as u16
    }

    pub fn is_ongoing(&self) -> bool {
        self.ongoing
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn bemf_errors(&self) -> u16 {
        self.bemf_errors
    }

    pub fn transitions(&self) -> u8 {
        self.transitions
    }

    pub fn step(&self) -> Step {
        self.step
    }

    /// Speed measured by the last successful `task` [SPEED_UNIT]
    pub fn avg_mech_speed(&self) -> i16 {
        self.spd.avg_mech_speed()
    }

    /// Half period of the last valid crossing [speed timer ticks]
    pub fn step_time_last(&self) -> u32 {
        self.step_time_last
    }

    pub fn speed_duty_factor(&self) -> u32 {
        self.speed_duty_factor
    }

    /// Last valid half period signed by direction [speed timer ticks]
    ///
    /// Seeds the BEMF observer's period FIFO on handoff.
    pub fn last_period(&self) -> i32 {
        self.last_period
    }
}
