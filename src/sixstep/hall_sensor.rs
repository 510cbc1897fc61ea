// Hall sensor processing for six-step commutation and speed estimation

use super::speed_buffer::SpeedBuffer;
use super::speed_feedback::SpeedFeedback;
use super::{Direction, Step, SPEED_UNIT};
use crate::config::{ConfigError, HallConfig};
use crate::fmt::*;
use crate::interface::{HallInputs, HallTimer};

/// Captures below this value allow a finer prescaler
const LOW_RES_THRESHOLD: u16 = 0x5500;

/// Minimum measurable speed is this many times lower than the minimum reliable speed
const MIN_MEAS_FACTOR: u32 = 4;

/// Maximum measurable speed is this many times higher than the maximum reliable speed
const MAX_MEAS_FACTOR: u32 = 2;

/// Timeout used when no minimum reliable speed is configured [ms]
const DEFAULT_HALL_TIMEOUT_MS: u32 = 150;

/// Step offset (before `step_shift`) for each sector, positive rotation
/// Hall state format: (H3 << 2) | (H2 << 1) | H1, states 0 and 7 are invalid
const STEP_TABLE_POSITIVE: [Option<u8>; 8] = [
    None,
    Some(2), // 0b001
    Some(4), // 0b010
    Some(3), // 0b011
    Some(0), // 0b100
    Some(1), // 0b101
    Some(5), // 0b110
    None,
];

/// Step offset for each sector, negative rotation
const STEP_TABLE_NEGATIVE: [Option<u8>; 8] = [
    None,
    Some(5),
    Some(1),
    Some(0),
    Some(3),
    Some(4),
    Some(2),
    None,
];

/// Sector that must precede each sector when turning in the positive direction
/// (sequence 4 -> 5 -> 1 -> 3 -> 2 -> 6 -> 4)
const PREVIOUS_POSITIVE: [u8; 8] = [0, 5, 3, 1, 6, 4, 2, 0];

/// Sector that must precede each sector when turning in the negative direction
const PREVIOUS_NEGATIVE: [u8; 8] = [0, 3, 6, 2, 5, 1, 4, 0];

/// Physical spacing of the three Hall sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorPlacement {
    /// Sensors 120 electrical degrees apart
    Degrees120,
    /// Sensors 60 electrical degrees apart (H2 inverted)
    Degrees60,
}

/// Logic level of the three Hall lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HallLines {
    pub h1: bool,
    pub h2: bool,
    pub h3: bool,
}

impl HallLines {
    /// Sector code (0..7) for the given sensor placement
    pub fn sector(self, placement: SensorPlacement) -> u8 {
        let (h1, h2, h3) = (self.h1 as u8, self.h2 as u8, self.h3 as u8);
        match placement {
            SensorPlacement::Degrees120 => (h3 << 2) | (h2 << 1) | h1,
            SensorPlacement::Degrees60 => ((h2 ^ 1) << 2) | (h3 << 1) | h1,
        }
    }
}

/// Check if a hall state is valid
///
/// # Returns
/// `true` if state is valid (1-6), `false` otherwise
pub fn is_valid_sector(sector: u8) -> bool {
    (1..=6).contains(&sector)
}

/// Hall sensor based speed and position feedback
///
/// Capture events (one per Hall edge) feed a ring buffer of electrical
/// periods; the speed loop reads the average through
/// [`HallFeedback::calc_average_speed`].
pub struct HallFeedback {
    spd: SpeedFeedback,
    buffer: SpeedBuffer,
    placement: SensorPlacement,
    /// Commutation delay after a Hall edge [electrical degrees]
    phase_shift: u16,
    step_shift: u8,
    ic_filter: u8,
    /// Timer overflow frequency at prescaler 0 [Hz]
    ovf_freq: u32,
    hall_timeout_ms: u32,
    /// Largest prescaler value
    max_ratio: u16,
    /// Longest period kept in the buffer [timer ticks]
    max_period: u32,
    /// Shortest period accepted, below is a glitch [timer ticks]
    min_period: u32,
    sector: u8,
    direction: Direction,
    step: Step,
    /// Set once the first capture after a reset has been discarded
    first_capture_done: bool,
    /// Number of periods captured since the last reset
    fill_count: u8,
    ovf_counter: u16,
    /// Prescaler was raised on the previous capture
    ratio_inc: bool,
    /// Prescaler was lowered on the previous capture
    ratio_dec: bool,
    sensor_reliable: bool,
}

impl HallFeedback {
    /// Create a new Hall feedback instance
    ///
    /// # Arguments
    /// * `config` - Timer clock, pole pairs and reliability bounds
    pub fn new(config: &HallConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let pole_pairs = config.pole_pairs as u32;
        let min_el_speed = config.min_reliable_mech_speed as u32 * pole_pairs / MIN_MEAS_FACTOR;
        let max_el_speed = config.max_reliable_mech_speed as u32 * pole_pairs * MAX_MEAS_FACTOR;

        let ovf_freq = config.timer_clock_hz / 65_536;
        let hall_timeout_ms = if min_el_speed == 0 {
            DEFAULT_HALL_TIMEOUT_MS
        } else {
            (1_000 * SPEED_UNIT / (6 * min_el_speed)).max(1)
        };

        let max_ratio = hall_timeout_ms * ovf_freq / 1_000;
        let max_ratio =
            u16::try_from(max_ratio).map_err(|_| ConfigError::HallPrescalerOverflow(max_ratio))?;
        let max_period = max_ratio as u32 * 65_536;

        // Largest |sum| of the buffer must stay inside i32
        if max_period as u64 * config.speed_buffer_size as u64 > i32::MAX as u64 {
            return Err(ConfigError::HallPeriodSumOverflow {
                max_period,
                size: config.speed_buffer_size,
            });
        }

        let ticks_per_step = SPEED_UNIT as u64 * (config.timer_clock_hz / 6) as u64;
        let min_period = if max_el_speed == 0 {
            ticks_per_step
        } else {
            ticks_per_step / max_el_speed as u64
        };
        let speed_conv_factor = ticks_per_step / pole_pairs as u64;

        debug!(
            "Hall: timeout={}ms, max_ratio={}, min_period={}, max_period={}",
            hall_timeout_ms, max_ratio, min_period, max_period
        );

        Ok(Self {
            spd: SpeedFeedback::new(
                config.min_reliable_mech_speed,
                config.max_reliable_mech_speed,
                config.max_consecutive_errors,
                config.pole_pairs,
                speed_conv_factor.min(i32::MAX as u64) as u32,
            ),
            buffer: SpeedBuffer::new(config.speed_buffer_size),
            placement: config.placement,
            phase_shift: config.phase_shift_deg,
            step_shift: config.step_shift % 6,
            ic_filter: config.ic_filter,
            ovf_freq,
            hall_timeout_ms,
            max_ratio,
            max_period,
            min_period: min_period.min(u32::MAX as u64) as u32,
            sector: 0,
            direction: Direction::Positive,
            step: Step::Step1,
            first_capture_done: false,
            fill_count: 0,
            ovf_counter: 0,
            ratio_inc: false,
            ratio_dec: false,
            sensor_reliable: true,
        })
    }

    /// Program the capture timer and start counting from zero
    pub fn init<T: HallTimer>(&mut self, timer: &mut T) {
        timer.configure(self.ic_filter, self.max_ratio);
        timer.reset_counter();
        self.sensor_reliable = true;
    }

    /// Reset the measurement state and seed the step from the current sensor lines
    ///
    /// The buffer is filled with `max_period` so a motor that has not
    /// started yet reads as very slow rather than stopped.
    pub fn clear<T: HallTimer, H: HallInputs>(&mut self, timer: &mut T, inputs: &mut H) {
        self.ratio_dec = false;
        self.ratio_inc = false;
        self.sensor_reliable = true;
        self.first_capture_done = false;
        self.fill_count = 0;
        self.ovf_counter = 0;
        self.spd.reset_errors();

        timer.set_prescaler(self.max_ratio);
        timer.reset_counter();

        self.sector = inputs.read().sector(self.placement);
        match self.step_for_sector(self.sector) {
            Some(step) => self.step = step,
            None => {
                warn!("Invalid hall state on clear: {}", self.sector);
                self.sensor_reliable = false;
            }
        }

        self.refill_buffer();
    }

    /// Handle a Hall edge (timer input capture event)
    pub fn on_capture<T: HallTimer, H: HallInputs>(&mut self, timer: &mut T, inputs: &mut H) {
        let mut raw_capture: u16 = 0;

        self.read_sector(inputs);

        if self.sensor_reliable {
            if !self.first_capture_done {
                // Period since the last reset is unknown
                self.first_capture_done = true;
                let _ = timer.capture();
            } else {
                raw_capture = timer.capture();
                let period = self.compensate_prescaler(timer, raw_capture);

                if period < self.min_period as u64 {
                    trace!("Hall glitch: period={}", period);
                } else {
                    let clamped = period.min(self.max_period as u64) as i32;
                    self.buffer.push(clamped * self.direction.sign() as i32);
                    if self.fill_count < self.buffer.size() {
                        self.fill_count += 1;
                    }
                }

                self.ovf_counter = 0;
            }
        }

        if self.phase_shift == 0 {
            timer.set_phase_shift_compare(None);
        } else {
            let compare = self.phase_shift as u32 * raw_capture as u32 / 60;
            timer.set_phase_shift_compare(Some(compare.min(u16::MAX as u32) as u16));
        }
    }

    /// Handle a capture timer overflow (update event)
    ///
    /// After `hall_timeout_ms` without an edge the measurement restarts
    /// from "very slow" without affecting reliability.
    pub fn on_overflow<T: HallTimer>(&mut self, timer: &mut T) {
        if !self.sensor_reliable {
            return;
        }

        self.ovf_counter = self.ovf_counter.saturating_add(1);
        let max_overflows =
            self.hall_timeout_ms * self.ovf_freq / ((timer.prescaler() as u32 + 1) * 1_000);

        if self.ovf_counter as u32 >= max_overflows {
            trace!("Hall timeout after {} overflows", self.ovf_counter);
            self.ovf_counter = 0;
            self.first_capture_done = false;
            self.fill_count = 0;
            self.refill_buffer();
        }
    }

    /// Compute the average mechanical speed from the period buffer
    ///
    /// # Returns
    /// Speed reliability after this measurement
    pub fn calc_average_speed(&mut self) -> bool {
        let latest = self.buffer.latest();
        let conv = self.spd.speed_conv_factor() as i64;
        let filled = self.fill_count >= self.buffer.size();

        let speed = if latest.unsigned_abs() < self.min_period {
            if filled {
                self.spd.avg_mech_speed()
            } else {
                0
            }
        } else {
            let period = if filled {
                self.buffer.average()
            } else {
                latest
            };
            conv.checked_div(period as i64)
                .map(saturate_i16)
                .unwrap_or(self.spd.avg_mech_speed())
        };

        let reliable = self.spd.is_speed_reliable(speed);
        self.spd.set_avg_mech_speed(speed);
        reliable
    }

    /// Read the sector, validate the transition and update the step
    fn read_sector<H: HallInputs>(&mut self, inputs: &mut H) {
        let previous = self.sector;
        self.sector = inputs.read().sector(self.placement);

        let expected = match self.direction {
            Direction::Positive => PREVIOUS_POSITIVE[self.sector as usize],
            Direction::Negative => PREVIOUS_NEGATIVE[self.sector as usize],
        };

        if !is_valid_sector(self.sector) || previous != expected {
            if self.sensor_reliable {
                trace!("Invalid hall transition: {} -> {}", previous, self.sector);
            }
            self.sensor_reliable = false;
        }

        if let Some(step) = self.step_for_sector(self.sector) {
            self.step = step;
        }
    }

    /// Scale the raw capture to prescaler-0 ticks and adapt the prescaler
    ///
    /// The prescaler register is preloaded, so a change only affects the
    /// capture after next; `ratio_inc`/`ratio_dec` hold the new value for
    /// one capture.
    fn compensate_prescaler<T: HallTimer>(&mut self, timer: &mut T, raw_capture: u16) -> u64 {
        let prescaler = timer.prescaler();
        let mut period = raw_capture as u64 + self.ovf_counter as u64 * 0x1_0000;

        if self.ovf_counter != 0 {
            period *= prescaler as u64 + 1;
            if self.ratio_inc {
                self.ratio_inc = false;
            } else if prescaler < self.max_ratio {
                timer.set_prescaler(prescaler + 1);
                self.ratio_inc = true;
            }
        } else if self.ratio_dec {
            period *= prescaler as u64 + 2;
            self.ratio_dec = false;
        } else {
            period *= prescaler as u64 + 1;
            if raw_capture < LOW_RES_THRESHOLD && prescaler > 0 {
                timer.set_prescaler(prescaler - 1);
                self.ratio_dec = true;
            }
        }

        period
    }

    fn step_for_sector(&self, sector: u8) -> Option<Step> {
        let table = match self.direction {
            Direction::Positive => &STEP_TABLE_POSITIVE,
            Direction::Negative => &STEP_TABLE_NEGATIVE,
        };
        table[(sector & 0x07) as usize].map(|offset| Step::from_index(offset + self.step_shift))
    }

    fn refill_buffer(&mut self) {
        self.buffer
            .fill(self.max_period as i32 * self.direction.sign() as i32);
    }

    /// Commutation step derived from the last sector
    pub fn step(&self) -> Step {
        self.step
    }

    pub fn set_direction(&mut self, direction: Direction) {
        self.direction = direction;
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Last sector code (0..7)
    pub fn sector(&self) -> u8 {
        self.sector
    }

    /// `false` after an invalid sector or transition, until `clear`
    pub fn is_sensor_reliable(&self) -> bool {
        self.sensor_reliable
    }

    /// Average mechanical speed [SPEED_UNIT]
    pub fn avg_mech_speed(&self) -> i16 {
        self.spd.avg_mech_speed()
    }

    pub fn speed_feedback(&self) -> &SpeedFeedback {
        &self.spd
    }

    pub fn max_period(&self) -> u32 {
        self.max_period
    }

    pub fn min_period(&self) -> u32 {
        self.min_period
    }

    pub fn max_ratio(&self) -> u16 {
        self.max_ratio
    }

    pub fn hall_timeout_ms(&self) -> u32 {
        self.hall_timeout_ms
    }

    pub fn buffer(&self) -> &SpeedBuffer {
        &self.buffer
    }

    pub fn fill_count(&self) -> u8 {
        self.fill_count
    }
}

fn saturate_i16(value: i64) -> i16 {
    value.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Positive rotation sector sequence
    const SEQUENCE: [u8; 6] = [4, 5, 1, 3, 2, 6];

    #[derive(Default)]
    pub(crate) struct MockTimer {
        pub capture: u16,
        pub prescaler: u16,
        pub filter: u8,
        pub resets: u32,
        pub phase_shift_compare: Option<u16>,
    }

    impl HallTimer for MockTimer {
        fn capture(&mut self) -> u16 {
            self.capture
        }
        fn prescaler(&self) -> u16 {
            self.prescaler
        }
        fn set_prescaler(&mut self, prescaler: u16) {
            self.prescaler = prescaler;
        }
        fn reset_counter(&mut self) {
            self.resets += 1;
        }
        fn configure(&mut self, filter: u8, prescaler: u16) {
            self.filter = filter;
            self.prescaler = prescaler;
        }
        fn set_phase_shift_compare(&mut self, compare: Option<u16>) {
            self.phase_shift_compare = compare;
        }
    }

    #[derive(Default)]
    pub(crate) struct MockInputs {
        pub lines: HallLines,
    }

    impl MockInputs {
        /// Drive the lines for a 120 degree sector code
        pub fn set_sector(&mut self, sector: u8) {
            self.lines = HallLines {
                h1: sector & 0b001 != 0,
                h2: sector & 0b010 != 0,
                h3: sector & 0b100 != 0,
            };
        }
    }

    impl HallInputs for MockInputs {
        fn read(&mut self) -> HallLines {
            self.lines
        }
    }

    fn next_sector(sector: u8, direction: Direction) -> u8 {
        let pos = SEQUENCE.iter().position(|&s| s == sector).unwrap();
        match direction {
            Direction::Positive => SEQUENCE[(pos + 1) % 6],
            Direction::Negative => SEQUENCE[(pos + 5) % 6],
        }
    }

    fn config() -> HallConfig {
        HallConfig {
            timer_clock_hz: 170_000_000,
            pole_pairs: 6,
            min_reliable_mech_speed: 0,
            max_reliable_mech_speed: 1_000,
            max_consecutive_errors: 3,
            speed_buffer_size: 6,
            placement: SensorPlacement::Degrees120,
            phase_shift_deg: 0,
            step_shift: 0,
            ic_filter: 11,
        }
    }

    fn setup(sector: u8) -> (HallFeedback, MockTimer, MockInputs) {
        let mut hall = HallFeedback::new(&config()).unwrap();
        let mut timer = MockTimer::default();
        let mut inputs = MockInputs::default();
        inputs.set_sector(sector);
        hall.init(&mut timer);
        hall.clear(&mut timer, &mut inputs);
        (hall, timer, inputs)
    }

    #[test]
    fn test_valid_states() {
        assert!(!is_valid_sector(0));
        assert!(is_valid_sector(1));
        assert!(is_valid_sector(6));
        assert!(!is_valid_sector(7));
    }

    #[test]
    fn test_sector_decoding_60_degrees() {
        let lines = HallLines {
            h1: true,
            h2: false,
            h3: true,
        };
        assert_eq!(lines.sector(SensorPlacement::Degrees120), 0b101);
        assert_eq!(lines.sector(SensorPlacement::Degrees60), 0b111);
    }

    #[test]
    fn test_derived_timing() {
        let hall = HallFeedback::new(&config()).unwrap();
        assert_eq!(hall.hall_timeout_ms(), 150);
        // 170MHz / 65536 = 2593 overflows per second
        assert_eq!(hall.max_ratio(), 388);
        assert_eq!(hall.max_period(), 388 * 65_536);
        // 10 * 28_333_333 / (1000 * 6 * 2)
        assert_eq!(hall.min_period(), 23_611);
        assert_eq!(hall.speed_feedback().speed_conv_factor(), 47_222_221);
    }

    #[test]
    fn test_timeout_from_min_speed() {
        let mut cfg = config();
        cfg.min_reliable_mech_speed = 40;
        // min el speed = 40 * 6 / 4 = 60 -> 10000 / 360 = 27ms
        let hall = HallFeedback::new(&cfg).unwrap();
        assert_eq!(hall.hall_timeout_ms(), 27);
        assert_eq!(hall.max_ratio(), 70);
    }

    #[test]
    fn test_period_sum_overflow_rejected() {
        let mut cfg = config();
        cfg.min_reliable_mech_speed = 1;
        cfg.speed_buffer_size = 18;
        assert!(matches!(
            HallFeedback::new(&cfg),
            Err(ConfigError::HallPeriodSumOverflow { .. })
        ));
    }

    #[test]
    fn test_clear_seeds_step_and_buffer() {
        let (hall, timer, _) = setup(5);
        assert_eq!(hall.step(), Step::Step2);
        assert!(hall.is_sensor_reliable());
        assert_eq!(timer.prescaler, hall.max_ratio());
        assert_eq!(hall.buffer().sum(), hall.max_period() as i32 * 6);
    }

    #[test]
    fn test_step_table_negative_with_shift() {
        let mut cfg = config();
        cfg.step_shift = 2;
        let mut hall = HallFeedback::new(&cfg).unwrap();
        hall.set_direction(Direction::Negative);
        let mut timer = MockTimer::default();
        let mut inputs = MockInputs::default();
        inputs.set_sector(6);
        hall.clear(&mut timer, &mut inputs);
        // 6 -> offset 2, shifted by 2 -> index 4
        assert_eq!(hall.step(), Step::Step5);
        assert_eq!(hall.buffer().latest(), -(hall.max_period() as i32));
    }

    #[test]
    fn test_clear_on_invalid_state_is_unreliable() {
        let (hall, _, _) = setup(7);
        assert!(!hall.is_sensor_reliable());
    }

    #[test]
    fn test_first_capture_is_discarded() {
        let (mut hall, mut timer, mut inputs) = setup(4);
        let sum_before = hall.buffer().sum();

        timer.prescaler = 0;
        timer.capture = 40_000;
        inputs.set_sector(5);
        hall.on_capture(&mut timer, &mut inputs);
        assert_eq!(hall.buffer().sum(), sum_before);
        assert_eq!(hall.fill_count(), 0);

        inputs.set_sector(1);
        hall.on_capture(&mut timer, &mut inputs);
        assert_eq!(hall.buffer().latest(), 40_000);
        assert_eq!(hall.fill_count(), 1);
    }

    #[test]
    fn test_glitch_is_not_stored() {
        let (mut hall, mut timer, mut inputs) = setup(4);
        timer.prescaler = 0;
        inputs.set_sector(5);
        hall.on_capture(&mut timer, &mut inputs);

        let sum_before = hall.buffer().sum();
        timer.capture = 100;
        inputs.set_sector(1);
        hall.on_capture(&mut timer, &mut inputs);
        assert_eq!(hall.buffer().sum(), sum_before);
        assert!(hall.is_sensor_reliable());
    }

    #[test]
    fn test_overflow_adds_full_counts_and_raises_prescaler() {
        let (mut hall, mut timer, mut inputs) = setup(4);
        timer.prescaler = 1;
        inputs.set_sector(5);
        hall.on_capture(&mut timer, &mut inputs);

        hall.on_overflow(&mut timer);
        timer.capture = 1_000;
        inputs.set_sector(1);
        hall.on_capture(&mut timer, &mut inputs);

        assert_eq!(hall.buffer().latest(), (1_000 + 65_536) * 2);
        assert_eq!(timer.prescaler, 2);

        // Next capture with an overflow holds the prescaler
        hall.on_overflow(&mut timer);
        inputs.set_sector(3);
        hall.on_capture(&mut timer, &mut inputs);
        assert_eq!(timer.prescaler, 2);
    }

    #[test]
    fn test_low_capture_lowers_prescaler_once() {
        let (mut hall, mut timer, mut inputs) = setup(4);
        timer.prescaler = 3;
        inputs.set_sector(5);
        hall.on_capture(&mut timer, &mut inputs);

        timer.capture = 20_000;
        inputs.set_sector(1);
        hall.on_capture(&mut timer, &mut inputs);
        assert_eq!(hall.buffer().latest(), 20_000 * 4);
        assert_eq!(timer.prescaler, 2);

        // Register still holds the old ratio for this capture
        inputs.set_sector(3);
        hall.on_capture(&mut timer, &mut inputs);
        assert_eq!(hall.buffer().latest(), 20_000 * 4);
        assert_eq!(timer.prescaler, 2);
    }

    #[test]
    fn test_timeout_resets_measurement() {
        let (mut hall, mut timer, mut inputs) = setup(4);
        timer.prescaler = 0;
        timer.capture = 30_000;
        for sector in [5, 1, 3] {
            inputs.set_sector(sector);
            hall.on_capture(&mut timer, &mut inputs);
        }
        assert_eq!(hall.fill_count(), 2);

        timer.prescaler = hall.max_ratio();
        // 150 * 2593 / (389 * 1000) = 0 -> first overflow times out
        hall.on_overflow(&mut timer);
        assert_eq!(hall.fill_count(), 0);
        assert_eq!(hall.buffer().sum(), hall.max_period() as i32 * 6);
        assert!(hall.is_sensor_reliable());
    }

    #[test]
    fn test_clear_then_average_is_instantaneous() {
        let (mut hall, _, _) = setup(4);
        let expected = (47_222_221 / (388 * 65_536)) as i16;
        assert!(hall.calc_average_speed());
        assert_eq!(hall.avg_mech_speed(), expected);
        assert!(hall.calc_average_speed());
        assert_eq!(hall.avg_mech_speed(), expected);
    }

    #[test]
    fn test_average_speed_when_filled() {
        let (mut hall, mut timer, mut inputs) = setup(4);
        timer.prescaler = 0;
        timer.capture = 47_222;
        let mut sector = 4;
        for _ in 0..8 {
            sector = next_sector(sector, Direction::Positive);
            inputs.set_sector(sector);
            hall.on_capture(&mut timer, &mut inputs);
            // Keep the prescaler at 0
            timer.prescaler = 0;
        }
        assert!(hall.calc_average_speed());
        assert_eq!(hall.avg_mech_speed(), 1_000);
    }

    #[test]
    fn test_phase_shift_compare() {
        let mut cfg = config();
        cfg.phase_shift_deg = 30;
        let mut hall = HallFeedback::new(&cfg).unwrap();
        let mut timer = MockTimer::default();
        let mut inputs = MockInputs::default();
        inputs.set_sector(4);
        hall.clear(&mut timer, &mut inputs);

        inputs.set_sector(5);
        hall.on_capture(&mut timer, &mut inputs);
        assert_eq!(timer.phase_shift_compare, Some(0));

        timer.capture = 30_000;
        inputs.set_sector(1);
        hall.on_capture(&mut timer, &mut inputs);
        assert_eq!(timer.phase_shift_compare, Some(15_000));
    }

    proptest! {
        #[test]
        fn prop_valid_sequence_stays_reliable(
            start in 0usize..6,
            negative in any::<bool>(),
            edges in 1usize..50,
        ) {
            let direction = if negative { Direction::Negative } else { Direction::Positive };
            let mut hall = HallFeedback::new(&config()).unwrap();
            hall.set_direction(direction);
            let mut timer = MockTimer::default();
            let mut inputs = MockInputs::default();
            let mut sector = SEQUENCE[start];
            inputs.set_sector(sector);
            hall.clear(&mut timer, &mut inputs);

            for _ in 0..edges {
                sector = next_sector(sector, direction);
                inputs.set_sector(sector);
                timer.capture = 40_000;
                hall.on_capture(&mut timer, &mut inputs);
                prop_assert!(hall.is_sensor_reliable());
            }
        }

        #[test]
        fn prop_invalid_transition_latches_until_clear(
            start in 0usize..6,
            valid_before in 0usize..10,
            valid_after in 1usize..10,
            skip in 2usize..5,
        ) {
            let mut hall = HallFeedback::new(&config()).unwrap();
            let mut timer = MockTimer::default();
            let mut inputs = MockInputs::default();
            let mut sector = SEQUENCE[start];
            inputs.set_sector(sector);
            hall.clear(&mut timer, &mut inputs);

            for _ in 0..valid_before {
                sector = next_sector(sector, Direction::Positive);
                inputs.set_sector(sector);
                hall.on_capture(&mut timer, &mut inputs);
            }
            prop_assert!(hall.is_sensor_reliable());

            // Jump over `skip - 1` sectors
            for _ in 0..skip {
                sector = next_sector(sector, Direction::Positive);
            }
            inputs.set_sector(sector);
            hall.on_capture(&mut timer, &mut inputs);
            prop_assert!(!hall.is_sensor_reliable());

            for _ in 0..valid_after {
                sector = next_sector(sector, Direction::Positive);
                inputs.set_sector(sector);
                hall.on_capture(&mut timer, &mut inputs);
                prop_assert!(!hall.is_sensor_reliable());
            }

            hall.clear(&mut timer, &mut inputs);
            prop_assert!(hall.is_sensor_reliable());
        }
    }
}
