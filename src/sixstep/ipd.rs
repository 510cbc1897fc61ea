// Initial position detection: rotor angle at standstill from current-response pulses

use super::Step;
use crate::config::{IpdConfig, IPD_SAMPLING_DELAY_TICKS};
use crate::fmt::*;
use crate::interface::{BemfSensing, IpdPulseSequencer};

/// Map an electrical angle (-180..=180, 30 degree resolution) to a commutation step
///
/// Step vs rotor angle: Step1 60, Step2 120, Step3 180, Step4 240,
/// Step5 300, Step6 0 degrees, with the 180 degree offset of
/// [`zero_speed_rotor_angle`] already applied.
pub fn angle_to_step(angle: i16) -> Step {
    match angle {
        a if a <= -150 => Step::Step6,
        a if a <= -90 => Step::Step1,
        a if a <= -30 => Step::Step2,
        a if a <= 30 => Step::Step3,
        a if a <= 90 => Step::Step4,
        a if a <= 150 => Step::Step5,
        _ => Step::Step6,
    }
}

/// Flux proxies of the 12 angle bins (0, 30, ... 330 degrees)
///
/// Sample order of the pulse sequence is 0, 180, 60, 240, 120, 300 degrees.
pub fn flux_bins(currents: &[i16; 6]) -> [i32; 12] {
    let mean = currents.iter().map(|&c| c as i32).sum::<i32>() / 6;

    let mut flux = [0i32; 12];
    flux[0] = currents[0] as i32 - mean;
    flux[2] = currents[2] as i32 - mean;
    flux[4] = currents[4] as i32 - mean;
    flux[6] = currents[1] as i32 - mean;
    flux[8] = currents[3] as i32 - mean;
    flux[10] = currents[5] as i32 - mean;

    for odd in (1..12).step_by(2) {
        flux[odd] = (flux[odd - 1] + flux[(odd + 1) % 12]) / 2;
    }
    flux
}

/// Electrical angle of the rotor from the 12 flux bins
///
/// Picks the 3-bin window with the largest sum (first one wins on ties).
/// The window starting at bin `i` is centered on `30 * (i + 1)` degrees.
pub fn zero_speed_rotor_angle(flux: &[i32; 12]) -> i16 {
    let mut max = i32::MIN;
    let mut angle: i16 = 0;
    for i in 0..12 {
        let sum = flux[i] + flux[(i + 1) % 12] + flux[(i + 2) % 12];
        if sum > max {
            max = sum;
            angle = (30 * (i as i16 + 1)) % 360;
        }
    }
    angle - 180
}

/// Initial position detection state
pub struct InitialPositionDetection {
    valid_bemf_samples: u16,
    valid_steps: u16,
    pulse_width_ticks: u32,
    adc_sampling_ticks: u32,
    debug: bool,
    /// BEMF-absence samples on the current step
    zero_speed_samples: u16,
    /// Steps validated so far
    valid_step_count: u16,
    previous_step: Option<Step>,
    /// Last detected angle, -1 until the first detection
    electrical_angle: i16,
    /// Step chosen by the last detection
    detected_step: Option<Step>,
    currents: [i16; 6],
    flux: [i32; 12],
    running: bool,
    bemf_measured: bool,
    pulse_running: bool,
}

impl InitialPositionDetection {
    pub fn new(config: &IpdConfig) -> Self {
        let mut ipd = Self {
            valid_bemf_samples: config.valid_bemf_samples,
            valid_steps: config.valid_steps,
            pulse_width_ticks: config.pulse_width_ticks,
            adc_sampling_ticks: config.adc_sampling_ticks,
            debug: config.debug,
            zero_speed_samples: 0,
            valid_step_count: 0,
            previous_step: None,
            electrical_angle: -1,
            detected_step: None,
            currents: [0; 6],
            flux: [0; 12],
            running: false,
            bemf_measured: true,
            pulse_running: false,
        };
        ipd.clear();
        ipd
    }

    /// Reset for a new detection; the first `task` call runs the pulses
    pub fn clear(&mut self) {
        self.zero_speed_samples = 0;
        self.valid_step_count = 0;
        self.previous_step = None;
        self.electrical_angle = -1;
        self.running = false;
        self.bemf_measured = true;
        self.currents = [0; 6];
        self.flux = [0; 12];
    }

    /// BEMF observer found no back-EMF on the floating phase
    pub fn record_zero_speed_sample(&mut self) {
        self.zero_speed_samples = self.zero_speed_samples.saturating_add(1);
    }

    /// BEMF observer completed a measurement cycle
    pub fn set_bemf_measured(&mut self) {
        self.bemf_measured = true;
    }

    /// Run one detection step
    ///
    /// # Arguments
    /// * `step` - Commutation step, overwritten with the detected one
    /// * `hw` - BEMF sensing and one-pulse sequencer
    ///
    /// # Returns
    /// `true` while detection is still running
    pub fn task<P>(&mut self, step: &mut Step, hw: &mut P) -> bool
    where
        P: BemfSensing + IpdPulseSequencer,
    {
        self.running = true;

        if matches!(*step, Step::Step2 | Step::Step4 | Step::Step6)
            && self.zero_speed_samples >= self.valid_bemf_samples
        {
            self.valid_step_count += 1;
            self.zero_speed_samples = 0;
            self.previous_step = Some(*step);

            if self.valid_step_count >= self.valid_steps {
                hw.stop();
                hw.clear();
                hw.start(*step);
                self.running = false;
                info!("IPD done: angle={}, step={}", self.electrical_angle, step.index() + 1);
            }
        }

        if self.running && self.bemf_measured {
            self.pulse_running = true;
            self.bemf_measured = false;

            if !self.debug {
                hw.stop();
                hw.clear();

                self.electrical_angle = self.zero_speed_rotor_angle_check(hw);
                *step = angle_to_step(self.electrical_angle);
                if self.detected_step != Some(*step) {
                    debug!("IPD angle {} -> step {}", self.electrical_angle, step.index() + 1);
                    self.detected_step = Some(*step);
                }

                hw.stop();
                hw.clear();
            }

            self.pulse_running = false;
            hw.start(*step);

            if self.debug {
                self.running = false;
            }
        }

        self.running
    }

    /// Inject the six pulses and compute the rotor angle
    ///
    /// The current is sampled `IPD_SAMPLING_DELAY_TICKS` plus the ADC
    /// sampling time before the end of each pulse.
    pub fn zero_speed_rotor_angle_check<P: IpdPulseSequencer>(&mut self, hw: &mut P) -> i16 {
        let trigger = self
            .pulse_width_ticks
            .saturating_sub(IPD_SAMPLING_DELAY_TICKS)
            .saturating_sub(self.adc_sampling_ticks);

        self.currents = hw.run_pulse_sequence(trigger);
        self.flux = flux_bins(&self.currents);
        zero_speed_rotor_angle(&self.flux)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// `true` while the one-pulse sequence is applied
    pub fn is_pulse_running(&self) -> bool {
        self.pulse_running
    }

    pub fn electrical_angle(&self) -> i16 {
        self.electrical_angle
    }

    pub fn currents(&self) -> &[i16; 6] {
        &self.currents
    }

    pub fn flux(&self) -> &[i32; 12] {
        &self.flux
    }

    pub fn valid_step_count(&self) -> u16 {
        self.valid_step_count
    }

    pub fn previous_step(&self) -> Option<Step> {
        self.previous_step
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MockStage {
        samples: [i16; 6],
        trigger: Option<u32>,
        pulses: u32,
        started: Option<Step>,
        stops: u32,
    }

    impl BemfSensing for MockStage {
        fn start(&mut self, step: Step) {
            self.started = Some(step);
        }
        fn stop(&mut self) {
            self.stops += 1;
        }
        fn clear(&mut self) {}
        fn set_threshold(&mut self, _threshold: u16) {}
        fn seed_speed(&mut self, _speed_timer: u32, _period: i32) {}
    }

    impl IpdPulseSequencer for MockStage {
        fn run_pulse_sequence(&mut self, adc_trigger: u32) -> [i16; 6] {
            self.trigger = Some(adc_trigger);
            self.pulses += 1;
            self.samples
        }
    }

    fn config() -> IpdConfig {
        IpdConfig {
            valid_bemf_samples: 2,
            valid_steps: 2,
            pulse_width_ticks: 1_200,
            adc_sampling_ticks: 30,
            debug: false,
        }
    }

    #[test]
    fn test_angle_to_step_boundaries() {
        assert_eq!(angle_to_step(-180), Step::Step6);
        assert_eq!(angle_to_step(-150), Step::Step6);
        assert_eq!(angle_to_step(-120), Step::Step1);
        assert_eq!(angle_to_step(-90), Step::Step1);
        assert_eq!(angle_to_step(-60), Step::Step2);
        assert_eq!(angle_to_step(0), Step::Step3);
        assert_eq!(angle_to_step(30), Step::Step3);
        assert_eq!(angle_to_step(60), Step::Step4);
        assert_eq!(angle_to_step(120), Step::Step5);
        assert_eq!(angle_to_step(150), Step::Step5);
        assert_eq!(angle_to_step(180), Step::Step6);
    }

    #[test]
    fn test_flux_bins() {
        let flux = flux_bins(&[100, 100, 100, 500, 100, 100]);
        // mean = 1000 / 6 = 166
        assert_eq!(flux[8], 334);
        assert_eq!(flux[0], -66);
        assert_eq!(flux[7], 134);
        assert_eq!(flux[9], 134);
        assert_eq!(flux[11], -66);
    }

    #[test]
    fn test_dominant_sample_selects_step() {
        let flux = flux_bins(&[100, 100, 100, 500, 100, 100]);
        // Peak at 240 degrees, minus 180
        assert_eq!(zero_speed_rotor_angle(&flux), 60);
        assert_eq!(angle_to_step(60), Step::Step4);
    }

    #[test]
    fn test_wrapping_windows() {
        // Peak at 0 degrees: window 11 (330, 0, 30) centered on 0
        let flux = flux_bins(&[500, 100, 100, 100, 100, 100]);
        assert_eq!(zero_speed_rotor_angle(&flux), -180);
    }

    #[test]
    fn test_flat_samples_pick_first_window() {
        let flux = flux_bins(&[7, 7, 7, 7, 7, 7]);
        assert_eq!(zero_speed_rotor_angle(&flux), 30 - 180);
    }

    #[test]
    fn test_clear_state() {
        let ipd = InitialPositionDetection::new(&config());
        assert_eq!(ipd.electrical_angle(), -1);
        assert!(!ipd.is_running());
        assert_eq!(ipd.valid_step_count(), 0);
    }

    #[test]
    fn test_first_task_runs_pulses() {
        let mut ipd = InitialPositionDetection::new(&config());
        let mut hw = MockStage {
            samples: [100, 100, 100, 500, 100, 100],
            ..Default::default()
        };
        let mut step = Step::Step1;

        assert!(ipd.task(&mut step, &mut hw));
        assert_eq!(hw.pulses, 1);
        assert_eq!(hw.trigger, Some(1_200 - 170 - 30));
        assert_eq!(ipd.electrical_angle(), 60);
        assert_eq!(step, Step::Step4);
        assert_eq!(hw.started, Some(Step::Step4));
        assert!(!ipd.is_pulse_running());

        // No new BEMF measurement, no new pulses
        assert!(ipd.task(&mut step, &mut hw));
        assert_eq!(hw.pulses, 1);
    }

    #[test]
    fn test_finishes_after_valid_steps() {
        let mut ipd = InitialPositionDetection::new(&config());
        let mut hw = MockStage {
            samples: [100, 100, 100, 500, 100, 100],
            ..Default::default()
        };
        let mut step = Step::Step4;
        assert!(ipd.task(&mut step, &mut hw));
        assert_eq!(ipd.previous_step(), None);

        ipd.record_zero_speed_sample();
        ipd.record_zero_speed_sample();
        assert!(ipd.task(&mut step, &mut hw));
        assert_eq!(ipd.valid_step_count(), 1);
        assert_eq!(ipd.previous_step(), Some(Step::Step4));

        ipd.record_zero_speed_sample();
        ipd.record_zero_speed_sample();
        assert!(!ipd.task(&mut step, &mut hw));
        assert_eq!(ipd.valid_step_count(), 2);
        assert_eq!(hw.started, Some(Step::Step4));
    }

    #[test]
    fn test_odd_steps_do_not_count() {
        let mut ipd = InitialPositionDetection::new(&config());
        let mut hw = MockStage {
            samples: [100, 100, 100, 100, 500, 100],
            ..Default::default()
        };
        let mut step = Step::Step1;
        ipd.task(&mut step, &mut hw);
        // Peak at 120 degrees -> -60 -> Step2, so force an odd step
        step = Step::Step3;
        for _ in 0..4 {
            ipd.record_zero_speed_sample();
        }
        assert!(ipd.task(&mut step, &mut hw));
        assert_eq!(ipd.valid_step_count(), 0);
    }

    #[test]
    fn test_debug_mode_skips_pulses() {
        let mut cfg = config();
        cfg.debug = true;
        let mut ipd = InitialPositionDetection::new(&cfg);
        let mut hw = MockStage::default();
        let mut step = Step::Step2;
        assert!(!ipd.task(&mut step, &mut hw));
        assert_eq!(hw.pulses, 0);
        assert_eq!(hw.started, Some(Step::Step2));
    }
}
