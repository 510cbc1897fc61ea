//! Configuration module
//!
//! このモジュールは6ステップ駆動の各コンポーネントの設定と、
//! 構築時の設定検証を提供します。

pub mod params;

// params.rsから主要な定数を再エクスポート
pub use params::*;

use crate::sixstep::revup::{RevUpPhase, MAX_PHASES};
use crate::sixstep::speed_buffer::SPEED_FIFO_SIZE;
use crate::sixstep::SensorPlacement;

/// IPDのパルス後サンプリング遅延 [タイマーカウント]（170MHzで1μs）
pub const IPD_SAMPLING_DELAY_TICKS: u32 = 170;

/// OTFのデューティ変換フィルタの最大窓
pub const OTF_FILTER_CAPACITY: usize = 8;

/// 設定エラー
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// 速度バッファのサイズが範囲外
    #[error("Speed buffer size {0} out of range (1..=18)")]
    SpeedBufferSize(u8),

    #[error("Pole pairs must be non-zero")]
    ZeroPolePairs,

    #[error("Timer clock must be non-zero")]
    ZeroTimerClock,

    #[error("Rev-up sequence has no phases")]
    NoRevUpPhases,

    #[error("Rev-up sequence has {0} phases (max 5)")]
    TooManyRevUpPhases(u8),

    #[error("Control frequency must be non-zero")]
    ZeroControlFrequency,

    /// Hallプリスケーラ比が16ビットに収まらない（最小速度が低すぎる）
    #[error("Hall prescaler ratio {0} does not fit the 16-bit prescaler")]
    HallPrescalerOverflow(u32),

    /// 最大周期 × バッファサイズがi32に収まらない
    #[error("Hall period sum overflows: max period {max_period} x {size} slots")]
    HallPeriodSumOverflow { max_period: u32, size: u8 },

    /// 速度確定の連続ゼロクロス数が範囲外
    #[error("OTF transition threshold {0} out of range (1..=254)")]
    OtfTransitions(u8),

    #[error("OTF low-pass window {0} out of range (1..=8)")]
    OtfFilterWindow(u8),

    #[error("OTF bus-to-threshold factor must be non-zero")]
    ZeroBusToThreshold,

    #[error("IPD pulse width {pulse_width} does not exceed the sampling delay {delay}")]
    IpdPulseTooShort { pulse_width: u32, delay: u32 },

    /// IPDの判定回数が0（1回のパルスで位置が確定してしまう）
    #[error("IPD thresholds must be non-zero: {valid_bemf_samples} samples, {valid_steps} steps")]
    IpdZeroThreshold {
        valid_bemf_samples: u16,
        valid_steps: u16,
    },

    #[error("Duty limits inverted: min {min} > max {max}")]
    DutyLimits { min: u16, max: u16 },
}

fn check_buffer_size(size: u8) -> Result<(), ConfigError> {
    if size == 0 || size as usize > SPEED_FIFO_SIZE {
        return Err(ConfigError::SpeedBufferSize(size));
    }
    Ok(())
}

/// Hallセンサー設定
#[derive(Debug, Clone, Copy)]
pub struct HallConfig {
    /// キャプチャタイマーのクロック [Hz]
    pub timer_clock_hz: u32,
    pub pole_pairs: u8,
    /// 最小信頼速度 [0.1Hz]
    pub min_reliable_mech_speed: u16,
    /// 最大信頼速度 [0.1Hz]
    pub max_reliable_mech_speed: u16,
    pub max_consecutive_errors: u8,
    pub speed_buffer_size: u8,
    /// センサー配置（120°/60°）
    pub placement: SensorPlacement,
    /// 位相シフト [電気角度、0..60]
    pub phase_shift_deg: u16,
    pub step_shift: u8,
    pub ic_filter: u8,
}

impl Default for HallConfig {
    fn default() -> Self {
        Self {
            timer_clock_hz: DEFAULT_TIMER_CLOCK_HZ,
            pole_pairs: DEFAULT_POLE_PAIRS,
            min_reliable_mech_speed: hall::DEFAULT_MIN_RELIABLE_MECH_SPEED,
            max_reliable_mech_speed: hall::DEFAULT_MAX_RELIABLE_MECH_SPEED,
            max_consecutive_errors: hall::DEFAULT_MAX_CONSECUTIVE_ERRORS,
            speed_buffer_size: hall::DEFAULT_SPEED_BUFFER_SIZE,
            placement: SensorPlacement::Degrees120,
            phase_shift_deg: hall::DEFAULT_PHASE_SHIFT_DEG,
            step_shift: hall::DEFAULT_STEP_SHIFT,
            ic_filter: hall::DEFAULT_IC_FILTER,
        }
    }
}

impl HallConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_buffer_size(self.speed_buffer_size)?;
        if self.pole_pairs == 0 {
            return Err(ConfigError::ZeroPolePairs);
        }
        if self.timer_clock_hz == 0 {
            return Err(ConfigError::ZeroTimerClock);
        }
        Ok(())
    }
}

/// レブアップ設定
#[derive(Debug, Clone, Copy)]
pub struct RevUpConfig {
    /// フェーズ配列（先頭 `phase_count` 個が有効）
    pub phases: [RevUpPhase; MAX_PHASES],
    pub phase_count: u8,
    /// `exec` の呼び出し周波数 [Hz]（速度ループ周波数）
    pub control_frequency_hz: u16,
    /// 閉ループ移行を許可する最小速度 [0.1Hz]
    pub min_startup_valid_speed: u16,
    pub nominal_bus_voltage_v: u16,
    /// 転流スケジューラのタイマークロック [Hz]
    pub speed_timer_clock_hz: u32,
    pub pole_pairs: u8,
}

impl Default for RevUpConfig {
    fn default() -> Self {
        let phase = |(duration_ms, target_mech_speed, target_pulse): (u16, i16, u16)| {
            RevUpPhase {
                duration_ms,
                target_mech_speed,
                target_pulse,
            }
        };

        let mut phases = [RevUpPhase::default(); MAX_PHASES];
        phases[0] = phase(revup::DEFAULT_ALIGN_PHASE);
        phases[1] = phase(revup::DEFAULT_RAMP_PHASE_1);
        phases[2] = phase(revup::DEFAULT_RAMP_PHASE_2);

        Self {
            phases,
            phase_count: 3,
            control_frequency_hz: DEFAULT_SPEED_LOOP_FREQUENCY_HZ,
            min_startup_valid_speed: revup::DEFAULT_MIN_STARTUP_VALID_SPEED,
            nominal_bus_voltage_v: revup::DEFAULT_NOMINAL_BUS_VOLTAGE_V,
            speed_timer_clock_hz: DEFAULT_TIMER_CLOCK_HZ,
            pole_pairs: DEFAULT_POLE_PAIRS,
        }
    }
}

impl RevUpConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.phase_count == 0 {
            return Err(ConfigError::NoRevUpPhases);
        }
        if self.phase_count as usize > MAX_PHASES {
            return Err(ConfigError::TooManyRevUpPhases(self.phase_count));
        }
        if self.control_frequency_hz == 0 {
            return Err(ConfigError::ZeroControlFrequency);
        }
        if self.pole_pairs == 0 {
            return Err(ConfigError::ZeroPolePairs);
        }
        if self.speed_timer_clock_hz == 0 {
            return Err(ConfigError::ZeroTimerClock);
        }
        Ok(())
    }
}

/// IPD設定
#[derive(Debug, Clone, Copy)]
pub struct IpdConfig {
    /// ステップ確定に必要なBEMF無し検出回数
    pub valid_bemf_samples: u16,
    /// IPD完了に必要な有効ステップ数
    pub valid_steps: u16,
    /// パルス幅 [タイマーカウント]
    pub pulse_width_ticks: u32,
    /// ADCサンプリング時間 [タイマーカウント]
    pub adc_sampling_ticks: u32,
    /// デバッグモード（パルス印加せずBEMF検出のみ）
    pub debug: bool,
}

impl Default for IpdConfig {
    fn default() -> Self {
        Self {
            valid_bemf_samples: ipd::DEFAULT_VALID_BEMF_SAMPLES,
            valid_steps: ipd::DEFAULT_VALID_STEPS,
            pulse_width_ticks: ipd::DEFAULT_PULSE_WIDTH_TICKS,
            adc_sampling_ticks: ipd::DEFAULT_ADC_SAMPLING_TICKS,
            debug: false,
        }
    }
}

impl IpdConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.valid_bemf_samples == 0 || self.valid_steps == 0 {
            return Err(ConfigError::IpdZeroThreshold {
                valid_bemf_samples: self.valid_bemf_samples,
                valid_steps: self.valid_steps,
            });
        }
        let delay = IPD_SAMPLING_DELAY_TICKS + self.adc_sampling_ticks;
        if self.pulse_width_ticks <= delay {
            return Err(ConfigError::IpdPulseTooShort {
                pulse_width: self.pulse_width_ticks,
                delay,
            });
        }
        Ok(())
    }
}

/// オンザフライ再始動設定
#[derive(Debug, Clone, Copy)]
pub struct OtfConfig {
    pub max_consecutive_transitions: u8,
    pub max_bemf_errors: u16,
    pub threshold_perc: u16,
    pub bus_to_threshold: u16,
    pub threshold_correction: u16,
    pub ls_detect_count: u16,
    pub ls_brake_count: u16,
    pub speed_timer_prescaler: u32,
    /// PWM周期 [タイマーカウント]（グリッチ判定に使用）
    pub pwm_period: u32,
    pub low_pass_window: u8,
    pub speed_timer_clock_hz: u32,
    pub pole_pairs: u8,
}

impl Default for OtfConfig {
    fn default() -> Self {
        Self {
            max_consecutive_transitions: otf::DEFAULT_MAX_CONSECUTIVE_TRANSITIONS,
            max_bemf_errors: otf::DEFAULT_MAX_BEMF_ERRORS,
            threshold_perc: otf::DEFAULT_THRESHOLD_PERC,
            bus_to_threshold: otf::DEFAULT_BUS_TO_THRESHOLD,
            threshold_correction: otf::DEFAULT_THRESHOLD_CORRECTION,
            ls_detect_count: otf::DEFAULT_LS_DETECT_COUNT,
            ls_brake_count: otf::DEFAULT_LS_BRAKE_COUNT,
            speed_timer_prescaler: otf::DEFAULT_SPEED_TIMER_PRESCALER,
            pwm_period: pwm::DEFAULT_PERIOD_TICKS,
            low_pass_window: otf::DEFAULT_LOW_PASS_WINDOW,
            speed_timer_clock_hz: DEFAULT_TIMER_CLOCK_HZ,
            pole_pairs: DEFAULT_POLE_PAIRS,
        }
    }
}

impl OtfConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_consecutive_transitions == 0 || self.max_consecutive_transitions == u8::MAX {
            return Err(ConfigError::OtfTransitions(self.max_consecutive_transitions));
        }
        if self.low_pass_window == 0 || self.low_pass_window as usize > OTF_FILTER_CAPACITY {
            return Err(ConfigError::OtfFilterWindow(self.low_pass_window));
        }
        if self.bus_to_threshold == 0 {
            return Err(ConfigError::ZeroBusToThreshold);
        }
        if self.pole_pairs == 0 {
            return Err(ConfigError::ZeroPolePairs);
        }
        if self.speed_timer_clock_hz == 0 {
            return Err(ConfigError::ZeroTimerClock);
        }
        Ok(())
    }
}

/// 速度/デューティ制御設定
#[derive(Debug, Clone, Copy)]
pub struct DutyCtrlConfig {
    pub control_frequency_hz: u16,
    pub kp: f32,
    pub ki: f32,
    pub min_duty: u16,
    pub max_duty: u16,
}

impl Default for DutyCtrlConfig {
    fn default() -> Self {
        Self {
            control_frequency_hz: DEFAULT_SPEED_LOOP_FREQUENCY_HZ,
            kp: duty::DEFAULT_SPEED_KP,
            ki: duty::DEFAULT_SPEED_KI,
            min_duty: duty::DEFAULT_MIN_DUTY,
            max_duty: duty::DEFAULT_MAX_DUTY,
        }
    }
}

impl DutyCtrlConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.control_frequency_hz == 0 {
            return Err(ConfigError::ZeroControlFrequency);
        }
        if self.min_duty > self.max_duty {
            return Err(ConfigError::DutyLimits {
                min: self.min_duty,
                max: self.max_duty,
            });
        }
        Ok(())
    }
}

/// 速度フィードバックの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FeedbackMode {
    /// Hallセンサー
    Hall,
    /// センサーレス（BEMFオブザーバーが外部から速度を供給）
    Sensorless,
}

/// モーター駆動全体の設定
#[derive(Debug, Clone, Copy)]
pub struct DriveConfig {
    pub feedback: FeedbackMode,
    /// 始動時にオンザフライ検出を行う
    pub otf_enabled: bool,
    /// 始動時に初期位置検出を行う
    pub ipd_enabled: bool,
    pub hall: HallConfig,
    pub revup: RevUpConfig,
    pub ipd: IpdConfig,
    pub otf: OtfConfig,
    pub duty: DutyCtrlConfig,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            feedback: FeedbackMode::Hall,
            otf_enabled: false,
            ipd_enabled: false,
            hall: HallConfig::default(),
            revup: RevUpConfig::default(),
            ipd: IpdConfig::default(),
            otf: OtfConfig::default(),
            duty: DutyCtrlConfig::default(),
        }
    }
}

impl DriveConfig {
    /// 全コンポーネントの設定を検証
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.hall.validate()?;
        self.revup.validate()?;
        self.duty.validate()?;
        if self.ipd_enabled {
            self.ipd.validate()?;
        }
        if self.otf_enabled {
            self.otf.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(DriveConfig::default().validate(), Ok(()));
        assert_eq!(IpdConfig::default().validate(), Ok(()));
        assert_eq!(OtfConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_speed_buffer_size_bounds() {
        let mut hall = HallConfig::default();
        hall.speed_buffer_size = 0;
        assert_eq!(hall.validate(), Err(ConfigError::SpeedBufferSize(0)));
        hall.speed_buffer_size = 19;
        assert_eq!(hall.validate(), Err(ConfigError::SpeedBufferSize(19)));
    }

    #[test]
    fn test_revup_phase_count() {
        let mut revup = RevUpConfig::default();
        revup.phase_count = 0;
        assert_eq!(revup.validate(), Err(ConfigError::NoRevUpPhases));
        revup.phase_count = 6;
        assert_eq!(revup.validate(), Err(ConfigError::TooManyRevUpPhases(6)));
    }

    #[test]
    fn test_otf_transition_threshold_range() {
        let mut otf = OtfConfig::default();
        otf.max_consecutive_transitions = 0;
        assert_eq!(otf.validate(), Err(ConfigError::OtfTransitions(0)));
        otf.max_consecutive_transitions = u8::MAX;
        assert_eq!(otf.validate(), Err(ConfigError::OtfTransitions(u8::MAX)));
        otf.max_consecutive_transitions = 254;
        assert_eq!(otf.validate(), Ok(()));
    }

    #[test]
    fn test_otf_filter_window() {
        let mut otf = OtfConfig::default();
        otf.low_pass_window = 9;
        assert_eq!(otf.validate(), Err(ConfigError::OtfFilterWindow(9)));
    }

    #[test]
    fn test_ipd_pulse_must_exceed_sampling_delay() {
        let mut ipd = IpdConfig::default();
        ipd.pulse_width_ticks = 210;
        ipd.adc_sampling_ticks = 40;
        assert_eq!(
            ipd.validate(),
            Err(ConfigError::IpdPulseTooShort {
                pulse_width: 210,
                delay: 210
            })
        );
    }

    #[test]
    fn test_ipd_thresholds_must_be_non_zero() {
        let mut ipd = IpdConfig::default();
        ipd.valid_steps = 0;
        assert_eq!(
            ipd.validate(),
            Err(ConfigError::IpdZeroThreshold {
                valid_bemf_samples: IpdConfig::default().valid_bemf_samples,
                valid_steps: 0
            })
        );

        let mut ipd = IpdConfig::default();
        ipd.valid_bemf_samples = 0;
        assert!(matches!(
            ipd.validate(),
            Err(ConfigError::IpdZeroThreshold {
                valid_bemf_samples: 0,
                ..
            })
        ));

        let mut cfg = DriveConfig::default();
        cfg.ipd_enabled = true;
        cfg.ipd.valid_steps = 0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::IpdZeroThreshold { .. })
        ));
    }

    #[test]
    fn test_disabled_stages_are_not_validated() {
        let mut cfg = DriveConfig::default();
        cfg.otf.low_pass_window = 0;
        cfg.ipd.pulse_width_ticks = 0;
        assert_eq!(cfg.validate(), Ok(()));
        cfg.otf_enabled = true;
        assert_eq!(cfg.validate(), Err(ConfigError::OtfFilterWindow(0)));
    }
}
