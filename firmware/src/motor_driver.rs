//! モータードライバー抽象化レイヤー
//!
//! TIM1相補PWMをライブラリのパワーステージトレイトへ接続します。
//! このボードにはBEMF検出回路と相電流センサーの配線がないため、
//! BEMF検出とIPDパルスシーケンスは何もしません（OTF/IPDは設定で無効）。

use embassy_stm32::{
    peripherals,
    timer::{complementary_pwm::ComplementaryPwm, Channel},
};
use g4_sixstep::interface::{BemfSensing, CommutationSink, IpdPulseSequencer};
use g4_sixstep::Step;

use g4_sixstep::warn;

/// 1ステップ分の相構成
#[derive(Clone, Copy)]
struct StepChannels {
    /// PWM駆動（ハイサイドスイッチング）する相
    high: Channel,
    /// ローサイドを常時オンにする相
    low: Channel,
    /// 開放する相
    open: Channel,
}

/// 6ステップ駆動のステップ表
///
/// Step1: U-High/V-Low、Step2: U-High/W-Low、Step3: V-High/W-Low、
/// Step4: V-High/U-Low、Step5: W-High/U-Low、Step6: W-High/V-Low
fn step_channels(step: Step) -> StepChannels {
    let (high, low, open) = match step {
        Step::Step1 => (Channel::Ch1, Channel::Ch2, Channel::Ch3),
        Step::Step2 => (Channel::Ch1, Channel::Ch3, Channel::Ch2),
        Step::Step3 => (Channel::Ch2, Channel::Ch3, Channel::Ch1),
        Step::Step4 => (Channel::Ch2, Channel::Ch1, Channel::Ch3),
        Step::Step5 => (Channel::Ch3, Channel::Ch1, Channel::Ch2),
        Step::Step6 => (Channel::Ch3, Channel::Ch2, Channel::Ch1),
    };
    StepChannels { high, low, open }
}

/// 3相モータードライバー
///
/// STM32のComplementaryPwmを使用して3相ブラシレスモーターを6ステップ駆動します。
pub struct MotorDriver {
    pwm: ComplementaryPwm<'static, peripherals::TIM1>,
    max_duty: u16,
    step: Step,
    pulse: u16,
}

impl MotorDriver {
    /// 新しいモータードライバーを作成
    ///
    /// # 引数
    /// * `pwm` - PWMペリフェラル（TIM1）
    pub fn new(pwm: ComplementaryPwm<'static, peripherals::TIM1>) -> Self {
        let max_duty = pwm.get_max_duty();
        Self {
            pwm,
            max_duty,
            step: Step::Step1,
            pulse: 0,
        }
    }

    /// PWMの最大Duty値を取得
    pub fn max_duty(&self) -> u16 {
        self.max_duty
    }

    /// 3相全てのDuty比を設定
    fn set_duty_uvw(&mut self, duty_u: u16, duty_v: u16, duty_w: u16) {
        self.pwm.set_duty(Channel::Ch1, duty_u);
        self.pwm.set_duty(Channel::Ch2, duty_v);
        self.pwm.set_duty(Channel::Ch3, duty_w);
    }

    /// 全チャネルを無効化
    fn disable_all_channels(&mut self) {
        self.pwm.disable(Channel::Ch1);
        self.pwm.disable(Channel::Ch2);
        self.pwm.disable(Channel::Ch3);
    }

    /// 全チャネルを有効化
    fn enable_all_channels(&mut self) {
        self.pwm.enable(Channel::Ch1);
        self.pwm.enable(Channel::Ch2);
        self.pwm.enable(Channel::Ch3);
    }
}

impl CommutationSink for MotorDriver {
    fn apply_step(&mut self, step: Step) {
        let channels = step_channels(step);
        self.step = step;

        self.pwm.disable(channels.open);
        self.pwm.set_duty(channels.open, 0);
        self.pwm.set_duty(channels.low, 0);
        self.pwm.set_duty(channels.high, self.pulse);
        self.pwm.enable(channels.low);
        self.pwm.enable(channels.high);
    }

    fn set_pulse(&mut self, pulse: u16) {
        self.pulse = pulse.min(self.max_duty);
        let channels = step_channels(self.step);
        self.pwm.set_duty(channels.high, self.pulse);
    }

    fn switch_off(&mut self) {
        self.pulse = 0;
        self.set_duty_uvw(0, 0, 0);
        self.disable_all_channels();
    }

    fn turn_on_low_sides(&mut self, step: Step, _low_side_count: u16) {
        // Duty 0 で相補側（ローサイド）が常時オン
        let channels = step_channels(step);
        self.pwm.disable(channels.high);
        self.pwm.set_duty(channels.low, 0);
        self.pwm.set_duty(channels.open, 0);
        self.pwm.enable(channels.low);
        self.pwm.enable(channels.open);
    }

    fn brake(&mut self, _low_side_count: u16) {
        self.pulse = 0;
        self.set_duty_uvw(0, 0, 0);
        self.enable_all_channels();
    }

    fn enable_outputs(&mut self) {
        self.apply_step(self.step);
    }
}

impl BemfSensing for MotorDriver {
    fn start(&mut self, _step: Step) {}

    fn stop(&mut self) {}

    fn clear(&mut self) {}

    fn set_threshold(&mut self, _threshold: u16) {}

    fn seed_speed(&mut self, _speed_timer: u32, _period: i32) {}
}

impl IpdPulseSequencer for MotorDriver {
    fn run_pulse_sequence(&mut self, _adc_trigger: u32) -> [i16; 6] {
        warn!("IPD pulse sequence requested but phase current sensing is not wired");
        [0; 6]
    }
}
