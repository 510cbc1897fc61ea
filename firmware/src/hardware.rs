//! ハードウェア初期化モジュール
//!
//! ペリフェラルの初期化ロジックを集約します。

use embassy_stm32::{
    peripherals,
    timer::{
        complementary_pwm::{ComplementaryPwm, ComplementaryPwmPin},
        low_level::CountingMode,
        simple_pwm::PwmPin,
        Channel,
    },
    gpio::OutputType,
    Config, Peri,
};

use crate::config;
use g4_sixstep::info;
use crate::hall_tim;

/// RCCクロック設定を初期化
///
/// HSI → PLL（÷4 × 85 ÷ 2）で170MHz生成
pub fn create_clock_config() -> Config {
    let mut config = Config::default();
    {
        use embassy_stm32::rcc::mux::{Adcsel, ClockMux};
        use embassy_stm32::rcc::{Pll, PllMul, PllPreDiv, PllRDiv, PllSource, Sysclk};

        config.rcc.hsi = true;
        config.rcc.pll = Some(Pll {
            source: PllSource::HSI,
            prediv: PllPreDiv::DIV4,
            mul: PllMul::MUL85,
            divp: None,
            divq: None,
            divr: Some(PllRDiv::DIV2),
        });
        config.rcc.sys = Sysclk::PLL1_R; // システムクロックをPLLに設定

        let mut clock_mux = ClockMux::default();
        clock_mux.adc12sel = Adcsel::SYS;
        config.rcc.mux = clock_mux;
    }
    config
}

/// TIM1 3相相補PWMを初期化
///
/// センターアラインで起動し、全チャネル無効の状態で返します。
/// 出力はステップ適用時に相ごとに有効化されます。
#[allow(clippy::too_many_arguments)]
pub fn init_pwm(
    tim: Peri<'static, peripherals::TIM1>,
    u_high: Peri<'static, peripherals::PE9>,
    u_low: Peri<'static, peripherals::PE8>,
    v_high: Peri<'static, peripherals::PE11>,
    v_low: Peri<'static, peripherals::PE10>,
    w_high: Peri<'static, peripherals::PE13>,
    w_low: Peri<'static, peripherals::PE12>,
) -> ComplementaryPwm<'static, peripherals::TIM1> {
    let mut pwm = ComplementaryPwm::new(
        tim,
        Some(PwmPin::new(u_high, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(u_low, OutputType::PushPull)),
        Some(PwmPin::new(v_high, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(v_low, OutputType::PushPull)),
        Some(PwmPin::new(w_high, OutputType::PushPull)),
        Some(ComplementaryPwmPin::new(w_low, OutputType::PushPull)),
        None,
        None,
        config::pwm::DEFAULT_FREQUENCY,
        CountingMode::CenterAlignedUpInterrupts,
    );
    pwm.disable(Channel::Ch1);
    pwm.disable(Channel::Ch2);
    pwm.disable(Channel::Ch3);
    pwm.set_dead_time(config::pwm::DEFAULT_DEAD_TIME);

    info!("TIM1 PWM initialized: max_duty={}", pwm.get_max_duty());
    pwm
}

/// TIM4 Hallセンサーインターフェース初期化
///
/// PB6=H1、PB7=H2、PB8=H3（XORモード）
///
/// # Safety
/// PACを使用した直接レジスタ操作を含む
pub unsafe fn init_hall_sensor() {
    info!("Initializing TIM4 Hall Sensor Interface (XOR mode)...");
    hall_tim::init_hall_timer();
    info!("TIM4 Hall Sensor Interface initialized");
}
