//! ボード固有の設定パラメータ
//!
//! 制御アルゴリズムの既定値は `g4_sixstep::config` 側にあります。

/// PWM設定
pub mod pwm {
    use embassy_stm32::time::Hertz;

    /// PWM周波数（50kHz、センターアラインでARR=1700）
    pub const DEFAULT_FREQUENCY: Hertz = Hertz(g4_sixstep::config::pwm::DEFAULT_FREQUENCY_HZ);

    /// デッドタイム（デフォルト値）
    pub const DEFAULT_DEAD_TIME: u16 = g4_sixstep::config::pwm::DEFAULT_DEAD_TIME;

    /// 最大デューティ比のマージン [%]（ブートストラップ充電時間の確保）
    pub const MAX_DUTY_PERCENT: u32 = 94;
}

/// タスク周期
pub mod control {
    /// モーター制御タスク周期 [μs]（速度ループ 1kHz）
    pub const MOTOR_CONTROL_PERIOD_US: u64 =
        1_000_000 / g4_sixstep::config::DEFAULT_SPEED_LOOP_FREQUENCY_HZ as u64;

    /// 電圧監視タスク周期 [ms]
    pub const VOLTAGE_MONITOR_PERIOD_MS: u64 = 100;

    /// ステータスログの間隔 [電圧監視周期]
    pub const STATUS_LOG_INTERVAL: u32 = 10;

    /// 起動時の目標速度 [0.1Hz]
    pub const DEFAULT_TARGET_SPEED: u16 = 300;

    /// 目標速度変更時のランプ時間 [ms]
    pub const TARGET_SPEED_RAMP_MS: u32 = 1_000;
}

/// Hallセンサーインターフェース（TIM4）
pub mod hall {
    /// TIM4割り込み優先度（上位4ビット、Embassyタスクより高優先度）
    pub const TIM4_IRQ_PRIORITY: u8 = 0x20;
}
