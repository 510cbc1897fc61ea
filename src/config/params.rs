//! 6ステップ駆動の設定パラメータ（デフォルト値）

/// モーターの極対数（ポール数12 / 2 = 6）（デフォルト値）
pub const DEFAULT_POLE_PAIRS: u8 = 6;

/// 速度制御ループ周波数 [Hz]（デフォルト値）
pub const DEFAULT_SPEED_LOOP_FREQUENCY_HZ: u16 = 1_000;

/// 転流タイマーのクロック [Hz]（TIM4、170MHz）
pub const DEFAULT_TIMER_CLOCK_HZ: u32 = 170_000_000;

/// Hallセンサーパラメータ
pub mod hall {
    /// 最小信頼速度 [0.1Hz]（0 = タイムアウト150ms固定）
    pub const DEFAULT_MIN_RELIABLE_MECH_SPEED: u16 = 0;

    /// 最大信頼速度 [0.1Hz]（100Hz = 6000RPM）
    pub const DEFAULT_MAX_RELIABLE_MECH_SPEED: u16 = 1_000;

    /// 速度異常の連続許容回数
    pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u8 = 3;

    /// 周期平均バッファのサイズ（最大18）
    pub const DEFAULT_SPEED_BUFFER_SIZE: u8 = 18;

    /// 入力キャプチャフィルタ（ICF）
    pub const DEFAULT_IC_FILTER: u8 = 11;

    /// 位相シフト [電気角度]（0 = 無効）
    pub const DEFAULT_PHASE_SHIFT_DEG: u16 = 0;

    /// ステップオフセット（配線に応じて調整）
    pub const DEFAULT_STEP_SHIFT: u8 = 0;
}

/// レブアップ（オープンループ加速）パラメータ
pub mod revup {
    /// 位置合わせフェーズ: 時間 [ms], 目標速度 [0.1Hz], パルス
    pub const DEFAULT_ALIGN_PHASE: (u16, i16, u16) = (200, 0, 250);

    /// 加速フェーズ1
    pub const DEFAULT_RAMP_PHASE_1: (u16, i16, u16) = (1_000, 150, 400);

    /// 加速フェーズ2
    pub const DEFAULT_RAMP_PHASE_2: (u16, i16, u16) = (500, 300, 550);

    /// 閉ループ移行を許可する最小速度 [0.1Hz]
    pub const DEFAULT_MIN_STARTUP_VALID_SPEED: u16 = 250;

    /// パルス補正の基準となる公称バス電圧 [V]
    pub const DEFAULT_NOMINAL_BUS_VOLTAGE_V: u16 = 24;
}

/// IPD（初期位置検出）パラメータ
pub mod ipd {
    /// ステップ確定に必要なBEMF無し検出回数
    pub const DEFAULT_VALID_BEMF_SAMPLES: u16 = 4;

    /// IPD完了に必要な有効ステップ数
    pub const DEFAULT_VALID_STEPS: u16 = 3;

    /// パルス幅 [タイマーカウント]
    pub const DEFAULT_PULSE_WIDTH_TICKS: u32 = 1_200;

    /// ADCサンプリング時間 [タイマーカウント]
    pub const DEFAULT_ADC_SAMPLING_TICKS: u32 = 40;
}

/// オンザフライ再始動パラメータ
pub mod otf {
    /// 速度確定に必要な連続BEMFゼロクロス数
    pub const DEFAULT_MAX_CONSECUTIVE_TRANSITIONS: u8 = 6;

    /// 中断までのBEMF異常回数
    pub const DEFAULT_MAX_BEMF_ERRORS: u16 = 5;

    /// BEMFしきい値 [%]
    pub const DEFAULT_THRESHOLD_PERC: u16 = 50;

    /// バス電圧からしきい値への変換係数
    pub const DEFAULT_BUS_TO_THRESHOLD: u16 = 200;

    /// しきい値補正
    pub const DEFAULT_THRESHOLD_CORRECTION: u16 = 0;

    /// 検出中のローサイドのコンペア値
    pub const DEFAULT_LS_DETECT_COUNT: u16 = 1_650;

    /// ブレーキ時のローサイドのコンペア値
    pub const DEFAULT_LS_BRAKE_COUNT: u16 = 1_700;

    /// 速度タイマーのプリスケーラ
    pub const DEFAULT_SPEED_TIMER_PRESCALER: u32 = 1;

    /// デューティ変換係数のローパスフィルタ窓（最大8）
    pub const DEFAULT_LOW_PASS_WINDOW: u8 = 4;
}

/// 速度/デューティ制御パラメータ
pub mod duty {
    /// 比例ゲイン [カウント / 0.1Hz]
    pub const DEFAULT_SPEED_KP: f32 = 0.8;

    /// 積分ゲイン
    pub const DEFAULT_SPEED_KI: f32 = 4.0;

    /// 最小デューティ [カウント]
    pub const DEFAULT_MIN_DUTY: u16 = 0;

    /// 最大デューティ [カウント]
    pub const DEFAULT_MAX_DUTY: u16 = 1_600;
}

/// PWM設定
pub mod pwm {
    /// PWM周波数 [Hz]（50kHz）
    pub const DEFAULT_FREQUENCY_HZ: u32 = 50_000;

    /// PWM周期 [タイマーカウント]（センターアラインド、170MHz / (2 × 50kHz)）
    pub const DEFAULT_PERIOD_TICKS: u32 = 1_700;

    /// デッドタイム
    pub const DEFAULT_DEAD_TIME: u16 = 1;
}

/// バス電圧測定
pub mod bus {
    /// 分圧抵抗の上側 [Ω]
    pub const DEFAULT_R_UPPER: f32 = 33_300.0;

    /// 分圧抵抗の下側 [Ω]
    pub const DEFAULT_R_LOWER: f32 = 3_300.0;

    /// ADC分解能（12ビット）
    pub const DEFAULT_ADC_MAX: u16 = 4096;

    /// ADC基準電圧 [V]
    pub const DEFAULT_VREF: f32 = 3.3;

    /// ローパスフィルタ係数
    pub const DEFAULT_FILTER_ALPHA: f32 = 0.1;
}
