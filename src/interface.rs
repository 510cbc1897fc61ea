//! ハードウェア抽象化トレイト
//!
//! コアが消費する（タイマーキャプチャ、GPIO、ADC）または駆動する
//! （PWMコンペアレジスタ、相イネーブル）ペリフェラルへの境界です。
//! ファームウェア側でSTM32の実装を、テスト側でモックを提供します。

use crate::sixstep::{HallLines, Step};

/// インバーター転流シンク
pub trait CommutationSink {
    /// 指定ステップのスイッチ構成を適用
    fn apply_step(&mut self, step: Step);

    /// パルス幅（PWMコンペア値）を設定
    fn set_pulse(&mut self, pulse: u16);

    /// 全出力を停止
    fn switch_off(&mut self);

    /// BEMF検出経路を作るため、指定ステップに対応するローサイドのみをオン
    fn turn_on_low_sides(&mut self, step: Step, low_side_count: u16);

    /// 3相ローサイドを全てオン（ブレーキ）
    fn brake(&mut self, low_side_count: u16);

    /// 3相PWM出力を有効化（ローサイドのみの検出構成から通常駆動へ）
    fn enable_outputs(&mut self);
}

/// Hallセンサー入力（3本のGPIO）
pub trait HallInputs {
    fn read(&mut self) -> HallLines;
}

/// Hallキャプチャタイマー
pub trait HallTimer {
    /// 最後のキャプチャ値（CCR1）
    fn capture(&mut self) -> u16;

    /// 現在のプリスケーラ値
    fn prescaler(&self) -> u16;

    /// プリスケーラ値を設定（次の更新イベントで反映される）
    fn set_prescaler(&mut self, prescaler: u16);

    /// カウンターをリセットして計測再開
    fn reset_counter(&mut self);

    /// 入力キャプチャフィルタとプリスケーラを設定してタイマー開始
    fn configure(&mut self, filter: u8, prescaler: u16);

    /// 位相シフト用のコンペア（CC2）を設定、`None`で無効化
    fn set_phase_shift_compare(&mut self, compare: Option<u16>);
}

/// BEMFゼロクロス検出
pub trait BemfSensing {
    /// 指定ステップの浮遊相でゼロクロス検出を開始
    fn start(&mut self, step: Step);

    fn stop(&mut self);

    /// 検出状態をクリア
    fn clear(&mut self);

    /// 検出しきい値を設定
    fn set_threshold(&mut self, threshold: u16);

    /// OTFで計測した周期をBEMFオブザーバーへ引き継ぐ
    ///
    /// # 引数
    /// * `speed_timer` - 速度タイマーの周期 [タイマーカウント]
    /// * `period` - 速度FIFOの初期値（回転方向の符号付き）
    fn seed_speed(&mut self, speed_timer: u32, period: i32);
}

/// IPD用ワンパルスシーケンサ
pub trait IpdPulseSequencer {
    /// 6方向の電圧パルスを印加し、各パルスの電流サンプルを返す
    ///
    /// # 引数
    /// * `adc_trigger` - パルス開始からADCトリガーまでのタイマーカウント
    fn run_pulse_sequence(&mut self, adc_trigger: u32) -> [i16; 6];
}

/// DCバス電圧センサー
pub trait BusVoltageSensor {
    /// 平均バス電圧 [V]
    fn average_voltage_v(&self) -> u16;

    /// 平均バス電圧（16ビットデジタル値、フルスケール65535）
    fn average_voltage_digital(&self) -> u16;
}

/// 始動シーケンスが必要とするパワーステージ全体
pub trait PowerStage: CommutationSink + BemfSensing + IpdPulseSequencer {}

impl<T: CommutationSink + BemfSensing + IpdPulseSequencer> PowerStage for T {}
