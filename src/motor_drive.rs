//! モーター駆動アグリゲート
//!
//! Hallフィードバック、IPD、レブアップ、OTF、デューティ制御を1つずつ所有し、
//! 起動シーケンス（OTF → IPD → レブアップ → 閉ループ運転）を進めます。
//! ハードウェアへは [`crate::interface`] のトレイト経由でのみアクセスします。

use crate::config::{ConfigError, DriveConfig, FeedbackMode};
use crate::fmt::*;
use crate::interface::{
    BemfSensing, BusVoltageSensor, CommutationSink, HallInputs, HallTimer, PowerStage,
};
use crate::sixstep::{
    BemfCrossing, Direction, HallFeedback, InitialPositionDetection, OnTheFlyController,
    RevUpController, SpeedDutyCtrl, SpeedFeedback, Step,
};
use crate::snapshot::SpeedSnapshot;

/// 閉ループ運転に入ったときの目標速度ランプ時間 [ms]
const RUN_ENTRY_RAMP_MS: u32 = 500;

/// 故障の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultKind {
    /// 運転中に速度フィードバックが信頼できなくなった
    SpeedFeedback,
    /// レブアップが全フェーズを終えても閉ループに移行できなかった
    StartupFailed,
    /// OTFがBEMFエラー上限に達した
    OnTheFlyAborted,
}

/// ドライブ状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriveState {
    Idle,
    /// 回転中ロータのBEMF検出
    OnTheFly,
    /// 初期位置検出
    Ipd,
    /// オープンループ加速
    RevUp,
    /// 閉ループ運転
    Run,
    /// 故障停止（[`MotorDrive::acknowledge_fault`] まで保持）
    Fault(FaultKind),
}

impl DriveState {
    /// スナップショット用の状態タグ
    pub fn tag(self) -> u8 {
        match self {
            DriveState::Idle => 0,
            DriveState::OnTheFly => 1,
            DriveState::Ipd => 2,
            DriveState::RevUp => 3,
            DriveState::Run => 4,
            DriveState::Fault(FaultKind::SpeedFeedback) => 5,
            DriveState::Fault(FaultKind::StartupFailed) => 6,
            DriveState::Fault(FaultKind::OnTheFlyAborted) => 7,
        }
    }

    /// 状態タグから復元
    pub fn from_tag(tag: u8) -> Option<Self> {
        let state = match tag {
            0 => DriveState::Idle,
            1 => DriveState::OnTheFly,
            2 => DriveState::Ipd,
            3 => DriveState::RevUp,
            4 => DriveState::Run,
            5 => DriveState::Fault(FaultKind::SpeedFeedback),
            6 => DriveState::Fault(FaultKind::StartupFailed),
            7 => DriveState::Fault(FaultKind::OnTheFlyAborted),
            _ => return None,
        };
        Some(state)
    }

    pub fn is_fault(self) -> bool {
        matches!(self, DriveState::Fault(_))
    }
}

/// 6ステップ駆動の全コンポーネントを束ねるドライブ
pub struct MotorDrive {
    feedback: FeedbackMode,
    ipd_enabled: bool,
    state: DriveState,
    direction: Direction,
    /// 現在の転流ステップ
    step: Step,
    /// 閉ループ運転の目標速度 [SPEED_UNIT]
    target_speed: u16,
    hall: HallFeedback,
    ipd: InitialPositionDetection,
    revup: RevUpController,
    /// OTFが無効な構成では `None`
    otf: Option<OnTheFlyController>,
    sdc: SpeedDutyCtrl,
    /// センサーレス運転時に外部BEMFオブザーバーが供給する速度
    observer: SpeedFeedback,
}

impl MotorDrive {
    /// 設定を検証して全コンポーネントを構築
    pub fn new(config: &DriveConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let hall = HallFeedback::new(&config.hall)?;
        let revup = RevUpController::new(&config.revup)?;
        let otf = if config.otf_enabled {
            Some(OnTheFlyController::new(&config.otf)?)
        } else {
            None
        };

        // 既定の目標速度はレブアップ最終フェーズの速度
        let last_phase = config.revup.phase_count.saturating_sub(1) as usize;
        let target_speed = config.revup.phases[last_phase]
            .target_mech_speed
            .unsigned_abs();

        info!(
            "MotorDrive: feedback={}, otf={}, ipd={}",
            config.feedback, config.otf_enabled, config.ipd_enabled
        );

        Ok(Self {
            feedback: config.feedback,
            ipd_enabled: config.ipd_enabled,
            state: DriveState::Idle,
            direction: Direction::Positive,
            step: Step::Step1,
            target_speed,
            hall,
            ipd: InitialPositionDetection::new(&config.ipd),
            revup,
            otf,
            sdc: SpeedDutyCtrl::new(&config.duty),
            observer: SpeedFeedback::new(
                config.hall.min_reliable_mech_speed,
                config.hall.max_reliable_mech_speed,
                config.hall.max_consecutive_errors,
                config.hall.pole_pairs,
                0,
            ),
        })
    }

    /// Hallキャプチャタイマーを初期化し、計測状態をリセット
    ///
    /// Hallモードでは [`MotorDrive::start`] の前に呼び出します。
    /// ラッチされたセンサー異常もここでクリアされます。
    pub fn clear_hall<T: HallTimer, H: HallInputs>(&mut self, timer: &mut T, inputs: &mut H) {
        self.hall.set_direction(self.direction);
        self.hall.init(timer);
        self.hall.clear(timer, inputs);
    }

    /// 始動シーケンスを開始
    ///
    /// OTFが有効ならOTF、次にIPD、どちらも無効ならレブアップから始めます。
    ///
    /// # Arguments
    /// * `direction` - 回転方向
    /// * `hw` - パワーステージ
    /// * `bus` - バス電圧（OTFしきい値とパルス補正に使用）
    /// * `speed_counter` - 速度タイマーの現在カウント（OTF用）
    ///
    /// # Returns
    /// `Idle` 以外の状態から呼ばれた場合は `false`
    pub fn start<P, B>(
        &mut self,
        direction: Direction,
        hw: &mut P,
        bus: &B,
        speed_counter: u32,
    ) -> bool
    where
        P: PowerStage,
        B: BusVoltageSensor,
    {
        if self.state != DriveState::Idle {
            warn!("Start ignored in state {}", self.state);
            return false;
        }

        self.direction = direction;
        self.hall.set_direction(direction);
        self.observer.reset_errors();
        self.observer.set_avg_mech_speed(0);
        self.ipd.clear();
        self.sdc.set_duty_mode();
        self.sdc.preset_duty(0);
        self.revup.clear(direction, &mut self.sdc);
        self.revup.update_pulse(bus);

        if let Some(otf) = self.otf.as_mut() {
            otf.init(direction, bus, hw, speed_counter);
            self.set_state(DriveState::OnTheFly);
        } else if self.ipd_enabled {
            self.set_state(DriveState::Ipd);
        } else {
            self.enter_revup(hw);
        }
        true
    }

    /// 速度ループ周期のタスク
    ///
    /// # Returns
    /// タスク実行後の状態
    pub fn medium_frequency_task<P, B>(&mut self, hw: &mut P, bus: &B) -> DriveState
    where
        P: PowerStage,
        B: BusVoltageSensor,
    {
        match self.state {
            DriveState::Idle | DriveState::Fault(_) => {}
            DriveState::OnTheFly => {
                // 成功/中断はゼロクロスイベントで判定済み
            }
            DriveState::Ipd => {
                if !self.ipd.task(&mut self.step, hw) {
                    self.revup.update_pulse(bus);
                    self.enter_revup(hw);
                }
            }
            DriveState::RevUp => self.revup_task(hw, bus),
            DriveState::Run => self.run_task(hw),
        }
        self.state
    }

    fn revup_task<P: PowerStage, B: BusVoltageSensor>(&mut self, hw: &mut P, bus: &B) {
        if self.revup.is_align_stage_now() {
            self.revup.update_pulse(bus);
        }
        let running = self.revup.exec(&mut self.sdc);
        let duty = self.sdc.calc_duty(self.revup.avg_mech_speed());
        hw.set_pulse(duty);

        let feedback_ok = match self.feedback {
            FeedbackMode::Hall => {
                let reliable = self.hall.calc_average_speed();
                reliable && self.hall.is_sensor_reliable()
            }
            FeedbackMode::Sensorless => {
                self.observer.check() && self.observer.avg_mech_speed() != 0
            }
        };

        if self.revup.observer_speed_reached() && feedback_ok {
            self.revup.stop();
            let measured = self.measured_speed();
            info!("Rev-up done: speed={}, duty={}", measured, duty);
            self.enter_run(measured, duty);
        } else if !running {
            error!("Rev-up finished without reaching a valid speed");
            self.fault(hw, FaultKind::StartupFailed);
        }
    }

    fn run_task<P: PowerStage>(&mut self, hw: &mut P) {
        let reliable = match self.feedback {
            FeedbackMode::Hall => {
                let reliable = self.hall.calc_average_speed();
                reliable && self.hall.is_sensor_reliable()
            }
            FeedbackMode::Sensorless => self.observer.check(),
        };

        if !reliable {
            error!("Speed feedback lost in run");
            self.fault(hw, FaultKind::SpeedFeedback);
            return;
        }

        let speed = self.measured_speed();
        let duty = self.sdc.calc_duty(speed);
        hw.set_pulse(duty);

        if let Some(otf) = self.otf.as_mut() {
            otf.update_duty_conv(duty, speed);
        }
    }

    /// Hallキャプチャ割り込み
    ///
    /// レブアップ中と運転中（Hallモード）はHallから得たステップを適用します。
    pub fn hall_capture<T, H, S>(&mut self, timer: &mut T, inputs: &mut H, sink: &mut S)
    where
        T: HallTimer,
        H: HallInputs,
        S: CommutationSink,
    {
        self.hall.on_capture(timer, inputs);

        if self.feedback == FeedbackMode::Hall
            && matches!(self.state, DriveState::RevUp | DriveState::Run)
        {
            let step = self.hall.step();
            if step != self.step {
                self.step = step;
                sink.apply_step(step);
            }
        }
    }

    /// Hallタイマーオーバーフロー割り込み
    pub fn hall_overflow<T: HallTimer>(&mut self, timer: &mut T) {
        self.hall.on_overflow(timer);
    }

    /// BEMFゼロクロスイベント（OTF中のみ有効）
    pub fn bemf_crossing<P: CommutationSink + BemfSensing>(
        &mut self,
        crossing: BemfCrossing,
        hw: &mut P,
    ) {
        if self.state != DriveState::OnTheFly {
            return;
        }
        let Some(otf) = self.otf.as_mut() else {
            return;
        };

        if otf.task(crossing, hw) {
            otf.switch_over(hw);
            let duty = otf.calc_speed_reference();
            let speed = otf.avg_mech_speed();
            let otf_step = otf.step();
            let speed_timer = otf.step_time_last() / 2;
            let period = otf.last_period();

            self.step = match self.feedback {
                FeedbackMode::Hall => self.hall.step(),
                FeedbackMode::Sensorless => {
                    self.seed_observer(hw, speed, speed_timer, period);
                    otf_step
                }
            };
            hw.apply_step(self.step);
            hw.set_pulse(duty);
            info!("OTF handoff: speed={}, duty={}", speed, duty);
            self.enter_run(speed, duty);
        } else if otf.is_aborted() {
            otf.clear(hw);
            self.set_state(DriveState::Fault(FaultKind::OnTheFlyAborted));
        }
    }

    /// BEMFオブザーバーの計測結果（IPD中のみ有効）
    ///
    /// # Arguments
    /// * `zero_speed` - 浮遊相にBEMFが検出されなかった
    pub fn bemf_sample(&mut self, zero_speed: bool) {
        if self.state != DriveState::Ipd {
            return;
        }
        if zero_speed {
            self.ipd.record_zero_speed_sample();
        }
        self.ipd.set_bemf_measured();
    }

    /// 外部BEMFオブザーバーの速度を取り込む（センサーレスモード）
    ///
    /// # Returns
    /// 速度フィードバックが信頼できるか
    pub fn set_observer_speed(&mut self, avg_mech_speed: i16) -> bool {
        let reliable = self.observer.is_speed_reliable(avg_mech_speed);
        self.observer.set_avg_mech_speed(avg_mech_speed);
        reliable
    }

    /// 次のステップへ転流（センサーレス時の外部スケジューラ用）
    pub fn commutate<S: CommutationSink>(&mut self, sink: &mut S) -> Step {
        self.step = self.step.next(self.direction);
        sink.apply_step(self.step);
        self.step
    }

    /// 閉ループ運転の目標速度を設定
    ///
    /// # Arguments
    /// * `speed` - 目標速度の大きさ [SPEED_UNIT]
    /// * `duration_ms` - 運転中の場合のランプ時間
    pub fn set_target_speed(&mut self, speed: u16, duration_ms: u32) {
        self.target_speed = speed.min(i16::MAX as u16);
        if self.state == DriveState::Run {
            self.sdc.exec_ramp(self.target_speed as i16, duration_ms);
        }
    }

    /// 出力を停止して `Idle` へ
    ///
    /// 故障状態は保持されます。
    pub fn stop<P: PowerStage>(&mut self, hw: &mut P) {
        if self.state == DriveState::OnTheFly {
            if let Some(otf) = self.otf.as_mut() {
                otf.clear(hw);
            }
        }
        self.shutdown(hw);
        if !self.state.is_fault() {
            self.set_state(DriveState::Idle);
        }
    }

    /// 故障を確認して `Idle` へ戻す
    ///
    /// # Returns
    /// 故障状態でなかった場合は `false`
    pub fn acknowledge_fault(&mut self) -> bool {
        if !self.state.is_fault() {
            return false;
        }
        self.observer.reset_errors();
        self.set_state(DriveState::Idle);
        true
    }

    /// 現在の速度とドライブ状態をスナップショットへ書き出す
    pub fn publish(&self, snapshot: &SpeedSnapshot) {
        snapshot.publish(
            self.avg_mech_speed(),
            self.is_speed_reliable(),
            self.state.tag(),
        );
    }

    fn enter_revup<S: CommutationSink>(&mut self, sink: &mut S) {
        if self.feedback == FeedbackMode::Hall {
            self.step = self.hall.step();
        }
        sink.apply_step(self.step);
        sink.set_pulse(0);
        self.set_state(DriveState::RevUp);
    }

    /// OTFの計測結果で速度オブザーバーを初期化
    fn seed_observer<B: BemfSensing>(
        &mut self,
        bemf: &mut B,
        speed: i16,
        speed_timer: u32,
        period: i32,
    ) {
        self.observer.reset_errors();
        self.observer.set_avg_mech_speed(speed);
        bemf.seed_speed(speed_timer, period);
    }

    fn enter_run(&mut self, measured_speed: i16, duty: u16) {
        self.sdc.preset_duty(duty);
        self.sdc.set_speed_mode();
        let measured = measured_speed.unsigned_abs().min(i16::MAX as u16) as i16;
        self.sdc.set_speed_reference(measured);
        self.sdc.exec_ramp(self.target_speed as i16, RUN_ENTRY_RAMP_MS);
        self.set_state(DriveState::Run);
    }

    fn fault<S: CommutationSink>(&mut self, sink: &mut S, kind: FaultKind) {
        self.shutdown(sink);
        self.set_state(DriveState::Fault(kind));
    }

    fn shutdown<S: CommutationSink>(&mut self, sink: &mut S) {
        sink.switch_off();
        self.revup.stop();
        self.sdc.set_duty_mode();
        self.sdc.preset_duty(0);
    }

    fn set_state(&mut self, state: DriveState) {
        if state != self.state {
            match state {
                DriveState::Fault(kind) => warn!("Drive fault: {}", kind),
                _ => debug!("Drive state: {} -> {}", self.state, state),
            }
            self.state = state;
        }
    }

    /// 現在の状態で有効な速度フィードバック [SPEED_UNIT]
    fn measured_speed(&self) -> i16 {
        match self.feedback {
            FeedbackMode::Hall => self.hall.avg_mech_speed(),
            FeedbackMode::Sensorless => self.observer.avg_mech_speed(),
        }
    }

    pub fn state(&self) -> DriveState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn step(&self) -> Step {
        self.step
    }

    /// 平均機械速度 [SPEED_UNIT]
    pub fn avg_mech_speed(&self) -> i16 {
        match self.state {
            DriveState::OnTheFly => self.otf.as_ref().map_or(0, |otf| otf.avg_mech_speed()),
            DriveState::RevUp if self.feedback == FeedbackMode::Sensorless => {
                self.revup.avg_mech_speed()
            }
            DriveState::RevUp | DriveState::Run => self.measured_speed(),
            _ => 0,
        }
    }

    pub fn is_speed_reliable(&self) -> bool {
        match self.feedback {
            FeedbackMode::Hall => {
                self.hall.is_sensor_reliable() && self.hall.speed_feedback().check()
            }
            FeedbackMode::Sensorless => self.observer.check(),
        }
    }

    pub fn duty(&self) -> u16 {
        self.sdc.duty()
    }

    pub fn target_speed(&self) -> u16 {
        self.target_speed
    }

    pub fn hall(&self) -> &HallFeedback {
        &self.hall
    }

    pub fn revup(&self) -> &RevUpController {
        &self.revup
    }

    pub fn revup_mut(&mut self) -> &mut RevUpController {
        &mut self.revup
    }

    pub fn ipd(&self) -> &InitialPositionDetection {
        &self.ipd
    }

    pub fn otf(&self) -> Option<&OnTheFlyController> {
        self.otf.as_ref()
    }

    pub fn duty_ctrl(&self) -> &SpeedDutyCtrl {
        &self.sdc
    }
}
