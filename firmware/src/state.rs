//! グローバル共有状態管理
//!
//! タスク間で共有される状態をMutexで保護して管理します。
//! ドライブ本体はTIM4割り込みからも操作されるため、
//! クリティカルセクションのブロッキングMutexに置きます。

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, ThreadModeRawMutex};
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::Mutex;
use g4_sixstep::interface::BusVoltageSensor;
use g4_sixstep::snapshot::SpeedSnapshot;
use g4_sixstep::MotorDrive;

use crate::config::control::DEFAULT_TARGET_SPEED;
use crate::hall_tim::{HallPins, Tim4Hall};
use crate::motor_driver::MotorDriver;

/// 割り込みとモーター制御タスクで共有するドライブ一式
pub struct DriveContext {
    pub drive: MotorDrive,
    pub stage: MotorDriver,
    pub hall_timer: Tim4Hall,
    pub hall_pins: HallPins,
}

/// ドライブ一式（main で初期化）
pub static DRIVE: BlockingMutex<CriticalSectionRawMutex, RefCell<Option<DriveContext>>> =
    BlockingMutex::new(RefCell::new(None));

/// 速度スナップショット（ロックなしで読み取り可能）
pub static SPEED_SNAPSHOT: SpeedSnapshot = SpeedSnapshot::new();

/// 目標速度 [0.1Hz]
pub static TARGET_SPEED: Mutex<ThreadModeRawMutex, u16> = Mutex::new(DEFAULT_TARGET_SPEED);

/// モーター有効/無効フラグ
/// デバッグ用: 起動時に有効化
pub static MOTOR_ENABLE: Mutex<ThreadModeRawMutex, bool> = Mutex::new(true);

/// フィルタ済みバス電圧（電圧監視タスクが更新）
pub static BUS_READING: Mutex<ThreadModeRawMutex, BusReading> = Mutex::new(BusReading::new());

/// バス電圧の読み取り値
#[derive(Copy, Clone)]
pub struct BusReading {
    /// 平均バス電圧 [V]
    pub voltage_v: u16,
    /// 平均バス電圧（16ビットデジタル値）
    pub digital: u16,
}

impl BusReading {
    pub const fn new() -> Self {
        Self {
            voltage_v: 0,
            digital: 0,
        }
    }
}

impl BusVoltageSensor for BusReading {
    fn average_voltage_v(&self) -> u16 {
        self.voltage_v
    }

    fn average_voltage_digital(&self) -> u16 {
        self.digital
    }
}
