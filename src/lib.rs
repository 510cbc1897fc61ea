//! Six-step (trapezoidal) BLDC commutation core.
//!
//! Rotor position/speed estimation from Hall sensors, initial position detection
//! for sensorless starts, the open-loop rev-up sequencer and the on-the-fly restart
//! of an already spinning rotor. Hardware is reached only through the traits in
//! [`interface`]; the `firmware/` crate wires them to an STM32G431.
#![cfg_attr(not(test), no_std)]

// fmtは他のモジュールより先に宣言する（マクロのテキストスコープのため）
// ログマクロ（trace!〜error!）はfirmwareからも `g4_sixstep::info` 等で使う
mod fmt;

pub mod bus_voltage;
pub mod config;
pub mod interface;
pub mod motor_drive;
pub mod sixstep;
pub mod snapshot;

pub use config::{ConfigError, DriveConfig};
pub use motor_drive::{DriveState, FaultKind, MotorDrive};
pub use sixstep::{Direction, Step, SPEED_UNIT};
