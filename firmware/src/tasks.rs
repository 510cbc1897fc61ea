//! タスクモジュール
//!
//! 各タスクの実装を分離して管理します。

pub mod motor_control;
pub mod voltage_monitor;

// タスク関数を再エクスポート
pub use motor_control::motor_control_task;
pub use voltage_monitor::voltage_monitor_task;
