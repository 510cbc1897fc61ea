//! モーター制御タスク
//!
//! 1kHzの速度ループで `MotorDrive::medium_frequency_task` を実行し、
//! 有効/無効の切り替えと状態遷移のログを扱います。
//! 転流（ステップ切替）はTIM4割り込みがHallエッジごとに行います。

use embassy_time::{Duration, Ticker};
use g4_sixstep::{error, info, Direction, DriveState};

use crate::config::control::{MOTOR_CONTROL_PERIOD_US, TARGET_SPEED_RAMP_MS};
use crate::state::{BUS_READING, DRIVE, MOTOR_ENABLE, SPEED_SNAPSHOT, TARGET_SPEED};

/// モーター制御タスク（1kHz速度ループ）
#[embassy_executor::task]
pub async fn motor_control_task() {
    info!(
        "Motor control task started (speed loop {}us)",
        MOTOR_CONTROL_PERIOD_US
    );

    let mut ticker = Ticker::every(Duration::from_micros(MOTOR_CONTROL_PERIOD_US));

    // 前回の状態（遷移ログ用）
    let mut last_state = DriveState::Idle;
    let mut last_target = 0u16;

    loop {
        ticker.next().await;

        // 共有状態をロックの外で取得
        let motor_enabled = *MOTOR_ENABLE.lock().await;
        let target_speed = *TARGET_SPEED.lock().await;
        let bus = *BUS_READING.lock().await;

        let state = DRIVE.lock(|cell| {
            let mut guard = cell.borrow_mut();
            let Some(ctx) = guard.as_mut() else {
                return DriveState::Idle;
            };

            if target_speed != last_target {
                ctx.drive.set_target_speed(target_speed, TARGET_SPEED_RAMP_MS);
            }

            match (motor_enabled, ctx.drive.state()) {
                (true, DriveState::Idle) if bus.voltage_v != 0 => {
                    // Hall計測をリセットしてから始動（ラッチされた異常もクリア）
                    ctx.drive.clear_hall(&mut ctx.hall_timer, &mut ctx.hall_pins);
                    // このボードはOTFを使わないため速度タイマー値は不要
                    ctx.drive.start(Direction::Positive, &mut ctx.stage, &bus, 0);
                }
                (false, DriveState::Fault(_)) => {
                    // 無効化で故障を確認
                    ctx.drive.acknowledge_fault();
                }
                (false, state) if state != DriveState::Idle => {
                    ctx.drive.stop(&mut ctx.stage);
                }
                _ => {}
            }

            let state = ctx.drive.medium_frequency_task(&mut ctx.stage, &bus);
            ctx.drive.publish(&SPEED_SNAPSHOT);
            state
        });

        last_target = target_speed;

        if state != last_state {
            match state {
                DriveState::Fault(kind) => {
                    error!("Motor fault: {} (disable the motor to acknowledge)", kind)
                }
                DriveState::Run => info!(
                    "Closed loop: speed={} [0.1Hz]",
                    SPEED_SNAPSHOT.avg_mech_speed()
                ),
                _ => info!("Drive state: {} -> {}", last_state, state),
            }
            last_state = state;
        }
    }
}
