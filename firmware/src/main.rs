#![no_std]
#![no_main]

mod config;
mod hall_tim;
mod hardware;
mod motor_driver;
mod state;
mod tasks;

#[cfg(not(feature = "defmt"))]
use panic_halt as _;
#[cfg(feature = "defmt")]
use {defmt_rtt as _, panic_probe as _};

use embassy_executor::Spawner;
use embassy_stm32::adc::{Adc, AdcChannel, SampleTime};
use embassy_time::{Duration, Timer};
use g4_sixstep::{error, info, MotorDrive};

use hall_tim::{HallPins, Tim4Hall};
use motor_driver::MotorDriver;
use state::{DriveContext, DRIVE};
use tasks::{motor_control_task, voltage_monitor_task};

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    // ハードウェア初期化
    let config = hardware::create_clock_config();
    let p = embassy_stm32::init(config);

    info!("═══════════════════════════════════════════════════════════════════");
    info!("        Six-step BLDC Controller • STM32G431VB @ 170MHz");
    info!("═══════════════════════════════════════════════════════════════════");

    // ADC初期化（PC1 = ADC2_IN7、バス電圧）
    let mut adc2 = Adc::new(p.ADC2);
    adc2.set_sample_time(SampleTime::CYCLES640_5);
    let voltage_pin = p.PC1.degrade_adc();

    // PWM初期化（TIM1、3相相補PWM）
    let pwm = hardware::init_pwm(p.TIM1, p.PE9, p.PE8, p.PE11, p.PE10, p.PE13, p.PE12);
    let stage = MotorDriver::new(pwm);

    // ドライブ構築（設定検証）
    let drive_config = config::drive_config(stage.max_duty());
    let drive = match MotorDrive::new(&drive_config) {
        Ok(drive) => drive,
        Err(e) => {
            error!("Invalid drive configuration: {}", e);
            loop {
                Timer::after(Duration::from_secs(1)).await;
            }
        }
    };
    info!(
        "Drive ready: pole pairs={}, Hall timeout={}ms, max duty={}",
        drive_config.hall.pole_pairs,
        drive.hall().hall_timeout_ms(),
        drive_config.duty.max_duty
    );

    // TIM4割り込みより先に共有状態へ格納
    DRIVE.lock(|cell| {
        cell.replace(Some(DriveContext {
            drive,
            stage,
            hall_timer: Tim4Hall,
            hall_pins: HallPins,
        }));
    });

    // TIM4 Hallセンサーインターフェース初期化
    unsafe {
        hardware::init_hall_sensor();
    }

    // 電圧監視タスク起動
    spawner
        .spawn(voltage_monitor_task(adc2, voltage_pin))
        .unwrap();
    info!("Voltage monitoring started on PC1 (ADC2_IN7)");

    // モーター制御タスクを起動
    spawner.spawn(motor_control_task()).unwrap();

    // メインループ（将来の拡張用）
    loop {
        Timer::after(Duration::from_millis(100)).await;
    }
}
