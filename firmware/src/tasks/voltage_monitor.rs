//! 電圧監視タスク
//!
//! DCバス電圧を周期的に読み取り、フィルタ後の値をモーター制御タスクへ渡します。

use embassy_stm32::{adc::Adc, peripherals};
use embassy_time::{Duration, Ticker};
use g4_sixstep::bus_voltage::{BusVoltage, BusVoltageConfig};
use g4_sixstep::interface::BusVoltageSensor;
use g4_sixstep::DriveState;

use crate::config::control::{STATUS_LOG_INTERVAL, VOLTAGE_MONITOR_PERIOD_MS};
use g4_sixstep::info;
use crate::state::{BusReading, BUS_READING, SPEED_SNAPSHOT};

/// 電圧監視タスク - DCバス電圧を読み取り、共有状態を更新
#[embassy_executor::task]
pub async fn voltage_monitor_task(
    mut adc: Adc<'static, peripherals::ADC2>,
    mut voltage_pin: embassy_stm32::adc::AnyAdcChannel<peripherals::ADC2>,
) {
    info!("Voltage monitor task started");

    // 分圧回路: 33.3kΩ + 3.3kΩ
    let mut bus = BusVoltage::new(BusVoltageConfig::default());

    // 監視周期（100ms）
    let mut ticker = Ticker::every(Duration::from_millis(VOLTAGE_MONITOR_PERIOD_MS));

    // ステータスログ用カウンタ（1秒ごとにログ）
    let mut log_counter = 0u32;

    loop {
        ticker.next().await;

        // ADCから電圧を読み取り
        let adc_raw = adc.blocking_read(&mut voltage_pin);
        let voltage = bus.update(adc_raw);

        // グローバル状態を更新（モーター制御タスク用）
        *BUS_READING.lock().await = BusReading {
            voltage_v: bus.average_voltage_v(),
            digital: bus.average_voltage_digital(),
        };

        log_counter += 1;
        if log_counter >= STATUS_LOG_INTERVAL {
            log_counter = 0;
            info!(
                "[Status] V_bus={}V (ADC_raw={}), speed={} [0.1Hz], reliable={}, state={}",
                voltage,
                adc_raw,
                SPEED_SNAPSHOT.avg_mech_speed(),
                SPEED_SNAPSHOT.is_reliable(),
                DriveState::from_tag(SPEED_SNAPSHOT.state_tag())
            );
        }
    }
}
