//! DCバス電圧の読み取り
//!
//! 分圧回路経由のADC生値を電圧へ変換し、ローパスフィルタで平滑化します。
//! 過電圧/低電圧保護は行いません（読み取り専用）。

use crate::config::{bus, revup};
use crate::fmt::*;
use crate::interface::BusVoltageSensor;

/// バス電圧読み取りパラメータ
#[derive(Debug, Clone, Copy)]
pub struct BusVoltageConfig {
    /// 分圧抵抗の上側 [Ω]
    pub r_upper: f32,
    /// 分圧抵抗の下側 [Ω]
    pub r_lower: f32,
    /// ADC分解能（12ビット = 4096）
    pub adc_max: u16,
    /// ADC基準電圧 [V]
    pub vref: f32,
    /// ローパスフィルタ係数（0.0-1.0、大きいほど応答速度が速い）
    pub filter_alpha: f32,
    /// 初回サンプル前の電圧 [V]
    pub initial_voltage: f32,
}

impl Default for BusVoltageConfig {
    fn default() -> Self {
        Self {
            // V_bus = V_adc * (33.3k + 3.3k) / 3.3k、最大入力 ≈ 36.6V
            r_upper: bus::DEFAULT_R_UPPER,
            r_lower: bus::DEFAULT_R_LOWER,
            adc_max: bus::DEFAULT_ADC_MAX,
            vref: bus::DEFAULT_VREF,
            filter_alpha: bus::DEFAULT_FILTER_ALPHA,
            initial_voltage: revup::DEFAULT_NOMINAL_BUS_VOLTAGE_V as f32,
        }
    }
}

impl BusVoltageConfig {
    /// 分圧比 (R_upper + R_lower) / R_lower
    fn divider_ratio(&self) -> f32 {
        (self.r_upper + self.r_lower) / self.r_lower
    }

    /// ADCフルスケールに相当するバス電圧 [V]
    pub fn full_scale_voltage(&self) -> f32 {
        self.vref * self.divider_ratio()
    }
}

/// フィルタ済みDCバス電圧
pub struct BusVoltage {
    config: BusVoltageConfig,
    /// 現在の電圧 [V]（フィルタ済み）
    voltage: f32,
}

impl BusVoltage {
    /// 新しいバス電圧フィルタを作成
    ///
    /// 最初のサンプルまでは `initial_voltage` を返します。
    pub fn new(config: BusVoltageConfig) -> Self {
        Self {
            voltage: config.initial_voltage,
            config,
        }
    }

    /// ADC生値から実電圧を計算
    fn adc_to_voltage(&self, adc_raw: u16) -> f32 {
        let v_adc = (adc_raw as f32 / self.config.adc_max as f32) * self.config.vref;
        v_adc * self.config.divider_ratio()
    }

    /// 電圧を更新
    ///
    /// # Arguments
    /// * `adc_raw` - ADC生値（0-4095）
    ///
    /// # Returns
    /// フィルタ後の電圧 [V]
    pub fn update(&mut self, adc_raw: u16) -> f32 {
        let voltage_raw = self.adc_to_voltage(adc_raw);

        // filtered = alpha * raw + (1 - alpha) * filtered_prev
        self.voltage = self.config.filter_alpha * voltage_raw
            + (1.0 - self.config.filter_alpha) * self.voltage;

        trace!("Bus voltage: raw={}, filtered={}V", adc_raw, self.voltage);
        self.voltage
    }

    /// 現在の電圧を取得 [V]
    pub fn get_voltage(&self) -> f32 {
        self.voltage
    }

    /// 設定を取得
    pub fn config(&self) -> &BusVoltageConfig {
        &self.config
    }
}

impl BusVoltageSensor for BusVoltage {
    fn average_voltage_v(&self) -> u16 {
        if self.voltage <= 0.0 {
            return 0;
        }
        // 四捨五入（no_stdではf32::roundが使えない）
        (self.voltage + 0.5).min(u16::MAX as f32) as u16
    }

    fn average_voltage_digital(&self) -> u16 {
        let full_scale = self.config.full_scale_voltage();
        if full_scale <= 0.0 || self.voltage <= 0.0 {
            return 0;
        }
        let digital = self.voltage / full_scale * u16::MAX as f32;
        digital.min(u16::MAX as f32) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unfiltered() -> BusVoltageConfig {
        BusVoltageConfig {
            filter_alpha: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_starts_at_initial_voltage() {
        let bus = BusVoltage::new(BusVoltageConfig::default());
        assert_eq!(bus.get_voltage(), 24.0);
        assert_eq!(bus.average_voltage_v(), 24);
    }

    #[test]
    fn test_divider_conversion() {
        let mut bus = BusVoltage::new(unfiltered());
        // 半分のADC値はフルスケールの半分
        let v = bus.update(2048);
        let expected = bus.config().full_scale_voltage() / 2.0;
        assert!((v - expected).abs() < 1e-3);
        assert_eq!(bus.average_voltage_v(), 18);
        let digital = bus.average_voltage_digital();
        assert!((32_766..=32_768).contains(&digital));
    }

    #[test]
    fn test_low_pass_moves_towards_sample() {
        let mut bus = BusVoltage::new(BusVoltageConfig::default());
        let first = bus.update(0);
        assert!((first - 21.6).abs() < 1e-3);
        let second = bus.update(0);
        assert!(second < first);
        assert!(second > 0.0);
    }

    #[test]
    fn test_zero_voltage_readings() {
        let mut bus = BusVoltage::new(BusVoltageConfig {
            initial_voltage: 0.0,
            ..unfiltered()
        });
        assert_eq!(bus.average_voltage_v(), 0);
        assert_eq!(bus.average_voltage_digital(), 0);
        bus.update(0);
        assert_eq!(bus.average_voltage_digital(), 0);
    }

    #[test]
    fn test_full_scale_saturates() {
        let mut bus = BusVoltage::new(unfiltered());
        bus.update(4096);
        assert_eq!(bus.average_voltage_digital(), u16::MAX);
    }
}
