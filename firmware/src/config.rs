//! Configuration module
//!
//! このモジュールはボード固有のパラメータと、
//! ライブラリの `DriveConfig` をこのボードに合わせて組み立てる機能を提供します。

pub mod params;

// params.rsから主要な定数を再エクスポート
pub use params::*;

use g4_sixstep::config::{DriveConfig, FeedbackMode};

/// このボード用のドライブ設定
///
/// ボードはHallセンサーのみを搭載しているため、OTFとIPDは無効です。
///
/// # Arguments
/// * `pwm_max_duty` - TIM1のARR値（PWM周期）
pub fn drive_config(pwm_max_duty: u16) -> DriveConfig {
    let mut config = DriveConfig {
        feedback: FeedbackMode::Hall,
        otf_enabled: false,
        ipd_enabled: false,
        ..Default::default()
    };

    let max_duty = (pwm_max_duty as u32 * pwm::MAX_DUTY_PERCENT / 100) as u16;
    config.duty.max_duty = config.duty.max_duty.min(max_duty);
    config.otf.pwm_period = pwm_max_duty as u32;

    config
}
