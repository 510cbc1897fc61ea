//! 割り込みとタスク間で共有する速度スナップショット
//!
//! 速度ループが書き込み、他のタスク（ログ出力など）がロックなしで読み取ります。
//! 各フィールドは独立して更新されるため、フィールド間の一貫性は保証しません。

use core::sync::atomic::{AtomicBool, AtomicI16, AtomicU8, Ordering};

/// 最新の速度フィードバック
pub struct SpeedSnapshot {
    /// 平均機械速度 [SPEED_UNIT]
    avg_mech_speed: AtomicI16,
    /// 速度フィードバックの信頼性
    reliable: AtomicBool,
    /// ドライブ状態タグ（[`crate::DriveState::tag`]）
    state_tag: AtomicU8,
}

impl SpeedSnapshot {
    pub const fn new() -> Self {
        Self {
            avg_mech_speed: AtomicI16::new(0),
            reliable: AtomicBool::new(false),
            state_tag: AtomicU8::new(0),
        }
    }

    /// スナップショットを更新
    ///
    /// # Arguments
    /// * `avg_mech_speed` - 平均機械速度 [SPEED_UNIT]
    /// * `reliable` - 速度フィードバックが信頼できるか
    /// * `state_tag` - ドライブ状態タグ
    pub fn publish(&self, avg_mech_speed: i16, reliable: bool, state_tag: u8) {
        self.avg_mech_speed.store(avg_mech_speed, Ordering::Relaxed);
        self.reliable.store(reliable, Ordering::Relaxed);
        self.state_tag.store(state_tag, Ordering::Relaxed);
    }

    pub fn avg_mech_speed(&self) -> i16 {
        self.avg_mech_speed.load(Ordering::Relaxed)
    }

    pub fn is_reliable(&self) -> bool {
        self.reliable.load(Ordering::Relaxed)
    }

    pub fn state_tag(&self) -> u8 {
        self.state_tag.load(Ordering::Relaxed)
    }
}

impl Default for SpeedSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SNAPSHOT: SpeedSnapshot = SpeedSnapshot::new();

    #[test]
    fn test_initial_values() {
        let snapshot = SpeedSnapshot::default();
        assert_eq!(snapshot.avg_mech_speed(), 0);
        assert!(!snapshot.is_reliable());
        assert_eq!(snapshot.state_tag(), 0);
    }

    #[test]
    fn test_publish_from_static() {
        SNAPSHOT.publish(-420, true, 4);
        assert_eq!(SNAPSHOT.avg_mech_speed(), -420);
        assert!(SNAPSHOT.is_reliable());
        assert_eq!(SNAPSHOT.state_tag(), 4);
    }

    #[test]
    fn test_publish_from_another_thread() {
        let snapshot = std::sync::Arc::new(SpeedSnapshot::new());
        let writer = std::sync::Arc::clone(&snapshot);
        std::thread::spawn(move || writer.publish(123, true, 3))
            .join()
            .unwrap();
        assert_eq!(snapshot.avg_mech_speed(), 123);
        assert_eq!(snapshot.state_tag(), 3);
    }
}
