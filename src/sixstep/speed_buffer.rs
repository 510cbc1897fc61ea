// Circular buffer of signed electrical periods with an incrementally maintained sum

/// Hardware capacity of the period FIFO
pub const SPEED_FIFO_SIZE: usize = 18;

/// Ring buffer of the last `size` electrical periods [timer ticks]
///
/// The sign of each period encodes the rotation direction. The running
/// sum is updated on every insert (evicted value out, new value in).
#[derive(Debug, Clone, Copy)]
pub struct SpeedBuffer {
    periods: [i32; SPEED_FIFO_SIZE],
    size: u8,
    index: u8,
    sum: i32,
}

impl SpeedBuffer {
    /// Create a buffer using the first `size` slots (clamped to 1..=18)
    pub fn new(size: u8) -> Self {
        Self {
            periods: [0; SPEED_FIFO_SIZE],
            size: size.clamp(1, SPEED_FIFO_SIZE as u8),
            index: 0,
            sum: 0,
        }
    }

    /// Set every active slot to `value` and rewind the write index
    pub fn fill(&mut self, value: i32) {
        for slot in self.periods[..self.size as usize].iter_mut() {
            *slot = value;
        }
        self.index = 0;
        self.sum = value.wrapping_mul(self.size as i32);
    }

    /// Advance the write index and replace the oldest period
    pub fn push(&mut self, value: i32) {
        self.index += 1;
        if self.index == self.size {
            self.index = 0;
        }
        let slot = &mut self.periods[self.index as usize];
        self.sum = self.sum.wrapping_sub(*slot).wrapping_add(value);
        *slot = value;
    }

    /// Period stored at the write index
    #[inline]
    pub fn latest(&self) -> i32 {
        self.periods[self.index as usize]
    }

    #[inline]
    pub fn sum(&self) -> i32 {
        self.sum
    }

    /// Mean period (truncating)
    #[inline]
    pub fn average(&self) -> i32 {
        self.sum / self.size as i32
    }

    #[inline]
    pub fn size(&self) -> u8 {
        self.size
    }

    #[inline]
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Active slots
    pub fn periods(&self) -> &[i32] {
        &self.periods[..self.size as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn brute_force_sum(buf: &SpeedBuffer) -> i64 {
        buf.periods().iter().map(|&p| p as i64).sum()
    }

    #[test]
    fn test_fill_sets_sum() {
        let mut buf = SpeedBuffer::new(6);
        buf.fill(-1000);
        assert_eq!(buf.sum(), -6000);
        assert_eq!(buf.average(), -1000);
        assert_eq!(buf.index(), 0);
    }

    #[test]
    fn test_push_evicts_oldest() {
        let mut buf = SpeedBuffer::new(3);
        buf.fill(100);
        buf.push(10);
        buf.push(20);
        buf.push(30);
        assert_eq!(buf.periods(), &[30, 10, 20]);
        assert_eq!(buf.sum(), 60);
        assert_eq!(buf.latest(), 30);
    }

    #[test]
    fn test_size_is_clamped() {
        assert_eq!(SpeedBuffer::new(0).size(), 1);
        assert_eq!(SpeedBuffer::new(40).size(), SPEED_FIFO_SIZE as u8);
    }

    proptest! {
        #[test]
        fn prop_running_sum_matches_recomputation(
            size in 1u8..=18,
            seed in -1_000_000i32..1_000_000,
            values in proptest::collection::vec(-1_000_000i32..1_000_000, 0..100),
        ) {
            let mut buf = SpeedBuffer::new(size);
            buf.fill(seed);
            prop_assert_eq!(buf.sum() as i64, brute_force_sum(&buf));
            for v in values {
                buf.push(v);
                prop_assert_eq!(buf.sum() as i64, brute_force_sum(&buf));
                prop_assert!(buf.index() < buf.size());
            }
        }
    }
}
