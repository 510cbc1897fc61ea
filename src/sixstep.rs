// Six-step commutation module
// Speed/position feedback, start-up sequencing and on-the-fly restart for trapezoidal drive

pub mod hall_sensor;
pub mod ipd;
pub mod on_the_fly;
pub mod pi_controller;
pub mod revup;
pub mod speed_buffer;
pub mod speed_duty_ctrl;
pub mod speed_feedback;

// Re-export main types for easier access
pub use hall_sensor::{HallFeedback, HallLines, SensorPlacement};
pub use ipd::InitialPositionDetection;
pub use on_the_fly::{BemfCrossing, OnTheFlyController};
pub use pi_controller::PiController;
pub use revup::{RevUpController, RevUpPhase};
pub use speed_buffer::SpeedBuffer;
pub use speed_duty_ctrl::{DutyMode, SpeedDutyCtrl};
pub use speed_feedback::SpeedFeedback;

/// Speed unit: tenths of a hertz (mechanical), i.e. 10 units per rev/s.
pub const SPEED_UNIT: u32 = 10;

/// Rotation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    /// +1 / -1
    #[inline]
    pub fn sign(self) -> i8 {
        match self {
            Direction::Positive => 1,
            Direction::Negative => -1,
        }
    }

    /// Zero and positive values map to `Positive`.
    pub fn from_sign(value: i16) -> Self {
        if value < 0 {
            Direction::Negative
        } else {
            Direction::Positive
        }
    }
}

/// Commutation step of the six-step sequence.
///
/// `Step1` has index 0, `Step6` has index 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Step {
    Step1 = 0,
    Step2 = 1,
    Step3 = 2,
    Step4 = 3,
    Step5 = 4,
    Step6 = 5,
}

impl Step {
    const ALL: [Step; 6] = [
        Step::Step1,
        Step::Step2,
        Step::Step3,
        Step::Step4,
        Step::Step5,
        Step::Step6,
    ];

    /// Step from an index, wrapped modulo 6
    #[inline]
    pub fn from_index(index: u8) -> Self {
        Self::ALL[(index % 6) as usize]
    }

    #[inline]
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Next step in the given rotation direction
    pub fn next(self, direction: Direction) -> Self {
        match direction {
            Direction::Positive => Self::from_index(self.index() + 1),
            Direction::Negative => Self::from_index(self.index() + 5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_index_wraps() {
        assert_eq!(Step::from_index(0), Step::Step1);
        assert_eq!(Step::from_index(5), Step::Step6);
        assert_eq!(Step::from_index(6), Step::Step1);
        assert_eq!(Step::from_index(11), Step::Step6);
    }

    #[test]
    fn test_step_next() {
        assert_eq!(Step::Step6.next(Direction::Positive), Step::Step1);
        assert_eq!(Step::Step1.next(Direction::Negative), Step::Step6);
        assert_eq!(Step::Step3.next(Direction::Negative), Step::Step2);
    }

    #[test]
    fn test_direction_sign() {
        assert_eq!(Direction::Positive.sign(), 1);
        assert_eq!(Direction::Negative.sign(), -1);
        assert_eq!(Direction::from_sign(-3), Direction::Negative);
        assert_eq!(Direction::from_sign(0), Direction::Positive);
    }
}
