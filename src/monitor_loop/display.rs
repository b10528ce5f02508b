//! Two-row status text for the character display

use crate::models::SensorState;

/// Row 0, padded so a shorter value overwrites a longer one
pub fn door_line(door_open: bool) -> &'static str {
    if door_open {
        "Door: OPEN   "
    } else {
        "Door: CLOSED "
    }
}

/// Row 1
pub fn motion_line(motion_detected: bool) -> &'static str {
    if motion_detected {
        "Motion: YES  "
    } else {
        "Motion: NO   "
    }
}

pub fn lines(state: &SensorState) -> [&'static str; 2] {
    [door_line(state.door_open), motion_line(state.motion_detected)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_have_equal_width() {
        assert_eq!(door_line(true).len(), door_line(false).len());
        assert_eq!(motion_line(true).len(), motion_line(false).len());
        assert_eq!(
            lines(&SensorState::new(true, false)),
            ["Door: OPEN   ", "Motion: NO   "]
        );
    }
}
