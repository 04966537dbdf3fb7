/// Heater switches on below `target - LOWER_OFFSET_C`.
pub const LOWER_OFFSET_C: f64 = 0.5;
/// Heater switches off above `target + UPPER_OFFSET_C`.
pub const UPPER_OFFSET_C: f64 = 0.2;

/// Heater decision with a dead-band around the target.
///
/// Inside `[target - 0.5, target + 0.2]` the previous state is kept so the
/// heater does not chatter around the setpoint.
pub fn decide_heater(current_c: f64, target_c: f64, heater_was_on: bool) -> bool {
    if current_c < target_c - LOWER_OFFSET_C {
        true
    } else if current_c > target_c + UPPER_OFFSET_C {
        false
    } else {
        heater_was_on
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(19.0, 21.0, false, true)]
    #[case(21.3, 21.0, true, false)]
    #[case(20.6, 21.0, false, false)]
    #[case(20.6, 21.0, true, true)]
    #[case(20.5, 21.0, false, false)]
    #[case(21.2, 21.0, true, true)]
    fn switching_points(
        #[case] current: f64,
        #[case] target: f64,
        #[case] was_on: bool,
        #[case] expected: bool,
    ) {
        assert_eq!(decide_heater(current, target, was_on), expected);
    }

    proptest! {
        #[test]
        fn dead_band_keeps_state(
            target in 10.0f64..30.0,
            offset in -LOWER_OFFSET_C..=UPPER_OFFSET_C,
            was_on in any::<bool>(),
        ) {
            prop_assert_eq!(decide_heater(target + offset, target, was_on), was_on);
        }
    }
}
