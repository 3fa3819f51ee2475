use crate::state::session::ESTIMATION_SCALE;

/// Aggregate numeric votes into a value of the estimation scale.
///
/// The mean is rounded up to the first scale value not below it, so
/// `[1, 1, 2]` gives 2 and `[8, 13]` gives 13. No votes falls back to the
/// smallest value; anything past the end clamps to the largest.
pub fn aggregate_votes(votes: &[u8]) -> u8 {
    let count = votes.len() as u32;
    let sum: u32 = votes.iter().copied().map(u32::from).sum();

    ESTIMATION_SCALE
        .iter()
        .copied()
        // value >= sum / count, kept in integers.
        .find(|value| u32::from(*value) * count >= sum)
        .unwrap_or(ESTIMATION_SCALE[ESTIMATION_SCALE.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_rounds_up_to_the_next_scale_value() {
        assert_eq!(aggregate_votes(&[1, 1, 2]), 2);
        assert_eq!(aggregate_votes(&[8, 13]), 13);
        assert_eq!(aggregate_votes(&[5, 8]), 8);
    }

    #[test]
    fn exact_scale_values_are_kept() {
        assert_eq!(aggregate_votes(&[3, 3]), 3);
        assert_eq!(aggregate_votes(&[2, 8]), 5);
        assert_eq!(aggregate_votes(&[21]), 21);
    }

    #[test]
    fn no_numeric_votes_falls_to_the_minimum() {
        assert_eq!(aggregate_votes(&[]), 1);
    }

    #[test]
    fn above_maximum_clamps() {
        // Not reachable with scale votes, but stored documents may hold anything.
        assert_eq!(aggregate_votes(&[40, 50]), 21);
    }
}
