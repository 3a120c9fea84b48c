//! Occupancy status policy.

use serde::Serialize;

/// Share of capacity at which a room counts as full.
pub const FULL_RATIO: f64 = 0.8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OccupancyStatus {
    Available,
    Occupied,
    Full,
}

impl OccupancyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Occupied => "occupied",
            Self::Full => "full",
        }
    }
}

impl std::fmt::Display for OccupancyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the status from a head count and the room capacity.
///
/// The full threshold is the real value `capacity * 0.8`, compared without
/// rounding: capacity 6 gives 4.8, so 5 people is the first full count.
pub fn evaluate(people_count: usize, capacity: u32) -> OccupancyStatus {
    if people_count == 0 {
        OccupancyStatus::Available
    } else if people_count as f64 >= capacity as f64 * FULL_RATIO {
        OccupancyStatus::Full
    } else {
        OccupancyStatus::Occupied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_room_is_available_for_any_capacity() {
        for capacity in 1..=64 {
            assert_eq!(evaluate(0, capacity), OccupancyStatus::Available);
        }
    }

    #[test]
    fn capacity_ten_is_full_at_eight() {
        assert_eq!(evaluate(8, 10), OccupancyStatus::Full);
        assert_eq!(evaluate(7, 10), OccupancyStatus::Occupied);
    }

    #[test]
    fn capacity_twelve_threshold_is_nine_point_six() {
        assert_eq!(evaluate(10, 12), OccupancyStatus::Full);
        assert_eq!(evaluate(9, 12), OccupancyStatus::Occupied);
        assert_eq!(evaluate(5, 12), OccupancyStatus::Occupied);
        assert_eq!(evaluate(0, 12), OccupancyStatus::Available);
    }

    #[test]
    fn non_multiple_of_five_uses_real_threshold() {
        assert_eq!(evaluate(5, 6), OccupancyStatus::Full);
        assert_eq!(evaluate(4, 6), OccupancyStatus::Occupied);
    }

    #[test]
    fn thresholds_hold_across_capacities() {
        for capacity in 1..=50u32 {
            let threshold = capacity as f64 * FULL_RATIO;
            for count in 1..=(capacity as usize * 2) {
                let expected = if count as f64 >= threshold {
                    OccupancyStatus::Full
                } else {
                    OccupancyStatus::Occupied
                };
                assert_eq!(evaluate(count, capacity), expected, "{count}/{capacity}");
            }
        }
    }

    #[test]
    fn tiny_room_is_full_with_one_person() {
        assert_eq!(evaluate(1, 1), OccupancyStatus::Full);
    }
}
