//! Latency bucket schema shared by every rolling window.
//!
//! Three linear grades concatenated into one 70-bucket index space:
//! 5 ms steps up to 200 ms, then 25 ms steps up to 700 ms, then 250 ms
//! steps up to 3200 ms. Anything slower lands in the last bucket.

/// Grade 1 step, milliseconds.
pub const TP_FIRST_GRADE_MS: i64 = 5;
pub const TP_FIRST_GRADE_SIZE: usize = 40;

/// Grade 2 step, milliseconds.
pub const TP_SECOND_GRADE_MS: i64 = 25;
pub const TP_SECOND_GRADE_SIZE: usize = 20;

/// Grade 3 step, milliseconds.
pub const TP_THIRD_GRADE_MS: i64 = 250;
pub const TP_THIRD_GRADE_SIZE: usize = 10;

/// Total bucket count across the three grades.
pub const TP_BUCKET_NUM: usize = TP_FIRST_GRADE_SIZE + TP_SECOND_GRADE_SIZE + TP_THIRD_GRADE_SIZE;

pub const INTERVAL_NUM: usize = 5;

/// Rolling window lengths, seconds. Window 0 drives slow-flag decisions.
pub const INTERVAL_MARK_SECS: [i64; INTERVAL_NUM] = [1, 10, 60, 600, 3600];

pub const DELAY_KIND_NUM: usize = 8;

/// Thresholds for the delay-exceeded counters, milliseconds, ascending.
pub const DELAY_MARK_MS: [i64; DELAY_KIND_NUM] = [50, 100, 200, 300, 500, 1000, 2000, 3000];

const GRADE1_CEIL_MS: i64 = TP_FIRST_GRADE_MS * TP_FIRST_GRADE_SIZE as i64;
const GRADE2_CEIL_MS: i64 = GRADE1_CEIL_MS + TP_SECOND_GRADE_MS * TP_SECOND_GRADE_SIZE as i64;
const GRADE3_CEIL_MS: i64 = GRADE2_CEIL_MS + TP_THIRD_GRADE_MS * TP_THIRD_GRADE_SIZE as i64;

/// Upper edge of each bucket, milliseconds. `TP_DELAY_MS[i]` is the value
/// published for a percentile that resolves to bucket `i`.
pub const TP_DELAY_MS: [i64; TP_BUCKET_NUM] = build_tp_delay();

const fn build_tp_delay() -> [i64; TP_BUCKET_NUM] {
    let mut table = [0i64; TP_BUCKET_NUM];
    let mut i = 0;
    while i < TP_BUCKET_NUM {
        table[i] = if i < TP_FIRST_GRADE_SIZE {
            (i as i64 + 1) * TP_FIRST_GRADE_MS
        } else if i < TP_FIRST_GRADE_SIZE + TP_SECOND_GRADE_SIZE {
            GRADE1_CEIL_MS + (i - TP_FIRST_GRADE_SIZE + 1) as i64 * TP_SECOND_GRADE_MS
        } else {
            GRADE2_CEIL_MS
                + (i - TP_FIRST_GRADE_SIZE - TP_SECOND_GRADE_SIZE + 1) as i64 * TP_THIRD_GRADE_MS
        };
        i += 1;
    }
    table
}

/// Map a response duration (nanoseconds) to its histogram bucket.
///
/// Ceiling division within the grade, so a duration sitting exactly on an
/// edge belongs to the bucket that edge closes.
#[inline]
pub fn bucket_index(duration_ns: i64) -> usize {
    let ms = duration_ns / 1_000_000;
    if ms <= 0 {
        0
    } else if ms <= GRADE1_CEIL_MS {
        ((ms + TP_FIRST_GRADE_MS - 1) / TP_FIRST_GRADE_MS) as usize - 1
    } else if ms <= GRADE2_CEIL_MS {
        ((ms - GRADE1_CEIL_MS + TP_SECOND_GRADE_MS - 1) / TP_SECOND_GRADE_MS) as usize - 1
            + TP_FIRST_GRADE_SIZE
    } else if ms <= GRADE3_CEIL_MS {
        ((ms - GRADE2_CEIL_MS + TP_THIRD_GRADE_MS - 1) / TP_THIRD_GRADE_MS) as usize - 1
            + TP_FIRST_GRADE_SIZE
            + TP_SECOND_GRADE_SIZE
    } else {
        TP_BUCKET_NUM - 1
    }
}

/// Resolve a nominal interval (seconds) to its window slot, defaulting to
/// window 0 when the interval is not one of the configured marks.
#[inline]
pub fn window_index_for_interval(interval_secs: i64) -> usize {
    INTERVAL_MARK_SECS
        .iter()
        .position(|&mark| mark == interval_secs)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: i64 = 1_000_000;

    #[test]
    fn tp_delay_table_edges() {
        assert_eq!(TP_DELAY_MS[0], 5);
        assert_eq!(TP_DELAY_MS[39], 200);
        assert_eq!(TP_DELAY_MS[40], 225);
        assert_eq!(TP_DELAY_MS[59], 700);
        assert_eq!(TP_DELAY_MS[60], 950);
        assert_eq!(TP_DELAY_MS[69], 3200);
    }

    #[test]
    fn bucket_index_known_durations() {
        let cases: &[(i64, usize, i64)] = &[
            (1, 0, 5),
            (5, 0, 5),
            (6, 1, 10),
            (200, 39, 200),
            (201, 40, 225),
            (700, 59, 700),
            (701, 60, 950),
            (3200, 69, 3200),
            (5000, 69, 3200),
        ];
        for &(ms, index, edge) in cases {
            assert_eq!(bucket_index(ms * MS), index, "{ms} ms");
            assert_eq!(TP_DELAY_MS[index], edge, "{ms} ms edge");
        }
    }

    #[test]
    fn sub_millisecond_durations_land_in_first_bucket() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(999_999), 0);
    }

    #[test]
    fn bucket_edges_bound_every_duration() {
        for ms in 1..=3500i64 {
            let i = bucket_index(ms * MS);
            assert!(i < TP_BUCKET_NUM);
            if ms <= GRADE3_CEIL_MS {
                assert!(TP_DELAY_MS[i] >= ms, "{ms} ms above its bucket edge");
                if i > 0 {
                    assert!(TP_DELAY_MS[i - 1] < ms, "{ms} ms below the previous edge");
                }
            } else {
                assert_eq!(i, TP_BUCKET_NUM - 1);
            }
        }
    }

    #[test]
    fn interval_resolution_defaults_to_first_window() {
        assert_eq!(window_index_for_interval(1), 0);
        assert_eq!(window_index_for_interval(10), 1);
        assert_eq!(window_index_for_interval(3600), 4);
        assert_eq!(window_index_for_interval(7), 0);
        assert_eq!(window_index_for_interval(-1), 0);
    }
}
