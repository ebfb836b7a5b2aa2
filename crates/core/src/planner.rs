use crate::{
    error::{Result, VidlensError},
    types::Segment,
};

/// Split `[0, duration)` into consecutive windows of `window` seconds and
/// pick `frames` evenly spaced sample timestamps in each.
///
/// The last window may be shorter than `window` but is never empty.
pub fn plan_segments(duration: f64, window: f64, frames: usize) -> Result<Vec<Segment>> {
    if !(duration.is_finite() && duration > 0.0) {
        return Err(VidlensError::invalid_input(format!(
            "video duration must be a positive number of seconds, got {duration}"
        )));
    }
    if !(window.is_finite() && window > 0.0) {
        return Err(VidlensError::invalid_input(format!(
            "window length must be a positive number of seconds, got {window}"
        )));
    }
    if frames == 0 {
        return Err(VidlensError::invalid_input(
            "frames per segment must be at least 1",
        ));
    }

    let mut segments = Vec::new();
    let mut index = 0usize;

    loop {
        // Both boundaries come from the same product so neighbours share them exactly.
        let start_time = index as f64 * window;
        if start_time >= duration {
            break;
        }
        let end_time = ((index + 1) as f64 * window).min(duration);

        segments.push(Segment {
            index,
            start_time,
            end_time,
            sample_timestamps: sample_timestamps(start_time, end_time, frames),
        });
        index += 1;
    }

    Ok(segments)
}

fn sample_timestamps(start: f64, end: f64, frames: usize) -> Vec<f64> {
    let length = end - start;
    if frames == 1 {
        return vec![start + length / 2.0];
    }

    let steps = (frames - 1) as f64;
    (0..frames)
        .map(|i| {
            if i == frames - 1 {
                end
            } else {
                start + length * i as f64 / steps
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_tail_segment() {
        let segments = plan_segments(125.0, 120.0, 3).unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].start_time, 0.0);
        assert_eq!(segments[0].end_time, 120.0);
        assert_eq!(segments[0].sample_timestamps, vec![0.0, 60.0, 120.0]);
        assert_eq!(segments[1].start_time, 120.0);
        assert_eq!(segments[1].end_time, 125.0);
        assert_eq!(segments[1].sample_timestamps, vec![120.0, 122.5, 125.0]);
    }

    #[test]
    fn exact_multiple_has_no_empty_tail() {
        let segments = plan_segments(240.0, 120.0, 3).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[1].end_time, 240.0);
    }

    #[test]
    fn shorter_than_window() {
        let segments = plan_segments(30.0, 120.0, 3).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].end_time, 30.0);
        assert_eq!(segments[0].sample_timestamps, vec![0.0, 15.0, 30.0]);
    }

    #[test]
    fn single_sample_uses_midpoint() {
        let segments = plan_segments(200.0, 120.0, 1).unwrap();
        assert_eq!(segments[0].sample_timestamps, vec![60.0]);
        assert_eq!(segments[1].sample_timestamps, vec![160.0]);
    }

    #[test]
    fn windows_tile_the_whole_duration() {
        let windows = [0.1, 1.0, 7.3, 7.5, 33.3, 45.3, 60.0, 120.0];
        let durations = [0.001, 0.5, 1.0, 59.999, 119.0, 120.0, 121.0, 3599.9, 7200.0, 10_000.3];

        for &window in &windows {
            for &duration in &durations {
                let segments = plan_segments(duration, window, 3).unwrap();
                let last = segments.last().unwrap();

                assert_eq!(segments[0].start_time, 0.0);
                assert_eq!(last.end_time, duration);
                assert!(last.duration() > 0.0 && last.duration() <= window + 1e-9);

                for (i, pair) in segments.windows(2).enumerate() {
                    assert_eq!(pair[0].index, i);
                    assert_eq!(pair[0].end_time, pair[1].start_time);
                    assert!((pair[0].duration() - window).abs() < 1e-9);
                }

                for segment in &segments {
                    assert_eq!(segment.sample_timestamps.len(), 3);
                    assert!(segment.sample_timestamps.windows(2).all(|w| w[0] <= w[1]));
                    assert_eq!(segment.sample_timestamps[0], segment.start_time);
                    assert_eq!(segment.sample_timestamps[2], segment.end_time);
                }
            }
        }
    }

    #[test]
    fn fractional_windows_share_boundaries() {
        for window in [0.1, 7.3, 33.3, 45.3] {
            let segments = plan_segments(1000.0, window, 3).unwrap();
            for pair in segments.windows(2) {
                assert_eq!(
                    pair[0].end_time.to_bits(),
                    pair[1].start_time.to_bits(),
                    "window {window}, segment {}",
                    pair[0].index
                );
            }
        }

        let segments = plan_segments(1000.0, 45.3, 3).unwrap();
        assert_eq!(segments[5].end_time, segments[6].start_time);
        assert_eq!(segments[5].end_time, 6.0 * 45.3);
    }

    #[test]
    fn rejects_non_positive_duration() {
        for duration in [0.0, -3.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                plan_segments(duration, 120.0, 3),
                Err(VidlensError::InvalidInput { .. })
            ));
        }
    }

    #[test]
    fn rejects_zero_frames() {
        assert!(plan_segments(10.0, 120.0, 0).is_err());
    }
}
