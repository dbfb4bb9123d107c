use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use log::info;
use parking_lot::Mutex;

const FRAME_PERIOD_WINDOW_SIZE: usize = 60;
const STATS_UPDATE_PERIOD: f64 = 10.0;

/// Snapshot of the timing statistics published for the status command.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTimerStats {
    pub target_frame_rate: i32,
    pub mean_frame_rate: f64,
    pub total_late_frames: usize,
}

#[derive(Default)]
struct StatsInner {
    mean_frame_rate: f64,
    total_late_frames: usize,
}

/// Mutex-guarded stats handle shared between the render thread and the
/// control thread.
#[derive(Clone)]
pub struct SharedFrameStats {
    target_frame_rate: i32,
    inner: Arc<Mutex<StatsInner>>,
}

impl SharedFrameStats {
    pub fn snapshot(&self) -> FrameTimerStats {
        let inner = self.inner.lock();
        FrameTimerStats {
            target_frame_rate: self.target_frame_rate,
            mean_frame_rate: inner.mean_frame_rate,
            total_late_frames: inner.total_late_frames,
        }
    }
}

/// Sliding-window frame-period statistics with late-frame detection. A
/// frame is late when the window holds at least half its capacity and the
/// period reaches 1.5x the windowed mean; late samples are excluded from
/// the window so one stall does not bias detection of the next.
pub struct FrameTimer {
    track_late_frames: bool,
    target_frame_rate: i32,

    start_time: Instant,
    last_frame_time: Instant,
    last_update_time: Instant,

    frame_periods: VecDeque<f64>,
    period_sum: f64,
    late_frames: usize,

    stats: Arc<Mutex<StatsInner>>,
}

impl FrameTimer {
    /// Negative target rates free-run, which is the only mode where late
    /// frames are meaningful.
    pub fn new(target_frame_rate: i32) -> FrameTimer {
        let now = Instant::now();
        FrameTimer {
            track_late_frames: target_frame_rate < 0,
            target_frame_rate,
            start_time: now,
            last_frame_time: now,
            last_update_time: now,
            frame_periods: VecDeque::new(),
            period_sum: 0.0,
            late_frames: 0,
            stats: Arc::new(Mutex::new(StatsInner::default())),
        }
    }

    pub fn start(&mut self) {
        let now = Instant::now();
        self.start_time = now;
        self.last_frame_time = now;
        self.last_update_time = now;
    }

    pub fn mark_frame(&mut self) {
        let now = Instant::now();
        let frame_period = (now - self.last_frame_time).as_secs_f64();
        self.last_frame_time = now;

        let mean_period = self.record_period(frame_period);

        if (now - self.last_update_time).as_secs_f64() >= STATS_UPDATE_PERIOD {
            self.update_stats(mean_period);
            self.last_update_time = now;
        }
    }

    /// Pushes one period sample, returning the pre-sample windowed mean.
    fn record_period(&mut self, frame_period: f64) -> f64 {
        let mean_period = if self.frame_periods.is_empty() {
            frame_period
        } else {
            self.period_sum / self.frame_periods.len() as f64
        };
        self.period_sum += frame_period;
        self.frame_periods.push_back(frame_period);

        // Half a window of history establishes a credible mean before any
        // frame can be called late.
        if self.track_late_frames
            && self.frame_periods.len() >= FRAME_PERIOD_WINDOW_SIZE / 2
            && frame_period >= mean_period * 1.5
        {
            self.late_frames += 1;
            // Remove the outlier so it does not bias the detector.
            self.period_sum -= frame_period;
            self.frame_periods.pop_back();
        }

        while self.frame_periods.len() > FRAME_PERIOD_WINDOW_SIZE {
            let oldest = self.frame_periods.pop_front().unwrap();
            self.period_sum -= oldest;
        }

        mean_period
    }

    /// Seconds from `start()` to the most recent marked frame.
    pub fn elapsed_time(&self) -> f64 {
        (self.last_frame_time - self.start_time).as_secs_f64()
    }

    pub fn shared_stats(&self) -> SharedFrameStats {
        SharedFrameStats {
            target_frame_rate: self.target_frame_rate,
            inner: self.stats.clone(),
        }
    }

    fn update_stats(&mut self, mean_period: f64) {
        let mut stats = self.stats.lock();
        stats.mean_frame_rate = if mean_period > 0.0 {
            1.0 / mean_period
        } else {
            0.0
        };
        if self.target_frame_rate < 0 {
            info!(
                "mean fps: {:.1}, late frames: {}",
                stats.mean_frame_rate, self.late_frames
            );
        } else {
            info!("mean fps: {:.1}", stats.mean_frame_rate);
        }
        stats.total_late_frames += self.late_frames;
        self.late_frames = 0;
    }

    #[cfg(test)]
    fn window_mean(&self) -> f64 {
        self.period_sum / self.frame_periods.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_stall_counts_one_late_frame() {
        let mut timer = FrameTimer::new(-1);
        for _ in 0..30 {
            timer.record_period(0.016);
        }
        timer.record_period(0.040);
        for _ in 0..30 {
            timer.record_period(0.016);
        }

        assert_eq!(timer.late_frames, 1);
        // The stall is excluded, so the mean stays within 5% of 16ms.
        let mean = timer.window_mean();
        assert!((mean - 0.016).abs() / 0.016 < 0.05, "mean was {}", mean);
    }

    #[test]
    fn sum_matches_window_contents() {
        let mut timer = FrameTimer::new(-1);
        let periods = [0.016, 0.017, 0.015, 0.040, 0.016, 0.2, 0.016];
        for (i, period) in periods.iter().cycle().take(100).enumerate() {
            timer.record_period(*period + (i % 3) as f64 * 0.001);
            let expected: f64 = timer.frame_periods.iter().sum();
            assert!(
                (timer.period_sum - expected).abs() < 1e-9,
                "sum drifted at sample {}",
                i
            );
            assert!(timer.frame_periods.len() <= FRAME_PERIOD_WINDOW_SIZE);
        }
    }

    #[test]
    fn late_detection_requires_half_a_window() {
        let mut timer = FrameTimer::new(-1);
        for _ in 0..10 {
            timer.record_period(0.016);
        }
        // Spike with too little history is not late.
        timer.record_period(0.040);
        assert_eq!(timer.late_frames, 0);
    }

    #[test]
    fn fixed_rate_timers_do_not_track_late_frames() {
        let mut timer = FrameTimer::new(60);
        for _ in 0..40 {
            timer.record_period(0.016);
        }
        timer.record_period(0.5);
        assert_eq!(timer.late_frames, 0);
    }

    #[test]
    fn stats_snapshot_accumulates_late_totals() {
        let mut timer = FrameTimer::new(-1);
        let stats = timer.shared_stats();
        for _ in 0..40 {
            timer.record_period(0.016);
        }
        timer.record_period(0.1);
        timer.update_stats(0.016);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_late_frames, 1);
        assert_eq!(snapshot.target_frame_rate, -1);
        assert!((snapshot.mean_frame_rate - 62.5).abs() < 0.1);
    }
}
