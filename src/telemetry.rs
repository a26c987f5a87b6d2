//! Runtime telemetry: per-tick samples, a bounded history and rolling
//! statistics over it.
//!
//! The control loop writes into any [`TelemetrySink`]; the host binary hands
//! it a channel-backed sink, tests hand it a [`TelemetryCollector`] directly.

use heapless::Deque;

use crate::state::LandingState;

/// Number of frame intervals used for the frame-rate estimate.
pub const FRAME_WINDOW: usize = 30;

// ── Ring buffer ──────────────────────────────────────────────────────────────

/// Fixed-capacity FIFO that drops the oldest entry when full.
pub struct RingBuffer<T, const N: usize> {
    items: Deque<T, N>,
}

impl<T, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> RingBuffer<T, N> {
    pub const fn new() -> Self {
        Self { items: Deque::new() }
    }

    /// Appends `item`, returning the evicted oldest entry if the buffer was
    /// full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.is_full() {
            self.items.pop_front()
        } else {
            None
        };
        // Cannot fail: there is room after the eviction above.
        let _ = self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn oldest(&self) -> Option<&T> {
        self.items.front()
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

// ── Samples ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TelemetrySample {
    pub timestamp_s: f32,
    /// Perception frame this tick consumed; repeated when no new frame came.
    pub frame_id: u32,
    /// Capture-to-decision latency.
    pub latency_ms: f32,
    pub target_confidence: f32,
    /// Filtered body-frame target position, if any.
    pub pose: Option<[f32; 3]>,
    pub variance: f32,
    pub landability_score: f32,
    pub state: LandingState,
}

pub trait TelemetrySink {
    fn record(&mut self, sample: TelemetrySample);
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LatencyStats {
    pub mean_ms: f32,
    pub min_ms: f32,
    pub max_ms: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TelemetrySummary {
    pub sample_count: usize,
    pub fps: f32,
    pub latency: LatencyStats,
    pub confidence_mean: f32,
    pub confidence_min: f32,
    pub latest_state: Option<LandingState>,
}

// ── Collector ────────────────────────────────────────────────────────────────

/// Sliding window of the last `N` samples plus frame-interval history.
pub struct TelemetryCollector<const N: usize> {
    data: RingBuffer<TelemetrySample, N>,
    frame_intervals: RingBuffer<f32, FRAME_WINDOW>,
    last_frame: Option<(u32, f32)>,
}

impl<const N: usize> Default for TelemetryCollector<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TelemetryCollector<N> {
    pub const fn new() -> Self {
        Self {
            data: RingBuffer::new(),
            frame_intervals: RingBuffer::new(),
            last_frame: None,
        }
    }

    fn note_frame(&mut self, frame_id: u32, timestamp_s: f32) {
        match self.last_frame {
            Some((id, _)) if id == frame_id => return,
            Some((_, prev)) => {
                self.frame_intervals.push(timestamp_s - prev);
            }
            None => {}
        }
        self.last_frame = Some((frame_id, timestamp_s));
    }

    /// Frames per second over the recent frame intervals; zero until at
    /// least two intervals are known.
    pub fn fps(&self) -> f32 {
        if self.frame_intervals.len() < 2 {
            return 0.0;
        }
        let total: f32 = self.frame_intervals.iter().sum();
        let avg = total / self.frame_intervals.len() as f32;
        if avg > 0.0 {
            1.0 / avg
        } else {
            0.0
        }
    }

    pub fn latency_stats(&self) -> LatencyStats {
        if self.data.is_empty() {
            return LatencyStats::default();
        }
        let mut stats = LatencyStats {
            mean_ms: 0.0,
            min_ms: f32::INFINITY,
            max_ms: f32::NEG_INFINITY,
        };
        for s in self.data.iter() {
            stats.mean_ms += s.latency_ms;
            stats.min_ms = stats.min_ms.min(s.latency_ms);
            stats.max_ms = stats.max_ms.max(s.latency_ms);
        }
        stats.mean_ms /= self.data.len() as f32;
        stats
    }

    pub fn summary(&self) -> TelemetrySummary {
        if self.data.is_empty() {
            return TelemetrySummary::default();
        }
        let n = self.data.len() as f32;
        let mut sum = 0.0f32;
        let mut min = f32::INFINITY;
        for s in self.data.iter() {
            sum += s.target_confidence;
            min = min.min(s.target_confidence);
        }
        TelemetrySummary {
            sample_count: self.data.len(),
            fps: self.fps(),
            latency: self.latency_stats(),
            confidence_mean: sum / n,
            confidence_min: min,
            latest_state: self.data.latest().map(|s| s.state),
        }
    }

    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.data.latest()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.frame_intervals.clear();
        self.last_frame = None;
    }
}

impl<const N: usize> TelemetrySink for TelemetryCollector<N> {
    fn record(&mut self, sample: TelemetrySample) {
        self.note_frame(sample.frame_id, sample.timestamp_s);
        self.data.push(sample);
    }
}
