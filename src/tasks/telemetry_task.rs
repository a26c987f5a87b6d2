use core::fmt::Write;

use embassy_executor::task;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Receiver;
use embassy_time::{Duration, Ticker};
use tracing::info;

use precland::telemetry::{TelemetryCollector, TelemetrySample, TelemetrySink};

use super::TELEMETRY_DEPTH;

/// Five seconds of control ticks at 20 Hz.
const WINDOW: usize = 100;
const SUMMARY_HZ: u64 = 1;

/// Telemetry task: collects per-tick samples from the control loop and logs
/// a rolling summary once a second.
#[task]
pub async fn telemetry_task(
    telemetry_rx: Receiver<'static, CriticalSectionRawMutex, TelemetrySample, TELEMETRY_DEPTH>,
) {
    let mut collector: TelemetryCollector<WINDOW> = TelemetryCollector::new();
    let mut ticker = Ticker::every(Duration::from_hz(SUMMARY_HZ));

    loop {
        match select(telemetry_rx.receive(), ticker.next()).await {
            Either::First(sample) => collector.record(sample),
            Either::Second(()) => {
                let summary = collector.summary();
                let Some(state) = summary.latest_state else {
                    continue;
                };

                let mut m = heapless::String::<160>::new();
                let _ = write!(
                    m,
                    "[TEL] {} fps={:.1} lat={:.1}/{:.1}ms conf={:.2} min={:.2}",
                    state,
                    summary.fps,
                    summary.latency.mean_ms,
                    summary.latency.max_ms,
                    summary.confidence_mean,
                    summary.confidence_min,
                );
                if let Some(latest) = collector.latest() {
                    if let Some([x, y, z]) = latest.pose {
                        let _ = write!(m, " pose=({:.2},{:.2},{:.2}) var={:.4}", x, y, z, latest.variance);
                    }
                }
                info!("{}", m.as_str());
            }
        }
    }
}
