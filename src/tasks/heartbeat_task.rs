use embassy_executor::task;
use embassy_futures::select::{select3, Either3};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use tracing::{error, info};

use precland::config::LinkConfig;
use precland::drivers::landing_target::Transport;
use precland::link::{AutopilotHeartbeat, CancelToken, HeartbeatMonitor, LinkEvent, LinkHealth};
use precland::throttle::RateLimiter;

use super::{now_s, ChannelTransport, Outbound, OUTBOUND_DEPTH};

/// Timeout re-check interval while no heartbeat arrives.
const POLL_MS: u64 = 100;

/// Heartbeat task: tracks the autopilot link and sends the companion's own
/// HEARTBEAT until cancelled.
#[task]
pub async fn heartbeat_task(
    config: LinkConfig,
    link: &'static LinkHealth,
    heartbeat_rx: Receiver<'static, CriticalSectionRawMutex, AutopilotHeartbeat, 1>,
    outbound_tx: Sender<'static, CriticalSectionRawMutex, Outbound, OUTBOUND_DEPTH>,
    cancel: &'static CancelToken,
    stopped: &'static Signal<CriticalSectionRawMutex, ()>,
) {
    let limiter = match RateLimiter::new(config.heartbeat_send_rate_hz) {
        Ok(l) => l,
        Err(e) => {
            error!("heartbeat sender disabled: {e}");
            link.set_mavlink(false);
            stopped.signal(());
            return;
        }
    };
    let mut monitor = HeartbeatMonitor::new(config.heartbeat_timeout_s);
    let mut transport = ChannelTransport::new(outbound_tx);

    loop {
        let event = match select3(
            cancel.cancelled(),
            heartbeat_rx.receive(),
            Timer::after(Duration::from_millis(POLL_MS)),
        )
        .await
        {
            Either3::First(()) => break,
            Either3::Second(hb) => monitor.on_heartbeat(now_s(), hb),
            Either3::Third(()) => monitor.poll(now_s()),
        };

        match event {
            Some(LinkEvent::Connected(_)) => link.set_mavlink(true),
            Some(LinkEvent::Lost) => link.set_mavlink(false),
            None => {}
        }

        if limiter.should_run() {
            transport.send_heartbeat();
        }
    }

    link.set_mavlink(false);
    info!("heartbeat task stopped");
    stopped.signal(());
}
