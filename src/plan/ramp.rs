use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use super::Plan;

/// How often the ramp loop re-evaluates the target VU count.
pub const RAMP_TICK: Duration = Duration::from_secs(1);

/// Spawns the ramp producer: once per `tick` it emits `plan.vus_at(elapsed)`.
///
/// The loop never scales anything itself. It exits when `ctx` is cancelled
/// (or the receiver is dropped), which closes the returned channel.
pub fn poll_vu_ramping(
    ctx: CancellationToken,
    plan: Plan,
    tick: Duration,
) -> mpsc::Receiver<usize> {
    let (tx, rx) = mpsc::channel(1);
    let started = Instant::now();

    tokio::spawn(async move {
        let mut timer = interval_at(started + tick, tick);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(timer);

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                Some(now) = ticks.next() => {
                    let target = plan.vus_at(now.duration_since(started));
                    tokio::select! {
                        _ = ctx.cancelled() => return,
                        sent = tx.send(target) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    });

    rx
}
