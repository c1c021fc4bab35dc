//! Fixed-rate simulation driver.

use protocol::EntityId;
use protocol::packets::ServerPacket;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::world::World;

/// Frames produced by one tick, addressed by player entity.
pub type TickOutput = Vec<(EntityId, ServerPacket)>;

/// Step `world` every `tick_interval_ms` and hand each tick's frames to
/// `outbound`. Returns once the receiving side is dropped.
pub async fn run_tick_loop(
    world: Arc<RwLock<World>>,
    tick_interval_ms: u64,
    outbound: mpsc::UnboundedSender<TickOutput>,
) {
    let period = Duration::from_millis(tick_interval_ms.max(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    // Skip missed ticks rather than bursting to catch up.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Tick loop started ({} ms)", tick_interval_ms);
    loop {
        let scheduled = ticker.tick().await;

        let (frames, tick) = {
            let mut world = world.write().await;
            let tick_start = std::time::Instant::now();
            let frames = world.step();
            let tick_ms = tick_start.elapsed().as_secs_f64() * 1000.0;

            let tick_budget = tick_interval_ms as f64 * 0.9;
            if tick_ms > tick_budget {
                warn!(
                    "Slow tick #{}: {:.3}ms (budget: {:.1}ms)",
                    world.tick(),
                    tick_ms,
                    tick_budget
                );
            }
            (frames, world.tick())
        }; // Write lock released here

        let lag = Instant::now().saturating_duration_since(scheduled);
        if lag > period {
            debug!("Tick {} ran {:?} late", tick, lag);
        }

        if outbound.send(frames).is_err() {
            info!("Outbound channel closed after tick {}, stopping", tick);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn test_ticks_until_receiver_dropped() {
        let mut config = Config::default();
        config.server.seed = Some(1);
        config.server.bots = 0;
        let mut world = World::new(config);
        let id = world.join();
        let world = Arc::new(RwLock::new(world));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_tick_loop(world.clone(), 2, tx));

        for expected in 1..=3u64 {
            let frames = rx.recv().await.unwrap();
            match &frames[..] {
                [(to, ServerPacket::Snapshot(s))] => {
                    assert_eq!(*to, id);
                    assert_eq!(s.tick, expected);
                }
                other => panic!("unexpected frames {other:?}"),
            }
        }
        drop(rx);
        handle.await.unwrap();
        assert!(world.read().await.tick() >= 3);
    }
}
