//! Netsim - runs the authoritative arena server and one predicting client
//! in-process, connected by an impaired link, and reports the client's
//! netcode diagnostics.

mod link;

use bytes::Bytes;
use link::{Link, LinkConfig};
use netcode::{Clock, MatchSession, NetcodeConfig, PacketSink, SystemClock};
use protocol::packets::{ClientPacket, ServerPacket};
use protocol::{EntityId, MoveCommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use server::{TickOutput, World};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "netsim.toml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
struct NetsimConfig {
    #[serde(default)]
    run: RunConfig,
    #[serde(default)]
    link: LinkConfig,
    #[serde(default)]
    world: server::Config,
    #[serde(default)]
    netcode: NetcodeConfig,
}

impl NetsimConfig {
    /// Load configuration from `path` or write the defaults there.
    fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            info!("No {} found, creating default config", path.display());
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            Ok(default_config)
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RunConfig {
    #[serde(default = "default_duration_secs")]
    duration_secs: u64,
    /// Client render frame period.
    #[serde(default = "default_frame_interval_ms")]
    frame_interval_ms: u64,
    #[serde(default = "default_ping_interval_ms")]
    ping_interval_ms: u64,
    #[serde(default = "default_report_interval_ms")]
    report_interval_ms: u64,
    #[serde(default)]
    seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            frame_interval_ms: default_frame_interval_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            report_interval_ms: default_report_interval_ms(),
            seed: 0,
        }
    }
}

fn default_duration_secs() -> u64 {
    30
}
fn default_frame_interval_ms() -> u64 {
    16
}
fn default_ping_interval_ms() -> u64 {
    500
}
fn default_report_interval_ms() -> u64 {
    2000
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Arena netsim v{}", env!("CARGO_PKG_VERSION"));

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let mut config = NetsimConfig::load(Path::new(&path))?;
    // The client predicts with exactly the server's rules and tick length.
    config.netcode.tick_duration_ms = config.world.server.tick_interval_ms as f64;
    config.netcode.movement = config.world.movement();
    config.netcode.validate()?;

    info!("Loaded configuration from {}", path);
    info!(
        "  Link: {:.0}ms +/- {:.0}ms, {:.1}% loss",
        config.link.latency_ms,
        config.link.jitter_ms,
        config.link.loss * 100.0
    );
    info!("  Tick: {}ms", config.world.server.tick_interval_ms);
    info!(
        "  Delay band: {}..={} ticks",
        config.netcode.min_delay_ticks, config.netcode.max_delay_ticks
    );

    let mut world = World::new(config.world.clone());
    let local = world.join();
    let world = Arc::new(RwLock::new(world));

    let (tick_tx, tick_rx) = mpsc::unbounded_channel::<TickOutput>();
    let (down_tx, mut down_rx) = mpsc::unbounded_channel::<Bytes>();
    let (up_tx, up_rx) = mpsc::unbounded_channel::<Bytes>();

    let tick_task = tokio::spawn(server::run_tick_loop(
        world.clone(),
        config.world.server.tick_interval_ms,
        tick_tx,
    ));

    // Entity assignment goes over the reliable handshake, not the lossy path.
    let _ = down_tx.send(ServerPacket::AssignEntity { entity_id: local }.encode());
    let downlink = Link::new("downlink", config.link.clone(), config.run.seed, down_tx);
    let router_task = tokio::spawn(route_server_frames(
        world.clone(),
        local,
        tick_rx,
        up_rx,
        downlink,
    ));

    let mut uplink = Link::new(
        "uplink",
        config.link.clone(),
        config.run.seed.wrapping_add(1),
        up_tx.clone(),
    );
    let sink = PacketSink::new(move |frame: Bytes| uplink.send(frame));
    let mut session = MatchSession::new(config.netcode.clone(), sink)?;
    let mut pings = Link::new(
        "ping",
        config.link.clone(),
        config.run.seed.wrapping_add(2),
        up_tx,
    );

    let clock = SystemClock::new();
    let mut rng = StdRng::seed_from_u64(config.run.seed.wrapping_add(3));
    let mut pilot = Pilot::default();

    let mut frames = interval(Duration::from_millis(config.run.frame_interval_ms.max(1)));
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = Instant::now() + Duration::from_secs(config.run.duration_secs);
    let mut next_ping_ms = 0.0;
    let mut next_report_ms = config.run.report_interval_ms as f64;

    loop {
        tokio::select! {
            _ = frames.tick() => {}
            _ = tokio::time::sleep_until(deadline) => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }

        let now = clock.now_ms();
        while let Ok(frame) = down_rx.try_recv() {
            // Undecodable frames are logged and counted by the session.
            let _ = session.handle_packet(&frame, now);
        }
        session.update(now);

        if let Some(seq) = session.apply_local_input(pilot.next_command(&mut rng), now) {
            debug!("Sent input {}", seq);
        }
        for id in session.visible_entities() {
            let _ = session.sample(id, now);
        }

        if now >= next_ping_ms {
            pings.send(netcode::ping_packet(now));
            next_ping_ms = now + config.run.ping_interval_ms as f64;
        }
        if now >= next_report_ms {
            report(&session.diagnostics().to_json()?);
            next_report_ms = now + config.run.report_interval_ms as f64;
        }
    }

    router_task.abort();
    tick_task.abort();

    let diagnostics = session.diagnostics();
    info!(
        "Finished: {} corrections ({} soft), {} underruns, {} late snapshots, final delay {} ticks",
        diagnostics.correction_count,
        diagnostics.soft_correction_count,
        diagnostics.underrun_count,
        diagnostics.late_snapshot_count,
        diagnostics.delay_ticks
    );
    info!(
        "  Pings sent: {} ({} dropped)",
        pings.sent(),
        pings.dropped()
    );
    report(&diagnostics.to_json()?);
    Ok(())
}

fn report(json: &str) {
    info!("diagnostics {}", json);
}

/// Server side of the link: sends each tick's snapshot to the local client and
/// applies client frames as they arrive.
async fn route_server_frames(
    world: Arc<RwLock<World>>,
    local: EntityId,
    mut ticks: mpsc::UnboundedReceiver<TickOutput>,
    mut uplink: mpsc::UnboundedReceiver<Bytes>,
    mut downlink: Link<Bytes>,
) {
    loop {
        tokio::select! {
            output = ticks.recv() => {
                let Some(output) = output else { break };
                for (to, packet) in output {
                    if to == local {
                        downlink.send(packet.encode());
                    }
                }
            }
            frame = uplink.recv() => {
                let Some(frame) = frame else { break };
                let packet = match ClientPacket::parse(&frame) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!("Packet error from client {}: {}", local, e);
                        continue;
                    }
                };
                let reply = world.write().await.handle_client_packet(local, &packet);
                match reply {
                    Ok(Some(reply)) => downlink.send(reply.encode()),
                    Ok(None) => {}
                    Err(e) => warn!("Dropping client frame: {}", e),
                }
            }
        }
    }
    info!(
        "Router stopped ({} frames sent, {} dropped)",
        downlink.sent(),
        downlink.dropped()
    );
}

/// Scripted local player: holds a heading for a while, occasionally bombs.
#[derive(Default)]
struct Pilot {
    command: MoveCommand,
    frames_left: u32,
}

impl Pilot {
    fn next_command<R: Rng>(&mut self, rng: &mut R) -> MoveCommand {
        if self.frames_left == 0 {
            self.command = match rng.random_range(0..4) {
                0 => MoveCommand::up(),
                1 => MoveCommand::down(),
                2 => MoveCommand::left(),
                _ => MoveCommand::right(),
            };
            self.frames_left = rng.random_range(20..120);
        }
        self.frames_left -= 1;
        MoveCommand {
            place_bomb: rng.random_bool(0.005),
            ..self.command
        }
    }
}
