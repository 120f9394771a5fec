//! # Local Match
//!
//! Runs a server and its clients in one process over emulated links and
//! prints how prediction held up.
//!
//! ## Usage
//!
//! ```bash
//! local_match --humans 2 --bots 1 --ticks 600 --network mobile
//! RUST_LOG=tidenet_networking=debug local_match --config match.toml --realtime
//! ```

use std::time::Instant;
use tidenet_core::{
    EntityOptions, EntityRegistry, NetworkedEntity, PlayerContext, PlayerId, PlayerRole, PlayersMask,
    StateReader, StateWriter, SyncInt, SyncResult, SyncVar, SyncVec2,
};
use tidenet_networking::{GameConfig, LagConfig, LocalMatch, TickLoop};
use tidenet_shared::Vec2;
use tracing_subscriber::EnvFilter;

/// A player-owned dot walking in a square.
struct Walker {
    owner: PlayerId,
    position: SyncVec2,
    gathered: i32,
}

impl Walker {
    fn new(owner: PlayerId) -> Self {
        Self {
            owner,
            position: SyncVec2::new(Vec2::ZERO),
            gathered: 0,
        }
    }
}

impl NetworkedEntity for Walker {
    fn fields(&self) -> Vec<&dyn SyncVar> {
        vec![&self.position]
    }

    fn fields_mut(&mut self) -> Vec<&mut dyn SyncVar> {
        vec![&mut self.position]
    }

    fn type_name(&self) -> &'static str {
        "Walker"
    }

    fn has_input(&self) -> bool {
        true
    }

    fn gather_input(&mut self, ctx: &PlayerContext, writer: &mut StateWriter) {
        if ctx.player != self.owner || ctx.role == PlayerRole::Server {
            return;
        }
        self.gathered += 1;
        writer.write_i32((self.gathered / 30) % 4);
    }

    fn apply_input(&mut self, player: PlayerId, reader: &mut StateReader<'_>) -> SyncResult<()> {
        let heading = reader.read_i32()?;
        if player != self.owner {
            return Ok(());
        }
        let step = match heading {
            0 => Vec2::new(1.0, 0.0),
            1 => Vec2::new(0.0, 1.0),
            2 => Vec2::new(-1.0, 0.0),
            _ => Vec2::new(0.0, -1.0),
        };
        let moved = *self.position.get() + step * 0.1;
        self.position.set(moved);
        Ok(())
    }
}

/// World clock only the server advances.
struct Clock {
    ticks: SyncInt,
}

impl NetworkedEntity for Clock {
    fn fields(&self) -> Vec<&dyn SyncVar> {
        vec![&self.ticks]
    }

    fn fields_mut(&mut self) -> Vec<&mut dyn SyncVar> {
        vec![&mut self.ticks]
    }

    fn update(&mut self) {
        let next = self.ticks.get().wrapping_add(1);
        self.ticks.set(next);
    }
}

fn populate(registry: &mut EntityRegistry, seats: usize) -> SyncResult<()> {
    registry.add(
        0,
        EntityOptions::default().predictable_to(PlayersMask::NONE),
        Box::new(Clock {
            ticks: SyncInt::new(0),
        }),
    )?;
    for index in 0..seats {
        let owner = PlayerId::from_index(index);
        let options = EntityOptions::default().predictable_to(PlayersMask::single(owner));
        let id = i32::try_from(index + 1).unwrap_or(i32::MAX);
        registry.add(id, options, Box::new(Walker::new(owner)))?;
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         TIDENET LOCAL MATCH                                      ║");
    println!("║         PREDICTION UNDER EMULATED LAG                            ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let args: Vec<String> = std::env::args().collect();
    let mut humans = 2usize;
    let mut bots = 0usize;
    let mut ticks = 300u64;
    let mut config_path: Option<String> = None;
    let mut network: Option<LagConfig> = None;
    let mut realtime = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--humans" => {
                if i + 1 < args.len() {
                    humans = args[i + 1].parse().unwrap_or(2);
                    i += 1;
                }
            }
            "--bots" => {
                if i + 1 < args.len() {
                    bots = args[i + 1].parse().unwrap_or(0);
                    i += 1;
                }
            }
            "--ticks" | "-t" => {
                if i + 1 < args.len() {
                    ticks = args[i + 1].parse().unwrap_or(300);
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--network" | "-n" => {
                if i + 1 < args.len() {
                    network = match args[i + 1].as_str() {
                        "lan" => Some(LagConfig::LAN),
                        "broadband" => Some(LagConfig::BROADBAND),
                        "mobile" => Some(LagConfig::MOBILE),
                        other => {
                            eprintln!("unknown network preset '{other}', using config");
                            None
                        }
                    };
                    i += 1;
                }
            }
            "--realtime" => realtime = true,
            "--help" | "-h" => {
                println!("Usage: local_match [OPTIONS]");
                println!();
                println!("Options:");
                println!("      --humans <NUM>         Remote human clients (default: 2)");
                println!("      --bots <NUM>           Server-hosted bots (default: 0)");
                println!("  -t, --ticks <NUM>          Ticks to run (default: 300)");
                println!("  -c, --config <PATH>        TOML game config");
                println!("  -n, --network <PRESET>     lan | broadband | mobile");
                println!("      --realtime             Pace ticks with the wall clock");
                println!("  -h, --help                 Show this help");
                return;
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = match config_path {
        Some(path) => match GameConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("failed to load {path}: {err}");
                std::process::exit(1);
            }
        },
        None => GameConfig::default(),
    };
    if let Some(lag) = network {
        config.lag = lag;
    }
    let seats = humans + bots;
    config.players = u32::try_from(seats).unwrap_or(u32::MAX);
    config.bots_in_server = true;

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Tick Rate:          {} Hz", config.ticks_per_second);
    println!("│ Seats:              {humans} humans, {bots} bots");
    println!("│ Input Lag:          {} ticks", config.input_lag_ticks);
    println!("│ Prediction Limit:   {} ticks", config.total_prediction_limit_in_ticks());
    println!(
        "│ Network:            {}ms +{}ms jitter, {:.1}% loss",
        config.lag.delay_ms,
        config.lag.jitter_ms,
        config.lag.packet_loss * 100.0
    );
    println!("└─────────────────────────────────────────────────────────────────┘");
    println!();

    let user_ids: Vec<String> = (0..seats)
        .map(|n| if n < humans { format!("human-{n}") } else { format!("bot-{n}") })
        .collect();
    let mut local = match LocalMatch::new(config.clone(), &user_ids, bots, |registry| populate(registry, seats)) {
        Ok(local) => local,
        Err(err) => {
            eprintln!("invalid match setup: {err}");
            std::process::exit(1);
        }
    };

    let started = Instant::now();
    if let Err(err) = local.start(started) {
        eprintln!("match failed to start: {err}");
        std::process::exit(1);
    }

    if realtime {
        let mut clock = TickLoop::from_config(&config);
        while local.steps() < ticks {
            while clock.should_tick() && local.steps() < ticks {
                let start = clock.begin_tick();
                local.step(start);
                clock.end_tick(start);
            }
            clock.wait_for_next_tick();
        }
        let stats = clock.stats();
        println!(
            "tick timing: avg {}us, max {}us, late {}, dropped {}",
            stats.avg_tick_us, stats.max_tick_us, stats.late_ticks, stats.dropped_ticks
        );
    } else {
        local.run(started, ticks);
    }

    println!();
    println!("┌─ RESULTS ───────────────────────────────────────────────────────┐");
    let server = local.server().stats();
    println!(
        "│ Server:  {} ticks, {} inputs applied, {} missing, {} snapshots",
        server.ticks, server.inputs_applied, server.missing_inputs, server.snapshots_sent
    );
    for client in local.clients() {
        let stats = client.stats();
        println!(
            "│ {}: {} ticks, {} stalled, {} reconciliations ({} ticks resimulated)",
            client.player(),
            stats.ticks,
            stats.stalled_ticks,
            stats.reconciliations,
            stats.resimulated_ticks
        );
    }
    println!("│ Payloads lost:      {}", local.dropped_payloads());
    println!("└─────────────────────────────────────────────────────────────────┘");
}
