use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;

use pulse_net::{Host, HostConfig, HostEvent, DEFAULT_PORT, MAX_PLAYERS};

#[derive(Parser)]
#[command(name = "pulse-host")]
#[command(about = "Headless authoritative Pulse host")]
struct Args {
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, default_value_t = MAX_PLAYERS)]
    max_players: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = HostConfig {
        max_players: args.max_players,
        ..Default::default()
    };

    let mut host = Host::new(config);
    host.start(args.port)?;

    let mut last_frame = Instant::now();
    let mut last_report = Instant::now();

    loop {
        let now = Instant::now();
        let dt = (now - last_frame).as_secs_f32();
        last_frame = now;

        host.update(dt);

        for event in host.poll_events() {
            match event {
                HostEvent::PlayerConnected { id } => log::info!("player {} joined", id),
                HostEvent::PlayerDisconnected { id } => log::info!("player {} left", id),
            }
        }

        if last_report.elapsed() >= Duration::from_secs(10) {
            let stats = host.stats();
            log::info!(
                "tick {} | {} players | rx {} packets, tx {} packets",
                host.current_tick(),
                host.player_count(),
                stats.packets_received,
                stats.packets_sent,
            );
            last_report = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(1));
    }
}
