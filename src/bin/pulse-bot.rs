use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;

use pulse_net::{Client, ClientConfig, ClientEvent, PlayerInput, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "pulse-bot")]
#[command(about = "Headless Pulse client that wanders around the world")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut client = Client::new(ClientConfig::default());
    client.connect(&args.server, args.port)?;

    let mut last_frame = Instant::now();
    let mut last_report = Instant::now();
    let mut elapsed = 0.0f32;

    while client.is_connected() || client.is_connecting() {
        let now = Instant::now();
        let dt = (now - last_frame).as_secs_f32();
        last_frame = now;
        elapsed += dt;

        client.update(dt);

        if client.is_connected() {
            // Walk forward while the look direction sweeps a slow circle.
            let mut input = PlayerInput {
                yaw: (elapsed * 20.0) % 360.0 - 180.0,
                pitch: 0.0,
                delta_time: dt,
                ..Default::default()
            };
            input.set_key(PlayerInput::KEY_FORWARD, true);
            client.send_input(&input);
        }

        for event in client.poll_events() {
            match event {
                ClientEvent::Connected { id } => log::info!("joined as player {}", id),
                ClientEvent::Disconnected => log::info!("session closed"),
                ClientEvent::EntityCreated { id, kind, position } => {
                    log::info!("entity {} (type {}) at {:?}", id, kind, position)
                }
                ClientEvent::EntityDestroyed { id } => log::info!("entity {} removed", id),
            }
        }

        if client.is_connected() && last_report.elapsed() >= Duration::from_secs(5) {
            let me = client.local_state();
            let peers = client.interpolated_remote_players();
            log::info!(
                "tick {} | at ({:.1}, {:.1}, {:.1}) | {} peers | rtt {:.0} ms",
                client.server_tick(),
                me.position.x,
                me.position.y,
                me.position.z,
                peers.len(),
                client.rtt() * 1000.0,
            );
            last_report = Instant::now();
        }

        std::thread::sleep(Duration::from_millis(16));
    }

    log::info!("exiting");
    Ok(())
}
