mod court;

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec2;
use tandem::net::{PacketLossSimulation, SpawnTransform};
use tandem::transport::LoopbackAir;
use tandem::{
    GamePhase, GameSession, NetworkGameLoop, PlayerInput, SessionConfig, SessionEvent,
};

use court::Court;

#[derive(Parser)]
#[command(name = "tandem-demo")]
#[command(about = "Headless host and client playing pong over a loopback radio")]
struct Args {
    #[arg(short, long, default_value_t = 600, help = "Frames to run at 60 fps")]
    frames: u32,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100) on both radios")]
    loss_percent: f32,

    #[arg(long, default_value_t = 60, help = "Frames between status lines")]
    report_every: u32,
}

const FRAME: Duration = Duration::from_micros(16_667);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let air = LoopbackAir::new();
    let host_radio = air.radio();
    let client_radio = air.radio();
    if args.loss_percent > 0.0 {
        host_radio.set_loss(PacketLossSimulation::with_loss(args.loss_percent));
        client_radio.set_loss(PacketLossSimulation::with_loss(args.loss_percent));
    }

    let mut court = Court::default();
    let ball = court.add_ball(Vec2::new(5.0, 3.0));
    let host_paddle = court.add_paddle(-7.5, None);

    let host_config = SessionConfig::radio("Left", "pong").with_session("demo");
    let transport = host_config.radio_transport(host_radio);
    let mut host = GameSession::host(host_config, transport, court)?;

    let ball_id = host.spawn_entity(
        "ball",
        ball,
        "ball",
        SpawnTransform::default(),
        Some(Vec2::new(5.0, 3.0)),
        None,
    )?;
    host.adapter_mut().bind(ball, ball_id.clone());
    let paddle_id = host.spawn_entity(
        "paddle-left",
        host_paddle,
        "paddle",
        SpawnTransform {
            position: Vec2::new(-7.5, 0.0),
            ..Default::default()
        },
        None,
        None,
    )?;
    host.adapter_mut().bind(host_paddle, paddle_id);

    let client_config = SessionConfig::radio("Right", "pong").with_session("demo");
    let transport = client_config.radio_transport(client_radio);
    let mut client = GameSession::join(client_config, transport, Court::default())?;

    let mut host_loop = NetworkGameLoop::for_session(&host);
    let mut client_loop = NetworkGameLoop::for_session(&client);
    let mut now = Instant::now();
    let mut guest_paddle = None;
    let mut started = false;

    for frame in 0..args.frames {
        now += FRAME;
        let dt = FRAME.as_secs_f32();

        // The client steers up and down on a two second cycle.
        let steer = if (frame / 120) % 2 == 0 { 1.0 } else { -1.0 };
        let input = PlayerInput::with_movement(Vec2::new(0.0, steer));

        host_loop.frame_at(&mut host, dt, None, now)?;
        for event in host.drain_events().collect::<Vec<_>>() {
            match event {
                SessionEvent::PeerJoined { peer_id, name } => {
                    log::info!("{} joined as {}", name, peer_id);
                    if guest_paddle.is_none() {
                        let handle = host.adapter_mut().add_paddle(7.5, Some(peer_id.as_str()));
                        let id = host.spawn_entity(
                            "paddle-right",
                            handle,
                            "paddle",
                            SpawnTransform {
                                position: Vec2::new(7.5, 0.0),
                                ..Default::default()
                            },
                            None,
                            Some(peer_id),
                        )?;
                        host.adapter_mut().bind(handle, id);
                        guest_paddle = Some(handle);
                    }
                    if !started {
                        host.start_game()?;
                        started = true;
                    }
                }
                SessionEvent::PeerLeft { peer_id, reason } => {
                    log::info!("{} left: {}", peer_id, reason)
                }
                SessionEvent::Error(err) => log::warn!("Host error: {}", err),
                _ => {}
            }
        }

        if client.is_active() {
            client_loop.frame_at(&mut client, dt, Some(&input), now)?;
        }
        for event in client.drain_events().collect::<Vec<_>>() {
            match event {
                SessionEvent::Joined { host_name, peer_id } => {
                    log::info!("Joined {} as {}", host_name, peer_id)
                }
                SessionEvent::EntitySpawned(spawn) => {
                    let handle = client.adapter_mut().add_remote(spawn.transform.position);
                    client
                        .adapter_mut()
                        .bind(handle, spawn.net_entity_id.clone());
                    let local_id = format!("remote-{}", spawn.net_entity_id);
                    client.bind_remote_entity(local_id, handle, &spawn);
                }
                SessionEvent::GameStarted => log::info!("Game started"),
                SessionEvent::GameEnded { outcome } => log::info!("Game ended: {:?}", outcome),
                SessionEvent::Error(err) => log::warn!("Client error: {}", err),
                _ => {}
            }
        }

        if args.report_every > 0 && frame % args.report_every == 0 {
            let host_ball = host.adapter().position(ball).unwrap_or_default();
            let client_ball = client.adapter().find(&ball_id);
            let guest = guest_paddle
                .and_then(|handle| host.adapter().position(handle))
                .map(|p| p.y);
            log::info!(
                "frame {:4} | host ball ({:6.2}, {:6.2}) | client ball {} | guest paddle y {} | rtt {:.0} ms",
                frame,
                host_ball.x,
                host_ball.y,
                client_ball
                    .map(|p| format!("({:6.2}, {:6.2})", p.x, p.y))
                    .unwrap_or_else(|| "-".to_string()),
                guest
                    .map(|y| format!("{:5.2}", y))
                    .unwrap_or_else(|| "-".to_string()),
                client.latency(host.local_peer_id()),
            );
        }
    }

    if started {
        host.end_game(Some(GamePhase::Won))?;
        host_loop.frame_at(&mut host, FRAME.as_secs_f32(), None, now + FRAME)?;
    }

    let host_stats = host.stats();
    let client_stats = client.stats();
    log::info!(
        "Host sent {} messages ({} bytes, {} chunks); client received {} messages, dropped {}",
        host_stats.messages_sent,
        host_stats.bytes_sent,
        host_stats.chunks_sent,
        client_stats.messages_received,
        client_stats.messages_dropped,
    );
    let sync = client.synchronizer();
    log::info!(
        "Client buffered {} states, dropped {} deltas",
        sync.buffered_states(),
        sync.deltas_dropped()
    );

    client.disconnect();
    host.disconnect();
    client
        .adapter()
        .find(&ball_id)
        .context("ball never reached the client")?;
    Ok(())
}
