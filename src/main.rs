use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use janus_core::videocall::VideoCallEvent;
use janus_videocall::events::EventBus;
use janus_videocall::media::webrtc::WebRtcEngine;
use janus_videocall::signaller::VIDEO_CALL;
use janus_videocall::transport::TungsteniteTransportFactory;
use janus_videocall::{CallEvent, ClientConfig, Signaller, SignallerEvent};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

// Registers with the video-call plugin and optionally places or answers a call.
//
// Usage:
//   cargo run --features webrtc-engine -- -u alice
//   cargo run --features webrtc-engine -- -u bob --call alice
//   cargo run --features webrtc-engine -- -u alice --auto-answer --url ws://gw:8188

#[derive(Debug, Parser)]
#[command(version, about = "Janus video-call client")]
struct Args {
    /// Gateway WebSocket endpoint.
    #[arg(long, default_value = "ws://localhost:8188")]
    url: String,

    /// Name to register with the plugin.
    #[arg(short, long)]
    username: String,

    /// Peer to call once registered.
    #[arg(short, long)]
    call: Option<String>,

    /// Accept incoming calls instead of declining them.
    #[arg(long)]
    auto_answer: bool,
}

enum Command {
    Call(String),
    Answer,
    Decline,
    Quit,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(run(args))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let signaller = Signaller::new(
        ClientConfig::with_url(&args.url),
        Arc::new(TungsteniteTransportFactory::new()),
        Arc::new(WebRtcEngine::new()),
    );
    let (tx, mut rx) = mpsc::unbounded_channel();

    let quit = tx.clone();
    signaller.events().on(move |event: &SignallerEvent| match event {
        SignallerEvent::Connected { session_id } => info!("Session {session_id} created"),
        SignallerEvent::Success(frame) => debug!("Unclaimed success: {frame:?}"),
        SignallerEvent::Disconnected => {
            warn!("Gateway connection lost");
            let _ = quit.send(Command::Quit);
        }
    });

    let bus = Arc::new(EventBus::new());
    let callee = args.call.clone();
    let auto_answer = args.auto_answer;
    bus.on(move |event: &CallEvent| match event {
        CallEvent::Ready { handle_id } => info!("Video call handle {handle_id} ready"),
        CallEvent::Event(payload) => match &payload.event {
            VideoCallEvent::Registered { username } => {
                info!("Registered as {username}");
                if let Some(callee) = &callee {
                    let _ = tx.send(Command::Call(callee.clone()));
                }
            }
            VideoCallEvent::IncomingCall { username } => {
                info!("Incoming call from {username}");
                let _ = tx.send(if auto_answer {
                    Command::Answer
                } else {
                    Command::Decline
                });
            }
            _ => info!("Event: {} {:?}", payload.event_type(), payload.fields),
        },
        CallEvent::StateChanged(state) => info!("Call state: {state:?}"),
        CallEvent::Stream(stream) => info!("Receiving {:?} ({})", stream.kind, stream.track_id),
        CallEvent::UpdateStats(stats) => info!(
            "in {} kbps {}x{}, out {} kbps {}x{}",
            stats.incoming_kbps,
            stats.incoming_video_resolution.width,
            stats.incoming_video_resolution.height,
            stats.outgoing_kbps,
            stats.outgoing_video_resolution.width,
            stats.outgoing_video_resolution.height
        ),
        CallEvent::Error(e) => error!("Video call error: {e}"),
    });

    signaller.init().await?;
    let call = signaller.attach(VIDEO_CALL, bus).await?;
    call.register(&args.username).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, hanging up");
                if call.state().can_decline() && let Err(e) = call.decline().await {
                    warn!("Hangup failed: {e}");
                }
                break;
            }
            command = rx.recv() => {
                let result = match command {
                    Some(Command::Call(callee)) => call.call(&callee).await,
                    Some(Command::Answer) => call.answer().await,
                    Some(Command::Decline) => call.decline().await,
                    Some(Command::Quit) | None => break,
                };
                if let Err(e) = result {
                    error!("Command failed: {e}");
                }
            }
        }
    }

    signaller.destroy().await;
    Ok(())
}
