//! Queue Monitor Demo
//!
//! Runs a queue monitor against the in-memory mock transport:
//! 1. Connects and answers the boot-time resync with two queues
//! 2. Plays a burst of pause events for an agent logged into both queues
//! 3. Prints every notification the monitor emits
//! 4. Shuts down on Ctrl-C or after `--duration` seconds

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::time::sleep;
use tracing::{info, warn};

use rvoip_queue_monitor::prelude::*;
use rvoip_queue_monitor::transport::mock::{MockTransport, Reply};

#[derive(Parser, Debug)]
#[command(author, version, about = "Queue monitor against a mock switch", long_about = None)]
struct Args {
    /// Debounce window in milliseconds
    #[arg(short, long, default_value = "500")]
    window: u64,

    /// Agent interface used for the simulated pause burst
    #[arg(short, long, default_value = "SIP/1001")]
    agent: String,

    /// Seconds to run before shutting down (0 waits for Ctrl-C)
    #[arg(short, long, default_value = "5")]
    duration: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn snapshot(agent: &str) -> Vec<RawEvent> {
    vec![
        RawEvent::new("QueueParams").with("Queue", "sales").with("Strategy", "rrmemory"),
        RawEvent::new("QueueMember")
            .with("Queue", "sales")
            .with("Name", "Alice")
            .with("Location", agent)
            .with("Status", "1"),
        RawEvent::new("QueueMember")
            .with("Queue", "sales")
            .with("Name", "Bob")
            .with("Location", "SIP/1002")
            .with("Status", "2"),
        RawEvent::new("QueueParams").with("Queue", "support"),
        RawEvent::new("QueueMember")
            .with("Queue", "support")
            .with("Name", "Alice")
            .with("Location", agent)
            .with("Status", "1"),
        RawEvent::new("QueueStatusComplete"),
    ]
}

fn pause(queue: &str, agent: &str) -> RawEvent {
    RawEvent::new("QueueMemberPause")
        .with("Queue", queue)
        .with("Interface", agent)
        .with("Paused", "1")
        .with("PausedReason", "Lunch")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    let transport = Arc::new(MockTransport::new());
    transport.set_reply(
        "QueueStatus",
        Reply::Respond(ActionResponse::success().with_events(snapshot(&args.agent))),
    );

    let config = QueueMonitorConfig::new("127.0.0.1", 5038, "admin", "secret")
        .with_debounce_window(Duration::from_millis(args.window));
    let monitor = QueueMonitor::new(config, transport.clone())?;

    let mut events = monitor.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                QueueMonitorEvent::QueuesUpdated { queues } => {
                    info!("📋 {} queues cached", queues.len());
                }
                QueueMonitorEvent::MemberPauseChanged { queues, member, paused } => {
                    info!(
                        "⏸️ {} paused={} ({}) in {:?}",
                        member.extension, paused, member.paused_reason, queues
                    );
                }
                other => info!("📣 {}", other.name()),
            }
        }
    });

    monitor.connect().await;
    sleep(Duration::from_millis(100)).await;

    transport.emit_event(RawEvent::new("FullyBooted"));
    sleep(Duration::from_millis(100)).await;

    transport.emit_event(pause("sales", &args.agent));
    sleep(Duration::from_millis(args.window / 5)).await;
    transport.emit_event(pause("support", &args.agent));

    if !monitor.pause_member(&args.agent, Some("Lunch"), None).await {
        warn!("Pause command was not accepted");
    }

    if args.duration == 0 {
        tokio::signal::ctrl_c().await?;
    } else {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sleep(Duration::from_secs(args.duration)) => {}
        }
    }

    let stats = monitor.stats();
    info!("📊 Final stats: {}", serde_json::to_string(&stats)?);
    if let Some(agent) = monitor.agent(&args.agent) {
        info!("👤 {} is in {:?}, paused={}", agent.extension(), agent.queues, agent.member.paused);
    }

    monitor.shutdown().await;
    Ok(())
}
