//! CLI command implementations.

use anyhow::{bail, Context, Result};
use groupcast::config::DEFAULT_NAMESPACE;
use groupcast::{
    AckResult, Channel, ChannelMessage, ConnectionState, Connector, ConnectorConfig,
    ConnectorError, EventEnvelope, EventFormatter, LocalHub,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long the demo waits for any single step.
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Run the two-connector demo.
pub fn demo(channel: &str, namespace: Option<&str>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    for line in runtime.block_on(run_demo(channel, namespace))? {
        println!("{line}");
    }
    Ok(())
}

async fn run_demo(channel: &str, namespace: Option<&str>) -> Result<Vec<String>> {
    let hub = Arc::new(LocalHub::new());
    let mut config = ConnectorConfig::default();
    if let Some(namespace) = namespace {
        config.namespace = Some(namespace.to_string());
    }

    let alice = connect(&hub, &config, "alice").await?;
    let bob = connect(&hub, &config, "bob").await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let bob_room = bob.private_channel(channel)?;
    bob_room.listen_to_all(Arc::new(move |event: &str, message: &ChannelMessage| {
        let from = message.from_user_id.as_deref().unwrap_or("server");
        let _ = tx.send(format!("[{from}] {event}: {}", message.payload));
    }));
    joined(bob_room.channel()).await?;

    let alice_room = alice.private_channel(channel)?;
    joined(alice_room.channel()).await?;

    tracing::info!(channel = %bob_room.name(), "Both connectors joined");

    alice_room
        .whisper("typing", serde_json::json!({ "user": "alice" }))
        .await?;
    hub.publish(
        bob_room.name(),
        &EventEnvelope::new(
            alice.formatter().format("OrderShipped"),
            serde_json::json!({ "id": 1 }),
        ),
    );

    let mut lines = Vec::new();
    for _ in 0..2 {
        let line = tokio::time::timeout(STEP_TIMEOUT, rx.recv())
            .await
            .context("timed out waiting for an event")?
            .context("event stream closed")?;
        lines.push(line);
    }

    alice.disconnect();
    bob.disconnect();

    let stats = hub.stats();
    lines.push(format!(
        "hub: {} connections, {} joins, {} group messages",
        stats.total_connections, stats.total_joins, stats.total_group_messages
    ));
    Ok(lines)
}

async fn connect(hub: &Arc<LocalHub>, config: &ConnectorConfig, user: &str) -> Result<Connector> {
    let config = ConnectorConfig {
        client_access_uri: Some(format!("local://hub?user_id={user}")),
        ..config.clone()
    };
    let connector = Connector::new(config).with_factory(Arc::new(hub.factory()));
    connector.connect()?;

    let mut state = connector.watch_state();
    let reached = tokio::time::timeout(
        STEP_TIMEOUT,
        state.wait_for(|state| {
            matches!(
                state,
                ConnectionState::Connected { .. } | ConnectionState::Disconnected { .. }
            )
        }),
    )
    .await
    .context("timed out connecting")??
    .clone();

    if let ConnectionState::Disconnected { message } = reached {
        bail!("{user} failed to connect: {message}");
    }
    Ok(connector)
}

async fn joined(channel: &Arc<Channel>) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let on_error = tx.clone();
    channel
        .subscribed(Arc::new(move |_: &AckResult| {
            let _ = tx.send(None);
        }))
        .error(Arc::new(move |error: &ConnectorError| {
            let _ = on_error.send(Some(error.to_string()));
        }));

    match tokio::time::timeout(STEP_TIMEOUT, rx.recv()).await {
        Ok(Some(None)) => Ok(()),
        Ok(Some(Some(error))) => bail!("joining {} failed: {error}", channel.name()),
        Ok(None) | Err(_) => bail!("timed out joining {}", channel.name()),
    }
}

/// Validate a configuration file and print it with defaults filled in.
pub fn config(file: &str) -> Result<()> {
    let json = std::fs::read_to_string(file).with_context(|| format!("reading {file}"))?;
    println!("{}", render_config(&json)?);
    Ok(())
}

fn render_config(json: &str) -> Result<String> {
    let config = ConnectorConfig::from_json(json).context("parsing configuration")?;
    config.validate().context("validating configuration")?;
    Ok(serde_json::to_string_pretty(&config)?)
}

/// Show the wire and display forms of an event name.
pub fn format(event: &str, namespace: Option<&str>) -> Result<()> {
    for line in format_lines(event, namespace) {
        println!("{line}");
    }
    Ok(())
}

fn format_lines(event: &str, namespace: Option<&str>) -> Vec<String> {
    let formatter = EventFormatter::new(Some(namespace.unwrap_or(DEFAULT_NAMESPACE).to_string()));
    let wire = formatter.format(event);
    let display = formatter.display_name(&wire);
    vec![format!("wire:    {wire}"), format!("display: {display}")]
}
