//! Zonelink command-line agent: entry point.
//!
//! Discovers speaker groups on the local network and talks to them.
//!
//! # Usage
//!
//! ```text
//! zonelink [OPTIONS] <COMMAND>
//!
//! Commands:
//!   groups    Run one probe cycle and print the discovered groups
//!   watch     Print the group list every time it changes, until Ctrl+C
//!   control   Connect to one group's coordinator and send a command
//!   init-config  Write a config.toml holding the defaults
//!
//! Options:
//!   --config <PATH>          config.toml to load [env: ZONELINK_CONFIG]
//!   --log-level <FILTER>     Overrides log_level from the config [env: ZONELINK_LOG_LEVEL]
//!   --trust-anchor <PEM>     Device root certificate; repeatable
//! ```
//!
//! # Examples
//!
//! ```text
//! zonelink groups
//! zonelink control --group Kitchen volume 25
//! zonelink control --group "Living Room" --insecure pause
//! zonelink control --group G_000E58:12 monitor
//! zonelink --trust-anchor /etc/zonelink/root.pem init-config
//! ```
//!
//! `RUST_LOG` takes precedence over both `--log-level` and the config file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use zonelink_core::discovery::advertisement::insecure_variant;
use zonelink_core::protocol::event::PlaybackState;
use zonelink_core::{Envelope, GroupEvent, GroupSummary, Topic};

use zonelink_agent::application::{
    ChannelListener, DiscoveryService, GroupControls, GroupListener, TopicHandler,
};
use zonelink_agent::domain::{AgentConfig, SessionError, SessionEvent};
use zonelink_agent::infrastructure::config_file::config_file_path;
use zonelink_agent::infrastructure::{
    load_config, save_config, MulticastSsdpSocket, SessionConnector,
};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Speaker-group discovery and control.
#[derive(Debug, Parser)]
#[command(
    name = "zonelink",
    about = "Discover smart-speaker groups and control them over a secure session",
    version
)]
struct Cli {
    /// Configuration file.  Defaults to the platform config directory.
    #[arg(long, global = true, env = "ZONELINK_CONFIG")]
    config: Option<PathBuf>,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[arg(long, global = true, env = "ZONELINK_LOG_LEVEL")]
    log_level: Option<String>,

    /// PEM file holding a device root certificate.  Added to the anchors
    /// listed in the config file.
    #[arg(long = "trust-anchor", global = true)]
    trust_anchors: Vec<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Run one probe cycle and print the discovered groups.
    Groups {
        /// Seconds to collect replies before printing.
        #[arg(long, default_value_t = 3)]
        wait: u64,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Print the group list every time it changes, until Ctrl+C.
    Watch {
        /// Seconds between probe cycles.
        #[arg(long, default_value_t = 60)]
        refresh: u64,
    },

    /// Connect to a group's coordinator and send a command.
    Control {
        /// Group name (case-insensitive) or group id.
        #[arg(long)]
        group: String,
        /// Seconds to wait for discovery before connecting.
        #[arg(long, default_value_t = 3)]
        wait: u64,
        /// Use the plain `ws://` endpoint even if a secure one is advertised.
        #[arg(long)]
        insecure: bool,
        #[command(subcommand)]
        action: Action,
    },

    /// Write a config.toml holding the defaults and any command-line
    /// overrides, at `--config` or the platform location.
    InitConfig {
        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Action {
    /// Print the current group volume.
    GetVolume,
    /// Set the group volume (0-100).
    Volume { level: i64 },
    /// Change the group volume by a signed step (-100 to 100).
    VolumeDelta {
        #[arg(allow_hyphen_values = true)]
        delta: i64,
    },
    Mute,
    Unmute,
    Play,
    Pause,
    Next,
    Previous,
    /// Subscribe to every feature channel and print events until Ctrl+C.
    Monitor,
}

impl Action {
    /// The command whose reply confirms this action; `None` for `monitor`.
    fn command_name(self) -> Option<&'static str> {
        Some(match self {
            Action::GetVolume => "getVolume",
            Action::Volume { .. } => "setVolume",
            Action::VolumeDelta { .. } => "setRelativeVolume",
            Action::Mute | Action::Unmute => "setMute",
            Action::Play => "play",
            Action::Pause => "pause",
            Action::Next => "skipToNextTrack",
            Action::Previous => "skipToPreviousTrack",
            Action::Monitor => return None,
        })
    }

    fn topic(self) -> Topic {
        match self {
            Action::GetVolume
            | Action::Volume { .. }
            | Action::VolumeDelta { .. }
            | Action::Mute
            | Action::Unmute => Topic::GroupVolume,
            Action::Play | Action::Pause | Action::Next | Action::Previous => Topic::Playback,
            Action::Monitor => Topic::Global,
        }
    }

    fn perform(self, controls: &GroupControls) -> Result<(), SessionError> {
        match self {
            Action::GetVolume => controls.volume.get_volume(),
            Action::Volume { level } => controls.volume.set_volume(level),
            Action::VolumeDelta { delta } => controls.volume.set_relative_volume(delta),
            Action::Mute => controls.volume.set_mute(true),
            Action::Unmute => controls.volume.set_mute(false),
            Action::Play => controls.playback.play(),
            Action::Pause => controls.playback.pause(),
            Action::Next => controls.playback.skip_to_next_track(),
            Action::Previous => controls.playback.skip_to_previous_track(),
            Action::Monitor => Ok(()),
        }
    }
}

impl Cli {
    /// Loads the config file and applies command-line overrides.
    fn load_agent_config(&self) -> anyhow::Result<AgentConfig> {
        let config =
            load_config(self.config.as_deref()).context("failed to load configuration")?;
        Ok(self.apply_overrides(config))
    }

    fn apply_overrides(&self, mut config: AgentConfig) -> AgentConfig {
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        config
            .session
            .trust_anchors
            .extend(self.trust_anchors.iter().cloned());
        config
    }

    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => config_file_path().context("no --config given"),
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // Needs no network and must work even when the existing file is broken.
    if let CliCommand::InitConfig { force } = cli.command {
        let path = cli.config_path()?;
        init_config(&cli.apply_overrides(AgentConfig::default()), &path, force)?;
        println!("wrote {}", path.display());
        return Ok(());
    }
    let config = cli.load_agent_config()?;

    // `RUST_LOG` wins; otherwise the configured level applies.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let socket =
        MulticastSsdpSocket::bind(&config.discovery).context("failed to open SSDP socket")?;
    let discovery = DiscoveryService::new(Arc::new(socket), config.discovery.clone());
    discovery.start().context("failed to start discovery")?;

    let result = match cli.command {
        CliCommand::Groups { wait, json } => run_groups(&discovery, wait, json).await,
        CliCommand::Watch { refresh } => run_watch(&discovery, refresh).await,
        CliCommand::Control {
            group,
            wait,
            insecure,
            action,
        } => run_control(&discovery, &config, &group, wait, insecure, action).await,
        CliCommand::InitConfig { .. } => Ok(()),
    };

    discovery.shutdown().await;
    result
}

// ── Commands ──────────────────────────────────────────────────────────────────

async fn run_groups(discovery: &DiscoveryService, wait: u64, json: bool) -> anyhow::Result<()> {
    discovery.refresh_groups().await.context("failed to send probe")?;
    tokio::time::sleep(Duration::from_secs(wait)).await;

    let groups = discovery.groups();
    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
    } else {
        print!("{}", format_groups(&groups));
    }
    Ok(())
}

async fn run_watch(discovery: &DiscoveryService, refresh: u64) -> anyhow::Result<()> {
    let (listener, mut updates) = ChannelListener::new(16);
    let listener: Arc<dyn GroupListener> = listener;
    discovery.subscribe(Arc::clone(&listener));

    let mut cycle = tokio::time::interval(Duration::from_secs(refresh.max(1)));
    let mut last_printed: Option<Vec<GroupSummary>> = None;
    let ctrl_c = wait_for_ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = cycle.tick() => {
                if let Err(e) = discovery.refresh_groups().await {
                    warn!("probe cycle not started: {e}");
                }
            }
            Some(groups) = updates.recv() => {
                // Cycle broadcasts repeat unchanged lists; print changes only.
                if last_printed.as_ref() != Some(&groups) {
                    print!("{}", format_groups(&groups));
                    println!();
                    last_printed = Some(groups);
                }
            }
            _ = &mut ctrl_c => break,
        }
    }
    discovery.unsubscribe(&listener);
    Ok(())
}

fn init_config(config: &AgentConfig, path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists; pass --force to replace it", path.display());
    }
    save_config(config, path)
        .with_context(|| format!("failed to write {}", path.display()))
}

async fn run_control(
    discovery: &DiscoveryService,
    config: &AgentConfig,
    query: &str,
    wait: u64,
    insecure: bool,
    action: Action,
) -> anyhow::Result<()> {
    discovery.refresh_groups().await.context("failed to send probe")?;
    tokio::time::sleep(Duration::from_secs(wait)).await;

    let groups = discovery.groups();
    let group = find_group(&groups, query)
        .ok_or_else(|| anyhow!("no group named or with id {query:?}"))?;
    let address = if insecure {
        insecure_variant(&group.address)
    } else {
        group.address.clone()
    };

    let (connector, mut events) = SessionConnector::from_config(config.session.clone())
        .context("failed to load trust anchors")?;
    connector
        .connect(&group.household_id, &group.group_id, &address)
        .await
        .with_context(|| format!("failed to connect to {} at {address}", group.group_name))?;
    info!(group = %group.group_name, %address, "connected");

    let controls = GroupControls::new(Arc::new(connector.clone()));
    let outcome = match action.command_name() {
        Some(name) => {
            let timeout = config.session.connect_timeout();
            send_and_await_reply(&connector, &controls, action, name, timeout).await
        }
        None => monitor(&controls, &mut events).await,
    };

    connector.disconnect().await;
    outcome
}

async fn send_and_await_reply(
    connector: &SessionConnector,
    controls: &GroupControls,
    action: Action,
    command_name: &'static str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let (tx, mut replies) = mpsc::unbounded_channel::<Envelope>();
    let handler: TopicHandler = Arc::new(move |envelope: &Envelope| {
        let _ = tx.send(envelope.clone());
    });
    connector.router().listen(action.topic(), Some(handler));

    action.perform(controls)?;

    let reply = tokio::time::timeout(timeout, async {
        while let Some(envelope) = replies.recv().await {
            if envelope.header.response.as_deref() == Some(command_name) {
                return Some(envelope);
            }
        }
        None
    })
    .await
    .map_err(|_| anyhow!("no reply to {command_name} within {timeout:?}"))?
    .ok_or_else(|| anyhow!("session closed before {command_name} was answered"))?;

    match reply.header.success {
        Some(false) => bail!("{command_name} failed: {}", reply.body),
        _ if reply.body.as_object().is_some_and(|b| !b.is_empty()) => {
            println!("{command_name}: {}", reply.body);
        }
        _ => println!("{command_name}: ok"),
    }
    Ok(())
}

async fn monitor(
    controls: &GroupControls,
    events: &mut mpsc::Receiver<SessionEvent>,
) -> anyhow::Result<()> {
    let print = |event: GroupEvent| println!("{}", describe_event(&event));
    controls.volume.channel().subscribe_events(print)?;
    controls.playback.channel().subscribe_events(print)?;
    controls.metadata.subscribe_events(print)?;
    controls.global.subscribe_events(print)?;

    let ctrl_c = wait_for_ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => return Ok(()),
            event = events.recv() => match event {
                Some(SessionEvent::Disconnected) | None => {
                    info!("session closed by the device");
                    return Ok(());
                }
                Some(SessionEvent::Error(e)) => return Err(e).context("session failed"),
                Some(SessionEvent::Connected { .. }) => {}
            },
        }
    }
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C; shutting down"),
        Err(e) => {
            error!("failed to listen for Ctrl+C signal: {e}");
            std::future::pending::<()>().await;
        }
    }
}

// ── Presentation helpers ──────────────────────────────────────────────────────

/// Matches by group id first, then by case-insensitive name.
fn find_group<'a>(groups: &'a [GroupSummary], query: &str) -> Option<&'a GroupSummary> {
    groups.iter().find(|g| g.group_id == query).or_else(|| {
        let wanted = query.to_lowercase();
        groups.iter().find(|g| g.group_name.to_lowercase() == wanted)
    })
}

fn format_groups(groups: &[GroupSummary]) -> String {
    if groups.is_empty() {
        return "no groups found\n".to_string();
    }
    // Display width is counted in characters, not UTF-8 bytes.
    let width = groups
        .iter()
        .map(|g| g.group_name.chars().count())
        .max()
        .unwrap_or(0);
    groups
        .iter()
        .map(|g| {
            let padding = width - g.group_name.chars().count();
            format!(
                "{}{:padding$}  {}  {}\n",
                g.group_name, "", g.group_id, g.address
            )
        })
        .collect()
}

fn describe_event(event: &GroupEvent) -> String {
    match event {
        GroupEvent::GroupVolume(status) => format!(
            "volume {}{}{}",
            status.volume,
            if status.muted { " (muted)" } else { "" },
            if status.fixed { " (fixed)" } else { "" }
        ),
        GroupEvent::PlaybackStatus(status) => {
            let state = match status.playback_state {
                PlaybackState::Idle => "idle",
                PlaybackState::Buffering => "buffering",
                PlaybackState::Paused => "paused",
                PlaybackState::Playing => "playing",
                PlaybackState::Unknown => "unknown",
            };
            format!("playback {state}")
        }
        GroupEvent::MetadataStatus(metadata) => {
            match metadata.current_track().and_then(|t| t.name.as_deref().map(|name| (name, t))) {
                Some((name, track)) => match track.artist_name() {
                    Some(artist) => format!("now playing {name} by {artist}"),
                    None => format!("now playing {name}"),
                },
                None => "now playing nothing".to_string(),
            }
        }
        GroupEvent::CoordinatorChanged(change) => format!(
            "coordinator changed: {:?}{}",
            change.group_status,
            change
                .websocket_url
                .as_deref()
                .map(|url| format!(", reconnect to {url}"))
                .unwrap_or_default()
        ),
        GroupEvent::Other { event_type, .. } => format!("event {event_type}"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
