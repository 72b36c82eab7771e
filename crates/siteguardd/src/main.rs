//! siteguardd - The siteguard background service
//!
//! This is the main entry point for the siteguardd service.
//! It wires together all the components:
//! - Configuration loading
//! - Store initialization and install-time defaults
//! - Core engine (tracker, ledger, resolver)
//! - Tab registry fed by the browser bridge
//! - IPC server and the block executor on top of it

mod executor;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Parser;
use siteguard_api::{
    ClientRole, Command, ErrorCode, ErrorInfo, Event, EventPayload, HealthStatus, Response,
    ResponsePayload,
};
use siteguard_config::{Policy, load_config};
use siteguard_core::{CoreEngine, CoreEvent, EngineError, EngineSettings};
use siteguard_host_api::{BlockExecutor, TabRegistry};
use siteguard_ipc::{IpcServer, ServerMessage};
use siteguard_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use siteguard_util::{ClientId, default_config_path, next_rollover};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::executor::{IpcBlockExecutor, dispatch_events};

/// siteguardd - Time-based website access policy service
#[derive(Parser, Debug)]
#[command(name = "siteguardd")]
#[command(about = "Time-based website access policy service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/siteguard/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set SITEGUARD_SOCKET env var)
    #[arg(short, long, env = "SITEGUARD_SOCKET")]
    socket: Option<PathBuf>,

    /// Data directory override (or set SITEGUARD_DATA_DIR env var)
    #[arg(short, long, env = "SITEGUARD_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main service state. The run loop is the only owner of the engine.
struct Service {
    engine: CoreEngine,
    tabs: TabRegistry,
    ipc: Arc<IpcServer>,
    executor: Arc<dyn BlockExecutor>,
    store: Arc<dyn Store>,
    tick_interval: Duration,
    rollover_buffer: Duration,
    block_page_url: Option<String>,
}

fn load_policy(path: &Path) -> Result<Policy> {
    if !path.exists() {
        info!(config_path = %path.display(), "No config file, using built-in defaults");
        return Ok(Policy::default());
    }

    load_config(path).with_context(|| format!("Failed to load config from {:?}", path))
}

/// Tokio deadline for a wall-clock instant
fn deadline_for(target: DateTime<Local>, now: DateTime<Local>) -> Instant {
    Instant::now() + (target - now).to_std().unwrap_or(Duration::ZERO)
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let policy = load_policy(&args.config)?;

        info!(
            config_path = %args.config.display(),
            site_count = policy.sites.len(),
            mode = %policy.service.mode,
            "Configuration loaded"
        );

        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| policy.service.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| policy.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("siteguardd.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        store.append_audit(AuditEvent::new(AuditEventType::ServiceStarted))?;

        let engine = CoreEngine::new(
            store.clone(),
            EngineSettings::from_service(&policy.service),
            siteguard_util::now(),
        );
        engine
            .seed_defaults(&policy)
            .context("Failed to seed defaults")?;

        let mut ipc = IpcServer::new(&socket_path);
        ipc.start().await?;
        let ipc = Arc::new(ipc);

        info!(socket_path = %socket_path.display(), "IPC server started");

        Ok(Self {
            engine,
            tabs: TabRegistry::new(),
            executor: Arc::new(IpcBlockExecutor::new(ipc.clone())),
            ipc,
            store,
            tick_interval: policy.service.tick_interval,
            rollover_buffer: policy.service.rollover_buffer,
            block_page_url: policy.service.block_page_url,
        })
    }

    async fn run(mut self) -> Result<()> {
        let mut ipc_messages = self
            .ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        let ipc_accept = self.ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

        let mut tick_timer = tokio::time::interval(self.tick_interval);
        // A suspended machine gets one catch-up tick, not a burst
        tick_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let now = siteguard_util::now();
        let next = next_rollover(&now, self.rollover_buffer);
        debug!(next_rollover = %next, "Rollover scheduled");
        let rollover_timer = tokio::time::sleep_until(deadline_for(next, now));
        tokio::pin!(rollover_timer);

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                _ = tick_timer.tick() => {
                    let now = siteguard_util::now();
                    let events = self.engine.tick(&self.tabs, now);
                    self.dispatch(events).await;
                }

                _ = &mut rollover_timer => {
                    let now = siteguard_util::now();
                    match self.engine.daily_rollover(now) {
                        Ok(events) => self.dispatch(events).await,
                        Err(e) => warn!(error = %e, "Daily rollover failed"),
                    }

                    let next = next_rollover(&now, self.rollover_buffer);
                    debug!(next_rollover = %next, "Rollover scheduled");
                    rollover_timer.as_mut().reset(deadline_for(next, now));
                }

                Some(msg) = ipc_messages.recv() => {
                    self.handle_ipc_message(msg).await;
                }
            }
        }

        info!("Shutting down siteguardd");

        self.engine.pause_all(siteguard_util::now());
        self.ipc.broadcast_event(Event::new(EventPayload::Shutdown));

        if let Err(e) = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ServiceStopped))
        {
            warn!(error = %e, "Failed to log service shutdown");
        }

        self.ipc.shutdown();

        info!("Shutdown complete");
        Ok(())
    }

    /// Turn engine events into block requests and pushed events
    async fn dispatch(&self, events: Vec<CoreEvent>) {
        let ipc = &self.ipc;
        dispatch_events(
            self.executor.as_ref(),
            self.block_page_url.as_deref(),
            events,
            |payload| ipc.broadcast_event(Event::new(payload)),
        )
        .await;
    }

    async fn handle_ipc_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                let response = self
                    .handle_command(&client_id, request.request_id, request.command)
                    .await;

                let _ = self.ipc.send_response(&client_id, response).await;
            }

            ServerMessage::ClientConnected { client_id, info } => {
                info!(
                    client_id = %client_id,
                    role = ?info.role,
                    uid = ?info.uid,
                    "Client connected"
                );

                let _ = self.store.append_audit(AuditEvent::new(
                    AuditEventType::ClientConnected {
                        client_id: client_id.to_string(),
                        role: format!("{:?}", info.role),
                        uid: info.uid,
                    },
                ));
            }

            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");

                let _ = self.store.append_audit(AuditEvent::new(
                    AuditEventType::ClientDisconnected {
                        client_id: client_id.to_string(),
                    },
                ));
            }
        }
    }

    async fn handle_command(
        &mut self,
        client_id: &ClientId,
        request_id: u64,
        command: Command,
    ) -> Response {
        let now = siteguard_util::now();

        let role = self
            .ipc
            .get_client_info(client_id)
            .await
            .map(|info| info.role)
            .unwrap_or(ClientRole::Observer);

        if command.is_admin_only() && !role.can_configure() {
            return Response::error(
                request_id,
                ErrorInfo::new(ErrorCode::PermissionDenied, "Admin role required"),
            );
        }

        match command {
            Command::Browser { event } => {
                if !role.can_report_browser_events() {
                    return Response::error(
                        request_id,
                        ErrorInfo::new(ErrorCode::PermissionDenied, "Bridge role required"),
                    );
                }

                self.tabs.apply(&event);
                let events = self.engine.handle_browser_event(&event, &self.tabs, now);
                let blocked = events
                    .iter()
                    .filter(|e| matches!(e, CoreEvent::BlockTab { .. }))
                    .count();
                self.dispatch(events).await;

                Response::success(request_id, ResponsePayload::Accepted { blocked })
            }

            Command::GetStatus => match self.engine.status(now) {
                Ok(status) => Response::success(request_id, ResponsePayload::Status(status)),
                Err(e) => engine_error(request_id, e),
            },

            Command::GetRules => match self.engine.rules() {
                Ok(rules) => Response::success(request_id, ResponsePayload::Rules { rules }),
                Err(e) => engine_error(request_id, e),
            },

            Command::SetRule { host, rule } => {
                match self.engine.set_rule(host, rule, &self.tabs, now) {
                    Ok(events) => {
                        self.dispatch(events).await;
                        Response::success(request_id, ResponsePayload::RuleSaved)
                    }
                    Err(e) => engine_error(request_id, e),
                }
            }

            Command::RemoveRule { host } => match self.engine.remove_rule(&host, &self.tabs, now) {
                Ok((existed, events)) => {
                    self.dispatch(events).await;
                    Response::success(request_id, ResponsePayload::RuleRemoved { existed })
                }
                Err(e) => engine_error(request_id, e),
            },

            Command::SetGlobalLimits { limits } => {
                match self.engine.set_global_limits(limits, &self.tabs, now) {
                    Ok(events) => {
                        self.dispatch(events).await;
                        Response::success(request_id, ResponsePayload::GlobalLimitsSet)
                    }
                    Err(e) => engine_error(request_id, e),
                }
            }

            Command::SetMode { mode } => match self.engine.set_mode(mode, &self.tabs, now) {
                Ok(events) => {
                    self.dispatch(events).await;
                    Response::success(request_id, ResponsePayload::ModeSet)
                }
                Err(e) => engine_error(request_id, e),
            },

            Command::DisableTemporarily { minutes } => {
                match self.engine.disable_temporarily(minutes, &self.tabs, now) {
                    Ok((until, events)) => {
                        self.dispatch(events).await;
                        Response::success(request_id, ResponsePayload::TemporarilyDisabled { until })
                    }
                    Err(e) => engine_error(request_id, e),
                }
            }

            Command::ClearUsage => match self.engine.clear_usage(&self.tabs, now) {
                Ok(events) => {
                    self.dispatch(events).await;
                    Response::success(request_id, ResponsePayload::UsageCleared)
                }
                Err(e) => engine_error(request_id, e),
            },

            Command::GetUsage { date } => {
                let date = date.unwrap_or_else(|| now.date_naive());
                match self.engine.usage_summary(date) {
                    Ok(entries) => Response::success(request_id, ResponsePayload::Usage { entries }),
                    Err(e) => engine_error(request_id, e),
                }
            }

            Command::GetActivationReport { date, resolution } => {
                let date = date.unwrap_or_else(|| now.date_naive());
                match self.engine.activation_report(date, resolution, now) {
                    Ok(report) => {
                        Response::success(request_id, ResponsePayload::ActivationReport(report))
                    }
                    Err(e) => engine_error(request_id, e),
                }
            }

            Command::CheckUrl { url } => match self.engine.check_url(&url, now) {
                Ok(check) => {
                    self.dispatch(check.events).await;
                    Response::success(
                        request_id,
                        ResponsePayload::UrlVerdict {
                            host: check.host,
                            verdict: check.verdict,
                        },
                    )
                }
                Err(e) => engine_error(request_id, e),
            },

            Command::GetHealth => {
                let store_ok = self.engine.is_store_healthy();
                let health = HealthStatus {
                    live: true,
                    ready: store_ok,
                    store_ok,
                    bridge_connected: self.ipc.subscriber_count().await > 0,
                };
                Response::success(request_id, ResponsePayload::Health(health))
            }

            Command::SubscribeEvents => Response::success(
                request_id,
                ResponsePayload::Subscribed {
                    client_id: client_id.clone(),
                },
            ),

            Command::UnsubscribeEvents => {
                Response::success(request_id, ResponsePayload::Unsubscribed)
            }

            Command::Ping => Response::success(request_id, ResponsePayload::Pong),
        }
    }
}

fn engine_error(request_id: u64, error: EngineError) -> Response {
    let code = match &error {
        EngineError::Store(_) => ErrorCode::StoreError,
        EngineError::InvalidRule { .. } => ErrorCode::InvalidRule,
        EngineError::InvalidDuration | EngineError::InvalidDate => ErrorCode::InvalidRequest,
    };
    warn!(request_id, error = %error, "Command failed");
    Response::error(request_id, ErrorInfo::new(code, error.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mock_time = siteguard_util::is_mock_time_active(),
        "siteguardd starting"
    );

    let service = Service::new(&args).await?;
    service.run().await
}
