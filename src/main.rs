use std::time::Duration;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use analysis_bridge::config::AppConfig;
use analysis_bridge::models::{CallContext, Request};
use analysis_bridge::services::providers::Provider;
use analysis_bridge::services::ResilientClient;
use analysis_bridge::state::AppState;

const PROBE_BODY_PREVIEW_CHARS: usize = 400;

type LogReloadHandle =
    tracing_subscriber::reload::Handle<tracing_subscriber::EnvFilter, tracing_subscriber::Registry>;

struct CommandResult {
    message: String,
    shutdown: bool,
}

impl CommandResult {
    fn reply(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            shutdown: false,
        }
    }
}

#[derive(Clone)]
struct CliContext {
    state: AppState,
    log_handle: Option<LogReloadHandle>,
    shutdown: CancellationToken,
}

fn parse_command(input: &str) -> (&str, Vec<&str>) {
    let trimmed = input.trim();
    let mut parts = trimmed.split_whitespace();
    let cmd = parts.next().unwrap_or("");
    let args: Vec<&str> = parts.collect();
    (cmd, args)
}

/// `None` selects every registered provider; an unknown name is an error message.
fn select_providers(ctx: &CliContext, arg: Option<&&str>) -> Result<Vec<Provider>, String> {
    match arg {
        None => Ok(ctx.state.registry.list_providers()),
        Some(name) => name
            .parse::<Provider>()
            .map(|p| vec![p])
            .map_err(|e| e.to_string()),
    }
}

fn format_provider_status(state: &AppState) -> String {
    let mut lines = Vec::new();

    for provider in state.registry.list_providers() {
        let config = state.config.provider(provider);
        let auth = if config.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
            "api_key"
        } else {
            "none"
        };
        let breaker = state
            .registry
            .get(provider)
            .map(|client| format!("{:?}", client.breaker().state()))
            .unwrap_or_else(|| "unregistered".to_string());

        lines.push(format!(
            "{provider} - base URL: {}, timeout: {}s, retries: {}, auth: {auth}, circuit: {breaker}",
            config.base_url, config.timeout_secs, config.retry.max_retries
        ));
    }

    if lines.is_empty() {
        "No providers registered".to_string()
    } else {
        lines.join("\n")
    }
}

fn command_help(args: &[&str]) -> CommandResult {
    let verbose = args.first().is_some_and(|v| *v == "verbose");
    let message = if verbose {
        serde_json::json!({
            "commands": [
                "/help [verbose]",
                "/providers",
                "/circuit [llm|ocr|search]",
                "/metrics [llm|ocr|search]",
                "/logs level <trace|debug|info|warn|error>",
                "/reload",
                "/probe <llm|ocr|search> <path>",
                "/quit"
            ]
        })
        .to_string()
    } else {
        "/help - show commands\n/providers - show provider configuration\n/circuit [provider] - show circuit breaker status\n/metrics [provider] - show call metrics\n/logs level <level> - change log level\n/reload - validate config reload (dry-run)\n/probe <provider> <path> - send a GET through the resilient client\n/quit - stop the console"
            .to_string()
    };

    CommandResult::reply(message)
}

fn command_providers(ctx: &CliContext) -> CommandResult {
    CommandResult::reply(format_provider_status(&ctx.state))
}

fn command_circuit(args: &[&str], ctx: &CliContext) -> CommandResult {
    let providers = match select_providers(ctx, args.first()) {
        Ok(providers) => providers,
        Err(e) => return CommandResult::reply(e),
    };

    let lines: Vec<String> = providers
        .into_iter()
        .filter_map(|p| ctx.state.registry.get(p))
        .map(|client| {
            let stats = client.breaker().stats();
            format!(
                "Circuit breaker {}: state={:?}, consecutive_failures={}/{}, consecutive_successes={}/{}, probes_in_flight={}/{}, timeout={}s{}",
                stats.name,
                stats.state,
                stats.counts.consecutive_failures,
                stats.failure_threshold,
                stats.counts.consecutive_successes,
                stats.success_threshold,
                stats.in_flight_probes,
                stats.half_open_max_probes,
                stats.timeout_secs,
                stats
                    .opened_at
                    .map(|at| format!(", opened_at={}", at.to_rfc3339()))
                    .unwrap_or_default()
            )
        })
        .collect();

    CommandResult::reply(lines.join("\n"))
}

async fn command_metrics(args: &[&str], ctx: &CliContext) -> CommandResult {
    let providers = match select_providers(ctx, args.first()) {
        Ok(providers) => providers,
        Err(e) => return CommandResult::reply(e),
    };

    let mut lines = Vec::new();
    for provider in providers {
        let Some(client) = ctx.state.registry.get(provider) else {
            continue;
        };
        let stats = client.metrics().get_stats().await;
        lines.push(format!(
            "Metrics {provider}: calls={} failed={} success_rate={:.2}% attempts={} retries={} rejections={} avg_latency_ms={:.2} p95_latency_ms={}",
            stats.total_calls,
            stats.failed_calls,
            stats.success_rate,
            stats.total_attempts,
            stats.retries,
            stats.circuit_rejections,
            stats.avg_latency_ms,
            stats.p95_latency_ms
        ));
    }

    CommandResult::reply(lines.join("\n"))
}

fn command_logs(args: &[&str], ctx: &CliContext) -> CommandResult {
    if args.len() == 2 && args[0] == "level" {
        let level = args[1].to_lowercase();
        if let Some(handle) = &ctx.log_handle {
            return match EnvFilter::try_new(&level) {
                Ok(filter) => {
                    if handle.reload(filter).is_ok() {
                        CommandResult::reply(format!("Log level set to {level}"))
                    } else {
                        CommandResult::reply("Failed to update log level")
                    }
                }
                Err(e) => CommandResult::reply(format!("Invalid log level: {e}")),
            };
        }

        return CommandResult::reply("Log level reload not available in this build");
    }

    CommandResult::reply("Usage: /logs level <trace|debug|info|warn|error>")
}

fn command_reload() -> CommandResult {
    match AppConfig::new() {
        Ok(new_config) => CommandResult::reply(format!(
            "Config reload validated (not applied): llm={}, ocr={}, search={}, log_level={}",
            new_config.llm.base_url,
            new_config.ocr.base_url,
            new_config.search.base_url,
            new_config.log.level
        )),
        Err(e) => CommandResult::reply(format!("Config reload failed: {e}")),
    }
}

async fn command_probe(args: &[&str], ctx: &CliContext) -> CommandResult {
    let [name, path] = args else {
        return CommandResult::reply("Usage: /probe <llm|ocr|search> <path>");
    };

    let Some(client) = ctx.state.registry.by_name(name) else {
        return CommandResult::reply(format!("Unknown provider '{name}'"));
    };

    match send_probe(&client, path, &ctx.shutdown).await {
        Ok(msg) | Err(msg) => CommandResult::reply(msg),
    }
}

fn command_quit() -> CommandResult {
    CommandResult {
        message: "Shutting down...".to_string(),
        shutdown: true,
    }
}

fn command_unknown() -> CommandResult {
    CommandResult::reply("Unknown command. Type /help for a list of commands.")
}

async fn process_command(input: &str, ctx: &CliContext) -> CommandResult {
    let (cmd, args) = parse_command(input);

    match cmd {
        "/help" | "help" => command_help(&args),
        "/providers" | "providers" => command_providers(ctx),
        "/circuit" | "circuit" => command_circuit(&args, ctx),
        "/metrics" | "metrics" => command_metrics(&args, ctx).await,
        "/logs" | "logs" => command_logs(&args, ctx),
        "/reload" | "reload" => command_reload(),
        "/probe" | "probe" => command_probe(&args, ctx).await,
        "/quit" | "/exit" | "quit" | "exit" => command_quit(),
        _ => command_unknown(),
    }
}

async fn send_probe(
    client: &ResilientClient,
    path: &str,
    shutdown: &CancellationToken,
) -> Result<String, String> {
    let request = Request::get(path).build().map_err(|e| e.to_string())?;

    // Covers the first attempt plus every retry at the capped interval.
    let policy = client.retry_policy();
    let budget = Duration::from_secs(60) + policy.max_elapsed_time();
    let ctx = CallContext::with_timeout(budget).with_token(shutdown.child_token());

    let response = client
        .execute_request(&ctx, request)
        .await
        .map_err(|e| format!("Probe failed: {e}"))?;

    let body = String::from_utf8_lossy(response.body());
    Ok(format!(
        "Probe {} {} -> {} ({} attempt(s))\n{}",
        client.target(),
        path,
        response.status(),
        response.attempts(),
        body.chars().take(PROBE_BODY_PREVIEW_CHARS).collect::<String>()
    ))
}

async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!("Failed to register SIGTERM handler: {}", e);
                None
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, initiating graceful shutdown");
            }
            () = async {
                if let Some(ref mut sigterm) = sigterm {
                    if sigterm.recv().await.is_none() {
                        warn!("SIGTERM signal stream closed unexpectedly");
                    }
                }
            } => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            return;
        }
        info!("Received Ctrl+C, initiating graceful shutdown");
    }
}

fn setup_logging(config: &AppConfig) -> LogReloadHandle {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (filter_layer, reload_handle) = tracing_subscriber::reload::Layer::new(filter);

    match config.log.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(false)
                        .with_file(true)
                        .with_line_number(true)
                        .with_current_span(true)
                        .with_span_list(true)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(true)
                        .with_file(true)
                        .with_line_number(true)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }

    reload_handle
}

async fn run_command_loop(ctx: CliContext) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let reader = BufReader::new(stdin);
    let mut lines = reader.lines();

    println!("Interactive console ready. Type /help for available commands.");

    loop {
        let line = tokio::select! {
            () = ctx.shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("stdin closed, stopping console");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let result = tokio::select! {
            () = ctx.shutdown.cancelled() => break,
            result = process_command(&line, &ctx) => result,
        };
        println!("{}", result.message);

        if result.shutdown {
            break;
        }
    }

    ctx.shutdown.cancel();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::new().map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration: {e}. Please check your environment variables and configuration."
        )
    })?;

    let log_handle = Some(setup_logging(&config));

    info!("Starting Analysis Bridge v{}", env!("CARGO_PKG_VERSION"));

    let state = AppState::new(config).map_err(|e| {
        error!("Failed to initialize provider clients: {e:#}");
        e
    })?;
    info!(
        "Providers ready: {}",
        state
            .registry
            .list_providers()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );

    let shutdown = CancellationToken::new();
    let cli_context = CliContext {
        state,
        log_handle,
        shutdown: shutdown.clone(),
    };
    let console = tokio::spawn(async move {
        if let Err(e) = run_command_loop(cli_context).await {
            warn!("Console loop terminated with error: {e}");
        }
    });

    tokio::select! {
        () = setup_shutdown_signal() => shutdown.cancel(),
        () = shutdown.cancelled() => {},
    }

    if let Err(e) = console.await {
        warn!("Console task failed: {e}");
    }

    info!("Shutdown complete");
    Ok(())
}
