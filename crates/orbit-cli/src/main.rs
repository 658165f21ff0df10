//! # Orbit CLI Entry Point
//!
//! Runs a demo echo provider or makes a single call against running providers.
//!
//! ## Usage
//!
//! ```bash
//! # Serve demo.Echo on port 20880
//! orbit provider -b 0.0.0.0:20880
//!
//! # Call it (outputs raw JSON)
//! orbit call demo.Echo echo -p 127.0.0.1:20880 -t String -a '["hello"]'
//!
//! # Providers can also come from the environment
//! ORBIT_PROVIDERS=127.0.0.1:20880,127.0.0.1:20881 orbit call demo.Echo ping
//! ```

use anyhow::{Context, Result};
use argh::FromArgs;
use serde_json::{json, Value};
use std::sync::Arc;

use orbit_common::registry::StaticRegistry;
use orbit_common::OrbitContext;
use orbit_consumer::{ReferenceCache, ReferenceConfig};
use orbit_provider::service::arg;
use orbit_provider::{Exposer, MethodTable, ServiceConfig};

/// Comma-separated provider addresses used when `call` gets no `--provider`.
const PROVIDERS_ENV: &str = "ORBIT_PROVIDERS";

#[derive(FromArgs)]
/// Orbit - consumer/provider RPC
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Provider(ProviderArgs),
    Call(CallArgs),
}

/// Arguments for running the demo provider.
///
/// The provider exports one interface with two methods: `echo(String)`
/// returns its argument and `ping()` returns `"pong"`.
#[derive(FromArgs)]
#[argh(subcommand, name = "provider")]
/// serve a demo echo service
struct ProviderArgs {
    /// address to listen on
    #[argh(option, short = 'b', default = "\"0.0.0.0:20880\".into()")]
    bind: String,

    /// interface name to export
    #[argh(option, short = 'i', default = "\"demo.Echo\".into()")]
    interface: String,

    /// service group
    #[argh(option, short = 'g')]
    group: Option<String>,

    /// service version
    #[argh(option, short = 'v')]
    version: Option<String>,

    /// payload codec for replies: framed or legacy
    #[argh(option)]
    codec: Option<String>,

    /// payload serializer for replies: json or postcard
    #[argh(option)]
    serializer: Option<String>,
}

/// Arguments for making a single call.
///
/// Outputs the raw JSON result to stdout. Errors go to stderr with a non-zero
/// exit code.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a method on a remote interface
struct CallArgs {
    /// interface to call
    #[argh(positional)]
    interface: String,

    /// method name
    #[argh(positional)]
    method: String,

    /// provider address (host:port), may be repeated
    #[argh(option, short = 'p', long = "provider")]
    providers: Vec<String>,

    /// comma-separated parameter types, e.g. "String,i64"
    #[argh(option, short = 't', long = "types", default = "String::new()")]
    types: String,

    /// JSON array of arguments
    #[argh(option, short = 'a', long = "args", default = "\"[]\".into()")]
    args: String,

    /// service group
    #[argh(option, short = 'g')]
    group: Option<String>,

    /// service version
    #[argh(option, short = 'v')]
    version: Option<String>,

    /// call timeout in milliseconds
    #[argh(option, long = "timeout", default = "3000")]
    timeout_ms: u64,

    /// fault-tolerance strategy: failfast, failover or broadcast
    #[argh(option, long = "fault-tolerance", default = "orbit_cluster::DEFAULT_FAULT_TOLERANCE.into()")]
    fault_tolerance: String,

    /// load balancer: random or roundrobin
    #[argh(option, long = "load-balancer", default = "orbit_cluster::DEFAULT_LOAD_BALANCER.into()")]
    load_balancer: String,

    /// payload codec: framed or legacy
    #[argh(option)]
    codec: Option<String>,

    /// payload serializer: json or postcard
    #[argh(option)]
    serializer: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call keeps stdout clean for piping
    if !matches!(cli.command, Commands::Call(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Provider(args) => run_provider(args).await,
        Commands::Call(args) => run_call(args).await,
    }
}

fn echo_service() -> MethodTable {
    MethodTable::new()
        .sync_method("echo", &["String"], |args| {
            let text: String = arg(&args, 0)?;
            Ok(json!(text))
        })
        .sync_method("ping", &[] as &[&str], |_| Ok(json!("pong")))
}

fn service_config(args: &ProviderArgs) -> Result<ServiceConfig> {
    let (host, port) = args
        .bind
        .rsplit_once(':')
        .with_context(|| format!("Invalid bind address {}: expected host:port", args.bind))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("Invalid port in bind address {}", args.bind))?;

    let mut config = ServiceConfig::new(args.interface.clone()).bind(host, port);
    if let Some(group) = &args.group {
        config = config.group(group.clone());
    }
    if let Some(version) = &args.version {
        config = config.version(version.clone());
    }
    if let Some(codec) = &args.codec {
        config = config.codec(codec.clone());
    }
    if let Some(serializer) = &args.serializer {
        config = config.serializer(serializer.clone());
    }
    Ok(config)
}

async fn run_provider(args: ProviderArgs) -> Result<()> {
    let config = service_config(&args)?;
    let ctx = OrbitContext::with_defaults()?;
    let exposer = Exposer::new(Arc::clone(&ctx), None);

    let exported = exposer.expose(&config.to_url(), Arc::new(echo_service())).await?;
    tracing::info!(url = %exported, "Provider ready, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    let failures = ctx.shutdown().run().await;
    if failures > 0 {
        tracing::warn!(failures, "Some shutdown hooks failed");
    }
    Ok(())
}

/// Provider addresses from the command line, else from `ORBIT_PROVIDERS`.
fn resolve_providers(explicit: &[String], env: Option<String>) -> Result<Vec<String>> {
    if !explicit.is_empty() {
        return Ok(explicit.to_vec());
    }
    let providers: Vec<String> = env
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    if providers.is_empty() {
        anyhow::bail!("No providers given; use --provider or set {}", PROVIDERS_ENV);
    }
    Ok(providers)
}

fn parse_types(types: &str) -> Vec<&str> {
    types
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn reference_config(args: &CallArgs) -> ReferenceConfig {
    let mut config = ReferenceConfig::new(args.interface.clone())
        .timeout_ms(args.timeout_ms)
        .fault_tolerance(args.fault_tolerance.clone())
        .load_balancer(args.load_balancer.clone());
    if let Some(group) = &args.group {
        config = config.group(group.clone());
    }
    if let Some(version) = &args.version {
        config = config.version(version.clone());
    }
    if let Some(codec) = &args.codec {
        config = config.codec(codec.clone());
    }
    if let Some(serializer) = &args.serializer {
        config = config.serializer(serializer.clone());
    }
    config
}

async fn run_call(args: CallArgs) -> Result<()> {
    let providers = resolve_providers(&args.providers, std::env::var(PROVIDERS_ENV).ok())?;
    let call_args: Vec<Value> =
        serde_json::from_str(&args.args).context("Invalid JSON in args, expected an array")?;

    let ctx = OrbitContext::with_defaults()?;
    orbit_cluster::register_defaults(&ctx)?;
    let registry = Arc::new(StaticRegistry::new(&providers[..])?);
    let cache = ReferenceCache::new(Arc::clone(&ctx), registry);

    let proxy = cache.proxy(&reference_config(&args)).await?;
    let outcome = proxy
        .invoke(&args.method, &parse_types(&args.types), call_args)
        .await;
    ctx.shutdown().run().await;

    println!("{}", serde_json::to_string(&outcome?)?);
    Ok(())
}
