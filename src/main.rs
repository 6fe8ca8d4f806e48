//! geogate - GeoIP access checks
//!
//! This is the composition root that wires together all the components.
//! Every address given on the command line (or each stdin line, as
//! `<ip> [user-agent]`) is checked against the configured policy and
//! printed as `ip<TAB>country<TAB>decision`.

use geogate::adapters::outbound::DefaultProviderFactory;
use geogate::application::{CountryResolver, GeoAccessPolicy, SessionKind, SessionRequest};
use geogate::config::load_config;
use geogate::infrastructure::{shutdown_signal, ShutdownController};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::format::FmtSpan;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        database = %cfg.database_path,
        remote = cfg.remote_service().is_some(),
        capacity = cfg.cache_capacity,
        "starting geogate"
    );

    // ===== COMPOSITION ROOT =====

    let resolver = Arc::new(CountryResolver::new(
        cfg.resolver_config(),
        Arc::new(DefaultProviderFactory::new()),
    ));
    resolver.start_maintenance();

    let policy = Arc::new(GeoAccessPolicy::new(&cfg.policy_config(), resolver.clone()));

    let mut shutdown = ShutdownController::new(resolver);
    let mut signalled = shutdown.trigger().subscribe();
    tokio::spawn(shutdown_signal(shutdown.trigger()));

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => spawn_check(&mut shutdown, &policy, line),
                    None => break,
                },
                _ = signalled.changed() => break,
            }
        }
    } else {
        for arg in args {
            spawn_check(&mut shutdown, &policy, arg);
        }
    }

    let (drained, stats) = shutdown.finish(DRAIN_TIMEOUT).await;
    tracing::info!(
        checks = drained.completed,
        aborted = drained.aborted,
        entries = stats.entries,
        hits = stats.hits,
        misses = stats.misses,
        lookup_failures = stats.lookup_failures,
        "geogate stopped"
    );
    Ok(())
}

fn spawn_check(shutdown: &mut ShutdownController, policy: &Arc<GeoAccessPolicy>, line: String) {
    let mut parts = line.trim().splitn(2, char::is_whitespace);
    let Some(ip) = parts.next().filter(|ip| !ip.is_empty()).map(str::to_string) else {
        return;
    };
    let mut request = SessionRequest::new(SessionKind::Connect, ip);
    if let Some(user_agent) = parts.next().map(str::trim).filter(|ua| !ua.is_empty()) {
        request = request.user_agent(user_agent);
    }

    let policy = policy.clone();
    shutdown.spawn_check(async move {
        let check = policy.check(&request).await;
        let country = check
            .country
            .and_then(|c| c.iso_code)
            .unwrap_or_else(|| "-".to_string());
        println!("{}\t{}\t{}", request.client_ip, country, check.decision);
    });
}
