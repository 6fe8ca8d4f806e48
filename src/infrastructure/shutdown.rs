//! Graceful Shutdown Handler
//!
//! The controller owns every in-flight access check and the resolver
//! teardown. Firing the trigger (on a signal or at end of input) stops
//! intake; `finish` then drains the checks, aborts whatever outlives the
//! drain window and shuts the resolver down last.

use crate::application::{CountryResolver, ResolverStats};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};

/// Requests shutdown. Clones share one flag.
#[derive(Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    /// Request shutdown. Returns `false` if it was already requested.
    pub fn fire(&self) -> bool {
        let first = self
            .tx
            .send_if_modified(|fired| !std::mem::replace(fired, true));
        if first {
            tracing::info!("initiating graceful shutdown");
        }
        first
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver whose value turns `true` once shutdown is requested.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Outcome of every check the controller ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: usize,
    pub aborted: usize,
    pub panicked: usize,
}

/// Runs access checks and tears the resolver down once they are done.
pub struct ShutdownController {
    resolver: Arc<CountryResolver>,
    trigger: ShutdownTrigger,
    checks: JoinSet<()>,
    report: DrainReport,
}

impl ShutdownController {
    pub fn new(resolver: Arc<CountryResolver>) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            resolver,
            trigger: ShutdownTrigger { tx: Arc::new(tx) },
            checks: JoinSet::new(),
            report: DrainReport::default(),
        }
    }

    pub fn trigger(&self) -> ShutdownTrigger {
        self.trigger.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.trigger.is_fired()
    }

    /// Run a check in the background. Refused once shutdown was requested.
    pub fn spawn_check<F>(&mut self, check: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutdown() {
            tracing::debug!("shutdown requested, access check refused");
            return false;
        }
        self.reap();
        self.checks.spawn(check);
        true
    }

    /// Checks spawned and not yet collected.
    pub fn in_flight(&self) -> usize {
        self.checks.len()
    }

    fn reap(&mut self) {
        while let Some(res) = self.checks.try_join_next() {
            self.record(res);
        }
    }

    fn record(&mut self, res: Result<(), JoinError>) {
        match res {
            Ok(()) => self.report.completed += 1,
            Err(e) if e.is_panic() => {
                self.report.panicked += 1;
                tracing::error!(error = %e, "access check panicked");
            }
            Err(_) => self.report.aborted += 1,
        }
    }

    /// Stop intake, give running checks up to `drain_timeout`, abort the
    /// rest, then shut the resolver down.
    pub async fn finish(mut self, drain_timeout: Duration) -> (DrainReport, ResolverStats) {
        self.trigger.fire();

        let deadline = tokio::time::Instant::now() + drain_timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.checks.join_next()).await {
                Ok(Some(res)) => self.record(res),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        in_flight = self.checks.len(),
                        "drain timeout, aborting remaining checks"
                    );
                    self.checks.abort_all();
                    while let Some(res) = self.checks.join_next().await {
                        self.record(res);
                    }
                    break;
                }
            }
        }

        self.resolver.shutdown().await;
        (self.report, self.resolver.stats())
    }
}

/// Fire the trigger on Ctrl+C or SIGTERM.
#[cfg_attr(coverage_nightly, coverage(off))]
pub async fn shutdown_signal(trigger: ShutdownTrigger) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    trigger.fire();
}
