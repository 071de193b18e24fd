//! Background tasks: connection health sweeps and dead-letter expiry.
//!
//! Every task runs a `select!` loop over a shared shutdown watch channel and
//! its own interval. [`BackgroundTasks::shutdown`] flips the channel, waits
//! up to a grace period for the loops to return and aborts the rest.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::application::connections::ConnectionManager;
use crate::application::dead_letters::DeadLetterService;

fn ticker(period: Duration) -> time::Interval {
    // First tick one period from now rather than immediately.
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Periodic `ConnectionManager::sweep`.
pub struct HealthSweeper {
    connections: Arc<ConnectionManager>,
    interval: Duration,
}

impl HealthSweeper {
    pub fn new(connections: Arc<ConnectionManager>, interval: Duration) -> Self {
        Self {
            connections,
            interval,
        }
    }

    /// Sweeps every interval until shutdown is signalled.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = ticker(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = interval.tick() => {
                    let report = self.connections.sweep().await;
                    if !report.removed.is_empty() {
                        info!(removed = report.removed.len(), "Removed dead connections");
                    }
                }
            }
        }
    }
}

/// Periodic expiry of dead letters older than the retention.
pub struct DeadLetterJanitor {
    service: Arc<DeadLetterService>,
    retention: Duration,
    interval: Duration,
}

impl DeadLetterJanitor {
    pub fn new(service: Arc<DeadLetterService>, retention: Duration, interval: Duration) -> Self {
        Self {
            service,
            retention,
            interval,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = ticker(self.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = interval.tick() => {
                    if let Err(e) = self.service.expire(self.retention).await {
                        warn!(error = %e, "Dead letter expiry failed");
                    }
                }
            }
        }
    }
}

/// How a shutdown went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tasks that returned within the grace period.
    pub joined: usize,
    /// Tasks still running at the deadline.
    pub aborted: usize,
}

/// Owns the relay's background tasks and their shutdown channel.
pub struct BackgroundTasks {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// A receiver that turns `true` on shutdown. Also handed to the retry
    /// handler so backoff waits end with the process.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawns a task driven by the shutdown signal.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, task: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.shutdown_signal()));
        debug!(task = name, "Background task started");
        self.tasks.push((name, handle));
    }

    pub fn spawn_health_sweeper(&mut self, connections: Arc<ConnectionManager>, interval: Duration) {
        let sweeper = HealthSweeper::new(connections, interval);
        self.spawn("health_sweeper", move |shutdown| async move {
            sweeper.run(shutdown).await
        });
    }

    pub fn spawn_dead_letter_janitor(
        &mut self,
        service: Arc<DeadLetterService>,
        retention: Duration,
        interval: Duration,
    ) {
        let janitor = DeadLetterJanitor::new(service, retention, interval);
        self.spawn("dead_letter_janitor", move |shutdown| async move {
            janitor.run(shutdown).await
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Signals shutdown and joins the tasks, aborting any still running
    /// after `grace`.
    pub async fn shutdown(mut self, grace: Duration) -> ShutdownReport {
        let _ = self.shutdown_tx.send(true);

        let joined = time::timeout(
            grace,
            join_all(self.tasks.iter_mut().map(|(_, handle)| handle)),
        )
        .await;

        let mut report = ShutdownReport::default();
        for (name, handle) in &self.tasks {
            if joined.is_err() && !handle.is_finished() {
                handle.abort();
                report.aborted += 1;
                warn!(task = *name, "Background task did not stop in time, aborted");
            } else {
                report.joined += 1;
            }
        }
        info!(joined = report.joined, aborted = report.aborted, "Background tasks stopped");
        report
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::connections::testing::FakeSink;
    use crate::application::connections::ConnectionManagerConfig;
    use crate::domain::connection::TransportKind;

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_dead_connections_on_interval() {
        let connections = Arc::new(ConnectionManager::new(ConnectionManagerConfig {
            failed_probe_threshold: 1,
            ..Default::default()
        }));
        let sink = FakeSink::stream();
        sink.fail_probes(true);
        connections
            .establish("p1", TransportKind::Stream, "s1", sink.clone())
            .unwrap();

        let mut tasks = BackgroundTasks::new();
        tasks.spawn_health_sweeper(connections.clone(), Duration::from_secs(10));

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connections.total_connections(), 1);

        time::sleep(Duration::from_secs(6)).await;
        assert_eq!(connections.total_connections(), 0);

        let report = tasks.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report, ShutdownReport { joined: 1, aborted: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn stragglers_are_aborted_after_grace() {
        let mut tasks = BackgroundTasks::new();
        tasks.spawn("cooperative", |mut shutdown| async move {
            let _ = shutdown.changed().await;
        });
        tasks.spawn("stubborn", |_shutdown| async move {
            time::sleep(Duration::from_secs(3600)).await;
        });
        assert_eq!(tasks.len(), 2);

        let report = tasks.shutdown(Duration::from_secs(2)).await;

        assert_eq!(report, ShutdownReport { joined: 1, aborted: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_signal_reaches_late_subscribers() {
        let tasks = BackgroundTasks::new();
        let signal = tasks.shutdown_signal();
        assert!(!*signal.borrow());

        tasks.shutdown(Duration::from_millis(10)).await;
        assert!(*signal.borrow());
    }
}
