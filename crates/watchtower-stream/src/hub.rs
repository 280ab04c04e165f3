//! Per-project fan-out hub for live subscribers.
//!
//! The hub tracks long-lived subscribers keyed by client id, each bound to
//! exactly one project. Records broadcast for a project land on that
//! project's aggregator queue; a fan-out worker drains the aggregator into
//! every subscriber's bounded queue. Full queues drop records: the hub is
//! realtime-only, history lives in the search store.
//!
//! One generic implementation backs the three hub instances (logs, metrics,
//! alerts); only the payload type differs.
//!
//! # Locking
//!
//! The hub-level maps sit behind a single reader-writer lock; per-client
//! mutable state sits behind the client's own lock. Lock order is hub first,
//! then client, released in reverse.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// Tuning knobs for a hub instance.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each subscriber's outbound queue.
    pub client_queue: usize,
    /// Capacity of each project's aggregator queue.
    pub aggregator_queue: usize,
    /// Window in which a re-registering client reuses its existing entry.
    pub reconnect_window: Duration,
    /// Delay before a disconnected client is actually torn down.
    pub teardown_delay: Duration,
    /// Inactivity threshold for the stale sweep.
    pub stale_after: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_queue: 100,
            aggregator_queue: 100,
            reconnect_window: Duration::from_secs(5),
            teardown_delay: Duration::from_secs(10),
            stale_after: Duration::from_secs(300),
        }
    }
}

/// Mutable per-client state, guarded by the client's own lock.
struct ClientState<T> {
    /// Send half of the outbound queue. Dropped exactly once, on close.
    sender: Option<mpsc::Sender<T>>,
    closed: bool,
    connected: bool,
    last_seen: Instant,
}

/// One subscriber entry.
pub struct Client<T> {
    project: String,
    state: Mutex<ClientState<T>>,
    /// Receive half of the outbound queue. Shared so a reconnection flap
    /// hands the same queue instance to the new stream handler.
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
}

impl<T> Client<T> {
    /// Close the outbound queue. Transitions `closed` false -> true at most
    /// once; the sender is dropped so the stream handler observes
    /// end-of-queue.
    fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.sender.take();
            state.closed = true;
        }
    }
}

struct HubInner<T> {
    clients: HashMap<String, Arc<Client<T>>>,
    project_clients: HashMap<String, HashMap<String, Arc<Client<T>>>>,
    project_channels: HashMap<String, mpsc::Sender<T>>,
    shutdown_channels: HashMap<String, oneshot::Sender<()>>,
}

/// Fan-out hub for one payload type.
pub struct Hub<T> {
    name: &'static str,
    config: HubConfig,
    inner: RwLock<HubInner<T>>,
}

impl<T: Clone + Send + 'static> Hub<T> {
    /// Create a hub. `name` labels log lines and metrics ("logs",
    /// "metrics", "alerts").
    pub fn new(name: &'static str, config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            name,
            config,
            inner: RwLock::new(HubInner {
                clients: HashMap::new(),
                project_clients: HashMap::new(),
                project_channels: HashMap::new(),
                shutdown_channels: HashMap::new(),
            }),
        })
    }

    /// Register a subscriber for a project.
    ///
    /// A client re-registering within the reconnect window for the same
    /// project is reactivated in place, preserving its queue. Any other
    /// existing entry under the same id is torn down first.
    pub fn register(self: &Arc<Self>, client_id: &str, project: &str) {
        let mut inner = self.inner.write();

        if let Some(existing) = inner.clients.get(client_id).cloned() {
            let since_last_seen = existing.state.lock().last_seen.elapsed();

            if since_last_seen < self.config.reconnect_window && existing.project == project {
                tracing::info!(hub = self.name, client_id, project, "reactivating recent client");
                let mut state = existing.state.lock();
                state.connected = true;
                state.last_seen = Instant::now();
                return;
            }

            tracing::info!(
                hub = self.name,
                client_id,
                "client exists but is stale or on another project, cleaning up"
            );
            self.remove_client_locked(&mut inner, client_id, &existing);
        }

        let (tx, rx) = mpsc::channel(self.config.client_queue);
        let client = Arc::new(Client {
            project: project.to_string(),
            state: Mutex::new(ClientState {
                sender: Some(tx),
                closed: false,
                connected: true,
                last_seen: Instant::now(),
            }),
            receiver: Arc::new(tokio::sync::Mutex::new(rx)),
        });

        inner
            .clients
            .insert(client_id.to_string(), Arc::clone(&client));
        inner
            .project_clients
            .entry(project.to_string())
            .or_default()
            .insert(client_id.to_string(), client);

        tracing::info!(hub = self.name, client_id, project, "registered new client");

        // First subscriber of a project brings up its aggregator and
        // fan-out worker.
        if !inner.project_channels.contains_key(project) {
            let (agg_tx, agg_rx) = mpsc::channel(self.config.aggregator_queue);
            let (shutdown_tx, shutdown_rx) = oneshot::channel();
            inner
                .project_channels
                .insert(project.to_string(), agg_tx);
            inner
                .shutdown_channels
                .insert(project.to_string(), shutdown_tx);

            let hub = Arc::downgrade(self);
            let project = project.to_string();
            tokio::spawn(async move {
                fan_out(hub, project, agg_rx, shutdown_rx).await;
            });
        }

        metrics::gauge!("hub_clients", "hub" => self.name).set(inner.clients.len() as f64);
        metrics::gauge!("hub_projects", "hub" => self.name)
            .set(inner.project_channels.len() as f64);
    }

    /// Mark a subscriber disconnected and schedule its teardown.
    ///
    /// Teardown runs after the configured delay and only if the client is
    /// still disconnected; a reconnection in flight cancels it.
    pub fn unregister(self: &Arc<Self>, client_id: &str) {
        let inner = self.inner.read();

        let Some(client) = inner.clients.get(client_id) else {
            tracing::debug!(hub = self.name, client_id, "client not found for unregistration");
            return;
        };
        client.state.lock().connected = false;
        drop(inner);

        tracing::info!(hub = self.name, client_id, "marked client as disconnected");

        let hub = Arc::clone(self);
        let client_id = client_id.to_string();
        let delay = self.config.teardown_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let mut inner = hub.inner.write();
            if let Some(client) = inner.clients.get(&client_id).cloned() {
                let still_disconnected = !client.state.lock().connected;
                if still_disconnected {
                    tracing::info!(
                        hub = hub.name,
                        client_id = %client_id,
                        "cleaning up disconnected client after delay"
                    );
                    hub.remove_client_locked(&mut inner, &client_id, &client);
                }
            }
        });
    }

    /// Non-blocking broadcast onto a project's aggregator queue.
    ///
    /// Records for projects without subscribers, and records arriving while
    /// the aggregator is full, are dropped.
    pub fn broadcast(&self, project: &str, record: T) {
        let inner = self.inner.read();

        let Some(agg) = inner.project_channels.get(project) else {
            tracing::trace!(hub = self.name, project, "no subscribers, dropping record");
            return;
        };

        match agg.try_send(record) {
            Ok(()) => {
                metrics::counter!("hub_records_broadcast_total", "hub" => self.name).increment(1);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::counter!("hub_records_dropped_total", "hub" => self.name).increment(1);
                tracing::warn!(hub = self.name, project, "project aggregator full, dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(hub = self.name, project, "project aggregator closed");
            }
        }
    }

    /// The live outbound queue for a client, or `None` once closed.
    pub fn get_client_channel(
        &self,
        client_id: &str,
    ) -> Option<Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>> {
        let inner = self.inner.read();
        let client = inner.clients.get(client_id)?;
        let state = client.state.lock();
        if state.closed {
            return None;
        }
        Some(Arc::clone(&client.receiver))
    }

    /// Stamp a client's last activity.
    pub fn update_client_activity(&self, client_id: &str) {
        let inner = self.inner.read();
        if let Some(client) = inner.clients.get(client_id) {
            client.state.lock().last_seen = Instant::now();
        }
    }

    /// Force-remove every client idle past the staleness threshold.
    pub fn cleanup_stale_clients(&self) {
        let mut inner = self.inner.write();

        let stale: Vec<(String, Arc<Client<T>>)> = inner
            .clients
            .iter()
            .filter(|(_, client)| {
                client.state.lock().last_seen.elapsed() > self.config.stale_after
            })
            .map(|(id, client)| (id.clone(), Arc::clone(client)))
            .collect();

        for (client_id, client) in stale {
            tracing::info!(hub = self.name, client_id = %client_id, "cleaning up stale client");
            metrics::counter!("hub_stale_clients_reaped_total", "hub" => self.name).increment(1);
            self.remove_client_locked(&mut inner, &client_id, &client);
        }
    }

    /// Number of registered clients.
    pub fn client_count(&self) -> usize {
        self.inner.read().clients.len()
    }

    /// Whether a project currently has an aggregator (and hence
    /// subscribers).
    pub fn has_project(&self, project: &str) -> bool {
        self.inner.read().project_channels.contains_key(project)
    }

    /// Remove a client and, when it was the last of its project, tear the
    /// project's aggregator and fan-out worker down. Must hold the hub
    /// write lock.
    fn remove_client_locked(
        &self,
        inner: &mut HubInner<T>,
        client_id: &str,
        client: &Arc<Client<T>>,
    ) {
        client.close();
        inner.clients.remove(client_id);

        if let Some(project_clients) = inner.project_clients.get_mut(&client.project) {
            project_clients.remove(client_id);

            if project_clients.is_empty() {
                tracing::info!(
                    hub = self.name,
                    project = %client.project,
                    "last client gone, tearing down project resources"
                );

                if let Some(shutdown) = inner.shutdown_channels.remove(&client.project) {
                    let _ = shutdown.send(());
                }
                // Dropping the sender closes the aggregator.
                inner.project_channels.remove(&client.project);
                inner.project_clients.remove(&client.project);
            }
        }

        metrics::gauge!("hub_clients", "hub" => self.name).set(inner.clients.len() as f64);
        metrics::gauge!("hub_projects", "hub" => self.name)
            .set(inner.project_channels.len() as f64);
    }
}

/// Per-project fan-out worker: drain the aggregator into every subscriber
/// queue. Exits when the aggregator closes, on the shutdown signal, or when
/// the hub itself is gone.
async fn fan_out<T: Clone + Send + 'static>(
    hub: std::sync::Weak<Hub<T>>,
    project: String,
    mut aggregator: mpsc::Receiver<T>,
    mut shutdown: oneshot::Receiver<()>,
) {
    tracing::debug!(project = %project, "fan-out worker started");

    loop {
        tokio::select! {
            record = aggregator.recv() => {
                let Some(record) = record else { break };
                let Some(hub) = hub.upgrade() else { break };

                let inner = hub.inner.read();
                let Some(clients) = inner.project_clients.get(&project) else {
                    tracing::debug!(project = %project, "project client map gone, stopping fan-out");
                    break;
                };

                for (client_id, client) in clients {
                    let state = client.state.lock();
                    if state.closed {
                        continue;
                    }
                    if let Some(sender) = &state.sender {
                        if let Err(mpsc::error::TrySendError::Full(_)) =
                            sender.try_send(record.clone())
                        {
                            metrics::counter!("hub_records_dropped_total", "hub" => hub.name)
                                .increment(1);
                            tracing::warn!(
                                hub = hub.name,
                                client_id = %client_id,
                                project = %project,
                                "client queue full, dropping record"
                            );
                        }
                    }
                }
            }
            _ = &mut shutdown => break,
        }
    }

    tracing::debug!(project = %project, "fan-out worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_hub() -> Arc<Hub<u32>> {
        Hub::new("logs", HubConfig::default())
    }

    /// Let spawned hub tasks make progress under a paused clock.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_and_receive() {
        let hub = test_hub();
        hub.register("c1", "p1");

        hub.broadcast("p1", 7);
        settle().await;

        let channel = hub.get_client_channel("c1").unwrap();
        let got = channel.lock().await.recv().await.unwrap();
        assert_eq!(got, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flap_reuses_queue_instance() {
        let hub = test_hub();
        hub.register("c1", "p1");
        let first = hub.get_client_channel("c1").unwrap();

        // Unregister and re-register within the reconnect window.
        hub.unregister("c1");
        tokio::time::sleep(Duration::from_secs(2)).await;
        hub.register("c1", "p1");

        let second = hub.get_client_channel("c1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // Records broadcast across the flap are not lost.
        hub.broadcast("p1", 1);
        settle().await;
        assert_eq!(second.lock().await.recv().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reregister_different_project_replaces() {
        let hub = test_hub();
        hub.register("c1", "p1");
        let first = hub.get_client_channel("c1").unwrap();

        hub.register("c1", "p2");
        let second = hub.get_client_channel("c1").unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!hub.has_project("p1"));
        assert!(hub.has_project("p2"));

        // Old queue is closed
        assert!(first.lock().await.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_teardown_fires() {
        let hub = test_hub();
        hub.register("c1", "p1");

        hub.unregister("c1");
        tokio::time::sleep(Duration::from_secs(11)).await;
        settle().await;

        assert_eq!(hub.client_count(), 0);
        assert!(!hub.has_project("p1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_cancels_teardown() {
        let hub = test_hub();
        hub.register("c1", "p1");

        hub.unregister("c1");
        tokio::time::sleep(Duration::from_secs(4)).await;
        hub.register("c1", "p1");

        tokio::time::sleep(Duration::from_secs(20)).await;
        settle().await;

        assert_eq!(hub.client_count(), 1);
        assert!(hub.has_project("p1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_client_tears_down_project() {
        let hub = test_hub();
        hub.register("c1", "p1");
        hub.register("c2", "p1");

        hub.unregister("c1");
        tokio::time::sleep(Duration::from_secs(11)).await;
        settle().await;

        // c2 still holds the project open
        assert!(hub.has_project("p1"));

        hub.unregister("c2");
        tokio::time::sleep(Duration::from_secs(11)).await;
        settle().await;

        assert!(!hub.has_project("p1"));
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_without_subscribers_is_dropped() {
        let hub = test_hub();
        // No registration for p1; must not panic or block.
        hub.broadcast("p1", 1);
        assert!(!hub.has_project("p1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_client_queue_drops_without_blocking() {
        let hub = test_hub();
        hub.register("c1", "p1");

        // Nobody drains the client queue: fill it past capacity.
        for i in 0..300u32 {
            hub.broadcast("p1", i);
            settle().await;
        }

        // The client queue holds at most its capacity; the broadcast side
        // never blocked to get here.
        let channel = hub.get_client_channel("c1").unwrap();
        let mut received = 0;
        let mut rx = channel.lock().await;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_subscriber_does_not_block_fast_one() {
        let hub = test_hub();
        hub.register("fast", "p1");
        hub.register("slow", "p1");

        let fast = hub.get_client_channel("fast").unwrap();

        for i in 0..50u32 {
            hub.broadcast("p1", i);
            settle().await;

            // Fast subscriber drains continuously and sees every record in
            // order; the slow one is simply never read.
            let got = fast.lock().await.recv().await.unwrap();
            assert_eq!(got, i);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cleanup() {
        let hub = test_hub();
        hub.register("c1", "p1");

        tokio::time::sleep(Duration::from_secs(6 * 60)).await;
        hub.cleanup_stale_clients();

        assert_eq!(hub.client_count(), 0);
        assert!(!hub.has_project("p1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_stamp_defers_stale_cleanup() {
        let hub = test_hub();
        hub.register("c1", "p1");

        tokio::time::sleep(Duration::from_secs(4 * 60)).await;
        hub.update_client_activity("c1");
        tokio::time::sleep(Duration::from_secs(2 * 60)).await;

        hub.cleanup_stale_clients();
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_client_channel_is_absent() {
        let hub = test_hub();
        hub.register("c1", "p1");

        hub.unregister("c1");
        tokio::time::sleep(Duration::from_secs(11)).await;
        settle().await;

        assert!(hub.get_client_channel("c1").is_none());
    }
}
