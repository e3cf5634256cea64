use std::collections::HashMap;

use runq_core::JobId;
use runq_engine::Engine;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Unique client identifier
pub type ClientId = u64;

/// Channel for sending events to a client
pub type ClientSender = mpsc::UnboundedSender<String>;

/// Daemon-wide shared state
pub struct DaemonState {
    /// Token for authentication (None if auth disabled)
    pub token: Option<String>,

    pub engine: Engine,

    /// Client event senders (ClientId → sender)
    pub clients: RwLock<HashMap<ClientId, ClientSender>>,

    /// Output forwarding tasks ((ClientId, JobId) → task)
    subscriptions: Mutex<HashMap<(ClientId, JobId), JoinHandle<()>>>,

    /// Next client ID counter
    next_client_id: Mutex<ClientId>,
}

impl DaemonState {
    pub fn new(token: Option<String>, engine: Engine) -> Self {
        Self {
            token,
            engine,
            clients: RwLock::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_client_id: Mutex::new(1),
        }
    }

    /// Register a new client, returning its ID and event receiver
    pub async fn register_client(&self) -> (ClientId, mpsc::UnboundedReceiver<String>) {
        let mut id = self.next_client_id.lock().await;
        let client_id = *id;
        *id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.write().await.insert(client_id, tx);

        (client_id, rx)
    }

    /// Unregister a client and stop its subscriptions. Jobs keep running.
    pub async fn unregister_client(&self, client_id: ClientId) {
        self.clients.write().await.remove(&client_id);

        let mut subscriptions = self.subscriptions.lock().await;
        subscriptions.retain(|(owner, _), handle| {
            if *owner == client_id {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    pub async fn client_sender(&self, client_id: ClientId) -> Option<ClientSender> {
        self.clients.read().await.get(&client_id).cloned()
    }

    /// Store a forwarding task, replacing (and stopping) any previous one
    /// for the same client and job.
    pub async fn store_subscription(&self, client_id: ClientId, job_id: JobId, handle: JoinHandle<()>) {
        let mut subscriptions = self.subscriptions.lock().await;
        subscriptions.retain(|_, h| !h.is_finished());
        if let Some(previous) = subscriptions.insert((client_id, job_id), handle) {
            previous.abort();
        }
    }

    /// Stop a forwarding task. Returns false if none was active.
    pub async fn remove_subscription(&self, client_id: ClientId, job_id: JobId) -> bool {
        match self.subscriptions.lock().await.remove(&(client_id, job_id)) {
            Some(handle) => {
                let active = !handle.is_finished();
                handle.abort();
                active
            }
            None => false,
        }
    }

    /// Number of live forwarding tasks for a client
    pub async fn subscription_count(&self, client_id: ClientId) -> usize {
        self.subscriptions
            .lock()
            .await
            .iter()
            .filter(|((owner, _), h)| *owner == client_id && !h.is_finished())
            .count()
    }
}
