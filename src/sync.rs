use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::Incident;
use crate::service::IncidentService;

#[derive(Debug, Clone, PartialEq)]
pub enum FetchState {
    Loading,
    Loaded(Vec<Incident>),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewSnapshot {
    /// Ticket of the fetch that produced this state; 0 before any fetch.
    pub ticket: u64,
    pub state: FetchState,
}

/// Issued before a fetch starts; orders results by when they were requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(u64);

/// The record set a view displays.
///
/// Fetches triggered by the change feed and by local actions race; a result
/// is applied only when its ticket is newer than the one on display, so a
/// slow early fetch never overwrites a later one. After [`Self::close`]
/// every result is dropped.
pub struct RecordView {
    next_ticket: AtomicU64,
    closed: AtomicBool,
    snapshot: watch::Sender<ViewSnapshot>,
}

impl RecordView {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(ViewSnapshot {
            ticket: 0,
            state: FetchState::Loading,
        });
        Self {
            next_ticket: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            snapshot,
        }
    }

    pub fn ticket(&self) -> FetchTicket {
        FetchTicket(self.next_ticket.fetch_add(1, Ordering::SeqCst))
    }

    /// Returns whether the result replaced what was displayed.
    pub fn apply(&self, ticket: FetchTicket, state: FetchState) -> bool {
        if self.is_closed() {
            debug!(ticket = ticket.0, "view closed, dropping fetch result");
            return false;
        }

        let applied = self.snapshot.send_if_modified(|current| {
            if ticket.0 <= current.ticket {
                return false;
            }
            *current = ViewSnapshot {
                ticket: ticket.0,
                state,
            };
            true
        });
        if !applied {
            debug!(ticket = ticket.0, "stale fetch result discarded");
        }
        applied
    }

    /// Full refetch into the view. Failures become [`FetchState::Failed`]
    /// rather than an empty list.
    pub async fn refresh(&self, service: &IncidentService) -> bool {
        let ticket = self.ticket();
        let state = match service.try_fetch_all().await {
            Ok(records) => FetchState::Loaded(records),
            Err(error) => {
                warn!(%error, "view refresh failed");
                FetchState::Failed(error.to_string())
            }
        };
        self.apply(ticket, state)
    }

    pub fn current(&self) -> ViewSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ViewSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for RecordView {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`RealtimeSynchronizer`]. Unsubscribing more than once
/// is a no-op, and dropping the handle unsubscribes.
pub struct Subscription {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Subscription {
    fn new(task: JoinHandle<()>) -> Self {
        Self {
            tasks: Mutex::new(vec![task]),
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        self.lock_tasks().push(task);
    }

    pub fn unsubscribe(&self) {
        let tasks = std::mem::take(&mut *self.lock_tasks());
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        info!("realtime subscription closed");
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.lock_tasks().iter().any(|task| !task.is_finished())
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Refetches the whole record set whenever the store reports any change.
#[derive(Clone)]
pub struct RealtimeSynchronizer {
    service: Arc<IncidentService>,
    view: Option<Arc<RecordView>>,
}

impl RealtimeSynchronizer {
    pub fn new(service: Arc<IncidentService>) -> Self {
        Self {
            service,
            view: None,
        }
    }

    /// Realtime refreshes go through `view`, racing local refreshes of the
    /// same view under its ticket order.
    pub fn with_view(mut self, view: Arc<RecordView>) -> Self {
        self.view = Some(view);
        self
    }

    /// `on_change` receives the full record set every time the view takes a
    /// newer result. A failed refetch is delivered as an empty set.
    pub async fn subscribe<F>(&self, on_change: F) -> Result<Subscription, StoreError>
    where
        F: Fn(Vec<Incident>) + Send + Sync + 'static,
    {
        let view = self
            .view
            .clone()
            .unwrap_or_else(|| Arc::new(RecordView::new()));
        let mut updates = view.watch();
        let subscription = self.attach(view).await?;

        subscription.track(tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let state = updates.borrow_and_update().state.clone();
                match state {
                    FetchState::Loaded(records) => on_change(records),
                    FetchState::Failed(_) => on_change(Vec::new()),
                    FetchState::Loading => {}
                }
            }
        }));
        Ok(subscription)
    }

    /// Keeps `view` in step with the store.
    pub async fn attach(&self, view: Arc<RecordView>) -> Result<Subscription, StoreError> {
        let mut feed = self.service.store().changes().await?;
        let service = Arc::clone(&self.service);

        Ok(Subscription::new(tokio::spawn(async move {
            while let Some(kind) = feed.recv().await {
                let collapsed = feed.drain_pending();
                debug!(?kind, collapsed, "store changed, refetching incidents");
                view.refresh(&service).await;
            }
            warn!("change feed closed");
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::fixtures;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn setup() -> (Arc<MemoryStore>, Arc<IncidentService>) {
        let store = Arc::new(MemoryStore::default());
        let service = Arc::new(IncidentService::new(store.clone()));
        (store, service)
    }

    #[test]
    fn older_ticket_never_overwrites_newer_result() {
        let view = RecordView::new();
        let slow = view.ticket();
        let fast = view.ticket();

        let fresh = vec![fixtures::incident("b", "BIA"), fixtures::incident("a", "ANA")];
        assert!(view.apply(fast, FetchState::Loaded(fresh.clone())));
        assert!(!view.apply(slow, FetchState::Loaded(vec![fixtures::incident("a", "ANA")])));

        assert_eq!(view.current().state, FetchState::Loaded(fresh));
    }

    #[test]
    fn closed_view_ignores_late_results() {
        let view = RecordView::new();
        let ticket = view.ticket();
        view.close();
        assert!(!view.apply(ticket, FetchState::Loaded(Vec::new())));
        assert_eq!(view.current().state, FetchState::Loading);
    }

    #[tokio::test]
    async fn slow_refresh_loses_to_later_refresh() {
        let (store, service) = setup();
        service
            .create_many(&[fixtures::incident("a", "ANA")], None)
            .await
            .unwrap();
        let view = RecordView::new();

        store.delay_next_read(Duration::from_millis(100));
        let (slow, fast) = tokio::join!(view.refresh(&service), view.refresh(&service));
        assert!(fast);
        assert!(!slow);
        assert_eq!(view.current().ticket, 2);
    }

    #[tokio::test]
    async fn failed_refresh_is_distinct_from_empty() {
        let (store, service) = setup();
        let view = RecordView::new();
        view.refresh(&service).await;
        assert_eq!(view.current().state, FetchState::Loaded(Vec::new()));

        store.fail_reads.store(true, std::sync::atomic::Ordering::SeqCst);
        view.refresh(&service).await;
        assert!(matches!(view.current().state, FetchState::Failed(_)));
    }

    #[tokio::test]
    async fn subscriber_receives_full_set_after_change() {
        let (_, service) = setup();
        service
            .create_many(&[fixtures::incident("old", "ANA")], None)
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let sync = RealtimeSynchronizer::new(service.clone());
        let subscription = sync
            .subscribe(move |records| {
                let _ = tx.send(records);
            })
            .await
            .unwrap();

        service
            .create_many(&[fixtures::incident("new", "BIA")], None)
            .await
            .unwrap();

        let records = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("refresh in time")
            .expect("callback fired");
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        subscription.unsubscribe();
    }

    #[tokio::test]
    async fn failed_refetch_reaches_subscriber_as_empty_set() {
        let (store, service) = setup();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sync = RealtimeSynchronizer::new(service.clone());
        let _subscription = sync
            .subscribe(move |records| {
                let _ = tx.send(records);
            })
            .await
            .unwrap();

        store.fail_reads.store(true, Ordering::SeqCst);
        service
            .create_many(&[fixtures::incident("gest-1", "ANA")], None)
            .await
            .unwrap();

        let records = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("refresh in time")
            .expect("callback fired");
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn subscriber_shares_the_given_view() {
        let (_, service) = setup();
        let view = Arc::new(RecordView::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sync = RealtimeSynchronizer::new(service.clone()).with_view(view.clone());
        let _subscription = sync
            .subscribe(move |records: Vec<Incident>| {
                let _ = tx.send(records.len());
            })
            .await
            .unwrap();

        // A local refresh of the same view reaches the subscriber too.
        view.refresh(&service).await;
        let seen = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(seen, Some(0));

        service
            .create_many(&[fixtures::incident("gest-1", "ANA")], None)
            .await
            .unwrap();
        let seen = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(seen, Some(1));
        assert!(view.current().ticket >= 2);
    }

    #[tokio::test]
    async fn attached_view_follows_deletes() {
        let (_, service) = setup();
        service
            .create_many(&[fixtures::incident("gone", "ANA")], None)
            .await
            .unwrap();
        let view = Arc::new(RecordView::new());
        let mut updates = view.watch();
        let sync = RealtimeSynchronizer::new(service.clone());
        let _subscription = sync.attach(view.clone()).await.unwrap();

        service.delete_one("gone").await.unwrap();
        timeout(Duration::from_secs(2), updates.changed())
            .await
            .expect("view updated in time")
            .unwrap();
        assert_eq!(view.current().state, FetchState::Loaded(Vec::new()));
    }

    #[tokio::test]
    async fn burst_of_changes_settles_on_latest_state() {
        let (store, service) = setup();
        let view = Arc::new(RecordView::new());
        let sync = RealtimeSynchronizer::new(service.clone());
        let _subscription = sync.attach(view.clone()).await.unwrap();

        for index in 0..5 {
            service
                .create_many(&[fixtures::incident(&format!("gest-{index}"), "ANA")], None)
                .await
                .unwrap();
        }

        let mut updates = view.watch();
        timeout(Duration::from_secs(2), async {
            loop {
                if matches!(&view.current().state, FetchState::Loaded(records) if records.len() == 5)
                {
                    break;
                }
                updates.changed().await.unwrap();
            }
        })
        .await
        .expect("view caught up");

        // Never more refetches than notifications; a burst may collapse.
        assert!(store.select_calls.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_releases_the_feed() {
        let (store, service) = setup();
        let sync = RealtimeSynchronizer::new(service);
        let subscription = sync.subscribe(|_| {}).await.unwrap();
        assert!(subscription.is_active());
        assert_eq!(store.listeners(), 1);

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert!(!subscription.is_active());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.listeners(), 0);
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let (store, service) = setup();
        let sync = RealtimeSynchronizer::new(service);
        drop(sync.subscribe(|_| {}).await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.listeners(), 0);
    }
}
