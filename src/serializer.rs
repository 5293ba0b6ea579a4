//! Serializers: single-consumer FIFO work queues.
//!
//! A [`Serializer`] guarantees that its tasks run one at a time and strictly
//! in push order, which gives every SIP conversation single-threaded
//! processing without a global lock. The [`SerializerPool`] fans conversations
//! out over a fixed set of serializers by hashing Call-ID and remote tag.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Queue depth at which a serializer puts the process into overload alert.
pub const HIGH_WATER_LEVEL: usize = 500;

/// Queue depth a serializer must drain back to before its alert clears.
const LOW_WATER_LEVEL: usize = HIGH_WATER_LEVEL * 9 / 10;

/// Default number of serializers in the pool. Best if prime.
pub const DEFAULT_POOL_SIZE: usize = 31;

static NAME_SEQ: AtomicUsize = AtomicUsize::new(0);

type Task = BoxFuture<'static, ()>;

tokio::task_local! {
    static CURRENT_SERIALIZER: Arc<str>;
}

/// Source of the process-wide overload verdict. Must be O(1).
pub trait OverloadOracle: Send + Sync + 'static {
    /// Returns `true` while any work queue sits above its high-water mark.
    fn alert(&self) -> bool;
}

/// Shared overload accounting for a group of serializers.
///
/// A serializer raises the count when its queue crosses
/// [`HIGH_WATER_LEVEL`] and clears it once the queue drains below the
/// low-water mark again.
#[derive(Default)]
pub struct AlertState {
    above: AtomicUsize,
}

impl AlertState {
    fn raise(&self) {
        self.above.fetch_add(1, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.above.fetch_sub(1, Ordering::SeqCst);
    }
}

impl OverloadOracle for AlertState {
    fn alert(&self) -> bool {
        self.above.load(Ordering::SeqCst) > 0
    }
}

struct Inner {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Task>,
    cancel: CancellationToken,
    /// Tasks queued or currently running.
    depth: AtomicUsize,
    alerting: AtomicBool,
    alerts: Arc<AlertState>,
    registry: SerializerRegistry,
}

impl Inner {
    fn task_queued(&self) {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if depth >= HIGH_WATER_LEVEL && !self.alerting.swap(true, Ordering::SeqCst) {
            log::warn!("Serializer {} above high water ({} tasks)", self.name, depth);
            self.alerts.raise();
        }
    }

    fn task_done(&self) {
        let depth = self.depth.fetch_sub(1, Ordering::SeqCst) - 1;
        if depth <= LOW_WATER_LEVEL && self.alerting.swap(false, Ordering::SeqCst) {
            self.alerts.clear();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.registry.remove(&self.name);
        if self.alerting.load(Ordering::SeqCst) {
            self.alerts.clear();
        }
        log::trace!("Serializer {} dropped", self.name);
    }
}

/// A reference-counted handle to a single-consumer FIFO work queue.
#[derive(Clone)]
pub struct Serializer(Arc<Inner>);

impl Serializer {
    pub(crate) fn spawn(
        prefix: &str,
        alerts: Arc<AlertState>,
        registry: &SerializerRegistry,
    ) -> Serializer {
        let seq = NAME_SEQ.fetch_add(1, Ordering::Relaxed);
        let name: Arc<str> = format!("{prefix}/distributor/{seq:08x}").into();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let serializer = Serializer(Arc::new(Inner {
            name: name.clone(),
            tx,
            cancel: cancel.clone(),
            depth: AtomicUsize::new(0),
            alerting: AtomicBool::new(false),
            alerts,
            registry: registry.clone(),
        }));

        registry.insert(&serializer);

        let weak = Arc::downgrade(&serializer.0);
        tokio::spawn(Self::run(name, rx, cancel, weak));

        serializer
    }

    /// The worker: executes tasks one at a time, in push order.
    async fn run(
        name: Arc<str>,
        mut rx: mpsc::UnboundedReceiver<Task>,
        cancel: CancellationToken,
        inner: Weak<Inner>,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                task = rx.recv() => {
                    let Some(task) = task else { break };
                    CURRENT_SERIALIZER.scope(name.clone(), task).await;
                    if let Some(inner) = inner.upgrade() {
                        inner.task_done();
                    }
                }
            }
        }
        log::trace!("Serializer {} stopped", name);
    }

    /// The stable, process-unique name of this serializer.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Name of the serializer the calling task is executing on, if any.
    pub fn current_name() -> Option<Arc<str>> {
        CURRENT_SERIALIZER.try_with(|name| name.clone()).ok()
    }

    /// Queues a task. Never blocks; fails only when the serializer has been
    /// shut down.
    pub fn push<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.0.cancel.is_cancelled() {
            return Err(Error::SerializerClosed(self.0.name.to_string()));
        }

        self.0.task_queued();
        if self.0.tx.send(Box::pin(task)).is_err() {
            self.0.task_done();
            return Err(Error::SerializerClosed(self.0.name.to_string()));
        }

        Ok(())
    }

    /// Number of tasks queued or running.
    pub fn queue_depth(&self) -> usize {
        self.0.depth.load(Ordering::SeqCst)
    }

    /// Stops the worker. Tasks already queued are discarded.
    pub(crate) fn close(&self) {
        self.0.cancel.cancel();
    }
}

/// A by-name lookup table of live serializers.
///
/// Entries are weak: a serializer that has been destroyed resolves to `None`,
/// so stale names recorded on old messages degrade gracefully.
#[derive(Clone, Default)]
pub struct SerializerRegistry(Arc<Mutex<HashMap<Arc<str>, Weak<Inner>>>>);

impl SerializerRegistry {
    fn insert(&self, serializer: &Serializer) {
        self.0
            .lock()
            .expect("Lock failed")
            .insert(serializer.0.name.clone(), Arc::downgrade(&serializer.0));
    }

    fn remove(&self, name: &str) {
        self.0.lock().expect("Lock failed").remove(name);
    }

    /// Resolves a serializer by name, if it is still alive.
    pub fn get(&self, name: &str) -> Option<Serializer> {
        self.0
            .lock()
            .expect("Lock failed")
            .get(name)?
            .upgrade()
            .map(Serializer)
    }
}

/// Computes a hash value over a string, folded into `hash`.
///
/// This famous hash algorithm was written by Dan Bernstein and is
/// commonly used.
///
/// <http://www.cse.yorku.ca/~oz/hash.html>
pub fn str_hash_add(s: &str, hash: i32) -> i32 {
    s.bytes().fold(hash, |h, b| h.wrapping_mul(33) ^ i32::from(b))
}

/// Computes a hash value over a string.
pub fn str_hash(s: &str) -> i32 {
    str_hash_add(s, 5381)
}

/// An ordered, fixed-size pool of serializers.
///
/// Entries are created once and never replaced; indices stay stable for the
/// life of the pool.
pub struct SerializerPool {
    entries: Box<[Serializer]>,
    alerts: Arc<AlertState>,
}

impl SerializerPool {
    /// Builds a pool of `size` serializers named `<prefix>/distributor/<seq>`.
    pub fn build(prefix: &str, size: usize, registry: &SerializerRegistry) -> SerializerPool {
        let alerts = Arc::new(AlertState::default());
        let entries = (0..size)
            .map(|_| Serializer::spawn(prefix, alerts.clone(), registry))
            .collect();

        SerializerPool { entries, alerts }
    }

    /// Pool slot for a conversation.
    ///
    /// Call-ID plus remote tag is the weakest identifier that is still stable
    /// across every message of one conversation, so hashing it keeps a
    /// conversation on one serializer.
    pub fn index_for(&self, call_id: &str, remote_tag: &str) -> usize {
        let hash = str_hash_add(remote_tag, str_hash(call_id));

        hash.unsigned_abs() as usize % self.entries.len()
    }

    /// Picks the serializer for a conversation.
    pub fn pick(&self, call_id: &str, remote_tag: &str) -> Serializer {
        self.entries[self.index_for(call_id, remote_tag)].clone()
    }

    /// Number of serializers in the pool.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the pool holds no serializer.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn entry(&self, index: usize) -> &Serializer {
        &self.entries[index]
    }

    pub(crate) fn alerts(&self) -> Arc<AlertState> {
        self.alerts.clone()
    }

    /// Stops every serializer in the pool.
    pub(crate) fn shutdown(&self) {
        for serializer in self.entries.iter() {
            serializer.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tasks_run_in_push_order() {
        let registry = SerializerRegistry::default();
        let alerts = Arc::new(AlertState::default());
        let serializer = Serializer::spawn("test", alerts, &registry);

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..100u32 {
            let order = order.clone();
            serializer
                .push(async move {
                    order.lock().unwrap().push(i);
                })
                .unwrap();
        }

        wait_for(|| order.lock().unwrap().len() == 100).await;
        let order = order.lock().unwrap();
        assert_eq!(*order, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_name_inside_task() {
        let registry = SerializerRegistry::default();
        let alerts = Arc::new(AlertState::default());
        let serializer = Serializer::spawn("test", alerts, &registry);

        assert!(Serializer::current_name().is_none());

        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        serializer
            .push(async move {
                *seen2.lock().unwrap() = Serializer::current_name();
            })
            .unwrap();

        wait_for(|| seen.lock().unwrap().is_some()).await;
        assert_eq!(
            seen.lock().unwrap().as_deref(),
            Some(serializer.name())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_resolves_live_serializers_only() {
        let registry = SerializerRegistry::default();
        let alerts = Arc::new(AlertState::default());
        let serializer = Serializer::spawn("test", alerts, &registry);
        let name = serializer.name().to_string();

        assert!(registry.get(&name).is_some());

        drop(serializer);
        assert!(registry.get(&name).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_after_close_fails() {
        let registry = SerializerRegistry::default();
        let alerts = Arc::new(AlertState::default());
        let serializer = Serializer::spawn("test", alerts, &registry);

        serializer.close();
        let result = serializer.push(async {});
        assert_matches!(result, Err(crate::error::Error::SerializerClosed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_water_raises_alert() {
        let registry = SerializerRegistry::default();
        let alerts = Arc::new(AlertState::default());
        let serializer = Serializer::spawn("test", alerts.clone(), &registry);

        // Park the worker on the first task so the queue can fill.
        let gate = Arc::new(tokio::sync::Notify::new());
        let parked = gate.clone();
        serializer
            .push(async move {
                parked.notified().await;
            })
            .unwrap();

        for _ in 0..HIGH_WATER_LEVEL {
            serializer.push(async {}).unwrap();
        }
        assert!(alerts.alert());

        gate.notify_one();
        wait_for(|| serializer.queue_depth() == 0).await;
        assert!(!alerts.alert());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_names_are_unique_and_indices_stable() {
        let registry = SerializerRegistry::default();
        let pool = SerializerPool::build("test", DEFAULT_POOL_SIZE, &registry);

        let names: std::collections::HashSet<_> = (0..pool.len())
            .map(|i| pool.entry(i).name().to_string())
            .collect();
        assert_eq!(names.len(), DEFAULT_POOL_SIZE);

        let first = pool.index_for("abc@x", "T1");
        for _ in 0..10 {
            assert_eq!(pool.index_for("abc@x", "T1"), first);
        }
    }

    #[test]
    fn test_hash_is_djb2() {
        // Seed plus one byte: 5381 * 33 ^ 'a'.
        assert_eq!(str_hash(""), 5381);
        assert_eq!(str_hash("a"), (5381 * 33) ^ i32::from(b'a'));
        assert_eq!(
            str_hash_add("T1", str_hash("abc@x")),
            str_hash_add("T1", str_hash_add("abc@x", 5381))
        );

        // Stable across runs and implementations.
        let h = str_hash_add("1928301774", str_hash("a84b4c76e66710@pc33.atlanta.com"));
        assert_eq!(h, str_hash_add("1928301774", str_hash("a84b4c76e66710@pc33.atlanta.com")));
    }
}
