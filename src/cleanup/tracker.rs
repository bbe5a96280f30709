// Resource tracker
// Observes externally owned objects through weak handles; dead entries drop out lazily

use parking_lot::ReentrantMutex;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Callback run when a tracked resource is cleaned up
pub type ResourceCallback = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

struct TrackedResource {
    handle: Weak<dyn Any + Send + Sync>,
    resource_type: String,
    on_cleanup: Option<ResourceCallback>,
}

impl TrackedResource {
    fn is_alive(&self) -> bool {
        self.handle.strong_count() > 0
    }
}

/// Registry of tracked resources keyed by id.
///
/// The tracker never keeps a resource alive. Once the last `Arc` to a resource
/// is dropped its entry disappears from every query without an explicit
/// `unregister`, and its cleanup callback is not run.
pub struct ResourceTracker {
    entries: ReentrantMutex<RefCell<HashMap<String, TrackedResource>>>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self {
            entries: ReentrantMutex::new(RefCell::new(HashMap::new())),
        }
    }

    /// Track `resource` under `id`, replacing any previous entry with that id
    pub fn register<T>(&self, id: impl Into<String>, resource: &Arc<T>, resource_type: impl Into<String>)
    where
        T: Any + Send + Sync,
    {
        self.insert(id.into(), resource, resource_type.into(), None);
    }

    /// Track `resource` and run `on_cleanup` when it is cleaned up
    pub fn register_with_cleanup<T, F>(
        &self,
        id: impl Into<String>,
        resource: &Arc<T>,
        resource_type: impl Into<String>,
        on_cleanup: F,
    ) where
        T: Any + Send + Sync,
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        let callback: ResourceCallback = Box::new(on_cleanup);
        self.insert(id.into(), resource, resource_type.into(), Some(callback));
    }

    fn insert<T>(
        &self,
        id: String,
        resource: &Arc<T>,
        resource_type: String,
        on_cleanup: Option<ResourceCallback>,
    ) where
        T: Any + Send + Sync,
    {
        let strong: Arc<dyn Any + Send + Sync> = resource.clone();
        let entry = TrackedResource {
            handle: Arc::downgrade(&strong),
            resource_type,
            on_cleanup,
        };

        let guard = self.entries.lock();
        debug!(resource_id = %id, resource_type = %entry.resource_type, "Tracking resource");
        // Dropped after the borrow ends: its callback may own objects whose Drop re-enters the tracker
        let replaced = guard.borrow_mut().insert(id.clone(), entry);
        if replaced.is_some() {
            debug!(resource_id = %id, "Replaced existing tracked resource");
        }
        drop(replaced);
    }

    /// Stop tracking `id`. Returns whether an entry was removed.
    pub fn unregister(&self, id: &str) -> bool {
        let guard = self.entries.lock();
        let removed = guard.borrow_mut().remove(id);
        removed.is_some()
    }

    /// Fetch a live resource by id
    pub fn get<T>(&self, id: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let guard = self.entries.lock();
        let strong = guard.borrow().get(id).and_then(|e| e.handle.upgrade())?;
        strong.downcast::<T>().ok()
    }

    pub fn contains(&self, id: &str) -> bool {
        let guard = self.entries.lock();
        let alive = guard.borrow().get(id).is_some_and(TrackedResource::is_alive);
        alive
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.sweep();
        let guard = self.entries.lock();
        let len = guard.borrow().len();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of live entries with the given type tag, sorted
    pub fn resources_of_type(&self, resource_type: &str) -> Vec<String> {
        self.sweep();
        let guard = self.entries.lock();
        let mut ids: Vec<String> = guard
            .borrow()
            .iter()
            .filter(|(_, e)| e.resource_type == resource_type)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Drop entries whose resource has been destroyed. Returns how many went away.
    pub fn sweep(&self) -> usize {
        let guard = self.entries.lock();
        let dead: Vec<TrackedResource> = {
            let mut entries = guard.borrow_mut();
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, e)| !e.is_alive())
                .map(|(id, _)| id.clone())
                .collect();
            let dead: Vec<TrackedResource> = ids
                .iter()
                .filter_map(|id| {
                    debug!(resource_id = %id, "Tracked resource was dropped");
                    entries.remove(id)
                })
                .collect();
            dead
        };
        dead.len()
    }

    /// Clean up every live entry of one type. Returns the number cleaned successfully.
    pub fn cleanup_of_type(&self, resource_type: &str) -> usize {
        let ids = self.resources_of_type(resource_type);
        self.cleanup_ids(&ids)
    }

    /// Clean up every live entry. Returns the number cleaned successfully.
    pub fn cleanup_all(&self) -> usize {
        self.sweep();
        let ids: Vec<String> = {
            let guard = self.entries.lock();
            let ids: Vec<String> = guard.borrow().keys().cloned().collect();
            ids
        };
        self.cleanup_ids(&ids)
    }

    fn cleanup_ids(&self, ids: &[String]) -> usize {
        ids.iter().filter(|id| self.cleanup_one(id)).count()
    }

    fn cleanup_one(&self, id: &str) -> bool {
        let guard = self.entries.lock();
        // Taken out before the callback runs so no other caller can clean it again
        let Some(entry) = guard.borrow_mut().remove(id) else {
            return false;
        };
        if !entry.is_alive() {
            return false;
        }

        let Some(on_cleanup) = entry.on_cleanup else {
            return true;
        };

        // Lock stays held: the callback may re-enter the tracker on this thread
        match catch_unwind(AssertUnwindSafe(on_cleanup)) {
            Ok(Ok(())) => {
                debug!(resource_id = %id, resource_type = %entry.resource_type, "Resource cleaned up");
                true
            }
            Ok(Err(e)) => {
                warn!(resource_id = %id, error = %format!("{e:#}"), "Resource cleanup callback failed");
                false
            }
            Err(_) => {
                warn!(resource_id = %id, "Resource cleanup callback panicked");
                false
            }
        }
    }
}

impl Default for ResourceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PreviewCache {
        _name: &'static str,
    }

    fn cache() -> Arc<PreviewCache> {
        Arc::new(PreviewCache { _name: "thumbs" })
    }

    #[test]
    fn test_dropped_resource_disappears() {
        let tracker = ResourceTracker::new();
        let res = cache();
        tracker.register("cache-1", &res, "cache");
        assert!(tracker.contains("cache-1"));
        assert_eq!(tracker.len(), 1);

        drop(res);
        assert!(!tracker.contains("cache-1"));
        assert!(tracker.is_empty());
        assert!(tracker.resources_of_type("cache").is_empty());
    }

    #[test]
    fn test_dropped_resource_skips_callback() {
        let tracker = ResourceTracker::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let res = cache();
        let c = calls.clone();
        tracker.register_with_cleanup("cache-1", &res, "cache", move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        drop(res);
        assert_eq!(tracker.cleanup_all(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unregister() {
        let tracker = ResourceTracker::new();
        let res = cache();
        tracker.register("cache-1", &res, "cache");
        assert!(tracker.unregister("cache-1"));
        assert!(!tracker.unregister("cache-1"));
        assert!(!tracker.contains("cache-1"));
    }

    #[test]
    fn test_reregister_replaces_entry() {
        let tracker = ResourceTracker::new();
        let a = cache();
        let b = cache();
        tracker.register("shared", &a, "cache");
        tracker.register("shared", &b, "image");
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.resources_of_type("image"), vec!["shared".to_string()]);
    }

    #[test]
    fn test_get_downcasts() {
        let tracker = ResourceTracker::new();
        let res = cache();
        tracker.register("cache-1", &res, "cache");
        assert!(tracker.get::<PreviewCache>("cache-1").is_some());
        assert!(tracker.get::<String>("cache-1").is_none());
        assert!(tracker.get::<PreviewCache>("missing").is_none());
    }

    #[test]
    fn test_cleanup_of_type_only_touches_that_type() {
        let tracker = ResourceTracker::new();
        let a = cache();
        let b = cache();
        let c = cache();
        tracker.register("a", &a, "image");
        tracker.register("b", &b, "image");
        tracker.register("c", &c, "cache");

        assert_eq!(tracker.cleanup_of_type("image"), 2);
        assert!(!tracker.contains("a"));
        assert!(tracker.contains("c"));
    }

    #[test]
    fn test_failed_callback_still_removes_entry() {
        let tracker = ResourceTracker::new();
        let res = cache();
        tracker.register_with_cleanup("bad", &res, "cache", || anyhow::bail!("locked"));
        let res2 = cache();
        tracker.register_with_cleanup("panics", &res2, "cache", || panic!("boom"));

        assert_eq!(tracker.cleanup_all(), 0);
        assert!(tracker.is_empty());
    }

    /// Unregisters itself when the last handle goes away
    struct SelfReleasing {
        tracker: Arc<ResourceTracker>,
        id: &'static str,
    }

    impl Drop for SelfReleasing {
        fn drop(&mut self) {
            self.tracker.unregister(self.id);
        }
    }

    /// Track a `SelfReleasing` child whose only strong handle lives in the
    /// cleanup callback of `owner_id`
    fn register_owner_with_child(tracker: &Arc<ResourceTracker>, owner: &Arc<PreviewCache>, owner_id: &str) {
        let child = Arc::new(SelfReleasing {
            tracker: tracker.clone(),
            id: "child",
        });
        tracker.register("child", &child, "child");
        tracker.register_with_cleanup(owner_id, owner, "cache", move || {
            drop(child);
            Ok(())
        });
    }

    #[test]
    fn test_unregister_drops_callback_that_reenters_tracker() {
        let tracker = Arc::new(ResourceTracker::new());
        let owner = cache();
        register_owner_with_child(&tracker, &owner, "owner");

        assert!(tracker.unregister("owner"));
        assert!(!tracker.contains("child"));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_replacing_entry_drops_callback_that_reenters_tracker() {
        let tracker = Arc::new(ResourceTracker::new());
        let owner = cache();
        register_owner_with_child(&tracker, &owner, "owner");

        tracker.register("owner", &owner, "cache");
        assert!(!tracker.contains("child"));
        assert_eq!(tracker.resources_of_type("cache"), vec!["owner".to_string()]);
    }

    #[test]
    fn test_sweep_drops_callback_that_reenters_tracker() {
        let tracker = Arc::new(ResourceTracker::new());
        let owner = cache();
        register_owner_with_child(&tracker, &owner, "owner");

        drop(owner);
        assert_eq!(tracker.sweep(), 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_callback_can_reenter_tracker() {
        let tracker = Arc::new(ResourceTracker::new());
        let res = cache();
        let follow_up = cache();
        let inner = tracker.clone();
        let follow_up_handle = follow_up.clone();
        tracker.register_with_cleanup("first", &res, "cache", move || {
            inner.register("second", &follow_up_handle, "cache");
            Ok(())
        });

        assert_eq!(tracker.cleanup_of_type("cache"), 1);
        assert!(tracker.contains("second"));
    }

    #[test]
    fn test_concurrent_cleanup_runs_each_callback_once() {
        let tracker = Arc::new(ResourceTracker::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut keep_alive = Vec::new();

        for i in 0..100 {
            let res = cache();
            let c = calls.clone();
            tracker.register_with_cleanup(format!("r{i}"), &res, "cache", move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            keep_alive.push(res);
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = tracker.clone();
                std::thread::spawn(move || t.cleanup_all())
            })
            .collect();
        let cleaned: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(cleaned, 100);
        assert_eq!(calls.load(Ordering::SeqCst), 100);
    }
}
