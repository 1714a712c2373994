//! Callback subscriptions
//!
//! Subscribers are kept in registration order. A callback is identified by
//! the allocation behind its `Arc`, so registering the same `Arc` (or a
//! clone of it) twice for one category is a no-op.
//!
//! Dispatch works on a [`DispatchBatch`] taken while the client state is
//! locked and invoked after the lock is released. Callbacks may therefore
//! call back into the client, including removing themselves.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

use crate::error::EomError;
use crate::types::{NotifyCategory, OutputId};

/// Opaque value handed back to a callback on every invocation
pub type UserData = Arc<dyn Any + Send + Sync>;

/// Subscriber callback, invoked with the id of the output that changed
pub type NotifyCallback = Arc<dyn Fn(OutputId, Option<&UserData>) + Send + Sync>;

/// Wrap a closure as a [`NotifyCallback`]
pub fn callback<F>(f: F) -> NotifyCallback
where
    F: Fn(OutputId, Option<&UserData>) + Send + Sync + 'static,
{
    Arc::new(f)
}

fn same_callback(a: &NotifyCallback, b: &NotifyCallback) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Whether a registration added a new subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Added,
    AlreadyRegistered,
}

#[derive(Clone)]
struct Subscriber {
    category: NotifyCategory,
    callback: NotifyCallback,
    user_data: Option<UserData>,
}

#[derive(Default)]
pub struct CallbackDispatcher {
    subscribers: Vec<Subscriber>,
}

impl CallbackDispatcher {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    #[cfg(test)]
    pub fn count(&self, category: NotifyCategory) -> usize {
        self.subscribers
            .iter()
            .filter(|s| s.category == category)
            .count()
    }

    /// Subscribe `callback` to `category`
    ///
    /// The user data of an existing registration is not replaced.
    ///
    /// # Errors
    ///
    /// Returns `EomError::OutOfMemory` if the subscriber list cannot grow.
    pub fn register(
        &mut self,
        category: NotifyCategory,
        callback: NotifyCallback,
        user_data: Option<UserData>,
    ) -> Result<Registration, EomError> {
        if self
            .subscribers
            .iter()
            .any(|s| s.category == category && same_callback(&s.callback, &callback))
        {
            debug!(%category, "Callback already registered");
            return Ok(Registration::AlreadyRegistered);
        }

        self.subscribers
            .try_reserve(1)
            .map_err(|_| EomError::OutOfMemory)?;
        self.subscribers.push(Subscriber {
            category,
            callback,
            user_data,
        });
        Ok(Registration::Added)
    }

    /// Unsubscribe `callback` from `category`; returns whether it was found
    pub fn unregister(&mut self, category: NotifyCategory, callback: &NotifyCallback) -> bool {
        match self
            .subscribers
            .iter()
            .position(|s| s.category == category && same_callback(&s.callback, callback))
        {
            Some(index) => {
                self.subscribers.remove(index);
                true
            }
            None => false,
        }
    }

    /// Take the subscribers of `category` for dispatch outside the lock
    pub fn batch(&self, category: NotifyCategory) -> DispatchBatch {
        DispatchBatch {
            category,
            subscribers: self
                .subscribers
                .iter()
                .filter(|s| s.category == category)
                .cloned()
                .collect(),
        }
    }
}

/// Subscribers of one category captured at dispatch time
pub struct DispatchBatch {
    category: NotifyCategory,
    subscribers: Vec<Subscriber>,
}

impl DispatchBatch {
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Invoke every captured callback in registration order
    ///
    /// A panicking callback is logged and does not stop the others.
    pub fn dispatch(&self, id: OutputId) {
        for subscriber in &self.subscribers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                (subscriber.callback)(id, subscriber.user_data.as_ref())
            }));
            if result.is_err() {
                error!(category = %self.category, output_id = %id, "Callback panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn counting() -> (NotifyCallback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        (
            callback(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    #[test]
    fn test_register_deduplicates_per_category() {
        let mut dispatcher = CallbackDispatcher::new();
        let (cb, count) = counting();

        assert_eq!(
            dispatcher.register(NotifyCategory::Added, cb.clone(), None).unwrap(),
            Registration::Added
        );
        assert_eq!(
            dispatcher.register(NotifyCategory::Added, cb.clone(), None).unwrap(),
            Registration::AlreadyRegistered
        );
        // Same callback under another category is a separate subscription
        assert_eq!(
            dispatcher.register(NotifyCategory::Removed, cb, None).unwrap(),
            Registration::Added
        );

        assert_eq!(dispatcher.len(), 2);
        dispatcher.batch(NotifyCategory::Added).dispatch(OutputId(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_closures_are_distinct_subscribers() {
        let mut dispatcher = CallbackDispatcher::new();
        let (a, _) = counting();
        let (b, _) = counting();

        dispatcher.register(NotifyCategory::Added, a, None).unwrap();
        dispatcher.register(NotifyCategory::Added, b, None).unwrap();

        assert_eq!(dispatcher.count(NotifyCategory::Added), 2);
    }

    #[test]
    fn test_unregister() {
        let mut dispatcher = CallbackDispatcher::new();
        let (cb, _) = counting();
        dispatcher.register(NotifyCategory::ModeChanged, cb.clone(), None).unwrap();

        assert!(!dispatcher.unregister(NotifyCategory::Added, &cb));
        assert!(dispatcher.unregister(NotifyCategory::ModeChanged, &cb));
        assert!(!dispatcher.unregister(NotifyCategory::ModeChanged, &cb));
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_dispatch_order_and_user_data() {
        let mut dispatcher = CallbackDispatcher::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let log = log.clone();
            let user_data: UserData = Arc::new(tag);
            dispatcher
                .register(
                    NotifyCategory::Added,
                    callback(move |id, data| {
                        let tag = data
                            .and_then(|d| d.downcast_ref::<&str>())
                            .copied()
                            .unwrap_or("none");
                        log.lock().unwrap().push((tag, id));
                    }),
                    Some(user_data),
                )
                .unwrap();
        }

        dispatcher.batch(NotifyCategory::Added).dispatch(OutputId(5));

        assert_eq!(
            *log.lock().unwrap(),
            vec![("first", OutputId(5)), ("second", OutputId(5))]
        );
    }

    #[test]
    fn test_batch_is_a_snapshot() {
        let mut dispatcher = CallbackDispatcher::new();
        let (cb, count) = counting();
        dispatcher.register(NotifyCategory::Added, cb.clone(), None).unwrap();

        let batch = dispatcher.batch(NotifyCategory::Added);
        dispatcher.unregister(NotifyCategory::Added, &cb);
        batch.dispatch(OutputId(1));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(dispatcher.batch(NotifyCategory::Added).is_empty());
    }

    #[test]
    fn test_panicking_callback_does_not_stop_others() {
        let mut dispatcher = CallbackDispatcher::new();
        let (cb, count) = counting();
        dispatcher
            .register(NotifyCategory::Removed, callback(|_, _| panic!("boom")), None)
            .unwrap();
        dispatcher.register(NotifyCategory::Removed, cb, None).unwrap();

        dispatcher.batch(NotifyCategory::Removed).dispatch(OutputId(3));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
