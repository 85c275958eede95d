//! Request-scoped value carrier.
//!
//! A [`Context`] is a cheap, cloneable handle to a mutable bag of typed values
//! shared by everything serving one in-flight request. Attaching a bag is
//! idempotent: attaching under a context that already carries one hands back
//! the same bag, so the values survive protocol hops.
//!
//! Operations on the bag are serialized by one mutex per request. There is no
//! ordering guarantee across keys.
//!
//! Types that can only offer part of the carrier surface (for example a frozen
//! snapshot handed to detached work) implement [`Carrier`] partially and report
//! [`CarrierError::NotSupported`] for the rest.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

pub mod clock;
pub mod keys;

/// A type-erased value stored in a bag.
pub type Entry = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CarrierError {
    #[error("context carries no value bag")]
    NoCarrier,
    #[error("value under `{key}` is not a `{expected}`")]
    TypeMismatch { key: String, expected: &'static str },
    #[error("`{op}` is not supported by this context")]
    NotSupported { op: &'static str },
}

/// The capability surface of a request carrier.
///
/// Only [`Carrier::load_entry`] is mandatory; writers override the rest.
pub trait Carrier {
    fn load_entry(&self, key: &str) -> Option<Entry>;

    fn store_entry(&self, key: &str, value: Entry) -> Result<(), CarrierError> {
        let _ = (key, value);
        Err(CarrierError::NotSupported { op: "store" })
    }

    /// Returns the existing entry under `key`, or inserts `default` and returns it.
    fn load_or_store_entry(&self, key: &str, default: Entry) -> Result<Entry, CarrierError> {
        let _ = (key, default);
        Err(CarrierError::NotSupported { op: "load_or_store" })
    }

    /// Removes `key`, returning whether it was present.
    fn delete(&self, key: &str) -> Result<bool, CarrierError> {
        let _ = key;
        Err(CarrierError::NotSupported { op: "delete" })
    }

    fn load<T>(&self, key: &str) -> Result<Option<T>, CarrierError>
    where
        Self: Sized,
        T: Any + Send + Sync + Clone,
    {
        match self.load_entry(key) {
            Some(entry) => downcast(key, &entry).map(Some),
            None => Ok(None),
        }
    }

    fn store<T>(&self, key: &str, value: T) -> Result<(), CarrierError>
    where
        Self: Sized,
        T: Any + Send + Sync,
    {
        self.store_entry(key, Arc::new(value))
    }

    fn load_or_store<T>(&self, key: &str, default: T) -> Result<T, CarrierError>
    where
        Self: Sized,
        T: Any + Send + Sync + Clone,
    {
        let entry = self.load_or_store_entry(key, Arc::new(default))?;
        downcast(key, &entry)
    }
}

fn downcast<T: Any + Clone>(key: &str, entry: &Entry) -> Result<T, CarrierError> {
    entry
        .as_ref()
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| CarrierError::TypeMismatch {
            key: key.to_string(),
            expected: type_name::<T>(),
        })
}

#[derive(Default)]
struct Bag {
    entries: Mutex<HashMap<String, Entry>>,
}

/// Handle to the value bag of one in-flight request.
#[derive(Clone, Default)]
pub struct Context {
    bag: Option<Arc<Bag>>,
}

impl Context {
    /// A context without a bag. Loads find nothing and writes fail.
    pub fn background() -> Self {
        Self::default()
    }

    /// A fresh context with its own empty bag.
    pub fn attached() -> Self {
        Self::attach(&Self::background()).0
    }

    /// Derives a child that carries a bag. The second value is `true` when
    /// `parent` already carried one, in which case the child shares it.
    pub fn attach(parent: &Context) -> (Context, bool) {
        match &parent.bag {
            Some(bag) => (
                Context {
                    bag: Some(Arc::clone(bag)),
                },
                true,
            ),
            None => (
                Context {
                    bag: Some(Arc::new(Bag::default())),
                },
                false,
            ),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.bag.is_some()
    }

    pub fn shares_bag_with(&self, other: &Context) -> bool {
        match (&self.bag, &other.bag) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let Some(bag) = &self.bag else {
            return Vec::new();
        };
        let mut keys: Vec<String> = bag.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Copies the current entries into a read-only snapshot.
    pub fn freeze(&self) -> FrozenContext {
        let entries = match &self.bag {
            Some(bag) => bag.entries.lock().clone(),
            None => HashMap::new(),
        };
        FrozenContext {
            entries: Arc::new(entries),
        }
    }
}

impl Carrier for Context {
    fn load_entry(&self, key: &str) -> Option<Entry> {
        let bag = self.bag.as_ref()?;
        bag.entries.lock().get(key).cloned()
    }

    fn store_entry(&self, key: &str, value: Entry) -> Result<(), CarrierError> {
        let bag = self.bag.as_ref().ok_or(CarrierError::NoCarrier)?;
        bag.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn load_or_store_entry(&self, key: &str, default: Entry) -> Result<Entry, CarrierError> {
        let bag = self.bag.as_ref().ok_or(CarrierError::NoCarrier)?;
        let mut entries = bag.entries.lock();
        Ok(Arc::clone(
            entries.entry(key.to_string()).or_insert(default),
        ))
    }

    fn delete(&self, key: &str) -> Result<bool, CarrierError> {
        let Some(bag) = &self.bag else {
            return Ok(false);
        };
        Ok(bag.entries.lock().remove(key).is_some())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bag {
            Some(_) => f.debug_struct("Context").field("keys", &self.keys()).finish(),
            None => f.write_str("Context(background)"),
        }
    }
}

/// Read-only copy of a context's entries.
#[derive(Clone)]
pub struct FrozenContext {
    entries: Arc<HashMap<String, Entry>>,
}

impl Carrier for FrozenContext {
    fn load_entry(&self, key: &str) -> Option<Entry> {
        self.entries.get(key).cloned()
    }
}

tokio::task_local! {
    static CURRENT: Context;
}

/// Runs `future` with `ctx` as the ambient context returned by [`current`].
pub async fn scope<F: Future>(ctx: Context, future: F) -> F::Output {
    CURRENT.scope(ctx, future).await
}

/// The ambient context of the running task, or a background context.
pub fn current() -> Context {
    CURRENT.try_with(Context::clone).unwrap_or_default()
}
