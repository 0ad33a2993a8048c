use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

type Flight<T> = Shared<BoxFuture<'static, T>>;

struct Entry<T> {
    generation: u64,
    waiters: usize,
    flight: Flight<T>,
}

struct Registry<T> {
    next_generation: u64,
    entries: HashMap<String, Entry<T>>,
}

/// Coalesces concurrent work per key: callers that arrive while a future for the
/// same key is pending await that future instead of starting another.
///
/// The entry is dropped when the future settles, or when its last waiter gives
/// up. In the second case the future itself is dropped with it.
pub struct InflightRegistry<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for InflightRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T> Default for InflightRegistry<T> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_generation: 0,
                entries: HashMap::new(),
            })),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> InflightRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a pending future.
    pub fn len(&self) -> usize {
        self.registry.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Awaits the pending future for `key`, starting it with `make` if there is none.
    ///
    /// Cancel-safe: dropping the returned future releases this caller's interest.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (flight, ticket) = self.join(key, make);
        let result = flight.await;
        drop(ticket);
        result
    }

    fn join<F, Fut>(&self, key: &str, make: F) -> (Flight<T>, Ticket<T>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut registry = self.registry.lock();
        if let Some(entry) = registry.entries.get_mut(key) {
            entry.waiters += 1;
            log::debug!("joining in-flight request {key} ({} waiters)", entry.waiters);
            let ticket = Ticket {
                registry: Arc::clone(&self.registry),
                key: key.to_string(),
                generation: entry.generation,
            };
            return (entry.flight.clone(), ticket);
        }

        let generation = registry.next_generation;
        registry.next_generation += 1;

        let work = make();
        let settle = Arc::clone(&self.registry);
        let settle_key = key.to_string();
        let flight = async move {
            let result = work.await;
            remove_generation(&settle, &settle_key, generation);
            result
        }
        .boxed()
        .shared();

        registry.entries.insert(
            key.to_string(),
            Entry {
                generation,
                waiters: 1,
                flight: flight.clone(),
            },
        );
        let ticket = Ticket {
            registry: Arc::clone(&self.registry),
            key: key.to_string(),
            generation,
        };
        (flight, ticket)
    }
}

fn remove_generation<T>(registry: &Mutex<Registry<T>>, key: &str, generation: u64) {
    let mut registry = registry.lock();
    if registry.entries.get(key).is_some_and(|e| e.generation == generation) {
        registry.entries.remove(key);
    }
}

/// One caller's interest in a flight.
struct Ticket<T> {
    registry: Arc<Mutex<Registry<T>>>,
    key: String,
    generation: u64,
}

impl<T> Drop for Ticket<T> {
    fn drop(&mut self) {
        let mut registry = self.registry.lock();
        let abandoned = match registry.entries.get_mut(&self.key) {
            Some(entry) if entry.generation == self.generation => {
                entry.waiters = entry.waiters.saturating_sub(1);
                entry.waiters == 0
            }
            _ => false,
        };
        if abandoned {
            log::debug!("dropping abandoned in-flight request {}", self.key);
            registry.entries.remove(&self.key);
        }
    }
}
