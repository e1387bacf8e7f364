//! Lazily constructed, shared object API client.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, error};

use crate::{api::ObjectApi, StorageError, StorageResult};

/// Shared client handle.
pub type ClientHandle = Arc<dyn ObjectApi>;

/// Builds the client on first use.
pub type ClientFactory = Box<dyn Fn() -> anyhow::Result<ClientHandle> + Send + Sync>;

/// Owns the single client of a storage backend.
///
/// The factory runs at most once successfully: concurrent first callers block
/// until the winning construction finishes and then share its result. A
/// failed construction is not cached, so the next call tries again.
pub struct ClientProvider {
    factory: ClientFactory,
    client: OnceCell<ClientHandle>,
}

impl ClientProvider {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<ClientHandle> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            client: OnceCell::new(),
        }
    }

    /// Provider that hands out an already constructed client.
    pub fn from_client(client: ClientHandle) -> Self {
        let provider = Self::new(|| {
            Err(anyhow::anyhow!(
                "client provider was created with a prebuilt client"
            ))
        });
        // A fresh cell is always empty.
        let _ = provider.client.set(client);
        provider
    }

    pub fn get_client(&self) -> StorageResult<ClientHandle> {
        self.client
            .get_or_try_init(|| {
                debug!("constructing object store client");
                (self.factory)().map_err(|source| {
                    error!("failed to construct object store client: {:#}", source);
                    StorageError::Construction { source }
                })
            })
            .cloned()
    }

    pub fn is_initialized(&self) -> bool {
        self.client.get().is_some()
    }
}

impl std::fmt::Debug for ClientProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientProvider")
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Barrier,
        },
        thread,
        time::Duration,
    };

    use super::*;
    use crate::MemoryObjectApi;

    #[test]
    fn test_concurrent_first_use_constructs_once() {
        const THREADS: usize = 16;
        let constructed = Arc::new(AtomicUsize::new(0));
        let counter = constructed.clone();
        let provider = Arc::new(ClientProvider::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            // Widen the race window.
            thread::sleep(Duration::from_millis(20));
            Ok(Arc::new(MemoryObjectApi::new()) as ClientHandle)
        }));

        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let provider = provider.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    provider.get_client().unwrap()
                })
            })
            .collect();
        let clients: Vec<ClientHandle> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        for client in &clients[1..] {
            assert!(Arc::ptr_eq(&clients[0], client));
        }
        assert!(Arc::ptr_eq(&clients[0], &provider.get_client().unwrap()));
    }

    #[test]
    fn test_failed_construction_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let provider = ClientProvider::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("credentials unavailable");
            }
            Ok(Arc::new(MemoryObjectApi::new()) as ClientHandle)
        });

        let Err(err) = provider.get_client() else {
            panic!("expected construction error");
        };
        assert!(matches!(err, StorageError::Construction { .. }));
        assert!(!provider.is_initialized());

        provider.get_client().unwrap();
        assert!(provider.is_initialized());
        provider.get_client().unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_from_client_never_calls_factory() {
        let client: ClientHandle = Arc::new(MemoryObjectApi::new());
        let provider = ClientProvider::from_client(client.clone());
        assert!(provider.is_initialized());
        assert!(Arc::ptr_eq(&client, &provider.get_client().unwrap()));
    }
}
