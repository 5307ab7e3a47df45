//! Resource management

use crate::error::FetchError;

use tokio::sync::{Semaphore, SemaphorePermit};

/// [crate::resource_manager::ResourceManager] bounds the resources used by concurrent fetches.
/// Resource management is performed using a Tokio Semaphore for each type of resource.
#[derive(Debug, Default)]
pub struct ResourceManager {
    /// Optional semaphore for HTTP connections.
    connections: Option<Semaphore>,

    /// Optional semaphore for buffered granule memory (bytes).
    memory: Option<Semaphore>,

    /// Optional total memory pool in bytes.
    total_memory: Option<usize>,
}

impl ResourceManager {
    /// Returns a new ResourceManager object.
    ///
    /// # Arguments
    ///
    /// * `connection_limit`: Maximum number of concurrent transfers
    /// * `memory_limit`: Maximum number of granule bytes buffered at once
    pub fn new(connection_limit: Option<usize>, memory_limit: Option<usize>) -> Self {
        Self {
            connections: connection_limit.map(Semaphore::new),
            memory: memory_limit.map(Semaphore::new),
            total_memory: memory_limit,
        }
    }

    /// Acquire a connection resource.
    pub async fn connection(&self) -> Result<Option<SemaphorePermit>, FetchError> {
        optional_acquire(&self.connections, 1).await
    }

    /// Acquire memory resource.
    ///
    /// Fails immediately if more bytes are requested than the whole pool holds.
    pub async fn memory(&self, bytes: usize) -> Result<Option<SemaphorePermit>, FetchError> {
        if let Some(total_memory) = self.total_memory {
            if bytes > total_memory {
                return Err(FetchError::InsufficientMemory {
                    requested: bytes,
                    total: total_memory,
                });
            };
        };
        optional_acquire(&self.memory, bytes).await
    }
}

/// Acquire permits on an optional Semaphore, if present.
async fn optional_acquire(
    sem: &Option<Semaphore>,
    n: usize,
) -> Result<Option<SemaphorePermit>, FetchError> {
    if let Some(sem) = sem {
        sem.acquire_many(n.try_into()?)
            .await
            .map(Some)
            .map_err(|err| err.into())
    } else {
        Ok(None)
    }
}
