//! Bounded pool of backend store handles
//!
//! A semaphore carries one permit per handle. `checkout` waits for a permit,
//! then takes a handle off the free list; dropping the guard puts the handle
//! back before the permit is released.

use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use seiswave::WaveStore;
use thiserror::Error;
use tokio::sync::{Semaphore, SemaphorePermit};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("store pool needs at least one handle")]
    Empty,
    #[error("store pool is closed")]
    Closed,
}

pub struct StorePool {
    handles: Mutex<Vec<Arc<dyn WaveStore>>>,
    permits: Semaphore,
    size: usize,
}

impl StorePool {
    pub fn new(handles: Vec<Arc<dyn WaveStore>>) -> Result<Self, PoolError> {
        if handles.is_empty() {
            return Err(PoolError::Empty);
        }
        let size = handles.len();
        Ok(Self {
            handles: Mutex::new(handles),
            permits: Semaphore::new(size),
            size,
        })
    }

    /// `size` handles onto one thread-safe store.
    pub fn shared(store: Arc<dyn WaveStore>, size: usize) -> Result<Self, PoolError> {
        Self::new(vec![store; size])
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Handles not currently checked out.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free handle.
    pub async fn checkout(&self) -> Result<StoreHandle<'_>, PoolError> {
        let permit = self.permits.acquire().await.map_err(|_| PoolError::Closed)?;
        let store = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or(PoolError::Closed)?;
        Ok(StoreHandle {
            pool: self,
            store,
            _permit: permit,
        })
    }

    /// Fail all pending and future checkouts.
    pub fn close(&self) {
        self.permits.close();
    }
}

/// A checked-out handle; returns to the pool on drop.
pub struct StoreHandle<'a> {
    pool: &'a StorePool,
    store: Arc<dyn WaveStore>,
    _permit: SemaphorePermit<'a>,
}

impl StoreHandle<'_> {
    /// An owned reference for use inside `spawn_blocking`.
    pub fn store(&self) -> Arc<dyn WaveStore> {
        self.store.clone()
    }
}

impl Deref for StoreHandle<'_> {
    type Target = dyn WaveStore;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref()
    }
}

impl Drop for StoreHandle<'_> {
    fn drop(&mut self) {
        self.pool
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.store.clone());
    }
}
