//! Bounded pool of exclusive guest instances.
//!
//! A semaphore with one permit per instance slot bounds how many exchanges
//! run guest code at once. Holding a permit entitles the holder to one
//! instance: an idle one if available, otherwise a freshly created one.
//! [`PooledGuest`] returns the instance on drop, so release happens on every
//! path out of an exchange, including errors and cancellation.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use http_wasm_common::{PoolConfig, RuntimeError};

use crate::guest::{Guest, GuestFactory};
use crate::host::Host;

/// Pool of guest instances for one module.
pub struct GuestPool<H: Host> {
    factory: GuestFactory<H>,
    idle: Mutex<Vec<Guest<H>>>,
    permits: Arc<Semaphore>,
    config: PoolConfig,
    closed: AtomicBool,
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Maximum number of instances.
    pub size: usize,
    /// Instances created and waiting for an exchange.
    pub idle: usize,
    /// Instances checked out right now.
    pub in_use: usize,
    /// The pool no longer hands out instances.
    pub closed: bool,
}

impl<H: Host> GuestPool<H> {
    /// Create an empty pool. Instances are created on demand or by
    /// [`GuestPool::warm`].
    pub fn new(factory: GuestFactory<H>, config: PoolConfig) -> Self {
        let size = config.size as usize;
        Self {
            factory,
            idle: Mutex::new(Vec::with_capacity(size)),
            permits: Arc::new(Semaphore::new(size)),
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// Create idle instances until `count` are available (capped at the
    /// pool size).
    ///
    /// # Errors
    ///
    /// Returns the first instance creation error.
    pub async fn warm(&self, count: usize) -> Result<(), RuntimeError> {
        let target = count.min(self.size());
        while self.idle.lock().len() < target {
            if self.is_closed() {
                return Err(RuntimeError::Closed);
            }
            let guest = self.factory.create().await?;
            self.idle.lock().push(guest);
        }
        info!(idle = target, "Guest pool warmed");
        Ok(())
    }

    /// Check out an instance for exclusive use.
    ///
    /// Waits according to the pool's acquire timeout: `None` waits until an
    /// instance is released or the pool closes, zero rejects immediately.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::PoolExhausted`] if no instance freed up in time
    /// - [`RuntimeError::Closed`] if the pool was closed, including while
    ///   waiting
    /// - Any instance creation error
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledGuest<H>, RuntimeError> {
        let start = Instant::now();
        let permit = self.acquire_permit(start).await?;

        if self.is_closed() {
            return Err(RuntimeError::Closed);
        }

        let idle = self.idle.lock().pop();
        let guest = match idle {
            Some(guest) => guest,
            None => {
                debug!("No idle guest, creating one");
                self.factory.create().await?
            }
        };

        Ok(PooledGuest {
            guest: Some(guest),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    async fn acquire_permit(&self, start: Instant) -> Result<OwnedSemaphorePermit, RuntimeError> {
        let permits = Arc::clone(&self.permits);
        match self.config.acquire_timeout() {
            Some(timeout) if timeout.is_zero() => {
                permits.try_acquire_owned().map_err(|e| match e {
                    TryAcquireError::Closed => RuntimeError::Closed,
                    TryAcquireError::NoPermits => RuntimeError::PoolExhausted { waited_ms: 0 },
                })
            }
            Some(timeout) => match tokio::time::timeout(timeout, permits.acquire_owned()).await {
                Ok(permit) => permit.map_err(|_| RuntimeError::Closed),
                Err(_) => Err(RuntimeError::PoolExhausted {
                    waited_ms: elapsed_ms(start),
                }),
            },
            None => permits
                .acquire_owned()
                .await
                .map_err(|_| RuntimeError::Closed),
        }
    }

    fn release(&self, guest: Guest<H>) {
        if guest.is_faulted() {
            debug!(guest_id = guest.id(), "Discarding faulted guest");
            return;
        }
        if guest.is_interrupted() {
            // Dropping the instance drops the exchange it still holds
            warn!(guest_id = guest.id(), "Discarding guest interrupted mid-exchange");
            return;
        }
        if self.is_closed() {
            return;
        }
        self.idle.lock().push(guest);
    }

    /// Close the pool.
    ///
    /// Waiters wake with [`RuntimeError::Closed`], idle instances are
    /// dropped, and instances still checked out are dropped when released.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();
        let dropped = std::mem::take(&mut *self.idle.lock()).len();
        info!(dropped_idle = dropped, "Guest pool closed");
    }

    /// Returns `true` once [`GuestPool::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Maximum number of instances.
    pub fn size(&self) -> usize {
        self.config.size as usize
    }

    /// Current occupancy.
    pub fn stats(&self) -> PoolStats {
        let closed = self.is_closed();
        let in_use = if closed {
            0
        } else {
            self.size().saturating_sub(self.permits.available_permits())
        };
        PoolStats {
            size: self.size(),
            idle: self.idle.lock().len(),
            in_use,
            closed,
        }
    }

    /// The factory instances are created with.
    pub fn factory(&self) -> &GuestFactory<H> {
        &self.factory
    }
}

impl<H: Host> std::fmt::Debug for GuestPool<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestPool")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// An instance checked out of a [`GuestPool`].
///
/// Dereferences to [`Guest`]. Dropping it returns the instance to the pool,
/// or discards it when it must not be reused or the pool closed meanwhile.
pub struct PooledGuest<H: Host> {
    guest: Option<Guest<H>>,
    pool: Arc<GuestPool<H>>,
    // Released after the instance is back in the idle list
    _permit: OwnedSemaphorePermit,
}

impl<H: Host> Deref for PooledGuest<H> {
    type Target = Guest<H>;

    fn deref(&self) -> &Self::Target {
        // Only taken in drop
        self.guest.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<H: Host> DerefMut for PooledGuest<H> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.guest.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<H: Host> Drop for PooledGuest<H> {
    fn drop(&mut self) {
        if let Some(guest) = self.guest.take() {
            self.pool.release(guest);
        }
    }
}

impl<H: Host> std::fmt::Debug for PooledGuest<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledGuest")
            .field("guest", &self.guest)
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
