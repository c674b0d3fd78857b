use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{Runner, Vu};
use crate::error::{Error, Result};

/// Fixed set of VUs created up front. Scaling moves VUs between the free
/// list and running workers; nothing is created or dropped mid-run.
pub struct VuPool {
    free: Mutex<Vec<Box<dyn Vu>>>,
    returned: Notify,
    capacity: usize,
}

impl VuPool {
    /// Creates exactly `size` VUs through `runner`. The first factory error
    /// aborts, since an under-provisioned pool can't honour the plan.
    pub async fn prewarm(runner: &dyn Runner, size: usize) -> Result<Self> {
        let mut free = Vec::with_capacity(size);
        for id in 0..size as u64 {
            let vu = runner
                .new_vu(id)
                .await
                .map_err(|e| Error::VuCreation(format!("VU {id}: {e}")))?;
            free.push(vu);
        }
        tracing::debug!(vus = size, "VU pool ready");

        Ok(Self {
            free: Mutex::new(free),
            returned: Notify::new(),
            capacity: size,
        })
    }

    /// Total VUs owned by the pool, checked out or not.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// VUs currently sitting in the free list.
    pub fn available(&self) -> usize {
        self.free.lock().len()
    }

    pub fn try_checkout(&self) -> Option<Box<dyn Vu>> {
        self.free.lock().pop()
    }

    /// Takes a VU, waiting for one to be put back if all are in use.
    pub async fn checkout(&self) -> Box<dyn Vu> {
        loop {
            if let Some(vu) = self.try_checkout() {
                return vu;
            }
            self.returned.notified().await;
        }
    }

    pub fn put_back(&self, vu: Box<dyn Vu>) {
        self.free.lock().push(vu);
        self.returned.notify_one();
    }
}
