pub mod group;
pub mod pool;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub use group::{run_single, VuGroup};
pub use pool::VuPool;

// ─── Collaborator contracts ──────────────────────────────────────

/// Factory for virtual users. One runner serves a whole run.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Builds VU number `id`. Failure here aborts startup.
    async fn new_vu(&self, id: u64) -> Result<Box<dyn Vu>>;
}

/// One simulated client. Owned by exactly one worker at a time.
#[async_trait]
pub trait Vu: Send {
    /// Executes a single iteration. An error fails the iteration, never the VU.
    async fn run_once(&mut self, ctx: &CancellationToken) -> Result<()>;
}
