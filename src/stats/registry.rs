use parking_lot::Mutex;
use std::sync::Arc;

use super::{Backend, Sample, Tags};

/// Configuration phase of a [`Registry`]: backends are appended here, in
/// delivery order, before the run starts.
#[derive(Default)]
pub struct RegistryBuilder {
    backends: Vec<Arc<dyn Backend>>,
    extra_tags: Tags,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn extra_tags(mut self, tags: Tags) -> Self {
        self.extra_tags = tags;
        self
    }

    pub fn build(self) -> Registry {
        Registry {
            backends: self.backends,
            extra_tags: self.extra_tags,
            buffer: Mutex::new(Vec::new()),
        }
    }
}

/// Sample pipeline shared by every VU and ticker of a run.
///
/// The backend list is fixed at build time and read without locking; only
/// the pending-sample buffer is guarded.
pub struct Registry {
    backends: Vec<Arc<dyn Backend>>,
    extra_tags: Tags,
    buffer: Mutex<Vec<Sample>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Buffers `sample` for the next [`submit`](Self::submit), tagging it
    /// with the run's extra tags. Tags already on the sample take precedence.
    pub fn add(&self, mut sample: Sample) {
        for (key, value) in &self.extra_tags {
            sample
                .tags
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self.buffer.lock().push(sample);
    }

    /// Number of samples waiting for the next submit.
    pub fn pending(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Delivers everything buffered so far to each backend in registration
    /// order and returns the batch size. A failing backend is logged and
    /// skipped; its batch is not replayed.
    pub fn submit(&self) -> usize {
        let batch = std::mem::take(&mut *self.buffer.lock());
        if batch.is_empty() {
            return 0;
        }

        for backend in &self.backends {
            if let Err(e) = backend.submit(&batch) {
                tracing::error!(backend = backend.name(), error = %e, "couldn't submit stats");
            }
        }
        batch.len()
    }
}
