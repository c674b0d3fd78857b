use parking_lot::Mutex;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use super::{Backend, Filter, Sample};
use crate::error::{Error, Result};

/// Dumps raw samples as JSON lines (`--raw`, `--out json[=path]`).
pub struct JsonLinesBackend {
    name: String,
    filter: Filter,
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesBackend {
    pub fn new(name: impl Into<String>, out: Box<dyn Write + Send>, filter: Filter) -> Self {
        Self {
            name: name.into(),
            filter,
            out: Mutex::new(out),
        }
    }

    pub fn stdout(filter: Filter) -> Self {
        Self::new("stdout", Box::new(io::stdout()), filter)
    }

    pub fn file(path: &Path, filter: Filter) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(
            path.display().to_string(),
            Box::new(BufWriter::new(file)),
            filter,
        ))
    }

    /// Resolves an `--out` selector: `json`, `jsonl` and `stdout` write to
    /// stdout, `json=<path>` to a file.
    pub fn from_selector(selector: &str, filter: Filter) -> Result<Self> {
        match selector.split_once('=') {
            None if matches!(selector, "json" | "jsonl" | "stdout") => Ok(Self::stdout(filter)),
            Some(("json" | "jsonl", path)) if !path.is_empty() => {
                Self::file(Path::new(path), filter)
            }
            _ => Err(Error::UnknownOutput(selector.to_string())),
        }
    }
}

impl Backend for JsonLinesBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, batch: &[Sample]) -> Result<()> {
        let mut out = self.out.lock();
        for sample in batch.iter().filter(|s| self.filter.allows(&s.stat.name)) {
            serde_json::to_writer(&mut *out, sample)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(())
    }
}
