use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{Backend, Filter, Sample, Sink, Tags};
use crate::error::Result;

/// Identifies one sink: a stat name plus the values of the group-by tags
/// (empty when not grouping).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkKey {
    pub name: String,
    pub group: Tags,
}

impl SinkKey {
    /// `name` or `name{tag=value,...}`.
    pub fn display(&self) -> String {
        if self.group.is_empty() {
            return self.name.clone();
        }
        let tags: Vec<String> = self.group.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{}{{{}}}", self.name, tags.join(","))
    }
}

/// In-memory backend aggregating samples into one sink per stat (and per
/// distinct group-by tag combination).
///
/// The map lock is only taken for writing when a new sink appears; updates to
/// an existing sink go through that sink's own mutex, so concurrent writers to
/// the same stat are serialized without losing updates.
pub struct Accumulator {
    filter: Filter,
    group_by: Vec<String>,
    sinks: RwLock<HashMap<SinkKey, Arc<Mutex<Sink>>>>,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new(Filter::default(), Vec::new())
    }
}

impl Accumulator {
    pub fn new(filter: Filter, group_by: Vec<String>) -> Self {
        Self {
            filter,
            group_by,
            sinks: RwLock::new(HashMap::new()),
        }
    }

    pub fn add(&self, sample: &Sample) {
        if !self.filter.allows(&sample.stat.name) {
            return;
        }

        let key = self.key_for(sample);
        let existing = self.sinks.read().get(&key).cloned();
        let sink = match existing {
            Some(sink) => sink,
            None => self
                .sinks
                .write()
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(Sink::new(sample.stat.kind))))
                .clone(),
        };
        sink.lock().add(sample.value);
    }

    fn key_for(&self, sample: &Sample) -> SinkKey {
        let group = self
            .group_by
            .iter()
            .filter_map(|tag| sample.tags.get(tag).map(|v| (tag.clone(), v.clone())))
            .collect();
        SinkKey {
            name: sample.stat.name.to_string(),
            group,
        }
    }

    /// Point-in-time copies of every partition of `name`, ordered by group.
    pub fn sinks_for(&self, name: &str) -> Vec<(SinkKey, Sink)> {
        let mut out: Vec<(SinkKey, Sink)> = self
            .sinks
            .read()
            .iter()
            .filter(|(key, _)| key.name == name)
            .map(|(key, sink)| (key.clone(), sink.lock().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Copy of the ungrouped sink for `name`, if one exists.
    pub fn sink(&self, name: &str) -> Option<Sink> {
        let key = SinkKey {
            name: name.to_string(),
            group: Tags::new(),
        };
        self.sinks.read().get(&key).map(|s| s.lock().clone())
    }

    /// `Format()` of every sink, keyed by its display name.
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<String, f64>> {
        self.sinks
            .read()
            .iter()
            .map(|(key, sink)| (key.display(), sink.lock().format()))
            .collect()
    }

    pub fn reset(&self) {
        self.sinks.write().clear();
    }
}

impl Backend for Accumulator {
    fn name(&self) -> &str {
        "accumulator"
    }

    fn submit(&self, batch: &[Sample]) -> Result<()> {
        for sample in batch {
            self.add(sample);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{Stat, StatKind, ITERATIONS};

    #[test]
    fn routes_samples_by_stat_name() {
        let acc = Accumulator::default();
        acc.add(&Sample::new(ITERATIONS, 1.0));
        acc.add(&Sample::new(ITERATIONS, 1.0));
        acc.add(&Sample::new(Stat::new("latency", StatKind::Trend), 12.0));

        assert_eq!(acc.sink("iterations").unwrap().format()["count"], 2.0);
        assert_eq!(acc.sink("latency").unwrap().format()["max"], 12.0);
        assert!(acc.sink("missing").is_none());
    }

    #[test]
    fn filter_drops_unselected_metrics() {
        let acc = Accumulator::new(Filter::new(&["iterations"], &[]), Vec::new());
        acc.add(&Sample::new(ITERATIONS, 1.0));
        assert!(acc.snapshot().is_empty());
    }

    #[test]
    fn group_by_partitions_sinks() {
        let acc = Accumulator::new(Filter::default(), vec!["op".to_string()]);
        let reqs = Stat::new("reqs", StatKind::Counter);
        acc.add(&Sample::new(reqs.clone(), 1.0).with_tag("op", "read").with_tag("vu", "1"));
        acc.add(&Sample::new(reqs.clone(), 1.0).with_tag("op", "read").with_tag("vu", "2"));
        acc.add(&Sample::new(reqs.clone(), 1.0).with_tag("op", "write"));
        acc.add(&Sample::new(reqs, 1.0));

        let snap = acc.snapshot();
        assert_eq!(snap["reqs{op=read}"]["count"], 2.0);
        assert_eq!(snap["reqs{op=write}"]["count"], 1.0);
        assert_eq!(snap["reqs"]["count"], 1.0);

        let parts = acc.sinks_for("reqs");
        assert_eq!(parts.len(), 3);
        assert!(parts[0].0.group.is_empty());
    }

    #[test]
    fn concurrent_writers_lose_no_updates() {
        const WRITERS: usize = 16;
        const PER_WRITER: usize = 5_000;

        let acc = Accumulator::default();
        std::thread::scope(|scope| {
            for _ in 0..WRITERS {
                scope.spawn(|| {
                    for _ in 0..PER_WRITER {
                        acc.add(&Sample::new(ITERATIONS, 1.0));
                    }
                });
            }
        });

        let sink = acc.sink("iterations").unwrap();
        assert_eq!(sink.samples(), (WRITERS * PER_WRITER) as u64);
        assert_eq!(sink.format()["count"], (WRITERS * PER_WRITER) as f64);
    }
}
