use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::stats::{Registry, Sample, Stat, StatKind};
use crate::vu::{Runner, Vu};

/// Round trip of one Redis command, in milliseconds.
pub const REDIS_REQ_DURATION: Stat = Stat::new("redis_req_duration", StatKind::Trend);
/// One per Redis command issued.
pub const REDIS_REQS: Stat = Stat::new("redis_reqs", StatKind::Counter);

/// Seconds a written key lives.
const KEY_TTL_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read,
    Write,
}

impl Op {
    fn tag(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }

    /// `read_pct` out of 100 operations are reads.
    pub fn pick(rng: &mut impl Rng, read_pct: u8) -> Self {
        if rng.gen_range(0u8..100) < read_pct {
            Self::Read
        } else {
            Self::Write
        }
    }
}

// ─── Runner ──────────────────────────────────────────────────────

/// Builds VUs that hit a Redis server with a GET/SET mix.
pub struct RedisRunner {
    client: redis::Client,
    registry: Arc<Registry>,
    read_pct: u8,
}

impl RedisRunner {
    /// Validates `url`; connections are opened per VU.
    pub fn new(url: &str, registry: Arc<Registry>, read_pct: u8) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            registry,
            read_pct: read_pct.min(100),
        })
    }
}

#[async_trait]
impl Runner for RedisRunner {
    async fn new_vu(&self, id: u64) -> Result<Box<dyn Vu>> {
        let conn = ConnectionManager::new(self.client.clone()).await?;
        Ok(Box::new(RedisVu {
            id,
            key: format!("rampload:vu:{id}"),
            conn,
            rng: StdRng::seed_from_u64(1000 + id),
            registry: self.registry.clone(),
            read_pct: self.read_pct,
            iteration: 0,
        }))
    }
}

// ─── VU ──────────────────────────────────────────────────────────

/// Each VU reads and writes only its own key, with its own deterministic RNG.
struct RedisVu {
    id: u64,
    key: String,
    conn: ConnectionManager,
    rng: StdRng,
    registry: Arc<Registry>,
    read_pct: u8,
    iteration: u64,
}

#[async_trait]
impl Vu for RedisVu {
    async fn run_once(&mut self, _ctx: &CancellationToken) -> Result<()> {
        self.iteration += 1;
        let op = Op::pick(&mut self.rng, self.read_pct);

        let t0 = Instant::now();
        let result = match op {
            Op::Read => self.conn.get::<_, Option<String>>(&self.key).await.map(|_| ()),
            Op::Write => {
                let payload = serde_json::json!({
                    "vu":        self.id,
                    "iteration": self.iteration,
                    "token":     format!("tok_{:016x}", self.rng.gen::<u64>()),
                })
                .to_string();
                self.conn.set_ex::<_, _, ()>(&self.key, payload, KEY_TTL_SECS).await
            }
        };
        let took_ms = t0.elapsed().as_secs_f64() * 1000.0;

        self.registry
            .add(Sample::new(REDIS_REQ_DURATION, took_ms).with_tag("op", op.tag()));
        self.registry
            .add(Sample::new(REDIS_REQS, 1.0).with_tag("op", op.tag()));

        result?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn read_pct_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!((0..500).all(|_| Op::pick(&mut rng, 0) == Op::Write));
        assert!((0..500).all(|_| Op::pick(&mut rng, 100) == Op::Read));
    }

    #[test]
    fn read_pct_mix_is_roughly_honoured() {
        let mut rng = StdRng::seed_from_u64(1000);
        let reads = (0..10_000)
            .filter(|_| Op::pick(&mut rng, 70) == Op::Read)
            .count();
        assert!((6_500..7_500).contains(&reads), "{reads} reads");
    }

    #[test]
    fn bad_url_is_rejected_up_front() {
        let registry = Arc::new(Registry::builder().build());
        let err = RedisRunner::new("definitely not a url", registry, 50).err().unwrap();
        assert!(matches!(err, Error::Redis(_)));
    }
}
