//! KV store adapter (C1) — a thin façade over redis, the remote store
//! every cross-process counter, session index, and atomic script lives
//! behind. Generalizes the teacher's `KeyStore` wrapper-over-one-backend
//! shape onto a networked store instead of a local `rusqlite::Connection`.

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("kv store unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),
}

pub type KvResult<T> = std::result::Result<T, KvError>;

/// Façade over the remote KV store. Cloning is cheap — `ConnectionManager`
/// is itself an `Arc`-backed handle that reconnects transparently.
#[derive(Clone)]
pub struct KvStore {
    conn: ConnectionManager,
}

impl KvStore {
    pub async fn connect(url: &str) -> KvResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    /// `PING` — every dependent component treats a failure here as
    /// fail-open, not a refusal to serve the request.
    pub async fn ready(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|pong| pong == "PONG")
            .unwrap_or_else(|e| {
                warn!(error = %e, "kv store not ready");
                false
            })
    }

    pub async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> KvResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl_seconds).await?;
        Ok(())
    }

    pub async fn zadd(&self, key: &str, member: &str, score: f64) -> KvResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    pub async fn zscore(&self, key: &str, member: &str) -> KvResult<Option<f64>> {
        let mut conn = self.conn.clone();
        Ok(conn.zscore(key, member).await?)
    }

    pub async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> KvResult<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.zrangebyscore(key, min, max).await?)
    }

    pub async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> KvResult<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.zrembyscore(key, min, max).await?)
    }

    pub async fn zrem(&self, key: &str, member: &str) -> KvResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(key, member).await?;
        Ok(())
    }

    /// Batch existence check — used by the session tracker to purge
    /// sorted-set members whose companion info record has expired.
    pub async fn exists_batch(&self, keys: &[String]) -> KvResult<Vec<bool>> {
        if keys.is_empty() {
            return Ok(vec![]);
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for k in keys {
            pipe.exists(k);
        }
        let results: Vec<bool> = pipe.query_async(&mut conn).await?;
        Ok(results)
    }

    /// Evaluate a server-side script with atomic semantics. Used
    /// exclusively by C3's check-and-track primitive — the single
    /// sanctioned way to gate provider concurrency (REDESIGN FLAGS §9).
    /// The script replies with Lua numbers, which arrive over RESP as
    /// integers, not strings — decode as `Vec<i64>`, never `Vec<String>`.
    pub async fn eval_script(
        &self,
        script: &redis::Script,
        keys: &[&str],
        args: &[String],
    ) -> KvResult<Vec<i64>> {
        let mut conn = self.conn.clone();
        let mut invocation = script.prepare_invoke();
        for k in keys {
            invocation.key(*k);
        }
        for a in args {
            invocation.arg(a);
        }
        Ok(invocation.invoke_async(&mut conn).await?)
    }

    /// Six increments (3 windows × 2 scopes) in one pipeline, refreshing
    /// each counter's TTL — §4.3's "track" half of the cost-window
    /// facility.
    pub async fn pipeline_incr_with_ttl(
        &self,
        ops: &[(String, f64, u64)],
    ) -> KvResult<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, delta, ttl) in ops {
            pipe.incr(key, *delta).ignore();
            pipe.expire(key, *ttl as i64).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}
