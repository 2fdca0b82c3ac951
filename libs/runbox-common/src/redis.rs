use crate::error::QueueError;
use crate::queue::JobQueue;
use crate::types::{ExecutionResult, Job, JobHandle, JobState};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::Script;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Redis queue semantics
/// Keeps caller and worker on the same key layout:
///
/// - `runbox:queue`       list of queued job ids (LPUSH in, BLMOVE out)
/// - `runbox:processing`  list of leased job ids
/// - `runbox:leases`      zset of leased job ids scored by deadline (unix ms)
/// - `runbox:job:<id>`    job payload
/// - `runbox:state:<id>`  queued | running | finished
/// - `runbox:result:<id>` execution result, written once
/// - `runbox:done:<id>`   pub/sub channel fired on completion

pub const QUEUE_KEY: &str = "runbox:queue";
pub const PROCESSING_KEY: &str = "runbox:processing";
pub const LEASES_KEY: &str = "runbox:leases";
pub const JOB_PREFIX: &str = "runbox:job";
pub const STATE_PREFIX: &str = "runbox:state";
pub const RESULT_PREFIX: &str = "runbox:result";
pub const DONE_PREFIX: &str = "runbox:done";

pub fn job_key(job_id: &Uuid) -> String {
    format!("{}:{}", JOB_PREFIX, job_id)
}

pub fn state_key(job_id: &Uuid) -> String {
    format!("{}:{}", STATE_PREFIX, job_id)
}

pub fn result_key(job_id: &Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, job_id)
}

pub fn done_channel(job_id: &Uuid) -> String {
    format!("{}:{}", DONE_PREFIX, job_id)
}

// KEYS: result, state, processing, leases
// ARGV: result json, ttl secs, job id, done channel
const COMPLETE_SCRIPT: &str = r#"
local stored = redis.call('SET', KEYS[1], ARGV[1], 'NX', 'EX', ARGV[2])
redis.call('LREM', KEYS[3], 0, ARGV[3])
redis.call('ZREM', KEYS[4], ARGV[3])
redis.call('SET', KEYS[2], 'finished', 'EX', ARGV[2])
if not stored then
  return 0
end
redis.call('PUBLISH', ARGV[4], 'finished')
return 1
"#;

// Claims a job just moved into processing. Only a queued job becomes running;
// a finished or already-running duplicate delivery is dropped.
// KEYS: job, state, result, processing, leases
// ARGV: job id, lease deadline ms, ttl secs
const CLAIM_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[3]) == 1 or redis.call('GET', KEYS[2]) ~= 'queued' then
  redis.call('LREM', KEYS[4], 1, ARGV[1])
  return false
end
local payload = redis.call('GET', KEYS[1])
if not payload then
  redis.call('LREM', KEYS[4], 1, ARGV[1])
  return false
end
redis.call('ZADD', KEYS[5], ARGV[2], ARGV[1])
redis.call('SET', KEYS[2], 'running', 'EX', ARGV[3])
return payload
"#;

// KEYS: processing, leases, queue, state
// ARGV: job id, ttl secs, now ms, "1" if an entry without a deadline may move
const REQUEUE_SCRIPT: &str = r#"
local deadline = redis.call('ZSCORE', KEYS[2], ARGV[1])
if deadline then
  if tonumber(deadline) > tonumber(ARGV[3]) then
    return 0
  end
elseif ARGV[4] ~= '1' then
  return 0
end
if redis.call('LREM', KEYS[1], 1, ARGV[1]) == 0 then
  return 0
end
redis.call('ZREM', KEYS[2], ARGV[1])
if redis.call('GET', KEYS[4]) == 'finished' then
  return 0
end
redis.call('RPUSH', KEYS[3], ARGV[1])
redis.call('SET', KEYS[4], 'queued', 'EX', ARGV[2])
return 1
"#;

/// Reliable Redis-backed job queue.
///
/// Non-blocking commands share one `ConnectionManager`. `BLMOVE` holds its
/// connection for up to the lease wait, so every concurrent lease takes a
/// connection of its own from `blocking` and returns it afterwards. Pub/sub
/// for [`JobQueue::wait`] opens a dedicated connection from `client`.
#[derive(Clone)]
pub struct RedisJobQueue {
    client: redis::Client,
    conn: ConnectionManager,
    blocking: Arc<Mutex<Vec<MultiplexedConnection>>>,
    /// Processing entries without a lease deadline on the previous reaper pass
    unscored: Arc<Mutex<HashSet<String>>>,
    lease_window: Duration,
    ttl_secs: u64,
}

impl RedisJobQueue {
    pub async fn connect(
        redis_url: &str,
        lease_window: Duration,
        ttl_secs: u64,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            conn,
            blocking: Arc::new(Mutex::new(Vec::new())),
            unscored: Arc::new(Mutex::new(HashSet::new())),
            lease_window,
            ttl_secs,
        })
    }

    async fn read_state(&self, job_id: Uuid) -> Result<Option<JobState>, QueueError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(state_key(&job_id))
            .query_async(&mut conn)
            .await?;
        match raw {
            None => Ok(None),
            Some(value) => JobState::parse(&value)
                .map(Some)
                .ok_or(QueueError::CorruptState { job_id, value }),
        }
    }

    async fn blocking_connection(&self) -> Result<MultiplexedConnection, QueueError> {
        let idle = self.blocking.lock().await.pop();
        match idle {
            Some(conn) => Ok(conn),
            None => Ok(self.client.get_multiplexed_async_connection().await?),
        }
    }

    async fn discard_processing(&self, raw_id: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("LREM")
            .arg(PROCESSING_KEY)
            .arg(1)
            .arg(raw_id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: Job) -> Result<JobHandle, QueueError> {
        let payload = serde_json::to_string(&job)?;
        let mut conn = self.conn.clone();

        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(job_key(&job.id))
            .arg(payload)
            .arg("EX")
            .arg(self.ttl_secs)
            .ignore()
            .cmd("SET")
            .arg(state_key(&job.id))
            .arg(JobState::Queued.as_str())
            .arg("EX")
            .arg(self.ttl_secs)
            .ignore()
            .cmd("LPUSH")
            .arg(QUEUE_KEY)
            .arg(job.id.to_string())
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;

        Ok(JobHandle::queued(job.id))
    }

    async fn lease(&self, wait: Duration) -> Result<Option<Job>, QueueError> {
        let mut blocking = self.blocking_connection().await?;
        let leased: Option<String> = redis::cmd("BLMOVE")
            .arg(QUEUE_KEY)
            .arg(PROCESSING_KEY)
            .arg("RIGHT")
            .arg("LEFT")
            // a zero timeout would block forever
            .arg(wait.as_secs_f64().max(0.01))
            .query_async(&mut blocking)
            .await?;
        self.blocking.lock().await.push(blocking);

        let Some(raw_id) = leased else {
            return Ok(None);
        };

        let job_id = match Uuid::parse_str(&raw_id) {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!(raw_id = %raw_id, "Dropping malformed job id from queue");
                self.discard_processing(&raw_id).await?;
                return Ok(None);
            }
        };

        let deadline = Utc::now().timestamp_millis() + self.lease_window.as_millis() as i64;
        let mut conn = self.conn.clone();
        let payload: Option<String> = Script::new(CLAIM_SCRIPT)
            .key(job_key(&job_id))
            .key(state_key(&job_id))
            .key(result_key(&job_id))
            .key(PROCESSING_KEY)
            .key(LEASES_KEY)
            .arg(job_id.to_string())
            .arg(deadline)
            .arg(self.ttl_secs)
            .invoke_async(&mut conn)
            .await?;

        let Some(payload) = payload else {
            tracing::debug!(job_id = %job_id, "Skipped delivery of a job that is not queued");
            return Ok(None);
        };

        Ok(Some(serde_json::from_str(&payload)?))
    }

    async fn complete(&self, job_id: Uuid, result: ExecutionResult) -> Result<bool, QueueError> {
        let payload = serde_json::to_string(&result)?;
        let mut conn = self.conn.clone();

        let stored: i64 = Script::new(COMPLETE_SCRIPT)
            .key(result_key(&job_id))
            .key(state_key(&job_id))
            .key(PROCESSING_KEY)
            .key(LEASES_KEY)
            .arg(payload)
            .arg(self.ttl_secs)
            .arg(job_id.to_string())
            .arg(done_channel(&job_id))
            .invoke_async(&mut conn)
            .await?;

        Ok(stored == 1)
    }

    async fn poll(&self, job_id: Uuid) -> Result<JobHandle, QueueError> {
        let state = self
            .read_state(job_id)
            .await?
            .ok_or(QueueError::JobNotFound(job_id))?;

        let result = if state == JobState::Finished {
            let mut conn = self.conn.clone();
            let raw: Option<String> = redis::cmd("GET")
                .arg(result_key(&job_id))
                .query_async(&mut conn)
                .await?;
            match raw {
                Some(raw) => Some(serde_json::from_str(&raw)?),
                None => return Err(QueueError::JobNotFound(job_id)),
            }
        } else {
            None
        };

        Ok(JobHandle {
            job_id,
            state,
            result,
        })
    }

    async fn wait(&self, job_id: Uuid, budget: Duration) -> Result<JobHandle, QueueError> {
        let mut pubsub = self.client.get_async_connection().await?.into_pubsub();
        pubsub.subscribe(done_channel(&job_id)).await?;

        // Subscribed before checking, so a completion in between is not missed
        let handle = self.poll(job_id).await?;
        if handle.is_finished() {
            return Ok(handle);
        }

        let mut messages = pubsub.on_message();
        if tokio::time::timeout(budget, messages.next()).await.is_err() {
            tracing::debug!(job_id = %job_id, budget_ms = budget.as_millis() as u64, "Wait budget exhausted");
        }
        drop(messages);

        self.poll(job_id).await
    }

    async fn requeue_expired(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();

        let leased: Vec<String> = redis::cmd("LRANGE")
            .arg(PROCESSING_KEY)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;

        // An entry without a deadline is either mid-claim or orphaned by a
        // worker that died right after BLMOVE; only the second sighting moves it
        let seen_before = std::mem::take(&mut *self.unscored.lock().await);
        let mut unscored = HashSet::new();

        let mut moved = 0;
        for raw_id in leased {
            let deadline: Option<f64> = redis::cmd("ZSCORE")
                .arg(LEASES_KEY)
                .arg(&raw_id)
                .query_async(&mut conn)
                .await?;

            let orphaned = match deadline {
                Some(deadline) if deadline > now as f64 => continue,
                Some(_) => false,
                None if seen_before.contains(&raw_id) => true,
                None => {
                    unscored.insert(raw_id);
                    continue;
                }
            };

            let state = match Uuid::parse_str(&raw_id) {
                Ok(id) => state_key(&id),
                Err(_) => format!("{}:{}", STATE_PREFIX, raw_id),
            };

            let requeued: i64 = Script::new(REQUEUE_SCRIPT)
                .key(PROCESSING_KEY)
                .key(LEASES_KEY)
                .key(QUEUE_KEY)
                .key(state)
                .arg(&raw_id)
                .arg(self.ttl_secs)
                .arg(now)
                .arg(if orphaned { "1" } else { "0" })
                .invoke_async(&mut conn)
                .await?;

            if requeued == 1 {
                tracing::warn!(job_id = %raw_id, orphaned, "Lease expired, job redelivered");
                moved += 1;
            }
        }

        *self.unscored.lock().await = unscored;
        Ok(moved)
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let depth: usize = redis::cmd("LLEN")
            .arg(QUEUE_KEY)
            .query_async(&mut conn)
            .await?;
        Ok(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id = Uuid::new_v4();
        assert_eq!(job_key(&id), format!("runbox:job:{}", id));
        assert_eq!(state_key(&id), format!("runbox:state:{}", id));
        assert_eq!(result_key(&id), format!("runbox:result:{}", id));
        assert_eq!(done_channel(&id), format!("runbox:done:{}", id));
    }

    #[test]
    fn test_result_key_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(result_key(&id), result_key(&id));
        assert_ne!(result_key(&id), result_key(&Uuid::new_v4()));
    }

    #[test]
    fn test_per_job_keys_never_collide_with_lists() {
        let id = Uuid::new_v4();
        for key in [job_key(&id), state_key(&id), result_key(&id)] {
            assert_ne!(key, QUEUE_KEY);
            assert_ne!(key, PROCESSING_KEY);
            assert_ne!(key, LEASES_KEY);
        }
    }
}
