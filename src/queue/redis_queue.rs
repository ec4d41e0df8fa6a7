use super::{QueueError, TaskEnvelope, TaskQueue, TaskSource};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_LEASE: Duration = Duration::from_secs(5 * 60);

// KEYS: scheduled, tasks, inflight. ARGV: id, envelope, due millis.
// Also used for retries, which replace the stored envelope and drop the lease.
const SCHEDULE_SCRIPT: &str = r"
redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])
redis.call('ZREM', KEYS[3], ARGV[1])
redis.call('ZADD', KEYS[1], ARGV[3], ARGV[1])
return 1
";

// KEYS: scheduled, inflight, tasks. ARGV: now millis, max, lease expiry millis.
// Expired leases go back on the schedule first, then up to ARGV[2] due ids are
// moved to the in-flight set in the same step so two workers never claim the same task.
const CLAIM_DUE_SCRIPT: &str = r"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, id in ipairs(expired) do
    redis.call('ZREM', KEYS[2], id)
    redis.call('ZADD', KEYS[1], ARGV[1], id)
end
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
local claimed = {}
for _, id in ipairs(due) do
    redis.call('ZREM', KEYS[1], id)
    local body = redis.call('HGET', KEYS[3], id)
    if body then
        redis.call('ZADD', KEYS[2], ARGV[3], id)
        table.insert(claimed, {id, body})
    end
end
return claimed
";

// KEYS: inflight, tasks, dead. ARGV: id, dead entry (empty to drop the task).
const FINISH_SCRIPT: &str = r"
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
if ARGV[2] ~= '' then
    redis.call('LPUSH', KEYS[3], ARGV[2])
end
return 1
";

/// Delayed task queue on Redis.
///
/// Keys:
/// * `<namespace>:tasks` - hash of task id to serialized `TaskEnvelope`
/// * `<namespace>:scheduled` - task ids scored by due time (unix millis)
/// * `<namespace>:inflight` - claimed task ids scored by lease expiry (unix millis)
/// * `<namespace>:dead` - tasks that exhausted their retries or could not be decoded
///
/// A claimed task stays in `inflight` until it is acked, retried or buried. If its
/// lease runs out first (the worker died, or the hand-back failed) the next claim
/// puts it back on the schedule, so delivery is at least once.
pub struct RedisTaskQueue {
    conn: MultiplexedConnection,
    tasks_key: String,
    scheduled_key: String,
    inflight_key: String,
    dead_key: String,
    lease: Duration,
    schedule_script: Script,
    claim_script: Script,
    finish_script: Script,
}

impl RedisTaskQueue {
    pub async fn connect(redis_url: &Url, namespace: &str) -> Result<Self, QueueError> {
        info!("Connecting to task queue at {}", redis_url);
        let client = redis::Client::open(redis_url.as_str())?;
        let conn = client.get_multiplexed_async_connection().await?;

        Ok(RedisTaskQueue {
            conn,
            tasks_key: format!("{}:tasks", namespace),
            scheduled_key: format!("{}:scheduled", namespace),
            inflight_key: format!("{}:inflight", namespace),
            dead_key: format!("{}:dead", namespace),
            lease: DEFAULT_LEASE,
            schedule_script: Script::new(SCHEDULE_SCRIPT),
            claim_script: Script::new(CLAIM_DUE_SCRIPT),
            finish_script: Script::new(FINISH_SCRIPT),
        })
    }

    /// How long a claimed task may run before it is handed to another worker.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Number of tasks still waiting on the schedule.
    pub async fn pending(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcard(&self.scheduled_key).await?;
        Ok(count)
    }

    /// Number of claimed tasks whose outcome is not recorded yet.
    pub async fn in_flight(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.zcard(&self.inflight_key).await?;
        Ok(count)
    }

    /// Number of entries on the dead list.
    pub async fn dead(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.llen(&self.dead_key).await?;
        Ok(count)
    }

    async fn push_scheduled(&self, task: &TaskEnvelope, process_in: Duration) -> Result<(), QueueError> {
        let body = serde_json::to_string(task)?;
        let due_at = millis_from_now(process_in);

        let mut conn = self.conn.clone();
        let _: () = self
            .schedule_script
            .key(&self.scheduled_key)
            .key(&self.tasks_key)
            .key(&self.inflight_key)
            .arg(task.id.to_string())
            .arg(body)
            .arg(due_at)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn finish(&self, id: &str, dead_entry: Option<String>) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = self
            .finish_script
            .key(&self.inflight_key)
            .key(&self.tasks_key)
            .key(&self.dead_key)
            .arg(id)
            .arg(dead_entry.unwrap_or_default())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}

fn millis_from_now(offset: Duration) -> i64 {
    Utc::now().timestamp_millis() + offset.as_millis() as i64
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn schedule(&self, task: TaskEnvelope, process_in: Duration) -> Result<(), QueueError> {
        self.push_scheduled(&task, process_in).await?;
        debug!(
            "Scheduled task {} ({}) in {}ms",
            task.id,
            task.kind.as_str(),
            process_in.as_millis()
        );
        Ok(())
    }
}

#[async_trait]
impl TaskSource for RedisTaskQueue {
    async fn claim_due(&self, max: usize) -> Result<Vec<TaskEnvelope>, QueueError> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let claimed: Vec<(String, String)> = self
            .claim_script
            .key(&self.scheduled_key)
            .key(&self.inflight_key)
            .key(&self.tasks_key)
            .arg(Utc::now().timestamp_millis())
            .arg(max)
            .arg(millis_from_now(self.lease))
            .invoke_async(&mut conn)
            .await?;

        let mut tasks = Vec::with_capacity(claimed.len());
        for (id, raw) in claimed {
            match serde_json::from_str::<TaskEnvelope>(&raw) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    warn!("Moving undecodable task {} to dead list: {}", id, e);
                    let entry = json!({ "raw": raw, "reason": e.to_string() });
                    self.finish(&id, Some(entry.to_string())).await?;
                }
            }
        }
        Ok(tasks)
    }

    async fn ack(&self, task: &TaskEnvelope) -> Result<(), QueueError> {
        self.finish(&task.id.to_string(), None).await
    }

    async fn retry(&self, task: TaskEnvelope, process_in: Duration) -> Result<(), QueueError> {
        self.push_scheduled(&task, process_in).await
    }

    async fn bury(&self, task: TaskEnvelope, reason: &str) -> Result<(), QueueError> {
        warn!(
            "Burying task {} ({}) after {} retries: {}",
            task.id,
            task.kind.as_str(),
            task.retried,
            reason
        );
        let entry = json!({ "task": task, "reason": reason, "buried_at": Utc::now() });
        self.finish(&task.id.to_string(), Some(entry.to_string()))
            .await
    }
}
