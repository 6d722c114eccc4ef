use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use super::{MetricBackend, MetricRecord, MetricUpdate, SchemaDescriptor, StoreError};

/// Validates every touched key first, then applies every increment.
///
/// KEYS: record key and index key per update, interleaved.
/// ARGV: bucket, then (url, class field, response time µs) per update.
/// The first pass replays every increment on decimal strings, so a
/// counter HINCRBY would refuse (bad integer or i64 overflow) fails the
/// batch before any write and it lands whole or not at all.
const INGEST_SCRIPT: &str = r#"
local MAX = '9223372036854775807'
local MIN_DIGITS = '9223372036854775808'

local function cmp(a, b)
  if #a ~= #b then return #a < #b and -1 or 1 end
  if a == b then return 0 end
  return a < b and -1 or 1
end

local function add_digits(a, b)
  local out, carry = {}, 0
  local i, j = #a, #b
  while i > 0 or j > 0 or carry > 0 do
    local d = carry
    if i > 0 then d = d + string.byte(a, i) - 48; i = i - 1 end
    if j > 0 then d = d + string.byte(b, j) - 48; j = j - 1 end
    table.insert(out, 1, string.char(48 + d % 10))
    carry = math.floor(d / 10)
  end
  return table.concat(out)
end

-- a >= b
local function sub_digits(a, b)
  local out, borrow = {}, 0
  local i, j = #a, #b
  while i > 0 do
    local d = string.byte(a, i) - 48 - borrow
    if j > 0 then d = d - (string.byte(b, j) - 48); j = j - 1 end
    if d < 0 then d = d + 10; borrow = 1 else borrow = 0 end
    table.insert(out, 1, string.char(48 + d))
    i = i - 1
  end
  local digits = string.gsub(table.concat(out), '^0+', '')
  if digits == '' then return '0' end
  return digits
end

-- The grammar HINCRBY accepts: no '+', no leading zeros, no '-0', fits i64.
local function parse_int(raw)
  local sign, digits = string.match(raw, '^(%-?)(%d+)$')
  if not digits then return nil end
  if #digits > 1 and string.sub(digits, 1, 1) == '0' then return nil end
  local neg = sign == '-'
  if neg and digits == '0' then return nil end
  if cmp(digits, neg and MIN_DIGITS or MAX) > 0 then return nil end
  return { neg = neg, digits = digits }
end

-- inc is a non-negative decimal string.
local function add(value, inc)
  if not value.neg then
    return { neg = false, digits = add_digits(value.digits, inc) }
  end
  if cmp(value.digits, inc) > 0 then
    return { neg = true, digits = sub_digits(value.digits, inc) }
  end
  return { neg = false, digits = sub_digits(inc, value.digits) }
end

local bucket = ARGV[1]
local n = #KEYS / 2
local planned = {}

local function plan(record, field, inc)
  local fields = planned[record]
  if fields == nil then
    fields = {}
    planned[record] = fields
  end
  local value = fields[field]
  if value == nil then
    value = { neg = false, digits = '0' }
    local raw = redis.call('HGET', record, field)
    if raw then
      value = parse_int(raw)
      if value == nil then
        return 'CORRUPT ' .. record .. ' field ' .. field .. ' is not an integer'
      end
    end
  end
  value = add(value, inc)
  if not value.neg and cmp(value.digits, MAX) > 0 then
    return 'OVERFLOW ' .. record .. ' field ' .. field
  end
  fields[field] = value
  return nil
end

for i = 1, n do
  local record = KEYS[2 * i - 1]
  local index = KEYS[2 * i]
  local base = 1 + 3 * (i - 1)
  local rtype = redis.call('TYPE', record).ok
  if rtype ~= 'none' and rtype ~= 'hash' then
    return redis.error_reply('WRONGTYPE ' .. record .. ' holds a ' .. rtype)
  end
  local itype = redis.call('TYPE', index).ok
  if itype ~= 'none' and itype ~= 'zset' then
    return redis.error_reply('WRONGTYPE ' .. index .. ' holds a ' .. itype)
  end
  local err = plan(record, 'count', '1')
    or plan(record, ARGV[base + 2], '1')
    or plan(record, 'response_time', ARGV[base + 3])
  if err then
    return redis.error_reply(err)
  end
end

for i = 1, n do
  local record = KEYS[2 * i - 1]
  local base = 1 + 3 * (i - 1)
  redis.call('HSET', record, 'url', ARGV[base + 1], 'timestamp', bucket)
  redis.call('HINCRBY', record, 'count', 1)
  redis.call('HINCRBY', record, ARGV[base + 2], 1)
  redis.call('HINCRBY', record, 'response_time', ARGV[base + 3])
  redis.call('ZADD', KEYS[2 * i], bucket, bucket)
end

return n
"#;

/// Redis layout under one namespace (`table`):
///
///   {table}:record:{url}:{bucket}  hash, the persisted record fields
///   {table}:index:{url}            sorted set of buckets, score = bucket
///   {table}:schema                 JSON `SchemaDescriptor`
///
/// All reads and writes go to the primary behind the connection, so a
/// query always sees the last committed ingest.
pub struct RedisBackend {
    conn: ConnectionManager,
    table: String,
    ingest: Script,
}

impl RedisBackend {
    pub fn new(conn: ConnectionManager, table: impl Into<String>) -> Self {
        Self {
            conn,
            table: table.into(),
            ingest: Script::new(INGEST_SCRIPT),
        }
    }
}

// ─── Key layout ──────────────────────────────────────────────────

fn record_key(table: &str, url: &str, bucket: i64) -> String {
    format!("{table}:record:{url}:{bucket}")
}

fn index_key(table: &str, url: &str) -> String {
    format!("{table}:index:{url}")
}

fn schema_key(table: &str) -> String {
    format!("{table}:schema")
}

/// KEYS and ARGV of one `INGEST_SCRIPT` call.
#[derive(Debug, PartialEq, Eq)]
struct IngestCall {
    keys: Vec<String>,
    args: Vec<String>,
}

fn ingest_call(table: &str, bucket: i64, updates: &[MetricUpdate]) -> IngestCall {
    let mut keys = Vec::with_capacity(updates.len() * 2);
    let mut args = Vec::with_capacity(1 + updates.len() * 3);
    args.push(bucket.to_string());
    for update in updates {
        keys.push(record_key(table, &update.url, bucket));
        keys.push(index_key(table, &update.url));
        args.push(update.url.clone());
        args.push(update.class.field().to_string());
        args.push(update.response_time_us.to_string());
    }
    IngestCall { keys, args }
}

/// `ZRANGEBYSCORE` lower bound; "(" makes it exclusive so a page resumes
/// strictly after the cursor.
fn scan_min(from: i64, after: Option<i64>) -> String {
    match after {
        Some(ts) if ts >= from => format!("({ts}"),
        _ => from.to_string(),
    }
}

#[async_trait]
impl MetricBackend for RedisBackend {
    fn table(&self) -> &str {
        &self.table
    }

    async fn provision(
        &self,
        schema: &SchemaDescriptor,
    ) -> Result<Option<SchemaDescriptor>, StoreError> {
        let key = schema_key(&self.table);
        let provision_err = |reason: String| StoreError::Provision {
            table: self.table.clone(),
            reason,
        };

        let descriptor = serde_json::to_string(schema).map_err(|e| provision_err(e.to_string()))?;
        let mut conn = self.conn.clone();

        // SET NX replies OK when written, nil when the key already exists.
        let created: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&descriptor)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| provision_err(e.to_string()))?;
        if created.is_some() {
            return Ok(None);
        }

        let existing: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| provision_err(e.to_string()))?;
        let existing = existing.ok_or_else(|| provision_err(format!("`{key}` vanished during provisioning")))?;
        let existing = serde_json::from_str(&existing)
            .map_err(|e| provision_err(format!("`{key}` holds an unreadable descriptor: {e}")))?;
        Ok(Some(existing))
    }

    async fn apply(&self, bucket: i64, updates: &[MetricUpdate]) -> Result<(), StoreError> {
        let call = ingest_call(&self.table, bucket, updates);
        let mut invocation = self.ingest.prepare_invoke();
        for key in &call.keys {
            invocation.key(key);
        }
        for arg in &call.args {
            invocation.arg(arg);
        }

        let mut conn = self.conn.clone();
        let _applied: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Ingest {
                bucket,
                updates: updates.len(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn scan(
        &self,
        url: &str,
        from: i64,
        to: i64,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<MetricRecord>, StoreError> {
        let query_err = |reason: String| StoreError::Query {
            url: url.to_string(),
            reason,
        };

        let mut conn = self.conn.clone();
        let buckets: Vec<i64> = redis::cmd("ZRANGEBYSCORE")
            .arg(index_key(&self.table, url))
            .arg(scan_min(from, after))
            .arg(to)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await
            .map_err(|e| query_err(e.to_string()))?;
        if buckets.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = buckets
            .iter()
            .map(|b| record_key(&self.table, url, *b))
            .collect();
        let mut pipe = redis::pipe();
        for key in &keys {
            pipe.hgetall(key);
        }
        let maps: Vec<HashMap<String, String>> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| query_err(e.to_string()))?;

        keys.iter()
            .zip(maps.iter())
            .map(|(key, map)| record_from_map(key, map))
            .collect()
    }
}

// ─── Helpers ─────────────────────────────────────────────────────

fn record_from_map(key: &str, map: &HashMap<String, String>) -> Result<MetricRecord, StoreError> {
    if map.is_empty() {
        return Err(StoreError::Decode {
            key: key.to_string(),
            reason: "indexed record is missing".into(),
        });
    }

    let int = |field: &str| -> Result<i64, StoreError> {
        match map.get(field) {
            None => Ok(0),
            Some(raw) => raw.parse().map_err(|_| StoreError::Decode {
                key: key.to_string(),
                reason: format!("field `{field}` is not an integer: {raw:?}"),
            }),
        }
    };

    let url = map.get("url").cloned().ok_or_else(|| StoreError::Decode {
        key: key.to_string(),
        reason: "field `url` is missing".into(),
    })?;

    Ok(MetricRecord {
        url,
        timestamp: int("timestamp")?,
        count: int("count")?,
        count_1xx: int("count_1xx")?,
        count_2xx: int("count_2xx")?,
        count_3xx: int("count_3xx")?,
        count_4xx: int("count_4xx")?,
        count_5xx: int("count_5xx")?,
        response_time: int("response_time")?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::prober::ProbeSuccess;
    use crate::store::{BucketWidth, MetricQuery, MetricStore, Provisioned, StatusClass};

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn update(url: &str, class: StatusClass, response_time_us: i64) -> MetricUpdate {
        MetricUpdate {
            url: url.to_string(),
            class,
            response_time_us,
        }
    }

    #[test]
    fn ingest_call_matches_script_layout() {
        let call = ingest_call(
            "uptime",
            900,
            &[
                update("http://a", StatusClass::Success, 100_000),
                update("http://b", StatusClass::ServerError, 50_000),
            ],
        );

        assert_eq!(
            call.keys,
            vec![
                "uptime:record:http://a:900",
                "uptime:index:http://a",
                "uptime:record:http://b:900",
                "uptime:index:http://b",
            ]
        );
        assert_eq!(call.args.len(), 1 + 3 * 2);
        assert_eq!(call.args[0], "900");

        // Lua indexing: ARGV[k] is args[k - 1], base = 1 + 3 * (i - 1).
        let argv = |k: usize| call.args[k - 1].as_str();
        let expected = [("http://a", "count_2xx", "100000"), ("http://b", "count_5xx", "50000")];
        for (i, (url, field, micros)) in (1..).zip(expected) {
            let base = 1 + 3 * (i - 1);
            assert_eq!(argv(base + 1), url);
            assert_eq!(argv(base + 2), field);
            assert_eq!(argv(base + 3), micros);
            assert_eq!(call.keys[2 * i - 2], record_key("uptime", url, 900));
            assert_eq!(call.keys[2 * i - 1], index_key("uptime", url));
        }
    }

    #[test]
    fn scan_cursor_is_exclusive() {
        assert_eq!(scan_min(300, None), "300");
        assert_eq!(scan_min(300, Some(600)), "(600");
        assert_eq!(scan_min(300, Some(300)), "(300");
        // A cursor below the range never widens it.
        assert_eq!(scan_min(300, Some(0)), "300");
        assert_eq!(scan_min(-600, Some(-300)), "(-300");
    }

    #[test]
    fn decodes_persisted_fields() {
        let record = record_from_map(
            "uptime:record:http://a:900",
            &map(&[
                ("url", "http://a"),
                ("timestamp", "900"),
                ("count", "2"),
                ("count_2xx", "1"),
                ("count_5xx", "1"),
                ("response_time", "150000"),
            ]),
        )
        .unwrap();

        assert_eq!(record.timestamp, 900);
        assert_eq!(record.count, 2);
        assert_eq!(record.count_1xx, 0);
        assert_eq!(record.count_5xx, 1);
        assert_eq!(record.response_time, 150_000);
    }

    #[test]
    fn rejects_corrupt_records() {
        let err = record_from_map("k", &map(&[("url", "u"), ("count", "lots")])).unwrap_err();
        assert!(err.to_string().contains("count"), "{err}");

        let err = record_from_map("k", &HashMap::new()).unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));
    }

    /// Needs a live server: `REDIS_URL=redis://127.0.0.1:6379/ cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn round_trip_against_live_redis() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".into());
        let conn = crate::redis_client::connect(&url).await.unwrap();
        let table = format!("uptime-test-{}", std::process::id());
        let store = MetricStore::new(
            Arc::new(RedisBackend::new(conn.clone(), table.clone())),
            BucketWidth::default(),
        );

        assert_eq!(store.init().await.unwrap(), Provisioned::Created);
        assert_eq!(store.init().await.unwrap(), Provisioned::AlreadyExists);

        let cycle = Utc.timestamp_opt(1000, 0).unwrap();
        let outcomes = [
            ProbeSuccess {
                url: "http://a".into(),
                response_time: Duration::from_micros(100_000),
                status: 200,
            },
            ProbeSuccess {
                url: "http://a".into(),
                response_time: Duration::from_micros(50_000),
                status: 500,
            },
        ];
        assert_eq!(store.ingest(cycle, &outcomes).await.unwrap(), 900);

        let records = store
            .query_all(MetricQuery {
                url: "http://a".into(),
                from: Utc.timestamp_opt(800, 0).unwrap(),
                to: cycle,
            })
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].count, 2);
        assert_eq!(records[0].count_2xx, 1);
        assert_eq!(records[0].count_5xx, 1);
        assert_eq!(records[0].response_time, 150_000);

        drop_table(conn, &table).await;
    }

    /// Needs a live server, like `round_trip_against_live_redis`.
    #[tokio::test]
    #[ignore]
    async fn rejected_batches_leave_no_partial_increments_on_live_redis() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/".into());
        let mut conn = crate::redis_client::connect(&url).await.unwrap();
        let table = format!("uptime-test-partial-{}", std::process::id());
        let backend = RedisBackend::new(conn.clone(), table.clone());

        let b_record = record_key(&table, "http://b", 900);
        let corrupt = [
            ("count", "007"),
            ("count", "-0"),
            ("count", "+1"),
            ("count", "123456789012345678901"),
            ("count", "9223372036854775807"),
            ("response_time", "9223372036854775000"),
        ];
        for (field, value) in corrupt {
            let _: () = redis::cmd("DEL").arg(&b_record).query_async(&mut conn).await.unwrap();
            let _: () = redis::cmd("HSET")
                .arg(&b_record)
                .arg(field)
                .arg(value)
                .query_async(&mut conn)
                .await
                .unwrap();

            let err = backend
                .apply(
                    900,
                    &[
                        update("http://a", StatusClass::Success, 1_000),
                        update("http://b", StatusClass::Success, 1_000),
                    ],
                )
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Ingest { .. }), "{field}={value}: {err}");

            let a_exists: bool = redis::cmd("EXISTS")
                .arg(record_key(&table, "http://a", 900))
                .query_async(&mut conn)
                .await
                .unwrap();
            assert!(!a_exists, "{field}={value} left a partial write");
        }

        // Repeated updates to one record add up before the overflow check.
        let _: () = redis::cmd("DEL").arg(&b_record).query_async(&mut conn).await.unwrap();
        let _: () = redis::cmd("HSET")
            .arg(&b_record)
            .arg("count")
            .arg("9223372036854775806")
            .query_async(&mut conn)
            .await
            .unwrap();
        let twice = [
            update("http://b", StatusClass::Success, 1),
            update("http://b", StatusClass::Success, 1),
        ];
        assert!(backend.apply(900, &twice).await.is_err());
        let count: String = redis::cmd("HGET")
            .arg(&b_record)
            .arg("count")
            .query_async(&mut conn)
            .await
            .unwrap();
        assert_eq!(count, "9223372036854775806");

        drop_table(conn, &table).await;
    }

    async fn drop_table(mut conn: ConnectionManager, table: &str) {
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{table}:*"))
            .query_async(&mut conn)
            .await
            .unwrap();
        if !keys.is_empty() {
            let _: () = redis::cmd("DEL").arg(keys).query_async(&mut conn).await.unwrap();
        }
    }
}
