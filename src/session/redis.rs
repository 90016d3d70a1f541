use super::{
    fingerprint, storage_key, LoginSession, Resolution, SessionError, SessionState,
    SessionStore, MAX_TRIES, SESSION_TTL,
};
use ::redis::{aio::ConnectionManager, Client, Script};
use anyhow::Context;
use async_trait::async_trait;
use tracing::{debug, info_span, Instrument};

// GET, count the attempt, corrupt a waiting session past the budget, write back
// with a fresh expiry. Runs as one script so concurrent callers serialize.
const ATTEMPT_SCRIPT: &str = r"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return false
end
local session = cjson.decode(raw)
session.tries = session.tries + 1
if session.tries > tonumber(ARGV[1]) and session.state == 0 then
  session.state = 2
end
local encoded = cjson.encode(session)
redis.call('SET', KEYS[1], encoded, 'EX', ARGV[2])
return encoded
";

// Waiting -> Success only. Returns {1, session} when applied, {0, session}
// when the session was already final.
const RESOLVE_SCRIPT: &str = r"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return false
end
local session = cjson.decode(raw)
if session.state ~= 0 then
  return {0, raw}
end
session.state = 1
local encoded = cjson.encode(session)
redis.call('SET', KEYS[1], encoded, 'EX', ARGV[1])
return {1, encoded}
";

/// Redis-backed session store.
///
/// Sessions live under `otp_session:{token}` as compact JSON with a sliding
/// expiry. Both mutating primitives are Lua scripts (`EVALSHA`), so each
/// read-modify-write is indivisible on the server.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    attempt_script: Script,
    resolve_script: Script,
}

impl RedisSessionStore {
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            attempt_script: Script::new(ATTEMPT_SCRIPT),
            resolve_script: Script::new(RESOLVE_SCRIPT),
        }
    }
}

/// Open a managed connection that reconnects on failure. Shared by the
/// session store, the rate limiter and the health check.
///
/// # Errors
/// Returns an error if the URL is invalid or the first connection fails.
pub async fn connect(url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(url).context("Invalid Redis URL")?;
    client
        .get_connection_manager()
        .await
        .context("Failed to connect to Redis")
}

fn decode(raw: &str) -> Result<LoginSession, SessionError> {
    serde_json::from_str(raw)
        .context("corrupt session payload")
        .map_err(SessionError::Store)
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(&self, token: &str, session: &LoginSession) -> Result<(), SessionError> {
        let payload = serde_json::to_string(session).context("failed to encode session")?;
        let mut conn = self.conn.clone();
        let span = info_span!("redis.command", db.system = "redis", db.operation = "SET");
        ::redis::cmd("SET")
            .arg(storage_key(token))
            .arg(payload)
            .arg("EX")
            .arg(SESSION_TTL.as_secs())
            .query_async::<_, ()>(&mut conn)
            .instrument(span)
            .await
            .context("failed to store session")?;
        Ok(())
    }

    async fn attempt(&self, token: &str) -> Result<Option<LoginSession>, SessionError> {
        let mut conn = self.conn.clone();
        let span = info_span!("redis.command", db.system = "redis", db.operation = "EVALSHA");
        let raw: Option<String> = self
            .attempt_script
            .key(storage_key(token))
            .arg(MAX_TRIES)
            .arg(SESSION_TTL.as_secs())
            .invoke_async(&mut conn)
            .instrument(span)
            .await
            .context("failed to record attempt")?;

        let Some(raw) = raw else {
            debug!(session = %fingerprint(token), "Session not found");
            return Ok(None);
        };
        let session = decode(&raw)?;
        if session.state == SessionState::Corrupted {
            debug!(session = %fingerprint(token), tries = session.tries, "Session corrupted");
        }
        Ok(Some(session))
    }

    async fn resolve(&self, token: &str) -> Result<Resolution, SessionError> {
        let mut conn = self.conn.clone();
        let span = info_span!("redis.command", db.system = "redis", db.operation = "EVALSHA");
        let reply: Option<(i64, String)> = self
            .resolve_script
            .key(storage_key(token))
            .arg(SESSION_TTL.as_secs())
            .invoke_async(&mut conn)
            .instrument(span)
            .await
            .context("failed to resolve session")?;

        Ok(match reply {
            None => Resolution::Missing,
            Some((1, _)) => Resolution::Resolved,
            Some((_, raw)) => Resolution::AlreadyFinal(decode(&raw)?.state),
        })
    }
}
