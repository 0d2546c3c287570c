//! 访问控制
//!
//! 访问密钥由外部注入，启动时做 argon2 哈希，校验走 argon2 的常量时间比较。
//! 会话只对外暴露 `authenticated` 标志，失败计数和锁定状态由会话仓库内部维护。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use parking_lot::RwLock;
use pulse_errors::{AppError, AppResult};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 访问密钥校验器
pub struct AccessGate {
    hash: String,
}

impl AccessGate {
    /// 从明文密钥创建，明文不会被保留
    pub fn new(secret: &str) -> AppResult<Self> {
        if secret.is_empty() {
            return Err(AppError::validation("Access key must not be empty"));
        }

        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map_err(|e| AppError::internal(format!("Failed to hash access key: {}", e)))?;

        Ok(Self {
            hash: hash.to_string(),
        })
    }

    /// 校验候选密钥
    pub fn verify(&self, candidate: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.hash) else {
            return false;
        };
        Argon2::default()
            .verify_password(candidate.as_bytes(), &parsed)
            .is_ok()
    }
}

impl std::fmt::Debug for AccessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGate").finish_non_exhaustive()
    }
}

/// 会话 ID
pub type SessionId = Uuid;

/// 请求可见的会话状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Session {
    pub authenticated: bool,
}

/// 会话策略
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    /// 锁定前允许的连续失败次数
    pub max_failed_attempts: u32,
    /// 锁定时长
    pub lockout: Duration,
    /// 空闲过期时间
    pub ttl: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout: Duration::from_secs(300),
            ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug)]
struct SessionEntry {
    session: Session,
    last_seen: Instant,
}

impl SessionEntry {
    fn authenticated() -> Self {
        Self {
            session: Session {
                authenticated: true,
            },
            last_seen: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.last_seen.elapsed() >= ttl
    }
}

/// 单个客户端的失败记录
#[derive(Debug)]
struct FailedAttempts {
    count: u32,
    locked_until: Option<Instant>,
    last_failure: Instant,
}

impl FailedAttempts {
    fn new() -> Self {
        Self {
            count: 0,
            locked_until: None,
            last_failure: Instant::now(),
        }
    }

    fn is_locked(&self, now: Instant) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    fn is_stale(&self, now: Instant, ttl: Duration) -> bool {
        !self.is_locked(now) && self.last_failure.elapsed() >= ttl
    }
}

/// 内存会话仓库
///
/// 只保存认证成功的会话。失败计数按客户端标识（对端地址）记录，
/// 丢弃 cookie 不会重置计数。
pub struct SessionStore {
    entries: RwLock<HashMap<SessionId, SessionEntry>>,
    attempts: RwLock<HashMap<String, FailedAttempts>>,
    policy: SessionPolicy,
}

impl SessionStore {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            attempts: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// 获取会话并刷新活跃时间，过期会话会被移除
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(id)?;

        if entry.is_expired(self.policy.ttl) {
            entries.remove(id);
            debug!(session_id = %id, "Session expired");
            return None;
        }

        entry.last_seen = Instant::now();
        Some(entry.session)
    }

    /// 客户端当前是否被锁定
    pub fn is_locked(&self, client: &str) -> bool {
        self.attempts
            .read()
            .get(client)
            .is_some_and(|a| a.is_locked(Instant::now()))
    }

    /// 使用访问密钥认证
    ///
    /// 成功时沿用仍有效的 `current` 会话，否则签发新会话。
    /// 失败时 `current` 会话被注销，客户端失败计数加一。
    pub fn authenticate(
        &self,
        client: &str,
        current: Option<SessionId>,
        candidate: &str,
        gate: &AccessGate,
    ) -> AppResult<(SessionId, Session)> {
        if self.is_locked(client) {
            warn!(client, "Access attempt while client is locked");
            return Err(AppError::resource_exhausted(
                "Too many failed attempts. Try again later.",
            ));
        }

        // argon2 校验较慢，不持有锁
        if gate.verify(candidate) {
            self.attempts.write().remove(client);

            let mut entries = self.entries.write();
            let id = current
                .filter(|id| {
                    entries
                        .get(id)
                        .is_some_and(|e| !e.is_expired(self.policy.ttl))
                })
                .unwrap_or_else(Uuid::new_v4);
            let entry = entries.entry(id).or_insert_with(SessionEntry::authenticated);
            entry.last_seen = Instant::now();

            info!(session_id = %id, "Session authenticated");
            return Ok((id, entry.session));
        }

        if let Some(id) = current {
            self.entries.write().remove(&id);
        }

        let now = Instant::now();
        let mut attempts = self.attempts.write();
        let record = attempts
            .entry(client.to_string())
            .or_insert_with(FailedAttempts::new);
        record.count += 1;
        record.last_failure = now;

        if record.count >= self.policy.max_failed_attempts {
            record.locked_until = Some(now + self.policy.lockout);
            record.count = 0;
            warn!(
                client,
                lockout_secs = self.policy.lockout.as_secs(),
                "Client locked after repeated failures"
            );
        } else {
            debug!(client, failed_attempts = record.count, "Access key rejected");
        }

        Err(AppError::unauthenticated("Incorrect access key"))
    }

    /// 注销会话
    pub fn logout(&self, id: &SessionId) -> bool {
        let removed = self.entries.write().remove(id).is_some();
        if removed {
            info!(session_id = %id, "Session logged out");
        }
        removed
    }

    /// 清理过期会话和过期失败记录，返回清理的会话数量
    pub fn purge_expired(&self) -> usize {
        let ttl = self.policy.ttl;
        let now = Instant::now();

        self.attempts.write().retain(|_, a| !a.is_stale(now, ttl));

        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(ttl));
        before - entries.len()
    }

    /// 会话数量
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// 有失败记录的客户端数量
    pub fn tracked_clients(&self) -> usize {
        self.attempts.read().len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SessionPolicy::default())
    }
}
