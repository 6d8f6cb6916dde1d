//! 監査ログ本体（追記・検証・検索）
//!
//! 追記は「末尾を読む → ハッシュを計算 → 書き込む」を排他ロック内で行い、
//! さらにストア側の compare-and-append で末尾が変わっていないことを確認する。
//! 同一ストアを別プロセスが書いていても、古い末尾からの追記は行われない。

use crate::audit::hash_chain::{self, ChainVerifier, VerificationResult, GENESIS_HASH};
use crate::audit::types::{AuditEntry, AuditFilter, NewAuditEvent};
use crate::common::error::{AppendFailure, EdcResult};
use crate::config::EdcConfig;
use crate::db::traits::{AppendOutcome, AuditStore};
use chrono::Utc;
use futures::stream::{BoxStream, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// 監査ログの設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditLogConfig {
    /// 追記ロック取得の待ち時間上限
    pub lock_timeout: Duration,
    /// compare-and-append 競合時の再試行回数
    pub append_retries: u32,
    /// 検索・検証時に1回で読むエントリ数
    pub page_size: u32,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(5000),
            append_retries: 3,
            page_size: 256,
        }
    }
}

impl From<&EdcConfig> for AuditLogConfig {
    fn from(config: &EdcConfig) -> Self {
        Self {
            lock_timeout: config.audit_lock_timeout,
            append_retries: config.audit_append_retries,
            page_size: config.audit_query_page_size,
        }
    }
}

/// 追記専用・改ざん検知可能な監査ログ
pub struct AuditLog {
    store: Arc<dyn AuditStore>,
    config: AuditLogConfig,
    append_lock: Mutex<()>,
}

impl AuditLog {
    /// 新しいAuditLogを作成
    pub fn new(store: Arc<dyn AuditStore>, config: AuditLogConfig) -> Self {
        Self {
            store,
            config,
            append_lock: Mutex::new(()),
        }
    }

    /// 設定
    pub fn config(&self) -> &AuditLogConfig {
        &self.config
    }

    /// 下位ストア
    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// イベントを追記する
    ///
    /// 成功時は確定したエントリを返す。ストア障害・ロック待ちの超過・
    /// 競合の再試行上限はすべて [`AppendFailure`] として返し、握りつぶさない。
    pub async fn append(&self, event: NewAuditEvent) -> Result<AuditEntry, AppendFailure> {
        let _guard = tokio::time::timeout(self.config.lock_timeout, self.append_lock.lock())
            .await
            .map_err(|_| {
                error!(
                    user_id = %event.user_id,
                    action = %event.action,
                    timeout_ms = self.config.lock_timeout.as_millis() as u64,
                    "Timed out waiting for audit append lock"
                );
                AppendFailure::LockTimeout(self.config.lock_timeout)
            })?;

        let attempts = self.config.append_retries.saturating_add(1);
        for attempt in 1..=attempts {
            let tail = self.store.tail().await.map_err(|e| store_unavailable(&event, e))?;
            let (sequence_number, previous_hash) = match tail {
                Some(tail) => (tail.sequence_number + 1, tail.record_hash),
                None => (1, GENESIS_HASH.to_string()),
            };

            let entry = hash_chain::seal(sequence_number, Utc::now(), &event, &previous_hash);

            match self
                .store
                .append_if_tail(&entry)
                .await
                .map_err(|e| store_unavailable(&event, e))?
            {
                AppendOutcome::Appended => {
                    info!(
                        sequence = entry.sequence_number,
                        user_id = %entry.user_id,
                        action = %entry.action,
                        resource = %entry.resource,
                        status = %entry.status,
                        "Audit entry appended"
                    );
                    return Ok(entry);
                }
                AppendOutcome::Conflict => {
                    warn!(
                        attempt,
                        sequence = sequence_number,
                        "Audit tail moved during append, retrying"
                    );
                }
            }
        }

        error!(
            attempts,
            user_id = %event.user_id,
            action = %event.action,
            "Audit append gave up after repeated conflicts"
        );
        Err(AppendFailure::Contention { attempts })
    }

    /// フィルタに一致するエントリの遅延・再実行可能な検索
    pub fn query(&self, filter: AuditFilter) -> AuditQuery {
        AuditQuery {
            store: Arc::clone(&self.store),
            filter,
            page_size: self.config.page_size,
        }
    }

    /// チェーン全体を検証する（ログは変更しない）
    ///
    /// 読み出しエラーは `Err`、チェーン破損は `Ok` の結果として返る。
    pub async fn verify(&self) -> EdcResult<VerificationResult> {
        let mut verifier = ChainVerifier::new();
        let mut entries = self.store.scan(AuditFilter::default(), self.config.page_size);
        while let Some(entry) = entries.try_next().await? {
            if !verifier.push(&entry) {
                break;
            }
        }
        let result = verifier.finish();
        if result.ok {
            debug!(entries = result.entries_checked, "Audit chain verified");
        }
        Ok(result)
    }

    /// エントリ総数
    pub async fn len(&self) -> EdcResult<i64> {
        self.store.count().await
    }

    /// 空かどうか
    pub async fn is_empty(&self) -> EdcResult<bool> {
        Ok(self.len().await? == 0)
    }
}

fn store_unavailable(event: &NewAuditEvent, err: crate::common::error::EdcError) -> AppendFailure {
    error!(
        user_id = %event.user_id,
        action = %event.action,
        error = %err,
        "Audit store unavailable; event not recorded"
    );
    AppendFailure::StoreUnavailable(err.to_string())
}

/// 監査ログ検索
///
/// `stream()` を呼ぶたびに先頭から読み直す。結果は有限で、呼び出し時点で
/// 存在するエントリまでを連番昇順で返す。
#[derive(Clone)]
pub struct AuditQuery {
    store: Arc<dyn AuditStore>,
    filter: AuditFilter,
    page_size: u32,
}

impl AuditQuery {
    /// 検索条件
    pub fn filter(&self) -> &AuditFilter {
        &self.filter
    }

    /// 一致するエントリのストリーム
    pub fn stream(&self) -> BoxStream<'static, EdcResult<AuditEntry>> {
        self.store.scan(self.filter.clone(), self.page_size)
    }

    /// 一致するエントリをすべて読み込む
    pub async fn collect(&self) -> EdcResult<Vec<AuditEntry>> {
        self.stream().try_collect().await
    }
}
