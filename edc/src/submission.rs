//! フォーム送信フロー
//!
//! 検証 → 保存 → 監査記録 を1つの操作として扱う。検証に失敗した送信も
//! `VALIDATION_FAILED` として監査ログに残す。監査ログへの追記が失敗した
//! 場合、保存済みのレコードを取り消したうえで送信自体を失敗として返す。

use crate::audit::log::AuditLog;
use crate::audit::types::{actions, AuditEntry, AuditStatus, NewAuditEvent};
use crate::common::error::EdcResult;
use crate::db::traits::RecordStore;
use crate::schema::FormSchema;
use crate::validation::{validate, SubmittedRecord, ValidationResult};
use std::sync::Arc;
use tracing::{error, info, warn};

/// 送信結果
#[derive(Debug, Clone)]
pub enum SubmissionOutcome {
    /// 検証に成功し、保存・記録した
    Accepted {
        /// 保存したレコードID
        record_id: i64,
        /// 検証結果
        result: ValidationResult,
        /// 記録した監査エントリ
        audit: AuditEntry,
    },
    /// 検証に失敗した（保存はしていない）
    Rejected {
        /// 検証結果
        result: ValidationResult,
        /// 記録した監査エントリ
        audit: AuditEntry,
    },
}

impl SubmissionOutcome {
    /// 検証結果
    pub fn result(&self) -> &ValidationResult {
        match self {
            Self::Accepted { result, .. } | Self::Rejected { result, .. } => result,
        }
    }

    /// 記録した監査エントリ
    pub fn audit_entry(&self) -> &AuditEntry {
        match self {
            Self::Accepted { audit, .. } | Self::Rejected { audit, .. } => audit,
        }
    }

    /// 受理されたか
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

/// 送信サービス
#[derive(Clone)]
pub struct SubmissionService {
    audit: Arc<AuditLog>,
    records: Arc<dyn RecordStore>,
}

impl SubmissionService {
    /// 新しいSubmissionServiceを作成
    pub fn new(audit: Arc<AuditLog>, records: Arc<dyn RecordStore>) -> Self {
        Self { audit, records }
    }

    /// 監査ログ
    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// フォームを送信する
    pub async fn submit(
        &self,
        user_id: &str,
        schema: &FormSchema,
        record: &SubmittedRecord,
    ) -> EdcResult<SubmissionOutcome> {
        let result = validate(schema, record);
        let resource = format!("form:{}", schema.name());

        if !result.valid {
            let failed: Vec<&str> = result.failed_fields().collect();
            warn!(
                user_id,
                form = schema.name(),
                fields = ?failed,
                "Submission rejected by validation"
            );
            let event = NewAuditEvent::new(
                user_id,
                actions::VALIDATION_FAILED,
                resource,
                AuditStatus::Failure,
            )
            .with_detail(format!("fields={}", failed.join(",")));
            let audit = self.audit.append(event).await?;
            return Ok(SubmissionOutcome::Rejected { result, audit });
        }

        let record_id = self
            .records
            .save_record(schema.name(), user_id, &result.cleaned_data)
            .await?;
        let event = NewAuditEvent::new(user_id, actions::CREATE, resource, AuditStatus::Success)
            .with_detail(format!("record_id={}", record_id));
        let audit = match self.audit.append(event).await {
            Ok(audit) => audit,
            Err(failure) => {
                // 監査エントリのないレコードを残さない
                if let Err(e) = self.records.discard_record(record_id).await {
                    error!(
                        user_id,
                        form = schema.name(),
                        record_id,
                        error = %e,
                        "Failed to discard unaudited record"
                    );
                }
                warn!(
                    user_id,
                    form = schema.name(),
                    record_id,
                    error = %failure,
                    "Submission discarded because the audit append failed"
                );
                return Err(failure.into());
            }
        };

        info!(
            user_id,
            form = schema.name(),
            record_id,
            sequence = audit.sequence_number,
            "Submission accepted"
        );
        Ok(SubmissionOutcome::Accepted {
            record_id,
            result,
            audit,
        })
    }

    /// ログイン試行を記録する（失敗したログインも必ず記録する）
    pub async fn record_login(&self, user_id: &str, succeeded: bool) -> EdcResult<AuditEntry> {
        let status = if succeeded {
            AuditStatus::Success
        } else {
            AuditStatus::Failure
        };
        Ok(self
            .audit
            .append(NewAuditEvent::new(user_id, actions::LOGIN, "session", status))
            .await?)
    }
}
