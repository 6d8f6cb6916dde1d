//! 監査ログの型定義

use crate::audit::hash_chain::truncate_timestamp;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// よく使うアクション名
///
/// `action` は自由形式だが、認証・データ変更・エクスポート・
/// データ主体権利（GDPR）リクエストにはこれらの名前を使う。
pub mod actions {
    /// ログイン試行
    pub const LOGIN: &str = "LOGIN";
    /// ログアウト
    pub const LOGOUT: &str = "LOGOUT";
    /// レコード作成
    pub const CREATE: &str = "CREATE";
    /// レコード更新
    pub const UPDATE: &str = "UPDATE";
    /// レコード削除
    pub const DELETE: &str = "DELETE";
    /// データエクスポート
    pub const EXPORT: &str = "EXPORT";
    /// 入力検証エラーで拒否された送信
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    /// データ主体のアクセス請求
    pub const DSR_ACCESS: &str = "DSR_ACCESS";
    /// データ主体の消去請求
    pub const DSR_ERASURE: &str = "DSR_ERASURE";
    /// データ主体の訂正請求
    pub const DSR_RECTIFICATION: &str = "DSR_RECTIFICATION";
    /// 同意撤回
    pub const CONSENT_WITHDRAWN: &str = "CONSENT_WITHDRAWN";
}

/// 操作結果
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuditStatus {
    /// 成功
    Success,
    /// 失敗
    Failure,
    /// 権限不足などで拒否
    Denied,
    /// その他（自由形式）
    Other(String),
}

impl AuditStatus {
    /// 文字列からAuditStatusに変換
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Self {
        match s {
            "success" => Self::Success,
            "failure" => Self::Failure,
            "denied" => Self::Denied,
            other => Self::Other(other.to_string()),
        }
    }

    /// AuditStatusを文字列に変換
    pub fn as_str(&self) -> &str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Denied => "denied",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for AuditStatus {
    fn from(value: String) -> Self {
        Self::from_str(&value)
    }
}

impl From<&str> for AuditStatus {
    fn from(value: &str) -> Self {
        Self::from_str(value)
    }
}

impl From<AuditStatus> for String {
    fn from(value: AuditStatus) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 監査ログエントリ（追記後は不変）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// 連番（1始まり、欠番なし）
    pub sequence_number: i64,
    /// 追記時刻（マイクロ秒精度のUTC）
    pub timestamp: DateTime<Utc>,
    /// 操作ユーザー
    pub user_id: String,
    /// イベント種別（LOGIN, EXPORT など）
    pub action: String,
    /// 操作対象
    pub resource: String,
    /// 操作結果
    pub status: AuditStatus,
    /// 補足情報
    pub detail: Option<String>,
    /// このエントリの正規化フィールドのSHA-256ハッシュ
    pub record_hash: String,
    /// 直前エントリのrecord_hash（先頭はジェネシスハッシュ）
    pub previous_hash: String,
}

/// 追記するイベント（連番・時刻・ハッシュは追記時に決まる）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAuditEvent {
    /// 操作ユーザー
    pub user_id: String,
    /// イベント種別
    pub action: String,
    /// 操作対象
    pub resource: String,
    /// 操作結果
    pub status: AuditStatus,
    /// 補足情報
    pub detail: Option<String>,
}

impl NewAuditEvent {
    /// 新しいイベントを作成
    pub fn new(
        user_id: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        status: impl Into<AuditStatus>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            action: action.into(),
            resource: resource.into(),
            status: status.into(),
            detail: None,
        }
    }

    /// 補足情報を付与
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// 監査ログフィルタ（全条件のAND、未指定は無条件）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFilter {
    /// ユーザーIDでフィルタ
    pub user_id: Option<String>,
    /// アクションでフィルタ
    pub action: Option<String>,
    /// ステータスでフィルタ
    pub status: Option<AuditStatus>,
    /// 開始日時（含む）
    pub time_from: Option<DateTime<Utc>>,
    /// 終了日時（含む）
    pub time_to: Option<DateTime<Utc>>,
}

impl AuditFilter {
    /// ユーザーIDで絞り込む
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// アクションで絞り込む
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// ステータスで絞り込む
    pub fn status(mut self, status: impl Into<AuditStatus>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// 時刻範囲で絞り込む
    ///
    /// 境界は保存時刻と同じマイクロ秒精度に切り捨てる。
    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.time_from = from.map(truncate_timestamp);
        self.time_to = to.map(truncate_timestamp);
        self
    }

    /// エントリが条件に一致するか
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.user_id.as_ref().map_or(true, |u| &entry.user_id == u)
            && self.action.as_ref().map_or(true, |a| &entry.action == a)
            && self.status.as_ref().map_or(true, |s| &entry.status == s)
            && self
                .time_from
                .map_or(true, |from| entry.timestamp >= truncate_timestamp(from))
            && self
                .time_to
                .map_or(true, |to| entry.timestamp <= truncate_timestamp(to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(user: &str, action: &str, status: AuditStatus, hour: u32) -> AuditEntry {
        AuditEntry {
            sequence_number: 1,
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap(),
            user_id: user.to_string(),
            action: action.to_string(),
            resource: "form:demographics".to_string(),
            status,
            detail: None,
            record_hash: String::new(),
            previous_hash: String::new(),
        }
    }

    #[test]
    fn test_status_round_trip() {
        for s in ["success", "failure", "denied", "locked_out"] {
            assert_eq!(AuditStatus::from_str(s).as_str(), s);
        }
        assert_eq!(AuditStatus::from("success"), AuditStatus::Success);
        let json = serde_json::to_string(&AuditStatus::Denied).unwrap();
        assert_eq!(json, "\"denied\"");
        let parsed: AuditStatus = serde_json::from_str("\"timeout\"").unwrap();
        assert_eq!(parsed, AuditStatus::Other("timeout".to_string()));
    }

    #[test]
    fn test_filter_combinations() {
        let e = entry("u1", actions::LOGIN, AuditStatus::Failure, 10);
        assert!(AuditFilter::default().matches(&e));
        assert!(AuditFilter::default().user("u1").action("LOGIN").matches(&e));
        assert!(!AuditFilter::default().user("u2").matches(&e));
        assert!(!AuditFilter::default().status("success").matches(&e));

        let from = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 0).unwrap();
        assert!(AuditFilter::default().between(Some(from), Some(to)).matches(&e));
        assert!(!AuditFilter::default().between(None, Some(from - chrono::Duration::seconds(1))).matches(&e));
    }

    #[test]
    fn test_range_bounds_use_microsecond_precision() {
        let e = entry("u1", actions::LOGIN, AuditStatus::Success, 10);
        let just_after = e.timestamp + chrono::Duration::nanoseconds(900);

        let filter = AuditFilter::default().between(Some(just_after), None);
        assert_eq!(filter.time_from, Some(e.timestamp));
        assert!(filter.matches(&e));

        // フィールドを直接設定した場合も同じ精度で比較する
        let filter = AuditFilter {
            time_from: Some(just_after),
            ..AuditFilter::default()
        };
        assert!(filter.matches(&e));
        assert!(!AuditFilter::default()
            .between(Some(e.timestamp + chrono::Duration::microseconds(1)), None)
            .matches(&e));
    }

    #[test]
    fn test_new_event_builder() {
        let event = NewAuditEvent::new("u1", actions::EXPORT, "audit_log", AuditStatus::Success)
            .with_detail("format=csv");
        assert_eq!(event.detail.as_deref(), Some("format=csv"));
        assert_eq!(event.status.as_str(), "success");
    }
}
