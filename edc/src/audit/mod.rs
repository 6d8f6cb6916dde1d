//! 監査ログ
//!
//! 追記専用・ハッシュチェーンによる改ざん検知付きの監査証跡。
//! エントリは作成後に変更も削除もされない。

/// 監査ログの型定義
pub mod types;

/// ハッシュチェーン計算と検証
pub mod hash_chain;

/// 追記・検索・検証のファサード
pub mod log;

/// CSV/JSONエクスポート
pub mod export;

pub use export::{export, export_csv, export_json, ExportFormat, ExportSummary};
pub use hash_chain::{
    verify_entries, BreakReason, ChainVerifier, VerificationResult, GENESIS_HASH,
};
pub use log::{AuditLog, AuditLogConfig, AuditQuery};
pub use types::{actions, AuditEntry, AuditFilter, AuditStatus, NewAuditEvent};
