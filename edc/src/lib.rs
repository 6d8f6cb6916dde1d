//! EDC core
//!
//! 臨床試験データ収集（EDC）の中核部分。宣言的なフォーム定義による
//! 入力検証と、ハッシュチェーンで改ざんを検知できる追記専用の監査ログ。

#![warn(missing_docs)]

/// 共通型定義（エラー）
pub mod common;

/// 設定管理（環境変数ヘルパー）
pub mod config;

/// ロギング初期化ユーティリティ
pub mod logging;

/// フォーム定義（フィールド種別・制約・式言語・読み込み）
pub mod schema;

/// 入力検証エンジン
pub mod validation;

/// 監査ログシステム
pub mod audit;

/// データベースアクセス
pub mod db;

/// フォーム送信フロー（検証 → 保存 → 監査）
pub mod submission;

/// CLI
pub mod cli;

pub use audit::{AuditEntry, AuditFilter, AuditLog, AuditLogConfig, NewAuditEvent, VerificationResult};
pub use common::error::{AppendFailure, EdcError, EdcResult, IntegrityViolation, SchemaError};
pub use config::EdcConfig;
pub use schema::{FieldKind, FieldSpec, FormSchema};
pub use submission::{SubmissionOutcome, SubmissionService};
pub use validation::{validate, FieldError, FieldValue, SubmittedRecord, ValidationResult};
