//! エラー型定義
//!
//! 統一エラー型（thiserror使用）
//!
//! - [`SchemaError`]: スキーマ読み込み時の構造エラー（フォーム単位で致命的）
//! - [`AppendFailure`]: 監査ログ追記の失敗（呼び出し元へ必ず伝播する）
//! - [`IntegrityViolation`]: ハッシュチェーン検証で検出された破損
//!
//! フィールド単位の入力エラーは例外ではなく
//! [`crate::validation::ValidationResult`] の一部として返る。

use crate::audit::hash_chain::BreakReason;
use crate::schema::expr::ExprError;
use std::time::Duration;
use thiserror::Error;

/// Common layer error type
#[derive(Debug, Error)]
pub enum CommonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structural problems in a form definition, detected at load time.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The form defines no fields at all
    #[error("Form '{0}' has no fields")]
    EmptySchema(String),

    /// A field was declared without a name
    #[error("Field at position {0} has an empty name")]
    EmptyFieldName(usize),

    /// Two fields share a name
    #[error("Duplicate field name: {0}")]
    DuplicateField(String),

    /// The kind column holds an unrecognised value
    #[error("Unknown field kind '{kind}' for field '{field}'")]
    UnknownKind {
        /// Field name
        field: String,
        /// Offending kind text
        kind: String,
    },

    /// An enumerated kind was declared without choices
    #[error("Field '{field}' of kind {kind} requires at least one choice")]
    MissingChoices {
        /// Field name
        field: String,
        /// Field kind
        kind: String,
    },

    /// A min/max literal could not be parsed for the field's kind
    #[error("Field '{field}' has invalid bound '{value}': {reason}")]
    InvalidBound {
        /// Field name
        field: String,
        /// Bound literal
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// min/max were given for a kind without an ordering
    #[error("Field '{field}' of kind {kind} does not support min/max bounds")]
    BoundsNotSupported {
        /// Field name
        field: String,
        /// Field kind
        kind: String,
    },

    /// min is greater than max
    #[error("Field '{field}' has min {min} greater than max {max}")]
    InvertedRange {
        /// Field name
        field: String,
        /// Lower bound as written
        min: String,
        /// Upper bound as written
        max: String,
    },

    /// condition / validity_expression failed to parse
    #[error("Invalid expression in field '{field}': {source}")]
    Expression {
        /// Field name
        field: String,
        /// Parser error
        #[source]
        source: ExprError,
    },

    /// An expression names a field that does not exist in the form
    #[error("Expression in field '{field}' references unknown field '{reference}'")]
    UnknownReference {
        /// Field holding the expression
        field: String,
        /// Unknown identifier
        reference: String,
    },

    /// A cell of the field-definition table has an invalid value
    #[error("Invalid value '{value}' in column '{column}' for field '{field}'")]
    InvalidColumn {
        /// Field name
        field: String,
        /// Column header
        column: String,
        /// Cell content
        value: String,
    },

    /// CSV read error
    #[error("Failed to read field-definition table: {0}")]
    Csv(#[from] csv::Error),

    /// JSON parse error
    #[error("Failed to parse schema JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parse error
    #[error("Failed to parse schema YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// File read error
    #[error("Failed to read schema file: {0}")]
    Io(#[from] std::io::Error),

    /// The file extension maps to no known loader
    #[error("Unsupported schema file format: {0}")]
    UnsupportedFormat(String),
}

/// 監査ログ追記の失敗
///
/// 監査証跡はコンプライアンス要件であり、ベストエフォートのログではない。
/// 追記に失敗した場合、呼び出し元の業務操作も失敗として扱うこと。
#[derive(Debug, Error)]
pub enum AppendFailure {
    /// ストアへの書き込み・読み出しが失敗した
    #[error("Audit store unavailable: {0}")]
    StoreUnavailable(String),

    /// 追記ロックを制限時間内に取得できなかった
    #[error("Timed out after {0:?} waiting for the audit append lock")]
    LockTimeout(Duration),

    /// compare-and-append がリトライ上限まで競合した
    #[error("Audit append lost {attempts} consecutive compare-and-append races")]
    Contention {
        /// 試行回数
        attempts: u32,
    },
}

/// ハッシュチェーンの破損（自動修復はしない）
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Audit chain broken at sequence {sequence}: {reason}")]
pub struct IntegrityViolation {
    /// 最初に破損が検出された連番
    pub sequence: i64,
    /// 破損の種類
    pub reason: BreakReason,
}

/// EDC core error type
#[derive(Debug, Error)]
pub enum EdcError {
    /// Common layer error
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Schema load error
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Audit append failure
    #[error(transparent)]
    Append(#[from] AppendFailure),

    /// Audit chain integrity violation
    #[error(transparent)]
    Integrity(#[from] IntegrityViolation),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EdcError {
    /// Returns a safe error message for operators and end users.
    ///
    /// Full details (paths, SQL errors) are only written to the logs via the
    /// `Display` implementation.
    pub fn external_message(&self) -> &'static str {
        match self {
            Self::Common(CommonError::Config(_)) => "Configuration error",
            Self::Common(_) => "Request error",
            Self::Schema(_) => "Form definition is invalid",
            Self::Append(_) => "Audit trail unavailable; action not recorded",
            Self::Integrity(_) => "Audit trail integrity check failed",
            Self::Database(_) => "Database error",
            Self::NotFound(_) => "Not found",
            Self::Internal(_) => "Internal error",
        }
    }

    /// Process exit code used by the CLI for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Integrity(_) => 3,
            Self::Append(_) => 4,
            Self::Schema(_) => 5,
            _ => 1,
        }
    }
}

/// Result type alias (Common)
pub type CommonResult<T> = Result<T, CommonError>;

/// Result type alias (EDC core)
pub type EdcResult<T> = Result<T, EdcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_error_display() {
        let error = CommonError::Config("test config error".to_string());
        assert_eq!(error.to_string(), "Configuration error: test config error");
    }

    #[test]
    fn test_error_from_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let common_error: CommonError = json_error.into();
        assert!(matches!(common_error, CommonError::Serialization(_)));
    }

    #[test]
    fn test_schema_error_display() {
        let error = SchemaError::MissingChoices {
            field: "sex".to_string(),
            kind: "select".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Field 'sex' of kind select requires at least one choice"
        );
    }

    #[test]
    fn test_append_failure_is_transparent() {
        let error: EdcError = AppendFailure::StoreUnavailable("pool closed".to_string()).into();
        assert_eq!(error.to_string(), "Audit store unavailable: pool closed");
        assert_eq!(error.exit_code(), 4);
    }

    #[test]
    fn test_integrity_violation_display() {
        let violation = IntegrityViolation {
            sequence: 7,
            reason: BreakReason::HashMismatch,
        };
        assert_eq!(
            violation.to_string(),
            "Audit chain broken at sequence 7: stored record_hash does not match recomputed hash"
        );
        let error: EdcError = violation.into();
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_external_message_hides_details() {
        let error = EdcError::Database("/var/lib/edc/edc.db: disk I/O error".to_string());
        assert_eq!(error.external_message(), "Database error");
        let error: EdcError = SchemaError::DuplicateField("age".to_string()).into();
        assert_eq!(error.external_message(), "Form definition is invalid");
    }
}
