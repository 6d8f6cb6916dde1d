//! データベースアクセス層
//!
//! SQLiteベースのデータ永続化と、差し替え可能なインメモリ実装

/// データベースマイグレーション
pub mod migrations;

/// 監査ログストレージ
pub mod audit_log;

/// フォームレコードストレージ
pub mod records;

/// インメモリストア
pub mod memory;

/// Repository traitパターン
pub mod traits;

pub use audit_log::SqliteAuditStore;
pub use memory::{MemoryAuditStore, MemoryRecordStore};
pub use records::SqliteRecordStore;
pub use traits::{AppendOutcome, AuditStore, ChainTail, RecordStore, StoredRecord};
