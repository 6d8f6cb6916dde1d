//! Repository traitパターン定義
//!
//! 永続化層を抽象化し、SQLite実装とインメモリ実装を差し替え可能にする。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::audit::types::{AuditEntry, AuditFilter};
use crate::common::error::EdcResult;
use crate::validation::FieldValue;

// ---------------------------------------------------------------------------
// AuditStore
// ---------------------------------------------------------------------------

/// チェーン末尾の情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTail {
    /// 末尾エントリの連番
    pub sequence_number: i64,
    /// 末尾エントリのrecord_hash
    pub record_hash: String,
}

/// compare-and-append の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// 追記した
    Appended,
    /// 末尾が想定と異なっていたため追記しなかった
    Conflict,
}

/// 監査ログストアのRepository trait
///
/// 追記専用。既存エントリの更新・削除操作は提供しない。
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// 現在の末尾エントリ（空ならNone）
    async fn tail(&self) -> EdcResult<Option<ChainTail>>;

    /// 末尾が `entry` の直前（連番 `sequence_number - 1`、ハッシュ
    /// `previous_hash`）である場合に限り、単一の原子的操作で追記する
    async fn append_if_tail(&self, entry: &AuditEntry) -> EdcResult<AppendOutcome>;

    /// フィルタに一致するエントリを連番昇順で遅延取得する
    ///
    /// `page_size` 件ずつストアから読み出す。返したストリームを
    /// 破棄するまで新しいページは読まれない。
    fn scan(&self, filter: AuditFilter, page_size: u32) -> BoxStream<'static, EdcResult<AuditEntry>>;

    /// エントリ総数
    async fn count(&self) -> EdcResult<i64>;
}

// ---------------------------------------------------------------------------
// RecordStore
// ---------------------------------------------------------------------------

/// 保存済みフォームレコード
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    /// レコードID
    pub id: i64,
    /// フォーム名
    pub form_name: String,
    /// 登録ユーザー
    pub user_id: String,
    /// 登録時刻
    pub created_at: DateTime<Utc>,
    /// 検証済みデータ（JSON）
    pub data: serde_json::Value,
}

/// 検証済みレコードのRepository trait
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// 検証済みデータを保存してIDを返す
    async fn save_record(
        &self,
        form_name: &str,
        user_id: &str,
        cleaned_data: &BTreeMap<String, FieldValue>,
    ) -> EdcResult<i64>;

    /// IDでレコードを取得
    async fn get_record(&self, id: i64) -> EdcResult<Option<StoredRecord>>;

    /// 監査記録に失敗した保存を取り消す
    ///
    /// 監査エントリを伴わないレコードを残さないための補償操作。
    /// 存在しないIDは無視する。
    async fn discard_record(&self, id: i64) -> EdcResult<()>;
}
