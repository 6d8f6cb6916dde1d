//! 監査ログのエクスポート
//!
//! 書き出したバイト列の SHA-256 チェックサムを返し、受け取った側が
//! ファイルの完全性を確認できるようにする。

use crate::audit::hash_chain::canonical_timestamp;
use crate::audit::types::AuditEntry;
use crate::common::error::{EdcError, EdcResult};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::{self, Write};

/// エクスポート形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// CSV（ヘッダ付き）
    Csv,
    /// JSON配列
    Json,
}

/// エクスポート結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    /// 書き出した形式
    pub format: ExportFormat,
    /// 書き出したエントリ数
    pub entries: usize,
    /// 書き出したバイト数
    pub bytes: u64,
    /// 書き出したバイト列のSHA-256（小文字16進）
    pub sha256: String,
}

/// CSVの列（エントリのフィールド順）
///
/// CSVでは空文字列と欠損を区別できないため、`has_detail` 列で `detail` の
/// 有無を表す。record_hash はこの区別を含むので、CSVから再計算できる。
pub const CSV_HEADER: [&str; 10] = [
    "sequence_number",
    "timestamp",
    "user_id",
    "action",
    "resource",
    "status",
    "detail",
    "has_detail",
    "record_hash",
    "previous_hash",
];

/// 書き込みと同時にハッシュを計算するライター
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    fn finish(mut self) -> io::Result<(u64, String)> {
        self.inner.flush()?;
        Ok((self.bytes, hex::encode(self.hasher.finalize())))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.bytes += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// エントリをCSVで書き出す
pub fn export_csv<W: Write>(entries: &[AuditEntry], writer: W) -> EdcResult<ExportSummary> {
    let mut csv_writer = csv::Writer::from_writer(HashingWriter::new(writer));
    csv_writer
        .write_record(CSV_HEADER)
        .map_err(|e| EdcError::Internal(format!("Failed to write CSV header: {}", e)))?;

    for entry in entries {
        csv_writer
            .write_record([
                entry.sequence_number.to_string(),
                canonical_timestamp(&entry.timestamp),
                entry.user_id.clone(),
                entry.action.clone(),
                entry.resource.clone(),
                entry.status.as_str().to_string(),
                entry.detail.clone().unwrap_or_default(),
                entry.detail.is_some().to_string(),
                entry.record_hash.clone(),
                entry.previous_hash.clone(),
            ])
            .map_err(|e| {
                EdcError::Internal(format!(
                    "Failed to write audit entry {}: {}",
                    entry.sequence_number, e
                ))
            })?;
    }

    let hashing = csv_writer
        .into_inner()
        .map_err(|e| EdcError::Internal(format!("Failed to flush CSV export: {}", e)))?;
    let (bytes, sha256) = hashing.finish().map_err(crate::common::error::CommonError::from)?;

    Ok(ExportSummary {
        format: ExportFormat::Csv,
        entries: entries.len(),
        bytes,
        sha256,
    })
}

/// エントリをJSON配列で書き出す
pub fn export_json<W: Write>(entries: &[AuditEntry], writer: W) -> EdcResult<ExportSummary> {
    let mut hashing = HashingWriter::new(writer);
    serde_json::to_writer_pretty(&mut hashing, entries)
        .map_err(crate::common::error::CommonError::from)?;
    let (bytes, sha256) = hashing.finish().map_err(crate::common::error::CommonError::from)?;

    Ok(ExportSummary {
        format: ExportFormat::Json,
        entries: entries.len(),
        bytes,
        sha256,
    })
}

/// 指定形式で書き出す
pub fn export<W: Write>(
    format: ExportFormat,
    entries: &[AuditEntry],
    writer: W,
) -> EdcResult<ExportSummary> {
    match format {
        ExportFormat::Csv => export_csv(entries, writer),
        ExportFormat::Json => export_json(entries, writer),
    }
}
