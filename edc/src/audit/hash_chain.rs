//! SHA-256ハッシュチェーン
//!
//! 各エントリは直前エントリの `record_hash` を `previous_hash` として持つ。
//! ハッシュの入力は以下の正規化エンコーディングで、バージョン間で不変とする:
//!
//! ```text
//! "edc-audit-v1"
//! || field(sequence_number)        10進数
//! || field(timestamp)              RFC 3339, UTC, "Z", 小数6桁
//! || field(user_id) || field(action) || field(resource) || field(status)
//! || 0x00                          detail なし
//!  | 0x01 || field(detail)         detail あり
//! || field(previous_hash)
//!
//! field(x) = u64 big-endian のバイト長 || x の UTF-8 バイト列
//! ```
//!
//! `record_hash` は上記バイト列の SHA-256 を小文字16進で表したもの。

use crate::audit::types::{AuditEntry, NewAuditEvent};
use crate::common::error::IntegrityViolation;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::warn;

/// 先頭エントリのprevious_hash（ゼロハッシュ）
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// 正規化エンコーディングのドメインタグ
pub const DOMAIN_TAG: &[u8] = b"edc-audit-v1";

/// ハッシュ入力・保存に使うタイムスタンプ表現
pub fn canonical_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// 保存表現と一致するようマイクロ秒に切り捨てる
pub fn truncate_timestamp(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(6)
}

fn write_field(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u64).to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
}

/// ハッシュ対象の正規化バイト列
pub fn canonical_encoding(entry: &AuditEntry) -> Vec<u8> {
    let mut buf = Vec::with_capacity(256);
    buf.extend_from_slice(DOMAIN_TAG);
    write_field(&mut buf, &entry.sequence_number.to_string());
    write_field(&mut buf, &canonical_timestamp(&entry.timestamp));
    write_field(&mut buf, &entry.user_id);
    write_field(&mut buf, &entry.action);
    write_field(&mut buf, &entry.resource);
    write_field(&mut buf, entry.status.as_str());
    match &entry.detail {
        None => buf.push(0x00),
        Some(detail) => {
            buf.push(0x01);
            write_field(&mut buf, detail);
        }
    }
    write_field(&mut buf, &entry.previous_hash);
    buf
}

/// エントリのハッシュを計算（保存済みの record_hash は無視する）
pub fn compute_record_hash(entry: &AuditEntry) -> String {
    hex::encode(Sha256::digest(canonical_encoding(entry)))
}

/// 連番・時刻・直前ハッシュを確定させてエントリを封印する
pub fn seal(
    sequence_number: i64,
    timestamp: DateTime<Utc>,
    event: &NewAuditEvent,
    previous_hash: &str,
) -> AuditEntry {
    let mut entry = AuditEntry {
        sequence_number,
        timestamp: truncate_timestamp(timestamp),
        user_id: event.user_id.clone(),
        action: event.action.clone(),
        resource: event.resource.clone(),
        status: event.status.clone(),
        detail: event.detail.clone(),
        record_hash: String::new(),
        previous_hash: previous_hash.to_string(),
    };
    entry.record_hash = compute_record_hash(&entry);
    entry
}

/// チェーン破損の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakReason {
    /// 先頭エントリのprevious_hashがジェネシスハッシュでない
    GenesisMismatch,
    /// 保存されたrecord_hashが再計算値と一致しない
    HashMismatch,
    /// previous_hashが直前エントリの再計算ハッシュと一致しない
    LinkMismatch,
    /// 連番が1ずつ増加していない
    SequenceGap,
}

impl fmt::Display for BreakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GenesisMismatch => "first entry does not chain from the genesis hash",
            Self::HashMismatch => "stored record_hash does not match recomputed hash",
            Self::LinkMismatch => "previous_hash does not match the preceding entry",
            Self::SequenceGap => "sequence numbers are not contiguous",
        })
    }
}

/// チェーン検証結果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    /// 検証が成功したか
    pub ok: bool,
    /// 最初に破損が検出された連番（該当する場合）
    pub first_break_sequence: Option<i64>,
    /// 検証したエントリ数（破損エントリを含む）
    pub entries_checked: u64,
    /// 破損の種類（該当する場合）
    pub reason: Option<BreakReason>,
}

impl VerificationResult {
    /// 破損していればIntegrityViolationを返す
    pub fn violation(&self) -> Option<IntegrityViolation> {
        match (self.first_break_sequence, self.reason) {
            (Some(sequence), Some(reason)) => Some(IntegrityViolation { sequence, reason }),
            _ => None,
        }
    }

    /// 成功ならOk、破損ならErr(IntegrityViolation)
    pub fn into_result(self) -> Result<Self, IntegrityViolation> {
        match self.violation() {
            Some(violation) => Err(violation),
            None => Ok(self),
        }
    }
}

/// 昇順に流れてくるエントリを逐次検証する
///
/// 直前エントリの比較には保存値ではなく再計算したハッシュを使うため、
/// 過去エントリの書き換えも検出できる。最初の破損で検証を打ち切る。
#[derive(Debug, Clone)]
pub struct ChainVerifier {
    expected_sequence: i64,
    previous_hash: String,
    checked: u64,
    broken: Option<(i64, BreakReason)>,
}

impl Default for ChainVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainVerifier {
    /// 空のチェーンから検証を開始
    pub fn new() -> Self {
        Self {
            expected_sequence: 1,
            previous_hash: GENESIS_HASH.to_string(),
            checked: 0,
            broken: None,
        }
    }

    /// 次のエントリを検証する。破損を検出済みならfalseを返し、以降は無視する。
    pub fn push(&mut self, entry: &AuditEntry) -> bool {
        if self.broken.is_some() {
            return false;
        }
        self.checked += 1;
        let position = self.expected_sequence;

        let reason = if entry.sequence_number != position {
            Some(BreakReason::SequenceGap)
        } else if entry.previous_hash != self.previous_hash {
            Some(if position == 1 {
                BreakReason::GenesisMismatch
            } else {
                BreakReason::LinkMismatch
            })
        } else {
            let recomputed = compute_record_hash(entry);
            if recomputed != entry.record_hash {
                Some(BreakReason::HashMismatch)
            } else {
                self.previous_hash = recomputed;
                None
            }
        };

        match reason {
            Some(reason) => {
                warn!(
                    sequence = position,
                    stored_sequence = entry.sequence_number,
                    %reason,
                    "Audit hash chain broken"
                );
                self.broken = Some((position, reason));
                false
            }
            None => {
                self.expected_sequence += 1;
                true
            }
        }
    }

    /// 破損を検出済みか
    pub fn is_broken(&self) -> bool {
        self.broken.is_some()
    }

    /// 検証結果を返す
    pub fn finish(self) -> VerificationResult {
        VerificationResult {
            ok: self.broken.is_none(),
            first_break_sequence: self.broken.map(|(seq, _)| seq),
            entries_checked: self.checked,
            reason: self.broken.map(|(_, reason)| reason),
        }
    }
}

/// メモリ上のエントリ列（昇順）を検証する
pub fn verify_entries(entries: &[AuditEntry]) -> VerificationResult {
    let mut verifier = ChainVerifier::new();
    for entry in entries {
        if !verifier.push(entry) {
            break;
        }
    }
    verifier.finish()
}
