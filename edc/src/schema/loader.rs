//! フォーム定義の読み込み
//!
//! 外部の宣言的ソース（フィールド定義表 CSV / JSON / YAML）を
//! [`FormSchema`] に変換する。構造エラーは読み込み時に [`SchemaError`] として返す。
//!
//! CSV のヘッダ列:
//!
//! | 列 | 内容 |
//! |---|---|
//! | `name` | フィールド名（必須） |
//! | `kind` / `type` | フィールド種別（必須） |
//! | `required` | `true/false/yes/no/y/n/1/0` |
//! | `min`, `max` | 範囲（数値または日付） |
//! | `choices` | `|` 区切りの選択肢 |
//! | `condition` | 表示条件式 |
//! | `validity_expression` | 相関チェック式 |
//! | `error_message` | 相関チェック失敗時のメッセージ |
//! | `label` | 表示ラベル |

use super::types::{BoundValue, FieldKind, FieldSpec, FormDefinition, FormSchema};
use crate::common::error::SchemaError;
use csv::StringRecord;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// 選択肢セルの区切り文字
pub const CHOICE_SEPARATOR: char = '|';

/// CSV のフィールド定義表から読み込む
pub fn load_csv<R: Read>(name: &str, reader: R) -> Result<FormSchema, SchemaError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(reader);

    let columns = Columns::from_headers(csv_reader.headers()?)?;

    let mut fields = Vec::new();
    for row in csv_reader.records() {
        let row = row?;
        if row.iter().all(str::is_empty) {
            continue;
        }
        fields.push(columns.field_spec(&row)?);
    }

    debug!(form = name, fields = fields.len(), "Parsed field-definition table");
    FormSchema::new(name, fields)
}

/// JSON（`{"name": ..., "fields": [...]}`）から読み込む
pub fn load_json<R: Read>(reader: R) -> Result<FormSchema, SchemaError> {
    let definition: FormDefinition = serde_json::from_reader(reader)?;
    FormSchema::from_definition(definition)
}

/// YAML（JSON と同じ構造）から読み込む
pub fn load_yaml<R: Read>(reader: R) -> Result<FormSchema, SchemaError> {
    let definition: FormDefinition = serde_yaml::from_reader(reader)?;
    FormSchema::from_definition(definition)
}

/// 拡張子に応じて読み込む
///
/// CSV の場合、フォーム名はファイル名（拡張子なし）になる。
pub fn load_path(path: impl AsRef<Path>) -> Result<FormSchema, SchemaError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let file = std::fs::File::open(path)?;
    let schema = match extension.as_str() {
        "csv" => {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("form")
                .to_string();
            load_csv(&name, file)?
        }
        "json" => load_json(file)?,
        "yaml" | "yml" => load_yaml(file)?,
        _ => return Err(SchemaError::UnsupportedFormat(path.display().to_string())),
    };

    info!(
        form = schema.name(),
        fields = schema.len(),
        path = %path.display(),
        "Loaded form schema"
    );
    Ok(schema)
}

struct Columns {
    index: HashMap<String, usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Result<Self, SchemaError> {
        let index: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_ascii_lowercase(), i))
            .collect();
        let columns = Self { index };
        if columns.position("name").is_none() {
            return Err(missing_column("name"));
        }
        if columns.kind_position().is_none() {
            return Err(missing_column("kind"));
        }
        Ok(columns)
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    fn kind_position(&self) -> Option<usize> {
        self.position("kind").or_else(|| self.position("type"))
    }

    fn cell<'r>(&self, row: &'r StringRecord, column: &str) -> Option<&'r str> {
        self.position(column)
            .and_then(|i| row.get(i))
            .filter(|s| !s.is_empty())
    }

    fn field_spec(&self, row: &StringRecord) -> Result<FieldSpec, SchemaError> {
        let name = self.cell(row, "name").unwrap_or_default().to_string();
        let kind_text = self
            .kind_position()
            .and_then(|i| row.get(i))
            .unwrap_or_default();
        let kind = FieldKind::parse(kind_text).ok_or_else(|| SchemaError::UnknownKind {
            field: name.clone(),
            kind: kind_text.to_string(),
        })?;

        let mut spec = FieldSpec::new(name.clone(), kind);
        if let Some(raw) = self.cell(row, "required") {
            spec.required = parse_flag(raw).ok_or_else(|| SchemaError::InvalidColumn {
                field: name.clone(),
                column: "required".to_string(),
                value: raw.to_string(),
            })?;
        }
        spec.min = self.cell(row, "min").map(BoundValue::from);
        spec.max = self.cell(row, "max").map(BoundValue::from);
        if let Some(raw) = self.cell(row, "choices") {
            spec.choices = raw
                .split(CHOICE_SEPARATOR)
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
        }
        spec.condition = self.cell(row, "condition").map(str::to_string);
        spec.validity_expression = self.cell(row, "validity_expression").map(str::to_string);
        spec.error_message = self.cell(row, "error_message").map(str::to_string);
        spec.label = self.cell(row, "label").map(str::to_string);
        Ok(spec)
    }
}

fn missing_column(column: &str) -> SchemaError {
    SchemaError::InvalidColumn {
        field: "<header>".to_string(),
        column: column.to_string(),
        value: "missing".to_string(),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}
