//! 下载文件模型
//!
//! 下载内容解析为结构化形式后进入会话级缓存，
//! 以内容哈希去重；会话结束时随暂存目录一起失效。

use std::path::PathBuf;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value as JsonValue};

/// 表格列类型（按整列取值推断）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Text,
}

/// 解析后的表格数据
#[derive(Debug, Clone)]
pub struct TableData {
    pub headers: Vec<String>,
    pub column_types: Vec<ColumnType>,
    /// 数据行，单元格保留原始文本
    pub rows: Vec<Vec<String>>,
}

impl TableData {
    /// 按列类型把单元格转成 JSON 值
    fn typed_cell(&self, col: usize, cell: &str) -> JsonValue {
        match self.column_types.get(col) {
            Some(ColumnType::Integer) => cell
                .trim()
                .parse::<i64>()
                .map(JsonValue::from)
                .unwrap_or_else(|_| json!(cell)),
            Some(ColumnType::Float) => cell
                .trim()
                .parse::<f64>()
                .map(JsonValue::from)
                .unwrap_or_else(|_| json!(cell)),
            _ => json!(cell),
        }
    }
}

/// 压缩包内的一个条目
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub content: FileContent,
}

/// 下载文件的结构化形式
#[derive(Debug, Clone)]
pub enum FileContent {
    /// 表格（CSV/TSV）
    Table(TableData),
    /// JSON 文档
    Json(JsonValue),
    /// 纯文本
    Text(String),
    /// 压缩包条目列表（递归解析，深度有界）
    Archive(Vec<ArchiveEntry>),
    /// 原始字节，不再解析
    Raw(Vec<u8>),
}

impl FileContent {
    /// 转成沙盒可见的 JSON 绑定
    pub fn to_binding(&self) -> JsonValue {
        match self {
            FileContent::Table(table) => {
                let rows: Vec<JsonValue> = table
                    .rows
                    .iter()
                    .map(|row| {
                        JsonValue::Array(
                            row.iter()
                                .enumerate()
                                .map(|(col, cell)| table.typed_cell(col, cell))
                                .collect(),
                        )
                    })
                    .collect();
                json!({
                    "kind": "table",
                    "headers": table.headers,
                    "rows": rows,
                })
            }
            FileContent::Json(value) => json!({ "kind": "json", "value": value }),
            FileContent::Text(text) => json!({ "kind": "text", "text": text }),
            FileContent::Archive(entries) => {
                let entries: Vec<JsonValue> = entries
                    .iter()
                    .map(|e| {
                        let mut binding = e.content.to_binding();
                        if let Some(obj) = binding.as_object_mut() {
                            obj.insert("name".to_string(), json!(e.name));
                        }
                        binding
                    })
                    .collect();
                json!({ "kind": "archive", "entries": entries })
            }
            FileContent::Raw(bytes) => json!({
                "kind": "raw",
                "size": bytes.len(),
                "base64": BASE64.encode(bytes),
            }),
        }
    }

    /// 内容的简短描述（用于日志与提示词）
    pub fn describe(&self) -> String {
        match self {
            FileContent::Table(t) => {
                format!("表格: {} 列 x {} 行", t.headers.len(), t.rows.len())
            }
            FileContent::Json(_) => "JSON 文档".to_string(),
            FileContent::Text(t) => format!("文本: {} 字符", t.chars().count()),
            FileContent::Archive(entries) => format!("压缩包: {} 个条目", entries.len()),
            FileContent::Raw(bytes) => format!("原始字节: {} B", bytes.len()),
        }
    }
}

/// 一个已下载并解析的文件
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    /// 来源 URL
    pub url: String,
    /// 内容 sha256（会话内去重键）
    pub hash: String,
    /// 暂存区里的本地副本
    pub local_path: PathBuf,
    /// 解析后的结构化形式
    pub content: FileContent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_binding_uses_column_types() {
        let table = TableData {
            headers: vec!["city".to_string(), "pop".to_string()],
            column_types: vec![ColumnType::Text, ColumnType::Integer],
            rows: vec![
                vec!["beijing".to_string(), "21893095".to_string()],
                vec!["shanghai".to_string(), "24870895".to_string()],
            ],
        };
        let binding = FileContent::Table(table).to_binding();
        assert_eq!(binding["kind"], "table");
        assert_eq!(binding["rows"][0][1], 21893095i64);
        assert_eq!(binding["rows"][1][0], "shanghai");
    }

    #[test]
    fn test_raw_binding_is_base64() {
        let binding = FileContent::Raw(vec![1, 2, 3]).to_binding();
        assert_eq!(binding["kind"], "raw");
        assert_eq!(binding["size"], 3);
        assert_eq!(binding["base64"], "AQID");
    }
}
