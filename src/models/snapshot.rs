//! 页面快照模型
//!
//! 每步提取一次，提取后只读，步骤结束即丢弃。

use phf::phf_map;
use serde::{Deserialize, Serialize};

/// 可交互元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    TextInput,
    TextArea,
    Select,
    Checkbox,
    Radio,
    SubmitButton,
    Button,
    Link,
    #[serde(other)]
    Other,
}

impl ElementKind {
    /// 是否可以写入答案
    pub fn is_editable(self) -> bool {
        matches!(
            self,
            ElementKind::TextInput
                | ElementKind::TextArea
                | ElementKind::Select
                | ElementKind::Checkbox
                | ElementKind::Radio
        )
    }
}

/// 页面上的一个可交互元素
///
/// locator 已经规范化（优先 #id，否则 nth-of-type 结构路径），
/// 同一页面内可在提取后重复用于定位。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageElement {
    pub locator: String,
    pub kind: ElementKind,
    #[serde(default)]
    pub value: String,
}

/// 数据文件类型（按扩展名或 Content-Type 推断）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Csv,
    Json,
    Text,
    Gzip,
    Tar,
    Opaque,
}

/// 扩展名到文件类型的静态映射
static EXTENSION_KINDS: phf::Map<&'static str, FileKind> = phf_map! {
    "csv" => FileKind::Csv,
    "tsv" => FileKind::Csv,
    "json" => FileKind::Json,
    "txt" => FileKind::Text,
    "md" => FileKind::Text,
    "log" => FileKind::Text,
    "gz" => FileKind::Gzip,
    "tgz" => FileKind::Gzip,
    "tar" => FileKind::Tar,
    "zip" => FileKind::Opaque,
    "xlsx" => FileKind::Opaque,
    "xls" => FileKind::Opaque,
    "parquet" => FileKind::Opaque,
    "pdf" => FileKind::Opaque,
    "dat" => FileKind::Opaque,
};

impl FileKind {
    /// 从 URL 的扩展名推断类型
    ///
    /// 扩展名不在已知表中时返回 None（不是数据文件引用）
    pub fn from_url(url: &str) -> Option<FileKind> {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let name = path.rsplit('/').next().unwrap_or(path);
        let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
        EXTENSION_KINDS.get(ext.as_str()).copied()
    }

    /// 从 HTTP Content-Type 推断类型
    pub fn from_content_type(content_type: &str) -> FileKind {
        let ct = content_type.to_ascii_lowercase();
        if ct.contains("csv") {
            FileKind::Csv
        } else if ct.contains("json") {
            FileKind::Json
        } else if ct.contains("gzip") {
            FileKind::Gzip
        } else if ct.contains("x-tar") {
            FileKind::Tar
        } else if ct.starts_with("text/") {
            FileKind::Text
        } else {
            FileKind::Opaque
        }
    }
}

/// 页面中检测到的数据文件引用
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub url: String,
    pub kind: FileKind,
}

/// 一步的页面快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSnapshot {
    /// 提取时的页面 URL
    pub url: String,
    /// 渲染后的可见文本
    pub text: String,
    /// 可交互元素，按文档顺序
    pub elements: Vec<PageElement>,
    /// 检测到的数据文件引用
    pub file_refs: Vec<FileRef>,
}

impl PageSnapshot {
    /// 按 locator 查找元素
    pub fn find_element(&self, locator: &str) -> Option<&PageElement> {
        self.elements.iter().find(|e| e.locator == locator)
    }

    /// 第一个可写入答案的元素
    pub fn first_editable(&self) -> Option<&PageElement> {
        self.elements.iter().find(|e| e.kind.is_editable())
    }

    /// 提交控件：优先 submit 按钮，其次普通按钮
    pub fn submit_control(&self) -> Option<&PageElement> {
        self.elements
            .iter()
            .find(|e| e.kind == ElementKind::SubmitButton)
            .or_else(|| self.elements.iter().find(|e| e.kind == ElementKind::Button))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_kind_from_url() {
        assert_eq!(FileKind::from_url("http://a/data.csv"), Some(FileKind::Csv));
        assert_eq!(
            FileKind::from_url("http://a/dump.json?v=2"),
            Some(FileKind::Json)
        );
        assert_eq!(
            FileKind::from_url("http://a/pack.tar.gz"),
            Some(FileKind::Gzip)
        );
        assert_eq!(
            FileKind::from_url("http://a/sheet.XLSX"),
            Some(FileKind::Opaque)
        );
        assert_eq!(FileKind::from_url("http://a/page"), None);
        assert_eq!(FileKind::from_url("http://a/page.html"), None);
    }

    #[test]
    fn test_file_kind_from_content_type() {
        assert_eq!(FileKind::from_content_type("text/csv"), FileKind::Csv);
        assert_eq!(
            FileKind::from_content_type("application/json; charset=utf-8"),
            FileKind::Json
        );
        assert_eq!(
            FileKind::from_content_type("application/octet-stream"),
            FileKind::Opaque
        );
    }

    #[test]
    fn test_snapshot_targets() {
        let snapshot = PageSnapshot {
            url: "http://quiz.local/q/1".to_string(),
            text: String::new(),
            elements: vec![
                PageElement {
                    locator: "a:nth-of-type(1)".to_string(),
                    kind: ElementKind::Link,
                    value: "http://quiz.local/data.csv".to_string(),
                },
                PageElement {
                    locator: "#answer".to_string(),
                    kind: ElementKind::TextInput,
                    value: String::new(),
                },
                PageElement {
                    locator: "#submit".to_string(),
                    kind: ElementKind::SubmitButton,
                    value: String::new(),
                },
            ],
            file_refs: vec![],
        };
        assert_eq!(snapshot.first_editable().unwrap().locator, "#answer");
        assert_eq!(snapshot.submit_control().unwrap().locator, "#submit");
        assert!(snapshot.find_element("#answer").is_some());
        assert!(snapshot.find_element("#missing").is_none());
    }
}
