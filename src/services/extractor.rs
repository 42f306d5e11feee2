//! 页面提取 - 业务能力层
//!
//! 只负责"把当前页面变成一份结构化快照"，不关心流程。
//! 提取前等待页面静默；locator 在注入的 JS 里规范化
//! （优先 #id，否则 nth-of-type 结构路径），保证提交阶段
//! 还能定位到同一批元素。

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::error::Result;
use crate::infrastructure::BrowserDriver;
use crate::models::{FileKind, FileRef, PageElement, PageSnapshot};

/// DOM 遍历脚本
///
/// 返回 { text, elements: [{locator, kind, value}], links: [href] }
const SNAPSHOT_JS: &str = r#"
(() => {
    const cssPath = (el) => {
        if (el.id) return '#' + CSS.escape(el.id);
        const parts = [];
        let node = el;
        while (node && node.nodeType === 1 && node.tagName !== 'HTML') {
            let idx = 1;
            let sib = node.previousElementSibling;
            while (sib) {
                if (sib.tagName === node.tagName) idx += 1;
                sib = sib.previousElementSibling;
            }
            parts.unshift(node.tagName.toLowerCase() + ':nth-of-type(' + idx + ')');
            node = node.parentElement;
        }
        return parts.join(' > ');
    };
    const kindOf = (el) => {
        const tag = el.tagName.toLowerCase();
        if (tag === 'textarea') return 'text_area';
        if (tag === 'select') return 'select';
        if (tag === 'a') return 'link';
        if (tag === 'button') return (!el.type || el.type === 'submit') ? 'submit_button' : 'button';
        if (tag === 'input') {
            const type = (el.type || 'text').toLowerCase();
            if (type === 'submit') return 'submit_button';
            if (type === 'button') return 'button';
            if (type === 'checkbox') return 'checkbox';
            if (type === 'radio') return 'radio';
            if (type === 'hidden') return 'other';
            return 'text_input';
        }
        return 'other';
    };
    const valueOf = (el) => {
        const tag = el.tagName.toLowerCase();
        if (tag === 'a') return el.href || '';
        if (el.type === 'checkbox' || el.type === 'radio') return el.checked ? 'true' : 'false';
        if (el.value !== undefined && el.value !== null) return String(el.value);
        return (el.textContent || '').trim().slice(0, 200);
    };
    const elements = [];
    const links = [];
    document.querySelectorAll('input, textarea, select, button, a[href]').forEach((el) => {
        const kind = kindOf(el);
        if (kind === 'link') links.push(el.href);
        elements.push({ locator: cssPath(el), kind: kind, value: valueOf(el) });
    });
    return {
        text: document.body ? document.body.innerText : '',
        elements: elements,
        links: links,
    };
})()
"#;

/// 注入脚本的原始返回
#[derive(Debug, Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    text: String,
    #[serde(default)]
    elements: Vec<PageElement>,
    #[serde(default)]
    links: Vec<String>,
}

/// 页面提取器
pub struct PageExtractor {
    quiescence_timeout: Duration,
}

impl PageExtractor {
    pub fn new(config: &Config) -> Self {
        Self {
            quiescence_timeout: Duration::from_millis(config.quiescence_timeout_ms),
        }
    }

    /// 提取当前页面的快照
    ///
    /// 静默等待超时会以 `ExtractionTimeout` 上报，由调用方决定重试
    pub async fn extract(&self, driver: &dyn BrowserDriver) -> Result<PageSnapshot> {
        driver.wait_for_quiescence(self.quiescence_timeout).await?;

        let url = driver.current_url().await?;
        let raw: RawSnapshot = serde_json::from_value(driver.eval(SNAPSHOT_JS).await?)?;
        let file_refs = detect_file_refs(&raw.text, &raw.links);

        debug!(
            "快照提取完成: {} 个元素, {} 个文件引用, 文本 {} 字符",
            raw.elements.len(),
            file_refs.len(),
            raw.text.chars().count()
        );

        Ok(PageSnapshot {
            url,
            text: raw.text,
            elements: raw.elements,
            file_refs,
        })
    }
}

fn url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s"'<>]+"#).expect("URL 正则非法"))
}

/// 从链接和正文里找出数据文件引用，按出现顺序去重
fn detect_file_refs(text: &str, links: &[String]) -> Vec<FileRef> {
    let candidates = links
        .iter()
        .map(String::as_str)
        .chain(url_pattern().find_iter(text).map(|m| m.as_str()));

    let mut seen = HashSet::new();
    let mut refs = Vec::new();
    for raw in candidates {
        let url = raw.trim_end_matches(['.', ',', ';', ')', ']', '。', '，']);
        if let Some(kind) = FileKind::from_url(url) {
            if seen.insert(url.to_string()) {
                refs.push(FileRef {
                    url: url.to_string(),
                    kind,
                });
            }
        }
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_file_refs_from_links_and_text() {
        let text = "请下载 http://quiz.local/files/sales.csv 并计算总和。\n\
                    备份在 http://quiz.local/files/sales.tar.gz。";
        let links = vec![
            "http://quiz.local/files/sales.csv".to_string(),
            "http://quiz.local/about.html".to_string(),
        ];
        let refs = detect_file_refs(text, &links);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].url, "http://quiz.local/files/sales.csv");
        assert_eq!(refs[0].kind, FileKind::Csv);
        assert_eq!(refs[1].url, "http://quiz.local/files/sales.tar.gz");
        assert_eq!(refs[1].kind, FileKind::Gzip);
    }

    #[test]
    fn test_detect_file_refs_strips_trailing_punctuation() {
        let refs = detect_file_refs("数据见 http://quiz.local/d.json。", &[]);
        let refs_en = detect_file_refs("see http://quiz.local/d.json.", &[]);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].url, "http://quiz.local/d.json");
        assert_eq!(refs_en.len(), 1);
        assert_eq!(refs_en[0].url, "http://quiz.local/d.json");
    }
}
