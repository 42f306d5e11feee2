//! 决策模型
//!
//! LLM 的自由文本响应是不可信的外部输入，必须先通过严格的
//! 标签变体模式校验再使用；校验失败一律映射为决策失败，
//! 绝不静默兜底。

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{AgentError, Result};
use crate::utils::truncate_text;

/// 一轮决策的产物，每轮恰好消费一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Decision {
    /// 提交答案
    Answer {
        value: JsonValue,
        /// 目标输入元素的 locator，缺省时由协调器选择
        #[serde(default, skip_serializing_if = "Option::is_none")]
        locator: Option<String>,
    },
    /// 在沙盒中执行代码分析数据
    RunCode {
        code: String,
        /// 需要下载并绑定为 `data` 的文件 URL
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_url: Option<String>,
        /// 回合耗尽时的兜底答案
        #[serde(default, skip_serializing_if = "Option::is_none")]
        best_answer: Option<JsonValue>,
    },
    /// 直接导航
    Navigate { url: String },
}

impl Decision {
    /// 决策类型名（用于日志）
    pub fn kind(&self) -> &'static str {
        match self {
            Decision::Answer { .. } => "answer",
            Decision::RunCode { .. } => "run_code",
            Decision::Navigate { .. } => "navigate",
        }
    }

    /// 从 LLM 原始响应解析决策
    ///
    /// 容忍 Markdown 代码围栏等传输层包装，但 JSON 结构本身
    /// 必须严格匹配模式
    pub fn parse(raw: &str) -> Result<Decision> {
        let body = strip_code_fence(raw);
        let json = extract_json_object(body).ok_or_else(|| {
            AgentError::DecisionFailure(format!(
                "响应中不包含 JSON 对象: {}",
                truncate_text(raw, 200)
            ))
        })?;
        serde_json::from_str::<Decision>(json).map_err(|e| {
            AgentError::DecisionFailure(format!(
                "决策 JSON 不符合模式: {} (响应: {})",
                e,
                truncate_text(json, 200)
            ))
        })
    }
}

/// 去掉 ```json ... ``` 围栏
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let inner = match trimmed.find('\n') {
        Some(pos) => &trimmed[pos + 1..],
        None => return trimmed,
    };
    inner.rsplit_once("```").map(|(body, _)| body).unwrap_or(inner).trim()
}

/// 截取第一个 '{' 到最后一个 '}' 之间的内容
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
