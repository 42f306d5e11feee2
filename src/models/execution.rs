//! 沙盒执行结果模型

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// 一次沙盒执行的结果
///
/// 生命周期只有一个决策回合：喂回给 LLM 后随步骤一起丢弃。
/// 片段抛出的异常体现在 `error` 字段里，永远不会以 Err 形式
/// 传播到步骤协调器。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// 是否执行成功
    pub success: bool,
    /// 片段返回的命名值集合
    pub values: Map<String, JsonValue>,
    /// 捕获的控制台输出
    pub output: String,
    /// 失败详情（异常消息或超时说明）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// 构造失败结果
    pub fn failed(error: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            success: false,
            values: Map::new(),
            output: output.into(),
            error: Some(error.into()),
        }
    }
}
