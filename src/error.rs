use thiserror::Error;

/// 应用程序结果类型
pub type Result<T> = std::result::Result<T, AgentError>;

/// 应用程序错误类型
///
/// 覆盖一次测验会话中所有可能出错的环节：
/// 页面提取、LLM 决策、文件下载解析、沙盒执行、答案提交、会话预算。
#[derive(Debug, Error)]
pub enum AgentError {
    /// 页面在限定时间内未达到静默状态
    #[error("页面提取超时: {timeout_ms}ms 内未达到静默状态")]
    ExtractionTimeout { timeout_ms: u64 },

    /// LLM 不可用或返回无法解析的决策
    #[error("决策失败: {0}")]
    DecisionFailure(String),

    /// 文件下载失败（重试耗尽后）
    #[error("文件下载失败 ({url}): {reason}")]
    DownloadFailed { url: String, reason: String },

    /// 声明的格式无法解析，不重试
    #[error("不支持的文件格式 ({url}): {detail}")]
    UnsupportedFormat { url: String, detail: String },

    /// 压缩包嵌套深度超限，仅该引用失败
    #[error("压缩包嵌套超过 {max_depth} 层 ({url})")]
    ArchiveDepthExceeded { url: String, max_depth: usize },

    /// 代码片段抛出异常
    #[error("代码执行出错: {0}")]
    ExecutionError(String),

    /// 代码片段超过单次执行时限
    #[error("代码执行超时: 超过 {timeout_ms}ms")]
    ExecutionTimeout { timeout_ms: u64 },

    /// 页面上找不到提交目标元素
    #[error("找不到提交目标元素: {locator}")]
    SubmissionTargetNotFound { locator: String },

    /// 会话级步数或时间预算耗尽，不重试
    #[error("会话预算耗尽: {0}")]
    SessionBudgetExceeded(String),

    /// 浏览器协议层错误
    #[error("浏览器错误: {0}")]
    Browser(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// IO 错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 解析失败
    #[error("JSON解析失败: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<chromiumoxide::error::CdpError> for AgentError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        AgentError::Browser(err.to_string())
    }
}
