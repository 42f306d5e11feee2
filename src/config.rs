/// 程序配置
///
/// 所有密钥、超时与预算都集中在这里，由构造方显式传入各组件，
/// 保证每个会话都可以独立配置、独立测试。
#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP 服务监听端口
    pub listen_port: u16,
    /// 学生密钥，入站请求必须携带一致的 secret
    pub student_secret: String,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    /// 并发 LLM 调用上限（进程级限流）
    pub oracle_concurrency: usize,
    /// 单步 LLM 调用重试次数
    pub oracle_retries: usize,
    // --- 浏览器配置 ---
    /// 浏览器可执行文件路径（不设置则使用系统默认）
    pub browser_executable: Option<String>,
    /// 页面静默等待超时（毫秒）
    pub quiescence_timeout_ms: u64,
    /// 页面提取重试次数
    pub extract_retries: usize,
    // --- 会话预算 ---
    /// 单个会话最多执行的步数
    pub max_steps: usize,
    /// 单个会话的墙钟时间预算（秒）
    pub session_budget_secs: u64,
    /// 整步重试次数（步级失败后）
    pub step_retries: usize,
    /// 连续停留在同一页面的步数上限（死循环保护）
    pub max_same_page_steps: usize,
    // --- 单步分析预算 ---
    /// 每步允许的代码执行回合数
    pub max_code_rounds: usize,
    /// 单次代码执行时限（秒）
    pub exec_timeout_secs: u64,
    // --- 文件下载 ---
    /// 单个文件的下载尝试次数
    pub download_attempts: usize,
    /// 压缩包嵌套解析深度上限
    pub max_archive_depth: usize,
    // --- 通用 ---
    /// 指数退避基准间隔（毫秒）
    pub backoff_base_ms: u64,
    /// 发给 LLM 的页面文本长度上限（字符）
    pub page_text_limit: usize,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 8000,
            student_secret: "default_secret_for_testing".to_string(),
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            oracle_concurrency: 4,
            oracle_retries: 3,
            browser_executable: None,
            quiescence_timeout_ms: 5000,
            extract_retries: 3,
            max_steps: 50,
            session_budget_secs: 600,
            step_retries: 3,
            max_same_page_steps: 3,
            max_code_rounds: 3,
            exec_timeout_secs: 30,
            download_attempts: 3,
            max_archive_depth: 3,
            backoff_base_ms: 200,
            page_text_limit: 6000,
            verbose_logging: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            listen_port: std::env::var("LISTEN_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.listen_port),
            student_secret: std::env::var("STUDENT_SECRET").unwrap_or(default.student_secret),
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            oracle_concurrency: std::env::var("ORACLE_CONCURRENCY").ok().and_then(|v| v.parse().ok()).unwrap_or(default.oracle_concurrency),
            oracle_retries: std::env::var("ORACLE_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(default.oracle_retries),
            browser_executable: std::env::var("BROWSER_EXECUTABLE").ok(),
            quiescence_timeout_ms: std::env::var("QUIESCENCE_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.quiescence_timeout_ms),
            extract_retries: std::env::var("EXTRACT_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(default.extract_retries),
            max_steps: std::env::var("MAX_STEPS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_steps),
            session_budget_secs: std::env::var("SESSION_BUDGET_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.session_budget_secs),
            step_retries: std::env::var("STEP_RETRIES").ok().and_then(|v| v.parse().ok()).unwrap_or(default.step_retries),
            max_same_page_steps: std::env::var("MAX_SAME_PAGE_STEPS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_same_page_steps),
            max_code_rounds: std::env::var("MAX_CODE_ROUNDS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_code_rounds),
            exec_timeout_secs: std::env::var("EXEC_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.exec_timeout_secs),
            download_attempts: std::env::var("DOWNLOAD_ATTEMPTS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.download_attempts),
            max_archive_depth: std::env::var("MAX_ARCHIVE_DEPTH").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_archive_depth),
            backoff_base_ms: std::env::var("BACKOFF_BASE_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.backoff_base_ms),
            page_text_limit: std::env::var("PAGE_TEXT_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(default.page_text_limit),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
        }
    }
}
