//! 决策服务 - 业务能力层
//!
//! 把"当前页面 + 本步的执行历史"交给 LLM，换回一个结构化决策。
//! LLM 是外部不可信源：响应必须通过 `Decision::parse` 的严格
//! 校验，不可用或不合模式都按决策失败处理，带退避重试。
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务（自定义端点与模型）

use std::sync::Arc;
use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::models::{Decision, ExecutionResult, PageSnapshot};
use crate::utils::truncate_text;

/// 一个代码回合：执行过的片段与其结果
#[derive(Debug, Clone)]
pub struct CodeRound {
    pub code: String,
    pub result: ExecutionResult,
}

/// 一轮决策的输入
pub struct OracleContext<'a> {
    /// 学生邮箱（页面可能要求填写；密钥永远不进入上下文）
    pub student_email: &'a str,
    pub snapshot: &'a PageSnapshot,
    /// 本步已经完成的代码回合，按时间顺序
    pub rounds: &'a [CodeRound],
}

/// 决策能力
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(&self, ctx: &OracleContext<'_>) -> Result<Decision>;
}

const SYSTEM_PROMPT: &str = r#"You are an autonomous agent solving a web-hosted data-analysis quiz.
You will be given the visible text of the current quiz page, its interactive
elements (with CSS locators) and any data-file references found on it.

Decide the next action and respond with EXACTLY ONE JSON object, nothing else:

{"action":"answer","value":<the answer>,"locator":"<css locator of the input, optional>"}
  Submit the answer into the page's input element.

{"action":"run_code","code":"<javascript>","file_url":"<data file url, optional>","best_answer":<optional fallback>}
  Run JavaScript in a sandbox to analyze data. If file_url is given, the
  downloaded file is available as the constant `data`:
  tables as {kind:"table",headers:[...],rows:[[...]]}, JSON as
  {kind:"json",value:...}, text as {kind:"text",text:"..."}, archives as
  {kind:"archive",entries:[...]}. Return a value with `return`; use
  console.log for diagnostics. You have a limited number of code rounds per
  step, so include best_answer whenever you already have a defensible guess.

{"action":"navigate","url":"<absolute url>"}
  Navigate directly, e.g. to the next quiz page when no submission is needed.

Never invent file URLs or locators that were not listed."#;

/// 基于 LLM 的决策服务
///
/// 职责：
/// - 调用 LLM API 获取下一步决策
/// - 严格解析响应
/// - 只处理单轮决策，不出现步骤编号，不关心流程顺序
pub struct LlmOracle {
    client: Client<OpenAIConfig>,
    model_name: String,
    attempts: usize,
    backoff_base: Duration,
    page_text_limit: usize,
    /// 进程级并发限流（所有会话共享）
    throttle: Arc<Semaphore>,
}

impl LlmOracle {
    pub fn new(config: &Config, throttle: Arc<Semaphore>) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            attempts: config.oracle_retries.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            page_text_limit: config.page_text_limit,
            throttle,
        }
    }

    /// 构建用户消息
    fn build_user_message(&self, ctx: &OracleContext<'_>) -> String {
        let snapshot = ctx.snapshot;

        let elements_json = serde_json::to_string_pretty(&snapshot.elements).unwrap_or_default();
        let file_refs = if snapshot.file_refs.is_empty() {
            "（无）".to_string()
        } else {
            snapshot
                .file_refs
                .iter()
                .map(|f| format!("  - {} ({:?})", f.url, f.kind))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let mut message = format!(
            "Student email: {}\nCurrent URL: {}\n\nPage text:\n{}\n\nInteractive elements:\n{}\n\nData file references:\n{}\n",
            ctx.student_email,
            snapshot.url,
            truncate_text(&snapshot.text, self.page_text_limit),
            elements_json,
            file_refs,
        );

        for (i, round) in ctx.rounds.iter().enumerate() {
            let result = &round.result;
            let summary = if result.success {
                format!(
                    "values: {}\noutput: {}",
                    serde_json::to_string(&result.values).unwrap_or_default(),
                    truncate_text(&result.output, 2000),
                )
            } else {
                format!(
                    "FAILED: {}\noutput: {}",
                    result.error.as_deref().unwrap_or("unknown"),
                    truncate_text(&result.output, 2000),
                )
            };
            message.push_str(&format!(
                "\nCode round {}:\n```js\n{}\n```\nResult:\n{}\n",
                i + 1,
                truncate_text(&round.code, 2000),
                summary,
            ));
        }

        message.push_str("\nWhat should I do next? Respond with one JSON object.");
        message
    }

    /// 单次 LLM 调用
    async fn call_llm(&self, user_message: &str) -> Result<String> {
        debug!("调用 LLM API，模型: {}", self.model_name);

        // 进程级限流：不同会话的调用在这里排队
        let _permit = self
            .throttle
            .acquire()
            .await
            .map_err(|e| AgentError::DecisionFailure(format!("限流器已关闭: {}", e)))?;

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_PROMPT)
            .build()
            .map_err(|e| AgentError::DecisionFailure(e.to_string()))?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()
            .map_err(|e| AgentError::DecisionFailure(e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(0.2)
            .max_tokens(2048u32)
            .build()
            .map_err(|e| AgentError::DecisionFailure(e.to_string()))?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            AgentError::DecisionFailure(format!("LLM API 调用失败: {}", e))
        })?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AgentError::DecisionFailure("LLM 返回内容为空".to_string()))?;

        Ok(content.trim().to_string())
    }
}

#[async_trait]
impl DecisionOracle for LlmOracle {
    async fn decide(&self, ctx: &OracleContext<'_>) -> Result<Decision> {
        let user_message = self.build_user_message(ctx);

        let mut last_err = None;
        for attempt in 1..=self.attempts {
            match self.call_llm(&user_message).await {
                Ok(content) => match Decision::parse(&content) {
                    Ok(decision) => {
                        debug!("LLM 决策: {}", decision.kind());
                        return Ok(decision);
                    }
                    Err(e) => {
                        warn!("决策解析失败 (第 {}/{} 次): {}", attempt, self.attempts, e);
                        last_err = Some(e);
                    }
                },
                Err(e) => {
                    warn!("决策请求失败 (第 {}/{} 次): {}", attempt, self.attempts, e);
                    last_err = Some(e);
                }
            }
            if attempt < self.attempts {
                sleep(self.backoff_base * (1u32 << (attempt - 1).min(16))).await;
            }
        }

        Err(last_err
            .unwrap_or_else(|| AgentError::DecisionFailure("决策尝试次数为 0".to_string())))
    }
}
