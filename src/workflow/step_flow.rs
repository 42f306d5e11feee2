//! 单步处理流程 - 流程层
//!
//! 核心职责：定义"一步测验"的完整状态机
//!
//! 状态顺序：
//! 1. 提取（带重试）→ 2. 决策 → 3. 解析文件 ⇄ 执行代码（回合有界）
//! → 4. 提交 / 导航 → 5. 观察页面走向
//!
//! 步内任何不可恢复的失败都折叠成 failed 的 StepOutcome 返回，
//! 是否整步重试由编排层决定；本层绝不 panic、绝不向上抛错。

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde_json::Value as JsonValue;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::infrastructure::BrowserDriver;
use crate::models::{
    Decision, PageSnapshot, PageTransition, StepOutcome,
};
use crate::services::{
    CodeRound, CodeSandbox, DecisionOracle, FileResolver, OracleContext, PageExtractor,
};
use crate::workflow::step_ctx::StepCtx;

/// 测验终止页的文本特征
fn terminal_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)quiz (is )?(complete|completed|finished|over)|no more questions|all questions (are )?answered|you have (completed|finished)|congratulations",
        )
        .expect("终止页正则非法")
    })
}

/// 错误页的文本特征
fn error_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)internal server error|bad gateway|service unavailable|404 not found|page not found|403 forbidden",
        )
        .expect("错误页正则非法")
    })
}

/// 按提交前后的 URL 与页面文本给页面走向分类
fn classify_transition(prev_url: &str, url: &str, text: &str) -> PageTransition {
    if error_pattern().is_match(text) {
        PageTransition::ErrorPage
    } else if terminal_pattern().is_match(text) {
        PageTransition::QuizEnded
    } else if url != prev_url {
        PageTransition::Advanced
    } else {
        PageTransition::SamePage
    }
}

/// 单步处理流程
///
/// - 编排一步之内的完整状态机
/// - 不持有 Browser，只依赖能力（驱动 / 提取 / 决策 / 解析 / 沙盒）
/// - 不追加历史，不设终态（那是编排层的事）
pub struct StepFlow {
    driver: Arc<dyn BrowserDriver>,
    oracle: Arc<dyn DecisionOracle>,
    resolver: Arc<FileResolver>,
    sandbox: CodeSandbox,
    extractor: PageExtractor,
    extract_retries: usize,
    max_code_rounds: usize,
    backoff_base: Duration,
    quiescence_timeout: Duration,
}

impl StepFlow {
    pub fn new(
        config: &Config,
        driver: Arc<dyn BrowserDriver>,
        oracle: Arc<dyn DecisionOracle>,
        resolver: Arc<FileResolver>,
        sandbox: CodeSandbox,
    ) -> Self {
        Self {
            driver,
            oracle,
            resolver,
            sandbox,
            extractor: PageExtractor::new(config),
            extract_retries: config.extract_retries.max(1),
            max_code_rounds: config.max_code_rounds,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            quiescence_timeout: Duration::from_millis(config.quiescence_timeout_ms),
        }
    }

    /// 跑完一步
    pub async fn run(&self, ctx: &StepCtx) -> StepOutcome {
        // ========== 状态 1: 提取 ==========
        let snapshot = match self.extract_with_retry(ctx).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("{} ⚠️ 页面提取彻底失败: {}", ctx, e);
                return StepOutcome::failed(ctx.step_index, None, vec![], e.to_string());
            }
        };
        info!(
            "{} ✓ 快照提取完成: {} 个元素, {} 个文件引用",
            ctx,
            snapshot.elements.len(),
            snapshot.file_refs.len()
        );

        // ========== 状态 2: 决策 ==========
        let mut rounds: Vec<CodeRound> = Vec::new();
        let mut last_best: Option<JsonValue> = None;

        let mut decision = match self.decide(ctx, &snapshot, &rounds).await {
            Ok(d) => d,
            Err(e) => {
                return StepOutcome::failed(ctx.step_index, None, vec![], e.to_string());
            }
        };

        // ========== 状态 3: 解析 ⇄ 执行（回合有界）==========
        let final_decision = loop {
            match decision {
                Decision::RunCode {
                    code,
                    file_url,
                    best_answer,
                } => {
                    if let Some(best) = &best_answer {
                        last_best = Some(best.clone());
                    }

                    // 回合耗尽：用兜底答案降级，否则步骤失败
                    if rounds.len() >= self.max_code_rounds {
                        match last_best.take() {
                            Some(value) => {
                                warn!(
                                    "{} ⚠️ 代码回合已达上限 {}，降级使用兜底答案",
                                    ctx, self.max_code_rounds
                                );
                                decision = Decision::Answer {
                                    value,
                                    locator: None,
                                };
                                continue;
                            }
                            None => {
                                let e = AgentError::DecisionFailure(format!(
                                    "代码回合超过上限 {} 且没有兜底答案",
                                    self.max_code_rounds
                                ));
                                return StepOutcome::failed(
                                    ctx.step_index,
                                    None,
                                    rounds.into_iter().map(|r| r.result).collect(),
                                    e.to_string(),
                                );
                            }
                        }
                    }

                    info!(
                        "{} 🧪 执行代码回合 {}/{}",
                        ctx,
                        rounds.len() + 1,
                        self.max_code_rounds
                    );

                    // 先解析引用的数据文件（如有）
                    let mut bindings: Vec<(String, JsonValue)> = Vec::new();
                    if let Some(url) = &file_url {
                        let kind_hint = snapshot
                            .file_refs
                            .iter()
                            .find(|f| &f.url == url)
                            .map(|f| f.kind);
                        match self.resolver.resolve(url, kind_hint).await {
                            Ok(file) => {
                                bindings.push(("data".to_string(), file.content.to_binding()));
                            }
                            Err(e) => {
                                warn!("{} ⚠️ 文件解析失败: {}", ctx, e);
                                return StepOutcome::failed(
                                    ctx.step_index,
                                    None,
                                    rounds.into_iter().map(|r| r.result).collect(),
                                    e.to_string(),
                                );
                            }
                        }
                    }

                    // 执行：异常与超时都折叠在 result 里，喂回给 LLM
                    let result = self.sandbox.execute(&code, &bindings).await;
                    if result.success {
                        info!("{} ✓ 代码执行成功", ctx);
                    } else {
                        warn!(
                            "{} ⚠️ 代码执行失败: {}",
                            ctx,
                            result.error.as_deref().unwrap_or("unknown")
                        );
                    }
                    rounds.push(CodeRound { code, result });

                    decision = match self.decide(ctx, &snapshot, &rounds).await {
                        Ok(d) => d,
                        Err(e) => {
                            return StepOutcome::failed(
                                ctx.step_index,
                                None,
                                rounds.into_iter().map(|r| r.result).collect(),
                                e.to_string(),
                            );
                        }
                    };
                }
                other => break other,
            }
        };

        let executions: Vec<_> = rounds.into_iter().map(|r| r.result).collect();

        // ========== 状态 4: 提交 / 导航 ==========
        let submitted = match &final_decision {
            Decision::Answer { value, locator } => {
                info!("{} 📤 正在提交答案...", ctx);
                match self
                    .submit_answer(&snapshot, value, locator.as_deref())
                    .await
                {
                    Ok(()) => {
                        info!("{} ✓ 答案提交成功", ctx);
                        true
                    }
                    Err(e) => {
                        warn!("{} ⚠️ 提交失败: {}", ctx, e);
                        return StepOutcome::failed(
                            ctx.step_index,
                            Some(final_decision),
                            executions,
                            e.to_string(),
                        );
                    }
                }
            }
            Decision::Navigate { url } => {
                info!("{} ➡️ 导航到: {}", ctx, url);
                if let Err(e) = self.driver.navigate(url).await {
                    warn!("{} ⚠️ 导航失败: {}", ctx, e);
                    return StepOutcome::failed(
                        ctx.step_index,
                        Some(final_decision),
                        executions,
                        e.to_string(),
                    );
                }
                false
            }
            Decision::RunCode { .. } => unreachable!("回合循环只会以 answer/navigate 退出"),
        };

        // ========== 状态 5: 观察 ==========
        let transition = self.observe(&snapshot.url).await;
        debug!("{} 页面走向: {:?}", ctx, transition);

        let failure = match transition {
            PageTransition::ErrorPage => Some("提交后出现错误页面".to_string()),
            _ => None,
        };

        StepOutcome {
            step_index: ctx.step_index,
            decision: Some(final_decision),
            executions,
            submitted,
            transition,
            failure,
        }
    }

    /// 带退避重试的页面提取
    ///
    /// 只有静默超时重试；其他错误立即上抛
    async fn extract_with_retry(&self, ctx: &StepCtx) -> Result<PageSnapshot> {
        let mut last_err = None;
        for attempt in 1..=self.extract_retries {
            match self.extractor.extract(self.driver.as_ref()).await {
                Ok(snapshot) => return Ok(snapshot),
                Err(e @ AgentError::ExtractionTimeout { .. }) => {
                    warn!(
                        "{} 页面提取超时 (第 {}/{} 次)",
                        ctx, attempt, self.extract_retries
                    );
                    last_err = Some(e);
                    if attempt < self.extract_retries {
                        sleep(self.backoff_base * (1u32 << (attempt - 1).min(16))).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| AgentError::ExtractionTimeout { timeout_ms: 0 }))
    }

    async fn decide(
        &self,
        ctx: &StepCtx,
        snapshot: &PageSnapshot,
        rounds: &[CodeRound],
    ) -> Result<Decision> {
        let oracle_ctx = OracleContext {
            student_email: &ctx.email,
            snapshot,
            rounds,
        };
        let decision = self.oracle.decide(&oracle_ctx).await.map_err(|e| {
            warn!("{} ⚠️ 决策失败: {}", ctx, e);
            e
        })?;
        info!("{} 🧠 决策: {}", ctx, decision.kind());
        Ok(decision)
    }

    /// 定位目标元素、写入答案并触发提交
    async fn submit_answer(
        &self,
        snapshot: &PageSnapshot,
        value: &JsonValue,
        locator: Option<&str>,
    ) -> Result<()> {
        let target = match locator {
            Some(loc) if snapshot.find_element(loc).is_some() => loc.to_string(),
            Some(loc) => {
                warn!("决策给出的 locator 不在快照中: {}", loc);
                snapshot
                    .first_editable()
                    .ok_or_else(|| AgentError::SubmissionTargetNotFound {
                        locator: loc.to_string(),
                    })?
                    .locator
                    .clone()
            }
            None => snapshot
                .first_editable()
                .ok_or_else(|| AgentError::SubmissionTargetNotFound {
                    locator: "<无可写元素>".to_string(),
                })?
                .locator
                .clone(),
        };

        let text = answer_text(value);
        self.driver.set_element_value(&target, &text).await?;

        let submit = snapshot.submit_control().ok_or_else(|| {
            AgentError::SubmissionTargetNotFound {
                locator: "<无提交控件>".to_string(),
            }
        })?;
        self.driver.trigger_submit(&submit.locator).await?;
        Ok(())
    }

    /// 提交后等待静默并给页面走向分类
    ///
    /// 这里的静默超时可以容忍：按当下能看到的内容分类
    async fn observe(&self, prev_url: &str) -> PageTransition {
        if let Err(e) = self.driver.wait_for_quiescence(self.quiescence_timeout).await {
            debug!("观察阶段静默超时，按当前内容分类: {}", e);
        }
        let url = self
            .driver
            .current_url()
            .await
            .unwrap_or_else(|_| prev_url.to_string());
        let text = self.driver.page_text().await.unwrap_or_default();
        classify_transition(prev_url, &url, &text)
    }
}

/// 把答案值转成可写入输入框的文本
fn answer_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_transition() {
        let q = "http://quiz.local/q/1";
        let q2 = "http://quiz.local/q/2";
        assert_eq!(
            classify_transition(q, q2, "Question 2: what is ..."),
            PageTransition::Advanced
        );
        assert_eq!(
            classify_transition(q, q, "Question 1: try again"),
            PageTransition::SamePage
        );
        assert_eq!(
            classify_transition(q, q2, "Congratulations! The quiz is complete."),
            PageTransition::QuizEnded
        );
        assert_eq!(
            classify_transition(q, q, "502 Bad Gateway"),
            PageTransition::ErrorPage
        );
    }

    #[test]
    fn test_answer_text() {
        assert_eq!(answer_text(&serde_json::json!("42")), "42");
        assert_eq!(answer_text(&serde_json::json!(42)), "42");
        assert_eq!(answer_text(&serde_json::json!(3.5)), "3.5");
        assert_eq!(answer_text(&serde_json::json!(["a", 1])), r#"["a",1]"#);
    }
}
