//! 测验循环控制器 - 编排层
//!
//! 反复调用单步流程直到测验结束、步级重试耗尽或预算用完。
//! 本模块是唯一允许给 QuizSession 设置终态的地方；
//! 墙钟预算以截止时刻的形式包在每一步外面，超时会直接
//! 丢弃正在挂起的等待点（静默等待 / LLM 调用 / 下载 / 沙盒）。

use std::time::Duration;

use tokio::time::{timeout, Instant};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::models::{PageTransition, QuizReport, QuizSession, SessionStatus, StepOutcome};
use crate::workflow::{StepCtx, StepFlow};

/// 测验循环控制器
pub struct QuizLoop {
    step_flow: StepFlow,
    max_steps: usize,
    step_retries: usize,
    session_budget: Duration,
    max_same_page_steps: usize,
}

impl QuizLoop {
    pub fn new(config: &Config, step_flow: StepFlow) -> Self {
        Self {
            step_flow,
            max_steps: config.max_steps,
            step_retries: config.step_retries.max(1),
            session_budget: Duration::from_secs(config.session_budget_secs),
            max_same_page_steps: config.max_same_page_steps.max(1),
        }
    }

    /// 跑完整个会话，总是返回最终报告
    pub async fn run(&self, session: &mut QuizSession) -> QuizReport {
        let started = Instant::now();
        let deadline = started + self.session_budget;

        info!("{}", "=".repeat(60));
        info!(
            "🚀 测验求解开始: {} (预算 {} 步 / {} 秒)",
            session.start_url,
            self.max_steps,
            self.session_budget.as_secs()
        );
        info!("{}", "=".repeat(60));

        let status;
        let mut failure_detail: Option<String> = None;
        let mut same_page_streak = 0usize;

        loop {
            let step_index = session.steps_completed();
            if step_index >= self.max_steps {
                status = SessionStatus::TimedOut;
                failure_detail = Some(
                    AgentError::SessionBudgetExceeded(format!(
                        "步数超过上限 {}",
                        self.max_steps
                    ))
                    .to_string(),
                );
                break;
            }

            let ctx = StepCtx::new(session.email.clone(), step_index);
            let outcome = match self.run_step_with_retry(&ctx, deadline).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // 预算耗尽：不重试，直接收尾
                    status = SessionStatus::TimedOut;
                    failure_detail = Some(e.to_string());
                    break;
                }
            };

            let failed = outcome.is_failed();
            let transition = outcome.transition;
            let detail = outcome.failure.clone();
            session.record(outcome);

            if failed {
                status = SessionStatus::Failed;
                failure_detail = detail;
                break;
            }

            match transition {
                PageTransition::QuizEnded => {
                    info!("{} 🎉 测验到达终止页", ctx);
                    status = SessionStatus::Succeeded;
                    break;
                }
                PageTransition::Advanced => {
                    same_page_streak = 0;
                }
                PageTransition::SamePage => {
                    same_page_streak += 1;
                    if same_page_streak >= self.max_same_page_steps {
                        status = SessionStatus::Failed;
                        failure_detail = Some(format!(
                            "连续 {} 步停留在同一页面，疑似死循环",
                            same_page_streak
                        ));
                        break;
                    }
                }
                PageTransition::ErrorPage => {
                    status = SessionStatus::Failed;
                    failure_detail = Some("出现错误页面".to_string());
                    break;
                }
            }
        }

        session.finish(status);
        QuizReport {
            status,
            steps_completed: session.steps_completed(),
            elapsed_secs: started.elapsed().as_secs_f64(),
            failure_detail,
        }
    }

    /// 带整步重试地跑一步
    ///
    /// 步级失败按配置重试；预算耗尽以 Err 上抛且永不重试。
    /// 重试耗尽时返回最后一次的失败结果。
    async fn run_step_with_retry(
        &self,
        ctx: &StepCtx,
        deadline: Instant,
    ) -> Result<StepOutcome> {
        let mut last_outcome = None;
        for attempt in 1..=self.step_retries {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or_else(|| {
                    AgentError::SessionBudgetExceeded("墙钟预算耗尽".to_string())
                })?;

            match timeout(remaining, self.step_flow.run(ctx)).await {
                Ok(outcome) if !outcome.is_failed() => return Ok(outcome),
                Ok(outcome) => {
                    warn!(
                        "{} ⚠️ 步骤失败 (第 {}/{} 次): {}",
                        ctx,
                        attempt,
                        self.step_retries,
                        outcome.failure.as_deref().unwrap_or("unknown")
                    );
                    last_outcome = Some(outcome);
                }
                Err(_) => {
                    return Err(AgentError::SessionBudgetExceeded(
                        "墙钟预算在步骤执行中耗尽".to_string(),
                    ));
                }
            }
        }
        Ok(last_outcome.unwrap_or_else(|| {
            StepOutcome::failed(ctx.step_index, None, vec![], "步骤尝试次数为 0")
        }))
    }
}
