//! 会话与步骤结果模型
//!
//! `QuizSession` 由编排层独占持有，步骤历史只追加不修改，
//! 终态只允许设置一次。

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::decision::Decision;
use crate::models::execution::ExecutionResult;

/// 会话终态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    /// 进行中
    Running,
    /// 测验到达终止页
    Succeeded,
    /// 步骤重试耗尽或死循环
    Failed,
    /// 步数或墙钟预算耗尽
    TimedOut,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        self != SessionStatus::Running
    }
}

/// 提交后的页面走向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageTransition {
    /// 仍停留在同一测验页
    SamePage,
    /// 进入下一步
    Advanced,
    /// 测验已结束
    QuizEnded,
    /// 出现错误页
    ErrorPage,
}

/// 单步执行结果
///
/// 步骤索引在会话内严格递增，从 0 开始。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutcome {
    /// 步骤索引（0 起）
    pub step_index: usize,
    /// 本步采取的决策（失败于决策之前时为空）
    pub decision: Option<Decision>,
    /// 本步的代码执行结果列表
    pub executions: Vec<ExecutionResult>,
    /// 是否成功提交了答案
    pub submitted: bool,
    /// 提交后的页面走向
    pub transition: PageTransition,
    /// 步级失败原因
    pub failure: Option<String>,
}

impl StepOutcome {
    /// 构造失败结果
    pub fn failed(
        step_index: usize,
        decision: Option<Decision>,
        executions: Vec<ExecutionResult>,
        failure: impl Into<String>,
    ) -> Self {
        Self {
            step_index,
            decision,
            executions,
            submitted: false,
            transition: PageTransition::SamePage,
            failure: Some(failure.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// 一次测验会话
///
/// 由 `QuizLoop` 在运行开始时创建，结束后随报告一起丢弃。
#[derive(Debug)]
pub struct QuizSession {
    /// 学生邮箱
    pub email: String,
    /// 测验起始 URL
    pub start_url: String,
    /// 会话开始时间
    pub started_at: DateTime<Local>,
    /// 步骤历史（只追加）
    pub history: Vec<StepOutcome>,
    status: SessionStatus,
}

impl QuizSession {
    pub fn new(email: impl Into<String>, start_url: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            start_url: start_url.into(),
            started_at: Local::now(),
            history: Vec::new(),
            status: SessionStatus::Running,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn steps_completed(&self) -> usize {
        self.history.len()
    }

    /// 追加一条步骤记录
    ///
    /// 步骤索引必须等于当前历史长度
    pub fn record(&mut self, outcome: StepOutcome) {
        debug_assert_eq!(outcome.step_index, self.history.len());
        self.history.push(outcome);
    }

    /// 设置终态，只允许设置一次
    pub fn finish(&mut self, status: SessionStatus) {
        if self.status.is_terminal() {
            warn!("会话终态已设置为 {:?}，忽略 {:?}", self.status, status);
            return;
        }
        self.status = status;
    }
}

/// 会话最终报告
#[derive(Debug, Clone, Serialize)]
pub struct QuizReport {
    pub status: SessionStatus,
    pub steps_completed: usize,
    pub elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keeps_indices_increasing() {
        let mut session = QuizSession::new("s@example.com", "http://quiz.local/q/1");
        for i in 0..3 {
            session.record(StepOutcome {
                step_index: i,
                decision: None,
                executions: vec![],
                submitted: true,
                transition: PageTransition::Advanced,
                failure: None,
            });
        }
        assert_eq!(session.steps_completed(), 3);
        for (i, outcome) in session.history.iter().enumerate() {
            assert_eq!(outcome.step_index, i);
        }
    }

    #[test]
    fn test_finish_sets_status_once() {
        let mut session = QuizSession::new("s@example.com", "http://quiz.local/q/1");
        assert_eq!(session.status(), SessionStatus::Running);
        session.finish(SessionStatus::Succeeded);
        session.finish(SessionStatus::Failed);
        assert_eq!(session.status(), SessionStatus::Succeeded);
    }
}
