//! 步骤上下文
//!
//! 封装"我正在替谁做第几步"这一信息

use std::fmt::Display;

/// 步骤上下文
#[derive(Debug, Clone)]
pub struct StepCtx {
    /// 学生邮箱（测验页面可能要求填写）
    pub email: String,

    /// 步骤索引（从 0 开始，仅日志显示时加一）
    pub step_index: usize,
}

impl StepCtx {
    pub fn new(email: impl Into<String>, step_index: usize) -> Self {
        Self {
            email: email.into(),
            step_index,
        }
    }
}

impl Display for StepCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[步骤 {}]", self.step_index + 1)
    }
}
