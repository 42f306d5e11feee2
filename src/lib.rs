//! # Quiz Solver Agent
//!
//! 一个自动求解网页数据分析测验的 Rust 代理服务
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（Page），只暴露能力
//! - `CdpDriver` - 唯一的 page owner，实现 `BrowserDriver` 能力集
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单轮操作
//! - `PageExtractor` - 页面快照提取能力
//! - `FileResolver` - 数据文件下载与解析能力（会话级缓存）
//! - `CodeSandbox` - 隔离执行 LLM 生成代码的能力
//! - `LlmOracle` - LLM 决策能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一步测验"的完整状态机
//! - `StepCtx` - 上下文封装（email + step_index）
//! - `StepFlow` - 流程编排（提取 → 决策 → 分析回合 → 提交 → 观察）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/quiz_loop` - 测验循环控制器，管理预算、重试与终态
//! - `orchestrator/session_runner` - 会话运行器，管理浏览器等资源
//!
//! 外围是薄 I/O 层：`server`（HTTP 入口）、`browser`（无头浏览器启动）。

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AgentError, Result};
pub use infrastructure::{BrowserDriver, CdpDriver};
pub use models::{
    Decision, ExecutionResult, PageSnapshot, PageTransition, QuizReport, QuizSession,
    SessionStatus, StepOutcome,
};
pub use orchestrator::{run_session, QuizLoop};
pub use services::{
    CodeSandbox, DecisionOracle, FileFetcher, FileResolver, HttpFetcher, LlmOracle, PageExtractor,
};
pub use workflow::{StepCtx, StepFlow};
