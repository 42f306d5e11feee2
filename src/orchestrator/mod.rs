//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责会话级的调度与资源管理，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `session_runner` - 会话运行器
//! - 管理会话生命周期（启动浏览器、装配组件、清理资源）
//! - 创建暂存目录与沙盒页面
//! - 输出会话级统计信息
//!
//! ### `quiz_loop` - 测验循环控制器
//! - 反复调用 StepFlow 直到终止条件
//! - 执行步级重试与预算裁决
//! - 唯一允许设置 QuizSession 终态的地方
//! - 产出最终报告
//!
//! ## 层次关系
//!
//! ```text
//! session_runner (资源: Browser / 暂存区)
//!     ↓
//! quiz_loop (会话: 预算 / 重试 / 终态)
//!     ↓
//! workflow::StepFlow (单步状态机)
//!     ↓
//! services (能力层: extract / oracle / resolve / sandbox)
//!     ↓
//! infrastructure (基础设施: BrowserDriver)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：session_runner 管资源，quiz_loop 管循环
//! 2. **资源隔离**：只有本层持有 Browser 和暂存目录
//! 3. **向下依赖**：编排层 → workflow → services → infrastructure
//! 4. **终态唯一**：会话终态只在 quiz_loop 里设置一次

pub mod quiz_loop;
pub mod session_runner;

pub use quiz_loop::QuizLoop;
pub use session_runner::run_session;
