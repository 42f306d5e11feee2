//! 会话运行器 - 编排层
//!
//! 管理一次会话的全部稀缺资源：浏览器、沙盒页面、暂存目录。
//! 资源只在这里创建、也只在这里回收；无论会话成败，
//! 浏览器和暂存区都会被清理。

use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, Page};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::browser::headless::{launch_headless_browser, new_sandbox_page};
use crate::config::Config;
use crate::error::Result;
use crate::infrastructure::{BrowserDriver, CdpDriver};
use crate::models::{QuizReport, QuizSession};
use crate::orchestrator::quiz_loop::QuizLoop;
use crate::services::{CodeSandbox, DecisionOracle, FileResolver, HttpFetcher, LlmOracle};
use crate::workflow::StepFlow;

/// 跑一次完整的测验会话
///
/// # 参数
/// - `throttle`: 进程级 LLM 并发限流器，所有会话共享
pub async fn run_session(
    config: &Config,
    throttle: Arc<Semaphore>,
    email: &str,
    start_url: &str,
) -> Result<QuizReport> {
    info!("🚀 开始测验会话: {} @ {}", email, start_url);

    let (mut browser, quiz_page) = launch_headless_browser(config, start_url).await?;
    let result = drive_session(config, throttle, &browser, quiz_page, email, start_url).await;

    // 无论会话成败都关闭浏览器
    if let Err(e) = browser.close().await {
        warn!("关闭浏览器失败: {}", e);
    }

    let report = result?;
    log_final_report(email, &report);
    Ok(report)
}

/// 装配各层组件并驱动循环
async fn drive_session(
    config: &Config,
    throttle: Arc<Semaphore>,
    browser: &Browser,
    quiz_page: Page,
    email: &str,
    start_url: &str,
) -> Result<QuizReport> {
    // 沙盒用独立的空白页面，代码片段接触不到测验页
    let sandbox_page = new_sandbox_page(browser).await?;
    // 会话暂存区：下载文件和沙盒产物都放这里，drop 即清理
    let scratch = tempfile::Builder::new().prefix("quiz_session_").tempdir()?;

    let quiz_driver: Arc<dyn BrowserDriver> = Arc::new(CdpDriver::new(quiz_page));
    let sandbox_driver: Arc<dyn BrowserDriver> = Arc::new(CdpDriver::new(sandbox_page));

    let oracle: Arc<dyn DecisionOracle> = Arc::new(LlmOracle::new(config, throttle));
    let resolver = Arc::new(FileResolver::new(
        Box::new(HttpFetcher::new()),
        scratch.path(),
        config,
    )?);
    let sandbox = CodeSandbox::new(
        sandbox_driver,
        Duration::from_secs(config.exec_timeout_secs),
    );

    let step_flow = StepFlow::new(config, quiz_driver, oracle, resolver, sandbox);
    let quiz_loop = QuizLoop::new(config, step_flow);

    let mut session = QuizSession::new(email, start_url);
    let report = quiz_loop.run(&mut session).await;

    drop(scratch);
    Ok(report)
}

fn log_final_report(email: &str, report: &QuizReport) {
    info!("{}", "=".repeat(60));
    info!("📊 会话结束: {}", email);
    info!("状态: {:?}", report.status);
    info!("✅ 完成步数: {}", report.steps_completed);
    info!("⏱️ 耗时: {:.1} 秒", report.elapsed_secs);
    if let Some(detail) = &report.failure_detail {
        info!("❌ 失败原因: {}", detail);
    }
    info!("{}", "=".repeat(60));
}
