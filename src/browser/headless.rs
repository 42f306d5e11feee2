use std::path::Path;

use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{AgentError, Result};

/// 启动无头浏览器并导航到指定 URL
///
/// 返回的 Page 已停留在目标页面上
pub async fn launch_headless_browser(config: &Config, url: &str) -> Result<(Browser, Page)> {
    info!("🚀 启动无头浏览器...");
    debug!("目标 URL: {}", url);

    let mut builder = BrowserConfig::builder().new_headless_mode().args(vec![
        "--disable-gpu",             // 无头模式禁用 GPU
        "--no-sandbox",              // 容器环境下避免权限问题导致的崩溃
        "--disable-dev-shm-usage",   // 防止共享内存不足
        "--remote-debugging-port=0", // 让浏览器自动选择端口
    ]);

    // 指定了可执行文件路径时使用之，否则走系统默认查找
    if let Some(executable) = &config.browser_executable {
        builder = builder.chrome_executable(Path::new(executable));
    }

    let browser_config = builder.build().map_err(|e| {
        error!("配置无头浏览器失败: {}", e);
        AgentError::Browser(format!("配置无头浏览器失败: {}", e))
    })?;

    // 启动浏览器
    let (browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| {
        error!("启动无头浏览器失败: {}", e);
        AgentError::Browser(format!("启动无头浏览器失败: {}", e))
    })?;
    debug!("无头浏览器启动成功");

    // 在后台处理浏览器事件
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 添加短暂延迟以等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    // 创建新页面并导航
    let page = browser.new_page(url).await.map_err(|e| {
        error!("创建页面失败: {}", e);
        AgentError::Browser(format!("创建页面失败: {}", e))
    })?;

    info!("✅ 无头浏览器已导航到: {}", url);

    Ok((browser, page))
}

/// 为沙盒创建一个独立的空白页面
///
/// 代码执行不在测验页面内进行，避免片段改动页面状态、
/// 也避免片段接触测验页的任何内容
pub async fn new_sandbox_page(browser: &Browser) -> Result<Page> {
    let page = browser.new_page("about:blank").await.map_err(|e| {
        error!("创建沙盒页面失败: {}", e);
        AgentError::Browser(format!("创建沙盒页面失败: {}", e))
    })?;
    debug!("沙盒页面创建成功");
    Ok(page)
}
