//! 浏览器驱动 - 基础设施层
//!
//! 持有唯一的 page 资源，只向上暴露有限的能力集：
//! 导航、取文本、执行 JS、写入元素、触发提交、等待静默。
//! 不认识快照 / 决策，不处理业务流程。

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Page;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::{AgentError, Result};

/// 静默轮询间隔
const QUIESCENCE_POLL_MS: u64 = 250;

/// 浏览器能力集
///
/// 核心只依赖这几个操作；更丰富的自动化（cookie、截图等）
/// 不属于本层的契约
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// 导航到指定 URL
    async fn navigate(&self, url: &str) -> Result<()>;

    /// 当前页面 URL
    async fn current_url(&self) -> Result<String>;

    /// 渲染后的页面可见文本
    async fn page_text(&self) -> Result<String>;

    /// 执行 JS 并返回 JSON 结果
    async fn eval(&self, js: &str) -> Result<JsonValue>;

    /// 向 locator 指定的元素写入值
    async fn set_element_value(&self, locator: &str, value: &str) -> Result<()>;

    /// 触发 locator 指定的提交控件
    async fn trigger_submit(&self, locator: &str) -> Result<()>;

    /// 等待页面静默（加载完成且 DOM 稳定），超时报错
    async fn wait_for_quiescence(&self, timeout: Duration) -> Result<()>;
}

/// CDP 页面驱动
///
/// 唯一的 page owner
pub struct CdpDriver {
    page: Page,
}

impl CdpDriver {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }
}

/// 页面静默探测的返回
#[derive(Debug, Deserialize)]
struct QuiescenceProbe {
    ready: bool,
    size: u64,
}

/// 元素操作的返回
#[derive(Debug, Deserialize)]
struct ElementOpResult {
    found: bool,
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn navigate(&self, url: &str) -> Result<()> {
        debug!("导航到: {}", url);
        self.page
            .goto(url)
            .await
            .map_err(|e| AgentError::Browser(format!("导航到 {} 失败: {}", url, e)))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let url = self.page.url().await?;
        Ok(url.unwrap_or_default())
    }

    async fn page_text(&self) -> Result<String> {
        let result = self
            .page
            .evaluate("document.body ? document.body.innerText : ''".to_string())
            .await?;
        let text: String = result.into_value()?;
        Ok(text)
    }

    async fn eval(&self, js: &str) -> Result<JsonValue> {
        let result = self.page.evaluate(js.to_string()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    async fn set_element_value(&self, locator: &str, value: &str) -> Result<()> {
        let js = format!(
            r#"
            (() => {{
                const el = document.querySelector({locator});
                if (!el) return {{ found: false }};
                const value = {value};
                if (el.tagName === 'SELECT') {{
                    el.value = value;
                }} else if (el.type === 'checkbox' || el.type === 'radio') {{
                    el.checked = value !== '' && value !== 'false';
                }} else {{
                    el.value = value;
                }}
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return {{ found: true }};
            }})()
            "#,
            locator = serde_json::to_string(locator)?,
            value = serde_json::to_string(value)?,
        );
        let result: ElementOpResult = serde_json::from_value(self.eval(&js).await?)?;
        if !result.found {
            return Err(AgentError::SubmissionTargetNotFound {
                locator: locator.to_string(),
            });
        }
        Ok(())
    }

    async fn trigger_submit(&self, locator: &str) -> Result<()> {
        let js = format!(
            r#"
            (() => {{
                const el = document.querySelector({locator});
                if (!el) return {{ found: false }};
                if (el.tagName === 'FORM') {{
                    el.requestSubmit ? el.requestSubmit() : el.submit();
                }} else {{
                    el.click();
                }}
                return {{ found: true }};
            }})()
            "#,
            locator = serde_json::to_string(locator)?,
        );
        let result: ElementOpResult = serde_json::from_value(self.eval(&js).await?)?;
        if !result.found {
            return Err(AgentError::SubmissionTargetNotFound {
                locator: locator.to_string(),
            });
        }
        Ok(())
    }

    async fn wait_for_quiescence(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut last_size: Option<u64> = None;

        // readyState 完成且 DOM 大小连续两次采样不变视为静默
        loop {
            let probe: QuiescenceProbe = serde_json::from_value(
                self.eval(
                    r#"(() => ({
                        ready: document.readyState === 'complete',
                        size: document.body ? document.body.innerHTML.length : 0,
                    }))()"#,
                )
                .await?,
            )?;

            if probe.ready && last_size == Some(probe.size) {
                debug!("页面已静默 (DOM {} 字节)", probe.size);
                return Ok(());
            }
            last_size = Some(probe.size);

            if Instant::now() >= deadline {
                return Err(AgentError::ExtractionTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            sleep(Duration::from_millis(QUIESCENCE_POLL_MS)).await;
        }
    }
}
