//! 代码沙盒 - 业务能力层
//!
//! 在独立的空白页面里执行 LLM 生成的 JS 片段。片段只能看到
//! 显式注入的绑定（下载文件的结构化形式等），接触不到会话
//! 密钥，也接触不到测验页面本身。异常与超时一律折叠成失败的
//! `ExecutionResult` 返回，绝不向上层抛出。

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value as JsonValue};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::infrastructure::BrowserDriver;
use crate::models::ExecutionResult;

/// 代码沙盒
pub struct CodeSandbox {
    driver: Arc<dyn BrowserDriver>,
    exec_timeout: Duration,
}

impl CodeSandbox {
    /// # 参数
    /// - `driver`: 专用沙盒页面的驱动（不是测验页面）
    /// - `exec_timeout`: 单次执行的墙钟时限
    pub fn new(driver: Arc<dyn BrowserDriver>, exec_timeout: Duration) -> Self {
        Self {
            driver,
            exec_timeout,
        }
    }

    /// 执行一个代码片段
    ///
    /// # 参数
    /// - `code`: JS 片段，可以 `return` 一个值；对象会按键名展开
    /// - `bindings`: 注入的只读绑定，按名字以 const 形式可见
    ///
    /// 任何失败（异常、超时、协议错误）都体现在返回值里
    pub async fn execute(
        &self,
        code: &str,
        bindings: &[(String, JsonValue)],
    ) -> ExecutionResult {
        let wrapped = wrap_fragment(code, bindings);

        match timeout(self.exec_timeout, self.driver.eval(&wrapped)).await {
            Err(_) => {
                warn!("⏱️ 代码执行超时 ({}ms)", self.exec_timeout.as_millis());
                ExecutionResult::failed(
                    AgentError::ExecutionTimeout {
                        timeout_ms: self.exec_timeout.as_millis() as u64,
                    }
                    .to_string(),
                    "",
                )
            }
            Ok(Err(e)) => {
                warn!("代码执行的协议层调用失败: {}", e);
                ExecutionResult::failed(AgentError::ExecutionError(e.to_string()).to_string(), "")
            }
            Ok(Ok(value)) => classify_eval_result(value),
        }
    }
}

/// 把片段包进捕获壳
///
/// 壳负责：注入绑定、截获 console.log、把返回值规整成命名值
/// 集合、把异常折叠成 { ok: false, error }
fn wrap_fragment(code: &str, bindings: &[(String, JsonValue)]) -> String {
    let mut binding_lines = String::new();
    for (name, value) in bindings {
        if !is_valid_identifier(name) {
            warn!("跳过非法绑定名: {}", name);
            continue;
        }
        let json = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
        binding_lines.push_str(&format!("const {} = {};\n", name, json));
    }

    format!(
        r#"
(async () => {{
    const __logs = [];
    const __log = console.log;
    console.log = (...args) => {{
        __logs.push(args.map(a => (a !== null && typeof a === 'object') ? JSON.stringify(a) : String(a)).join(' '));
    }};
    {binding_lines}
    try {{
        const __value = await (async () => {{
{code}
        }})();
        let __values;
        if (__value !== null && typeof __value === 'object' && !Array.isArray(__value)) {{
            __values = __value;
        }} else if (__value === undefined) {{
            __values = {{}};
        }} else {{
            __values = {{ result: __value }};
        }}
        return {{ ok: true, values: __values, output: __logs.join('\n') }};
    }} catch (err) {{
        return {{ ok: false, error: String((err && err.stack) || err), output: __logs.join('\n') }};
    }} finally {{
        console.log = __log;
    }}
}})()
"#
    )
}

/// 把壳的返回值规整成 ExecutionResult
fn classify_eval_result(value: JsonValue) -> ExecutionResult {
    let ok = value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
    let output = value
        .get("output")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    if ok {
        let values: Map<String, JsonValue> = value
            .get("values")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        debug!("✓ 代码执行成功: {} 个返回值", values.len());
        ExecutionResult {
            success: true,
            values,
            output,
            error: None,
        }
    } else {
        let error = value
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("片段未返回结构化结果")
            .to_string();
        debug!("✗ 代码执行失败: {}", error);
        ExecutionResult::failed(AgentError::ExecutionError(error).to_string(), output)
    }
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrap_fragment_injects_bindings() {
        let wrapped = wrap_fragment(
            "return data.rows.length;",
            &[("data".to_string(), json!({"rows": [[1]]}))],
        );
        assert!(wrapped.contains(r#"const data = {"rows":[[1]]};"#));
        assert!(wrapped.contains("return data.rows.length;"));
    }

    #[test]
    fn test_wrap_fragment_skips_bad_names() {
        let wrapped = wrap_fragment("return 1;", &[("1bad; alert()".to_string(), json!(1))]);
        assert!(!wrapped.contains("1bad"));
    }

    #[test]
    fn test_classify_success_object() {
        let result = classify_eval_result(json!({
            "ok": true,
            "values": { "total": 42 },
            "output": "inspecting",
        }));
        assert!(result.success);
        assert_eq!(result.values["total"], 42);
        assert_eq!(result.output, "inspecting");
        assert!(result.error.is_none());
    }

    #[test]
    fn test_classify_failure_keeps_output() {
        let result = classify_eval_result(json!({
            "ok": false,
            "error": "ReferenceError: rows is not defined",
            "output": "before crash",
        }));
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("ReferenceError"));
        assert_eq!(result.output, "before crash");
    }

    #[test]
    fn test_classify_garbage_is_failure() {
        let result = classify_eval_result(json!("oops"));
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_is_valid_identifier() {
        assert!(is_valid_identifier("data"));
        assert!(is_valid_identifier("_tmp2"));
        assert!(!is_valid_identifier("2data"));
        assert!(!is_valid_identifier("a-b"));
        assert!(!is_valid_identifier(""));
    }
}
