//! HTTP 入口
//!
//! 薄 I/O 层：校验密钥、把会话作为后台任务派发、立即返回。
//! 会话之间互不共享可变状态，只共享进程级的 LLM 限流器。

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::orchestrator::run_session;

/// 服务共享状态
#[derive(Clone)]
struct ServerState {
    config: Arc<Config>,
    /// 进程级 LLM 并发限流器
    oracle_throttle: Arc<Semaphore>,
}

/// 启动测验的入站请求
#[derive(Debug, Deserialize)]
struct QuizRequest {
    email: String,
    secret: String,
    url: String,
}

/// 启动 HTTP 服务并一直运行
pub async fn serve(config: Config) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.listen_port);
    let state = ServerState {
        oracle_throttle: Arc::new(Semaphore::new(config.oracle_concurrency.max(1))),
        config: Arc::new(config),
    };

    let app = Router::new()
        .route("/", get(root))
        .route("/run", post(run_quiz))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 测验求解服务已启动: http://{}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| AgentError::Config(format!("HTTP 服务异常退出: {}", e)))?;
    Ok(())
}

async fn root() -> Json<JsonValue> {
    Json(json!({ "message": "LLM 数据分析测验求解服务运行中" }))
}

/// 触发一次测验求解
///
/// 密钥不匹配的请求在任何会话启动之前就被拒绝
async fn run_quiz(
    State(state): State<ServerState>,
    Json(request): Json<QuizRequest>,
) -> (StatusCode, Json<JsonValue>) {
    if request.secret != state.config.student_secret {
        warn!("拒绝请求: 密钥不匹配 ({})", request.email);
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "detail": "无效的密钥" })),
        );
    }

    info!("接受请求: {} -> {}", request.email, request.url);

    // 会话作为后台任务运行，请求立即返回
    let config = state.config.clone();
    let throttle = state.oracle_throttle.clone();
    tokio::spawn(async move {
        match run_session(&config, throttle, &request.email, &request.url).await {
            Ok(report) => {
                info!(
                    "会话完成: {} 状态 {:?}，{} 步",
                    request.email, report.status, report.steps_completed
                );
            }
            Err(e) => {
                error!("会话启动失败: {}: {}", request.email, e);
            }
        }
    });

    (
        StatusCode::OK,
        Json(json!({ "message": "测验求解已启动", "status": "processing" })),
    )
}
