use anyhow::Result;
use quiz_solver_agent::config::Config;
use quiz_solver_agent::{server, utils};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    utils::logging::init();

    // 加载配置
    let config = Config::from_env();

    // 启动 HTTP 服务
    server::serve(config).await?;

    Ok(())
}
