use anyhow::Result;
use capsules_code_exec::ExecutionService;
use runtime::{server, Config};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse_config();
    init_tracing(config.log_json);

    info!(
        bind = %config.bind,
        runtime = %config.sandbox_runtime.display(),
        timeout = %humantime::format_duration(config.exec_timeout),
        max_concurrency = config.max_concurrency,
        gate_policy = %config.gate_policy,
        "Starting sandbox runtime"
    );

    let service = ExecutionService::new(config.exec_config()?)?;
    match service.preflight() {
        Ok(path) => info!(runtime = %path.display(), "isolation runtime resolved"),
        Err(err) => error!(
            error = %err,
            "isolation runtime unavailable; executions will fail until it is installed"
        ),
    }

    server::serve(config.bind, service).await
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
