use failover_probe::{Config, service::WriteOp};
use mimalloc::MiMalloc;
use std::process::ExitCode;
use tracing::error;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            failover_probe::logging::init("info");
            error!(error = %e, "invalid configuration, exiting before connecting");
            return ExitCode::from(2);
        }
    };
    failover_probe::logging::init(&cfg.loglevel);

    failover_probe::service::launch(&cfg, WriteOp::new(cfg.truncate_on_start)).await;
    ExitCode::SUCCESS
}
