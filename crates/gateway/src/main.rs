// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! harbord, the Harbor gateway daemon.

use harbor_gateway::deps::ProviderRegistry;
use harbor_gateway::{config::GatewayConfig, lifecycle};
use tracing_subscriber::EnvFilter;

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_env("HARBOR_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match harbor_gateway::env::state_dir() {
        Ok(state_dir) if std::fs::create_dir_all(&state_dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(state_dir.join("logs"), "harbord.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let _log_guard = init_tracing();

    // Sandbox providers are external adapters; the stock binary starts with
    // none registered and sessions stay schedulable once one is wired in.
    let providers = ProviderRegistry::new();
    let deps = lifecycle::build_deps(GatewayConfig::from_env(), providers);

    match lifecycle::run(deps).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("harbord: {}", e);
            std::process::ExitCode::FAILURE
        }
    }
}
