// SPDX-License-Identifier: Apache-2.0 OR MIT

//! ldaptoid entry point: load configuration, build the shared [`AppContext`],
//! and run the refresh scheduler and the LDAP acceptor loop side by side
//! until a shutdown signal arrives.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ldaptoid::config::{AppConfig, Args, ConfigError};
use ldaptoid::context::AppContext;
use ldaptoid::scheduler::Scheduler;
use ldaptoid::server;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    info!(idp_type = %config.idp_type, suffix = %config.ldap_base_dn, port = config.ldap_port, "starting ldaptoid");

    let ctx = match AppContext::new(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!(error = %e, "failed to build application context");
            return ExitCode::FAILURE;
        }
    };

    let shutdown_ctx = ctx.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_ctx.request_shutdown();
    });

    let scheduler = Scheduler::new(ctx.clone());
    let scheduler_task = tokio::spawn(async move { scheduler.run().await });
    let server_task = tokio::spawn(server::run(ctx));

    let _ = scheduler_task.await;
    match server_task.await {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!(error = %e, "LDAP server stopped with an error");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "LDAP server task panicked");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<AppConfig, ConfigError> {
    let base = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    let config = args.apply(base);
    config.validate()?;
    Ok(config)
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
}
