//! mwrpc CLI entry point.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use tracing::warn;

use mwrpc_cli::cli::{Cli, Command, ConfigAction};
use mwrpc_cli::commands::{config, rpc};
use mwrpc_cli::error::CliResult;
use mwrpc_client::{Transport, build_transport};
use mwrpc_core::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing_config = if cli.json_logs {
        TracingConfig::streaming()
    } else if cli.debug {
        TracingConfig::debug()
    } else {
        TracingConfig::default()
    };
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = cli.load_config()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    // Commands that never touch the network
    if let Command::Config { ref action } = cli.command {
        return match action {
            ConfigAction::Dump => config::dump(&config, &mut out),
            ConfigAction::Validate => config::validate(&config, &mut out),
            ConfigAction::Path => config::path(&mut out),
        };
    }

    let transport = build_transport(config, None)?;
    transport.connect().await?;

    let result = tokio::select! {
        result = execute(transport.as_ref(), cli.command, &mut out) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted");
            Ok(())
        }
    };

    transport.close().await?;
    out.flush()?;
    result
}

async fn execute(transport: &dyn Transport, command: Command, out: &mut dyn Write) -> CliResult<()> {
    match command {
        Command::Call { method, params } => {
            let params = rpc::parse_params(params.as_deref())?;
            rpc::call(transport, &method, params, out).await
        }
        Command::Job { method, params } => {
            let params = rpc::parse_params(params.as_deref())?;
            rpc::job(transport, &method, params, out).await
        }
        Command::Subscribe {
            collection,
            filter,
            count,
        } => {
            let filter = rpc::parse_filter(filter.as_deref())?;
            rpc::subscribe(transport, &collection, filter, count, out).await
        }
        Command::Version => rpc::version(transport, out),
        Command::Ping => rpc::ping(transport, out).await,
        Command::Config { .. } => Ok(()),
    }
}
