use clap::Parser;
use fern::colors::{Color, ColoredLevelConfig};
use log::{error, info, LevelFilter};

use kura_daemon::abci::{dispatch::Dispatcher, server::AbciServer};
use kura_daemon::config::{NodeConfig, NodeOptions};
use kura_daemon::core::app::App;

fn setup_logging(level: &str) -> Result<(), fern::InitError> {
    let level = match level {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let colors = ColoredLevelConfig::new()
        .info(Color::Green)
        .warn(Color::Yellow)
        .error(Color::Red)
        .debug(Color::Magenta)
        .trace(Color::BrightBlack);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}: {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("sled", LevelFilter::Warn)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn main() {
    let options = NodeOptions::parse();

    if let Err(e) = setup_logging(&options.log_level) {
        eprintln!("failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let config = match NodeConfig::resolve(&options) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    info!(
        "starting kura daemon for chain '{}' (home: {})",
        config.chain_id,
        config.home.display()
    );

    let app = match App::new(config.clone()) {
        Ok(app) => app,
        Err(e) => {
            error!("failed to open application state: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let server = AbciServer::new(config.socket_path.clone(), Dispatcher::new(app));
    match runtime.block_on(server.run()) {
        Ok(()) => info!("shutdown complete"),
        Err(e) => {
            // Fatal invariant: exit without committing so replay can
            // bring the node back to a consistent point.
            error!("fatal: {}", e);
            std::process::exit(1);
        }
    }
}
