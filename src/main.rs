use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use pingora::server::{
    configuration::{Opt, ServerConf},
    Server,
};

use levee::config::{self, cli::Cli};
use levee::daemon::Daemon;
use levee::handler::RateLimitProxy;

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    tracing::info!(config = ?cli, "CLI options");

    let doc = match config::load(&cli.config) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::from(1);
        }
    };

    let daemon = match Daemon::bootstrap(cli.config.clone()) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "failed to build rate limiter from configuration");
            return ExitCode::from(1);
        }
    };

    if cli.validate {
        tracing::info!("configuration is valid");
        return ExitCode::SUCCESS;
    }

    let upstream = match config::upstream_peer(&doc) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to resolve upstream peer");
            return ExitCode::from(1);
        }
    };

    let proxy = RateLimitProxy {
        upstream,
        limiter: daemon.limiter_handle(),
        passive: doc.proxy.passive,
    };
    let listen = doc.proxy.listen.clone();

    // pingora's `Server` owns its own worker runtimes and blocks forever
    // in `run_forever`, so it runs on a dedicated thread; the reload/
    // shutdown signal loop below drives its own tokio runtime alongside
    // it, matching the split in `river` between pingora's process
    // lifecycle and everything layered on top of it.
    let server_thread = std::thread::spawn(move || {
        let opt = Opt {
            upgrade: false,
            daemon: false,
            nocapture: false,
            test: false,
            conf: None,
        };
        let mut server = match Server::new(opt) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to construct pingora server");
                std::process::exit(2);
            }
        };
        server.configuration = Arc::new(ServerConf {
            threads: 8,
            work_stealing: true,
            ..ServerConf::default()
        });
        server.bootstrap();

        let mut service = pingora_proxy::http_proxy_service(&server.configuration, proxy);
        service.add_tcp(&listen);
        server.add_services(vec![Box::new(service)]);
        tracing::info!(listen = %listen, "starting proxy");
        server.run_forever();
    });

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start signal-handling runtime");
            return ExitCode::from(2);
        }
    };
    runtime.block_on(daemon.run_signal_loop());

    tracing::info!("shutting down");
    drop(server_thread);
    ExitCode::SUCCESS
}
