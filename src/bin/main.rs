//! Binary entrypoint (A5), SPEC_FULL.md §6. Listens on `--host:--port`,
//! dispatching every request to a [`DavHandler`] wrapping the in-memory
//! [`MemBackend`]. Grounded on the reference server's own `axum.rs`
//! example: a single `tokio` multi-thread runtime, an `axum::Router`
//! catch-all route, `Extension` for handing the handler to the route
//! closure.

use std::process::ExitCode;
use std::sync::Arc;

use axum::extract::Request;
use axum::response::IntoResponse;
use axum::routing::any;
use axum::{Extension, Router};
use clap::Parser;
use tbox_dav_gateway::DavHandler;
use tbox_dav_gateway::config::{Cli, Config};
use tbox_dav_gateway::lockmanager::LockManager;
use tbox_dav_gateway::membackend::MemBackend;
use tbox_dav_gateway::store::Store;
use tokio::net::TcpListener;

fn main() -> ExitCode {
    env_logger::init();

    let config = match Config::resolve(Cli::parse()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(1);
        },
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(run(config))
}

async fn run(config: Config) -> ExitCode {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("binding {}: {}", addr, e);
            return ExitCode::from(2);
        },
    };

    let store = Store::new(Arc::new(MemBackend::new()));

    // `--auth`/`--username`/`--password`/`--cookie`/`--token` select a
    // credentials provider, an external collaborator (SPEC_FULL.md §1)
    // this repository has no concrete implementation of; only the
    // resulting method set (`--access`) is enforced here.
    let dav = DavHandler::builder()
        .store(store)
        .locksystem(Arc::new(LockManager::new()))
        .allow_methods(config.access.method_set())
        .build_handler();

    let router = Router::new().route("/{*path}", any(handle_dav)).route("/", any(handle_dav)).layer(Extension(dav));

    log::info!("serving Tbox over WebDAV at http://{}", addr);
    if let Err(e) = axum::serve(listener, router).await {
        eprintln!("server error: {}", e);
        return ExitCode::from(2);
    }
    ExitCode::SUCCESS
}

async fn handle_dav(Extension(dav): Extension<DavHandler<MemBackend>>, req: Request) -> impl IntoResponse {
    dav.handle(req).await
}
