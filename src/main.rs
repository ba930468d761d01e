use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use codebox::config::CliArgs;
use codebox::queue::JobQueue;
use codebox::security::SecurityScanner;
use codebox::web_server::build_server;
use codebox::worker::worker;
use codebox::workspace::WorkspaceStore;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let n_workers = cli.workers;

    if n_workers == 0 {
        panic!("The number of workers must not be 0");
    }

    let config = cli.to_config().expect("Failed to load configuration");

    let workspace_root = match &config.sandbox.workspace_root {
        Some(root) => root.clone(),
        None => WorkspaceStore::default_root().expect("Failed to resolve a workspace root"),
    };
    let store = WorkspaceStore::new(workspace_root).expect("Failed to prepare the workspace root");
    let scanner = SecurityScanner::new(config.sandbox.banned_tokens.clone());

    let config = Arc::new(config);
    let store = Arc::new(store);
    let scanner = Arc::new(scanner);
    let job_queue = Arc::new(JobQueue::new());
    let shutdown_token = CancellationToken::new();

    // ======= PREPARATION END, EXECUTION START =======

    let mut workers = JoinSet::new();
    for i in 1..=n_workers {
        workers.spawn(worker(
            i,
            config.clone(),
            scanner.clone(),
            store.clone(),
            job_queue.clone(),
            shutdown_token.clone(),
        ));
    }

    let server = build_server(config, job_queue).expect("Failed to build server");

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
        Some(res_worker) = workers.join_next() => {
            log::error!("A worker terminated unexpectedly: {:?}", res_worker);
        }
    }

    // 1. Shutdown actix-web server gracefully
    server_handle.stop(true).await;

    // 2. Broadcast shutdown signal to workers
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    // 3. Wait until every worker terminates
    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            if e.is_panic() {
                log::error!("Worker handle panicked: {:?}", e);
            } else {
                log::error!("Worker handle finished with error: {:?}", e);
            }
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}
