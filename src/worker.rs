use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::pipeline::ExecutionPipeline;
use crate::queue::JobQueue;
use crate::sandbox::create_backend;
use crate::security::SecurityScanner;
use crate::workspace::WorkspaceStore;

pub async fn worker(
    id: u8,
    config: Arc<Config>,
    scanner: Arc<SecurityScanner>,
    store: Arc<WorkspaceStore>,
    queue: Arc<JobQueue>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    log::info!("Worker {id} initialized");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {id} received shutdown signal, stopping");
                break;
            }

            job = queue.pop() => {
                log::info!("Worker {id} got a submission for language {}", job.request.language);

                // 1. Resolve the language profile
                let language = config
                    .languages
                    .iter()
                    .find(|language| language.name == job.request.language)
                    .cloned();
                let Some(language) = language else {
                    // The route validates languages; a miss here means the
                    // config changed while the job sat in the queue
                    log::error!(
                        "Missing config for language {}, submission discarded",
                        job.request.language
                    );
                    let _ = job.responder.send(Err(anyhow::anyhow!(
                        "language {} is not configured",
                        job.request.language
                    )));
                    continue;
                };

                // 2. Build a fresh sandbox backend for this submission
                let backend = match create_backend(&config.sandbox, &language, &config.limits).await {
                    Ok(backend) => backend,
                    Err(e) => {
                        log::error!("Worker {id} could not create a sandbox backend: {e}");
                        let _ = job.responder.send(Err(e));
                        continue;
                    }
                };

                // 3. Drive the pipeline to a verdict; cleanup happens inside
                let pipeline = ExecutionPipeline::new(&scanner, &store, &language, backend);
                let verdict = pipeline.run(&job.request).await;
                if let Err(e) = &verdict {
                    log::error!("Worker {id} hit an infrastructure fault: {e:?}");
                } else {
                    log::info!("Worker {id} finished a submission");
                }

                // 4. Send the verdict back to the waiting handler
                if job.responder.send(verdict).is_err() {
                    log::warn!("Worker {id} finished a submission nobody was waiting for");
                }
            }
        };
    }

    log::info!("Worker {id} has shut down gracefully");
    Ok(())
}
