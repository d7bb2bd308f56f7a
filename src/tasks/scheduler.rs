use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Duration};

use crate::core::shutdown::broadcast_shutdown;
use crate::core::state::AppState;
use crate::tasks::scans;

pub(crate) async fn run(state: AppState) -> Result<()> {
    let workers = state.settings().worker().scan_concurrency.max(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::with_capacity(workers + 1);
    for worker in 0..workers {
        handles.push(tokio::spawn(scan_worker(state.clone(), worker, shutdown_rx.clone())));
    }
    handles.push(tokio::spawn(recover_stale_loop(state.clone(), shutdown_rx.clone())));

    tracing::info!(workers, "Scan workers started");
    broadcast_shutdown(shutdown_tx).await;

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

async fn scan_worker(state: AppState, worker: usize, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match scans::claim_next_scan(state.db()).await {
            Ok(Some(job)) => {
                let job_id = job.id.clone();
                if let Err(err) = scans::process_scan_job(&state, job).await {
                    tracing::error!(
                        worker,
                        job_id = %job_id,
                        error = %err,
                        "Failed to process scan job"
                    );
                }
                continue;
            }
            Ok(None) => {}
            Err(err) => tracing::error!(worker, error = %err, "Failed to claim scan job"),
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(Duration::from_secs(2)) => {}
        }
    }
}

async fn recover_stale_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(Duration::from_secs(300));
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                if let Err(err) = scans::recover_stale_scans(&state).await {
                    tracing::error!(error = %err, "recover_stale_scans failed");
                }
            }
        }
    }
}
