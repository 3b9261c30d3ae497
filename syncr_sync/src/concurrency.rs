//! Bounded concurrency primitives (spec.md section 4.10).
//!
//! Grounded on `original_source`'s `limit_gather` and
//! `process_queue_with_limit`: two distinct primitives rather than one
//! generalized over both, since one returns an ordered batch and the
//! other runs indefinitely against a live queue.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};

/// Runs every future in `tasks` under a concurrency cap of `n`
/// simultaneously in flight, returning their results in the original
/// order once all have finished.
pub async fn bounded_gather<F, T>(tasks: Vec<F>, n: usize) -> Vec<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(n.max(1)));
    let handles: Vec<_> = tasks
        .into_iter()
        .map(|task| {
            let semaphore = Arc::clone(&semaphore);
            tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore is never closed");
                task.await
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
    results
}

/// A long-lived worker that pulls tasks from `input`, runs up to `n` of
/// them concurrently, and forwards each result to `output` as it
/// completes. Returns once `input` is closed and every in-flight task has
/// finished.
pub async fn bounded_queue_process<F, T>(
    mut input: mpsc::Receiver<F>,
    n: usize,
    output: mpsc::Sender<T>,
) where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(n.max(1)));
    let mut handles = Vec::new();

    while let Some(task) = input.recv().await {
        let semaphore = Arc::clone(&semaphore);
        let output = output.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
            let result = task.await;
            let _ = output.send(result).await;
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await
            && e.is_panic()
        {
            std::panic::resume_unwind(e.into_panic());
        }
    }
}
