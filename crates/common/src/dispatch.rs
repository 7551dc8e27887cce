//! Concurrent fan-out of one prompt to several image models
//!
//! At most `workers` model calls run at once. Results are gathered in
//! completion order; a failing or panicking model contributes nothing and
//! never fails the dispatch.

use crate::generation::{GeneratedImage, ImageGenerator};
use crate::metrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Run `generators` for `prompt` and collect every image produced
pub async fn dispatch(
    generators: Vec<Arc<dyn ImageGenerator>>,
    prompt: &str,
    aspect_ratio: &str,
    workers: usize,
) -> Vec<GeneratedImage> {
    let start = Instant::now();
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    for generator in generators {
        let permits = permits.clone();
        let prompt = prompt.to_string();
        let aspect_ratio = aspect_ratio.to_string();

        tasks.spawn(async move {
            let model = generator.model_name().to_string();
            let result = match permits.acquire_owned().await {
                Ok(_permit) => generator.generate(&prompt, &aspect_ratio).await,
                Err(_) => return (model, Ok(Vec::new())),
            };
            (model, result)
        });
    }

    let mut images = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((model, Ok(generated))) => {
                tracing::debug!(model = %model, count = generated.len(), "Model finished");
                images.extend(generated);
            }
            Ok((model, Err(e))) => {
                tracing::error!(model = %model, error = %e, "Model generation failed");
            }
            Err(e) => {
                tracing::error!(error = %e, "Generation task panicked");
            }
        }
    }

    metrics::record_dispatch(start.elapsed().as_secs_f64(), images.len());
    images
}
