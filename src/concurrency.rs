use crate::error::{PipelineError, PipelineResult};

/// Resolve a requested parallelism degree to the effective one.
///
/// Unset defaults to half the host's logical processors, clamped to at
/// least 1. The resolved value is what the frame fan-out and the run
/// summary both see, so operators observe the concurrency actually used.
pub fn resolve_concurrency(requested: Option<usize>) -> PipelineResult<usize> {
    match requested {
        Some(0) => Err(PipelineError::config("concurrency must be >= 1 when set")),
        Some(n) => Ok(n),
        None => Ok((num_cpus::get() / 2).max(1)),
    }
}

pub(crate) fn build_thread_pool(threads: usize) -> PipelineResult<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| PipelineError::render(format!("failed to build rayon thread pool: {e}")))
}
