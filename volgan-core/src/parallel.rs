//! Parallel processing utilities for the volume kernels
//!
//! Kernels call into these helpers instead of touching rayon directly so that a
//! dedicated, configurable thread pool can be installed once per process.

use crate::error::{Error, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, OnceLock};

/// Dedicated thread pool for volume kernels (the global rayon pool when unset)
static GLOBAL_THREAD_POOL: OnceLock<Arc<ThreadPool>> = OnceLock::new();
static THREAD_POOL_CONFIG: Mutex<ThreadPoolConfig> = Mutex::new(ThreadPoolConfig::new());

/// Thread pool configuration for parallel processing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadPoolConfig {
    /// Number of threads to use (None = automatic)
    pub num_threads: Option<usize>,
    /// Thread stack size in bytes
    pub stack_size: Option<usize>,
    /// Thread name prefix
    pub thread_name_prefix: String,
    /// Enable parallel processing (can be disabled for debugging)
    pub enabled: bool,
    /// Minimum number of independent work items before going parallel
    pub min_parallel_len: usize,
}

impl ThreadPoolConfig {
    const fn new() -> Self {
        Self {
            num_threads: None,
            stack_size: None,
            thread_name_prefix: String::new(),
            enabled: true,
            min_parallel_len: 2,
        }
    }

    /// Set number of threads
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    /// Set stack size
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Enable or disable parallel processing
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_min_parallel_len(mut self, min_parallel_len: usize) -> Self {
        self.min_parallel_len = min_parallel_len.max(1);
        self
    }
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            stack_size: Some(8 * 1024 * 1024),
            thread_name_prefix: "volgan-worker".to_string(),
            enabled: true,
            min_parallel_len: 2,
        }
    }
}

/// Initialize the dedicated thread pool with custom configuration
///
/// Only the first successful call installs a pool; later calls only update the
/// `enabled` and `min_parallel_len` switches.
pub fn init_thread_pool(config: ThreadPoolConfig) -> Result<()> {
    if GLOBAL_THREAD_POOL.get().is_none() {
        let mut builder = ThreadPoolBuilder::new()
            .num_threads(config.num_threads.unwrap_or_else(num_cpus::get));

        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        if !config.thread_name_prefix.is_empty() {
            let prefix = config.thread_name_prefix.clone();
            builder = builder.thread_name(move |index| format!("{}-{}", prefix, index));
        }

        let pool = builder
            .build()
            .map_err(|e| Error::ThreadPool(format!("Failed to create thread pool: {}", e)))?;

        GLOBAL_THREAD_POOL
            .set(Arc::new(pool))
            .map_err(|_| Error::ThreadPool("Thread pool already initialized".to_string()))?;

        tracing::debug!(
            threads = config.num_threads.unwrap_or_else(num_cpus::get),
            "initialized volgan thread pool"
        );
    }

    if let Ok(mut global_config) = THREAD_POOL_CONFIG.lock() {
        *global_config = config;
    }

    Ok(())
}

/// Get current thread pool configuration
pub fn get_config() -> ThreadPoolConfig {
    THREAD_POOL_CONFIG
        .lock()
        .map(|config| config.clone())
        .unwrap_or_else(|_| ThreadPoolConfig::default())
}

/// Whether a job with `len` independent work items should run in parallel
pub fn should_parallelize(len: usize) -> bool {
    let config = get_config();
    config.enabled && len >= config.min_parallel_len
}

/// Number of worker threads kernels will see
pub fn current_num_threads() -> usize {
    match GLOBAL_THREAD_POOL.get() {
        Some(pool) => pool.current_num_threads(),
        None => rayon::current_num_threads(),
    }
}

/// Execute a parallel operation inside the dedicated pool when one is installed
pub fn execute_parallel<F, R>(op: F) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    match GLOBAL_THREAD_POOL.get() {
        Some(pool) => pool.install(op),
        None => op(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ThreadPoolConfig::default();
        assert!(config.enabled);
        assert_eq!(config.thread_name_prefix, "volgan-worker");
        assert_eq!(config.stack_size, Some(8 * 1024 * 1024));
    }

    #[test]
    fn test_builder_methods() {
        let config = ThreadPoolConfig::default()
            .with_threads(3)
            .with_stack_size(1024)
            .with_enabled(false)
            .with_min_parallel_len(0);
        assert_eq!(config.num_threads, Some(3));
        assert_eq!(config.stack_size, Some(1024));
        assert!(!config.enabled);
        assert_eq!(config.min_parallel_len, 1);
    }

    #[test]
    fn test_installed_pool_runs_parallel_work() {
        use rayon::prelude::*;

        let config = ThreadPoolConfig::default().with_threads(2);
        init_thread_pool(config.clone()).unwrap();
        assert_eq!(current_num_threads(), 2);
        assert_eq!(get_config(), config);
        assert!(should_parallelize(2));
        assert!(!should_parallelize(1));

        let (sum, worker) = execute_parallel(|| {
            let sum: u64 = (0..1000u64).into_par_iter().map(|v| v * 2).sum();
            let worker = std::thread::current().name().map(str::to_string);
            (sum, worker)
        });
        assert_eq!(sum, 999_000);
        let worker = worker.unwrap();
        assert!(worker.starts_with("volgan-worker-"), "ran on {}", worker);

        // A second call keeps the installed pool.
        init_thread_pool(ThreadPoolConfig::default().with_threads(5)).unwrap();
        assert_eq!(current_num_threads(), 2);
    }

    #[test]
    fn test_execute_parallel_returns_value() {
        let sum: i32 = execute_parallel(|| (1..=10).sum());
        assert_eq!(sum, 55);
        assert!(current_num_threads() >= 1);
    }
}
