//! Supervised result consumers of the front-end process
//!
//! One consumer per result type watches its queue and applies outcomes to
//! task state:
//!
//! - [`SuccessResultWorker`] - success queue, task becomes DONE with a file
//! - [`ErrorResultWorker`] - error queue, task becomes FAILED
//!
//! [`WorkerManager`] starts one supervised loop per registered
//! [`ResultWorker`], restarts loops that fail and stops them on shutdown.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut manager = WorkerManager::new(broker, config.results.restart_backoff())
//!     .with_max_abandoned(config.results.max_abandoned);
//! manager.register(Arc::new(SuccessResultWorker::new(queue, repo, notifier, metrics)))?;
//! manager.start_workers();
//! // ...
//! manager.shutdown(config.results.shutdown_grace()).await;
//! ```

mod consumer;
pub mod error;
pub mod manager;
pub mod success;
pub mod traits;

pub use consumer::run_worker;
pub use error::ErrorResultWorker;
pub use manager::{DEFAULT_MAX_ABANDONED, ManagerError, WorkerHandle, WorkerManager};
pub use success::SuccessResultWorker;
pub use traits::{ResultWorker, WorkerError, WorkerType};
