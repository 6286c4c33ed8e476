//! Application services shared by the HTTP API and the bot surface

pub mod error;
pub mod schemas;
pub mod task;

pub use error::TaskServiceError;
pub use schemas::{
    CacheView, CreateBotTaskIn, CreateTaskIn, CreateTaskOut, FileFull, FileSimple, TaskFull,
    TaskProjection, TaskSimple,
};
pub use task::TaskService;
