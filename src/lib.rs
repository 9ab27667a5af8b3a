pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod model;
pub mod queue;
pub mod reward;
pub mod sm2;
pub mod store;

pub use config::SchedulerConfig;
pub use engine::Scheduler;
pub use error::{EngineError, StoreError};
pub use model::{CardRef, FlashcardProgress, ProgressStats, ReviewPhase, ReviewReceipt};
pub use reward::{LogSink, RewardBus, RewardGrant, RewardSink};
pub use store::memory::MemoryStore;
pub use store::postgres::PgProgressStore;
pub use store::ProgressStore;
