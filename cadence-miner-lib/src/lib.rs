mod channel;
pub mod logger;
mod mining;
pub mod probe;
pub mod rpc;
mod schedule;
mod scheduler;
pub mod settings;
mod tip;
pub mod tls;

#[cfg(test)]
mod mock;

pub use channel::HttpChannel;
pub use logger::{init_global_logger, LogRecord, LogSeverity, Logger, LoggerConfig};
pub use mining::{mine, MineError, MiningAttempt, MiningAttemptError, StopRequestError};
pub use rpc::{PendingCall, RpcChannel, RpcError};
pub use schedule::{plan, ScheduleDecision};
pub use scheduler::{Cycle, CycleOutcome, MiningStats, Scheduler, SchedulerSettings};
pub use settings::{ConfigSettings, Settings};
pub use tip::{observe_tip, ObservationError, TipObservation, OBSERVE_DEADLINE};
