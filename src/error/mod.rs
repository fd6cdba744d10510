mod app;
mod config;
mod coordinator;
mod dispatch;
mod schedule;
mod server;
mod store;
mod validation;

#[cfg(test)]
mod test_support;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use coordinator::CoordinatorError;
pub use dispatch::DispatchError;
pub use schedule::ScheduleRuleError;
pub use server::ServerError;
pub use store::StoreError;
pub use validation::ValidationError;
