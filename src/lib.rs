pub mod app;
pub mod cli;
pub mod codec;
pub mod error;
pub mod fetch;
pub mod fleet;
pub mod protocol;
pub mod router;
pub mod session;
mod telemetry;
pub mod transport;

pub use app::{AdapterFactory, BtleplugAdapterFactory, Confirm, StdinConfirm, run, run_with};
pub use cli::{Args, Command, ConfigArgs, EraseMemArgs, FetchArgs, OutputFormat, SerialArgs};
pub use error::GspError;
pub use session::Session;
