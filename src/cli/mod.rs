pub(crate) mod command;

pub use self::command::{
    Args, Command, ConfigArgs, EraseMemArgs, FetchArgs, OutputFormat, SerialArgs,
};
