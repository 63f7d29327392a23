//! Command system for testpar
//!
//! Commands are executed through the Command trait and return the process
//! exit status.

use crate::error::Result;
use crate::ui::UI;

pub mod run;
mod utils;

pub use list_tests::ListTestsCommand;
pub use run::RunCommand;

/// Trait that all commands must implement
pub trait Command {
    /// Execute the command
    fn execute(&self, ui: &mut dyn UI) -> Result<i32>;

    /// Get the command name
    fn name(&self) -> &str;

    /// Get command help text
    fn help(&self) -> &str;
}
