//! Bundled Action Types
//!
//! - [`echo`]: Writes a message to the action log
//! - [`shell`]: Runs a command or script file through a shell
//! - [`external`]: Executables discovered in action directories
//! - [`emission`]: Outcome marker protocol shared by process-backed actions

use std::sync::Arc;

use crate::execution::Action;

pub mod echo;
pub mod emission;
pub mod external;
mod process;
pub mod shell;

pub use echo::EchoAction;
pub use external::ExternalAction;
pub use shell::ShellAction;

/// Built-in action types with their registered names.
pub fn builtins() -> Vec<(&'static str, Arc<dyn Action>)> {
    let echo: Arc<dyn Action> = Arc::new(EchoAction);
    let shell: Arc<dyn Action> = Arc::new(ShellAction);
    vec![("echo", echo), ("shell", shell)]
}
