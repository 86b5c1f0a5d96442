//! Push receiver pipeline, invoked by git from a repository's hooks.

pub mod command;
pub mod input;
pub mod receiver;

pub use command::CommandHandler;
pub use input::{classify, parse_line, read_hook_input, Action, HookInfo, ZERO_REV};
pub use receiver::{is_force_push, PushHandler, ReceiveError, Receiver, ReceiverConfig, Workspace};
