//! Automation task host: Lua tasklets driven cooperatively over the
//! world model, with persisted enable/disable settings.

pub mod context;
pub mod host;
pub mod script;
pub mod settings;

pub use context::BotContext;
pub use host::{TaskHost, TaskStatus};
pub use settings::BotSettings;
