pub mod audio;
pub mod auth;
pub mod config;
pub mod engine;
pub mod events;
pub mod hardware;
pub mod protocol;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod timing;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, ServerConfig};
pub use engine::{RunHandle, spawn_run};
pub use events::{Action, Timeline, TimedEvent};
pub use server::{Acceptor, AddressProvider, ConfiguredAddress, ServerContext};
pub use session::{Session, SessionEnd, SessionError};
pub use shutdown::{CommandShutdown, LogShutdown, ShutdownHook};
pub use timing::{CompileError, Hardware, RunOutcome, compile};
