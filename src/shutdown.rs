use std::process::Command;

use tracing::{error, info, warn};

/// Host power-off, invoked after the shutdown reply has been sent.
pub trait ShutdownHook: Send {
    fn request_shutdown(&self);
}

/// Runs a configured program, e.g. `sudo shutdown -h now`.
pub struct CommandShutdown {
    argv: Vec<String>,
}

impl CommandShutdown {
    /// `None` when `argv` names no program.
    pub fn new(argv: Vec<String>) -> Option<Self> {
        if argv.is_empty() {
            return None;
        }
        Some(Self { argv })
    }
}

impl ShutdownHook for CommandShutdown {
    fn request_shutdown(&self) {
        let Some((program, args)) = self.argv.split_first() else {
            return;
        };
        info!(program, ?args, "running shutdown command");
        match Command::new(program).args(args).spawn() {
            Ok(child) => info!(pid = child.id(), "shutdown command started"),
            Err(e) => error!(error = %e, program, "failed to run shutdown command"),
        }
    }
}

/// Leaves the host running; only records the request.
pub struct LogShutdown;

impl ShutdownHook for LogShutdown {
    fn request_shutdown(&self) {
        warn!("shutdown requested but no shutdown command is configured");
    }
}
