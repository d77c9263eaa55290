mod cancel;
mod scheduler;
mod sequence;

pub use cancel::CancellationToken;
pub use scheduler::{Hardware, RunOutcome, SchedulerSettings, run};
pub use sequence::{
    Clause, CompileError, CompileLimits, STOP_TAIL_MS, compile, compile_with, parse_clause,
    parse_sequence,
};
