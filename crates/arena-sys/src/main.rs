// Dedicated server entry point.
//
//   1. cvars from the command line (`+set name value`, `+exec file`)
//   2. logging from `log_level` / `log_json`
//   3. run until `sv_run_seconds` elapses (or forever)

use std::process::ExitCode;

use arena_common::common;
use arena_sys::sys_ded;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let startup = match sys_ded::init(&args) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("arena-ded: {}", e);
            return ExitCode::FAILURE;
        }
    };
    common::init_logging(&startup.log_level, startup.log_json);

    match sys_ded::run(startup) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {}", e);
            ExitCode::FAILURE
        }
    }
}
