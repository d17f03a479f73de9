use std::env;
use std::io::{self, Write};
use std::process::ExitCode;

use arbor_config::LaunchArgs;

fn main() -> ExitCode {
    let args = match LaunchArgs::parse_from_iter(env::args_os()) {
        Ok(args) => args,
        Err(error) => error.exit(),
    };
    match arbord::run_service(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let mut stderr = io::stderr().lock();
            if writeln!(stderr, "arbord: {error}").is_err() {
                return ExitCode::from(2);
            }
            ExitCode::FAILURE
        }
    }
}
