use std::process::ExitCode;

use refcoord::ui::output;

fn main() -> ExitCode {
    match refcoord::cli::run() {
        Ok(code) => code,
        Err(err) => {
            output::error(format!("{err:#}"));
            ExitCode::from(2)
        }
    }
}
