use std::process::ExitCode;

use clap::Parser;

use crate::cli::App;

mod api;
mod cli;
mod config;
mod events;
mod github;
mod redis;
mod store;
mod utils;

fn main() -> ExitCode {
    // Panics get a backtrace, library errors don't, unless overridden.
    for (key, value) in [("RUST_BACKTRACE", "1"), ("RUST_LIB_BACKTRACE", "0")] {
        if std::env::var_os(key).is_none() {
            // SAFETY: no other threads exist yet.
            unsafe { std::env::set_var(key, value) };
        }
    }

    match App::parse().run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}
