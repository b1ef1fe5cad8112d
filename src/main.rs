//! Allocate, pin and zero a 100 MiB block every second, forever.
//!
//! Reports go to stdout, one line per block. Set `RUST_LOG=debug` to see
//! what the kernel made of each block on stderr.

#[macro_use]
extern crate error_chain;
extern crate env_logger;
extern crate malloc_pressure;

use std::io;

use malloc_pressure::{Config, Pressure, Result};

fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error"))
        .target(env_logger::Target::Stderr)
        .init();

    let config = Config::default();
    config.validate()?;

    // `Stdout` is line-buffered, so each report shows up as soon as it's
    // written, even through a pipe.
    Pressure::new(config, io::stdout()).run()
}

/// Allow `error_chain` to declare a `main` function that calls `run`
/// and prints out any errors.
quick_main!(run);
