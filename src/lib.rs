//! # `malloc_pressure`: Keep eating memory until something gives
//!
//! Once per interval we `malloc` a fixed-size block, ask the kernel to pin
//! it with `mlock`, zero every byte so the pages are really committed, and
//! report what happened. Blocks are never freed. This is useful for
//! watching how a host (or a container) behaves as it runs out of RAM: the
//! allocator, page faults, swap, and finally the OOM killer.
//!
//! ```no_run
//! use malloc_pressure::{Config, Pressure};
//!
//! let stdout = std::io::stdout();
//! Pressure::new(Config::default(), stdout.lock()).run();
//! ```
//!
//! We also know how to read back how much memory the process has resident,
//! which is handy for checking that the pressure is real:
//!
//! ```
//! # #[cfg(target_os = "linux")] {
//! let res = malloc_pressure::Resource::Resident;
//! println!("resident: {}", res.used().unwrap());
//! # }
//! ```

#![warn(missing_docs)]

// Needed for `error_chain`, which does evil things with macros.
#![recursion_limit = "1024"]

extern crate libc;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;

use std::fs;
use std::io::prelude::*;
use std::path::Path;
use std::time::Duration;

mod block;
mod pressure;

pub use block::{page_size, Block};
pub use pressure::{Outcome, Pressure};

// Re-export our error types declared by `error-chain`.
pub use errors::{Error, ErrorKind, Result};
use errors::ResultExt;

/// Error types for this crate, declared with [error-chain][].
///
/// [error-chain]: https://docs.rs/error-chain/0.12/error_chain/
mod errors {
    use std::path::PathBuf;

    error_chain! {
        foreign_links {
            Io(::std::io::Error);
        }

        errors {
            /// The system allocator refused to give us memory.
            Allocation(size: usize) {
                description("failed to allocate memory")
                display("failed to allocate {} bytes", size)
            }
            /// The kernel refused to pin a block in physical memory.
            Lock(size: usize) {
                description("could not lock memory")
                display("could not lock {} bytes in memory", size)
            }
            /// An error occurred while trying to access the specified path.
            File(path: PathBuf) {
                description("could not access file with memory data")
                display("could not access {}", path.display())
            }
            /// A status file didn't contain the field we were looking for.
            MissingField(name: String) {
                description("missing field in status file")
                display("no {:?} field found", name)
            }
            /// Our configuration makes no sense.
            InvalidConfig(reason: String) {
                description("invalid configuration")
                display("invalid configuration: {}", reason)
            }
        }
    }
}

/// 100 MiB, the size of every block we allocate by default.
pub const DEFAULT_BLOCK_SIZE: usize = 100 * 1024 * 1024;

/// How the pressure loop behaves. The binary always runs with
/// `Config::default()`; the knobs exist so that the library can be driven
/// with smaller blocks and shorter pauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Bytes to allocate on every cycle.
    pub block_size: usize,
    /// How long to sleep before each allocation.
    pub interval: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            block_size: DEFAULT_BLOCK_SIZE,
            interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Reject configurations that would turn the loop into a busy spin or
    /// a no-op.
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            bail!(ErrorKind::InvalidConfig("block size must be non-zero".into()));
        }
        if self.interval == Duration::from_secs(0) {
            bail!(ErrorKind::InvalidConfig("interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Read a `key: value kB` line out of a `/proc` status file, in bytes.
fn read_status_kb(path: &Path, key: &str) -> Result<u64> {
    let mkerr = || ErrorKind::File(path.to_owned());

    let mut s = String::new();
    let mut f: fs::File = fs::File::open(path).chain_err(&mkerr)?;
    f.read_to_string(&mut s).chain_err(&mkerr)?;
    parse_status_kb(&s, key).chain_err(&mkerr)
}

fn parse_status_kb(status: &str, key: &str) -> Result<u64> {
    for line in status.lines() {
        let mut parts = line.splitn(2, ':');
        if parts.next() != Some(key) {
            continue;
        }
        let value = parts.next().unwrap_or("").trim();
        let kb = value.trim_end_matches("kB").trim();
        let kb: u64 = kb.parse()
            .chain_err(|| ErrorKind::MissingField(key.to_owned()))?;
        return Ok(kb * 1024);
    }
    Err(ErrorKind::MissingField(key.to_owned()).into())
}

/// Kinds of memory we can measure for the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// Bytes actually backed by physical memory (`VmRSS`).
    Resident,
    /// Bytes pinned with `mlock` (`VmLck`).
    Locked,
}

impl Resource {
    /// How many bytes of this resource is the process using right now?
    pub fn used(&self) -> Result<u64> {
        let path = Path::new("/proc/self/status");
        match *self {
            Resource::Resident => read_status_kb(path, "VmRSS"),
            Resource::Locked => read_status_kb(path, "VmLck"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const STATUS: &str = "Name:\tcat\nVmLck:\t       0 kB\nVmRSS:\t    1024 kB\n";

    #[test]
    fn default_config_matches_the_benchmark() {
        let config = Config::default();
        assert_eq!(config.block_size, 104857600);
        assert_eq!(config.interval, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_sized_config_is_rejected() {
        let config = Config { block_size: 0, ..Config::default() };
        match config.validate() {
            Err(Error(ErrorKind::InvalidConfig(_), _)) => {}
            other => panic!("expected invalid config, got {:?}", other),
        }
        let config = Config { interval: Duration::from_secs(0), ..Config::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_status_fields() {
        assert_eq!(parse_status_kb(STATUS, "VmRSS").unwrap(), 1024 * 1024);
        assert_eq!(parse_status_kb(STATUS, "VmLck").unwrap(), 0);
    }

    #[test]
    fn missing_status_field_is_an_error() {
        match parse_status_kb(STATUS, "VmSwap") {
            Err(Error(ErrorKind::MissingField(ref name), _)) => assert_eq!(name, "VmSwap"),
            other => panic!("expected missing field, got {:?}", other),
        }
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn reads_our_own_resident_memory() {
        assert!(Resource::Resident.used().unwrap() > 0);
        Resource::Locked.used().unwrap();
    }
}
