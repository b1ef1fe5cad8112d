//! The allocate-pin-fill loop.

use std::io::Write;
use std::thread;

use block::{page_size, Block};
use errors::*;
use super::{Config, Resource};

/// What happened during one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// We allocated and zeroed this many bytes.
    Wrote(usize),
    /// The allocator had nothing for us.
    Failed,
}

/// Allocates a block every `config.interval` and never gives any of them
/// back, reporting each attempt on `out`.
pub struct Pressure<W> {
    config: Config,
    out: W,
    cycles: u64,
    committed: u64,
}

impl<W: Write> Pressure<W> {
    /// Create a new loop which reports to `out`.
    pub fn new(config: Config, out: W) -> Pressure<W> {
        Pressure { config, out, cycles: 0, committed: 0 }
    }

    /// How many cycles have run so far, successful or not.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Total bytes allocated and zeroed by successful cycles.
    pub fn committed(&self) -> u64 {
        self.committed
    }

    /// Borrow the report sink, mostly so tests can inspect it.
    pub fn output(&self) -> &W {
        &self.out
    }

    /// Sleep, then try to allocate, pin and fill one block.
    ///
    /// Running out of memory isn't an error here, it's the whole point, so
    /// it comes back as `Outcome::Failed`. We only return `Err` if we can't
    /// write our report.
    pub fn cycle(&mut self) -> Result<Outcome> {
        thread::sleep(self.config.interval);
        self.cycles += 1;

        let mut block = match Block::allocate(self.config.block_size) {
            Ok(block) => block,
            Err(Error(ErrorKind::Allocation(size), _)) => {
                debug!("cycle {}: allocator refused {} bytes", self.cycles, size);
                writeln!(self.out, "Failed to allocate memory")?;
                self.out.flush()?;
                return Ok(Outcome::Failed);
            }
            Err(e) => return Err(e),
        };

        // Pinning is best-effort; unprivileged processes usually can't.
        if let Err(e) = block.lock() {
            debug!("cycle {}: {}", self.cycles, e);
        }

        let written = block.fill();
        self.committed += written as u64;
        debug!("cycle {}: touched {} pages, {} bytes committed, resident {:?}",
               self.cycles,
               (written + page_size() - 1) / page_size(),
               self.committed,
               Resource::Resident.used().ok());

        writeln!(self.out, "Wrote {} bytes", written)?;
        self.out.flush()?;
        Ok(Outcome::Wrote(written))
    }

    /// Run cycles until the process is killed.
    pub fn run(&mut self) -> ! {
        info!("allocating {} bytes every {:?} (page size {})",
              self.config.block_size,
              self.config.interval,
              page_size());
        loop {
            if let Err(e) = self.cycle() {
                warn!("could not report cycle {}: {}", self.cycles, e);
            }
        }
    }
}
