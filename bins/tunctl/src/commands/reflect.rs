//! tunctl reflect command implementation.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tunnels::Error;
use tunnels::rawsock::{DEFAULT_BUFFER_SIZE, RawSocketConfig, RawSocketLink};

#[derive(Args)]
pub struct ReflectCmd {
    /// Interface to capture on.
    interface: String,

    /// Stop after this many frames.
    #[arg(long, short)]
    count: Option<u64>,

    /// Receive buffer size.
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,
}

impl ReflectCmd {
    pub fn run(&self) -> Result<()> {
        let config = RawSocketConfig::new(&self.interface).buffer_size(self.buffer_size);
        let mut link = RawSocketLink::create(&config)?;
        let mut buf = vec![0u8; self.buffer_size];
        let mut reflected = 0u64;

        while self.count.is_none_or(|count| reflected < count) {
            let len = match link.read(&mut buf) {
                Ok(len) => len,
                Err(e) if e.is_would_block() => {
                    std::thread::sleep(Duration::from_millis(1));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match link.write(&buf[..len]) {
                Ok(_) => {
                    reflected += 1;
                    tracing::debug!(len, target = ?link.last_target(), "reflected");
                }
                Err(e @ Error::MalformedFrame { .. }) => tracing::warn!("skipping frame: {}", e),
                Err(e) => return Err(e.into()),
            }
        }

        println!("{} frames reflected", reflected);
        Ok(())
    }
}
