//! SIGINT/SIGTERM handling: a shared flag the loop and agent runner poll.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

/// Set once an interrupt signal arrives. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// A flag that nothing sets except [`Interrupt::trigger`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Register SIGINT and SIGTERM to set the flag.
    pub fn install() -> Result<Self> {
        let interrupt = Self::new();
        #[cfg(unix)]
        {
            use signal_hook::consts::{SIGINT, SIGTERM};
            for signal in [SIGINT, SIGTERM] {
                signal_hook::flag::register(signal, Arc::clone(&interrupt.flag))
                    .with_context(|| format!("register handler for signal {signal}"))?;
            }
        }
        Ok(interrupt)
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}
