//! Interruption by signal.
//!

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicBool, Ordering},
};

use nix::{
    libc,
    sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction},
};

static SIGNAL_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn on_signal(_signal: libc::c_int) {
    if let Some(flag) = SIGNAL_FLAG.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

/// A flag raised when the run should stop.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// An interrupt raised by `SIGINT`, `SIGTERM` or `SIGHUP`.
    ///
    /// The handlers replace the default ones, so the process keeps running until it checks the
    /// flag.
    pub fn from_signals() -> Result<Self, nix::Error> {
        let flag = SIGNAL_FLAG.get_or_init(|| Arc::new(AtomicBool::new(false)));
        let interrupt = Self {
            flag: Arc::clone(flag),
        };

        let action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );

        for signal in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP] {
            // SAFETY: the handler only stores to an atomic.
            unsafe { sigaction(signal, &action) }?;
        }

        Ok(interrupt)
    }

    /// Raise the flag.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// If the flag has been raised.
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
