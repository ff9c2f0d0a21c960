use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Async-signal state, read and cleared by the engine at the top of each
/// tick. Handlers only flip flags; no work happens in signal context.
#[derive(Debug, Clone, Default)]
pub struct SignalFlags {
    reset: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
}

impl SignalFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise_reset(&self) {
        self.reset.store(true, Ordering::SeqCst);
    }

    pub fn raise_reload(&self) {
        self.reload.store(true, Ordering::SeqCst);
    }

    pub fn take_reset(&self) -> bool {
        self.reset.swap(false, Ordering::SeqCst)
    }

    pub fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::SeqCst)
    }

    /// Wire the flags to SIGUSR1 (reset) and SIGHUP (reload). Must be called
    /// from inside a tokio runtime.
    #[cfg(unix)]
    pub fn install(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut usr1 = signal(SignalKind::user_defined1())?;
        let reset = self.reset.clone();
        tokio::spawn(async move {
            while usr1.recv().await.is_some() {
                reset.store(true, Ordering::SeqCst);
            }
        });

        let mut hup = signal(SignalKind::hangup())?;
        let reload = self.reload.clone();
        tokio::spawn(async move {
            while hup.recv().await.is_some() {
                reload.store(true, Ordering::SeqCst);
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_one_shot() {
        let flags = SignalFlags::new();
        assert!(!flags.take_reset());
        flags.raise_reset();
        assert!(flags.take_reset());
        assert!(!flags.take_reset());
        flags.raise_reload();
        assert!(flags.take_reload());
        assert!(!flags.take_reload());
    }
}
