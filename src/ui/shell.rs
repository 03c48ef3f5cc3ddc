//! Window-level state of the pet: click-through and its toggles.
//!
//! Click-through flips on Ctrl+Shift+C while the window has focus. Once
//! input passes through, the window can no longer receive key presses, so
//! on unix `SIGUSR1` flips it as well (bind `pkill -USR1 vrmpet` to a
//! desktop shortcut).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;

/// Owned by the app; no global state.
#[derive(Debug, Default)]
pub struct ShellState {
    click_through: bool,
    /// Raised by the signal listener, consumed on the next frame
    toggle_requested: Arc<AtomicBool>,
    /// Whether the window still needs to be told about `click_through`
    dirty: bool,
}

impl ShellState {
    pub fn new(click_through: bool) -> Self {
        Self {
            click_through,
            toggle_requested: Arc::new(AtomicBool::new(false)),
            // Apply the initial state on the first frame
            dirty: true,
        }
    }

    pub fn click_through(&self) -> bool {
        self.click_through
    }

    pub fn toggle(&mut self) {
        self.click_through = !self.click_through;
        self.dirty = true;
        tracing::info!(
            "Click-through {}",
            if self.click_through { "enabled" } else { "disabled" }
        );
    }

    /// Handle for asynchronous toggle sources.
    pub fn toggle_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.toggle_requested)
    }

    /// Fold in this frame's inputs and return the passthrough value to send
    /// to the window, if it changed.
    pub fn poll(&mut self, hotkey_pressed: bool) -> Option<bool> {
        if self.toggle_requested.swap(false, Ordering::AcqRel) {
            self.toggle();
        }
        if hotkey_pressed {
            self.toggle();
        }
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        Some(self.click_through)
    }
}

/// Raise `flag` and call `wake` on every `SIGUSR1`.
#[cfg(unix)]
pub fn spawn_signal_toggle(
    runtime: &Handle,
    flag: Arc<AtomicBool>,
    wake: impl Fn() + Send + 'static,
) {
    use tokio::signal::unix::{signal, SignalKind};

    runtime.spawn(async move {
        let mut usr1 = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("SIGUSR1 click-through toggle unavailable: {}", e);
                return;
            }
        };
        while usr1.recv().await.is_some() {
            tracing::debug!("SIGUSR1 received");
            flag.store(true, Ordering::Release);
            wake();
        }
    });
}

#[cfg(not(unix))]
pub fn spawn_signal_toggle(
    _runtime: &Handle,
    _flag: Arc<AtomicBool>,
    _wake: impl Fn() + Send + 'static,
) {
}
