use std::sync::Mutex;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

pub fn copy_label(count: usize) -> String {
    format!("Copy {} items", count)
}

/// The on-screen "Copy N items" control of a capture session.
pub trait ControlSurface: Send + Sync {
    fn show(&self);
    fn set_count(&self, count: usize);
    /// Remove the control. Calling it again is a no-op.
    fn remove(&self);
}

/// Spinner on stderr; the session stops on Enter, Ctrl-C or timeout.
#[derive(Default)]
pub struct SpinnerControl {
    bar: Mutex<Option<ProgressBar>>,
}

impl SpinnerControl {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ControlSurface for SpinnerControl {
    fn show(&self) {
        let Ok(mut slot) = self.bar.lock() else {
            return;
        };
        if slot.is_some() {
            return;
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg} (Enter to export)")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(copy_label(0));
        pb.enable_steady_tick(Duration::from_millis(120));
        *slot = Some(pb);
    }

    fn set_count(&self, count: usize) {
        if let Ok(slot) = self.bar.lock() {
            if let Some(pb) = slot.as_ref() {
                pb.set_message(copy_label(count));
            }
        }
    }

    fn remove(&self) {
        if let Ok(mut slot) = self.bar.lock() {
            if let Some(pb) = slot.take() {
                pb.finish_and_clear();
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use super::*;

    /// Control surface that only remembers what it was told.
    #[derive(Default)]
    pub struct RecordingControl {
        state: Mutex<(bool, Option<String>, usize)>,
    }

    impl RecordingControl {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn visible(&self) -> bool {
            self.state.lock().unwrap().0
        }

        pub fn label(&self) -> Option<String> {
            self.state.lock().unwrap().1.clone()
        }

        pub fn removals(&self) -> usize {
            self.state.lock().unwrap().2
        }
    }

    impl ControlSurface for RecordingControl {
        fn show(&self) {
            let mut s = self.state.lock().unwrap();
            s.0 = true;
            s.1 = Some(copy_label(0));
        }

        fn set_count(&self, count: usize) {
            let mut s = self.state.lock().unwrap();
            if s.0 {
                s.1 = Some(copy_label(count));
            }
        }

        fn remove(&self) {
            let mut s = self.state.lock().unwrap();
            if s.0 {
                s.0 = false;
                s.2 += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spinner_lifecycle() {
        let control = SpinnerControl::new();
        control.set_count(4);
        control.show();
        control.set_count(7);
        assert_eq!(
            control.bar.lock().unwrap().as_ref().unwrap().message(),
            "Copy 7 items"
        );
        control.remove();
        control.remove();
        assert!(control.bar.lock().unwrap().is_none());
    }

    #[test]
    fn recording_ignores_updates_after_removal() {
        let control = recording::RecordingControl::new();
        control.show();
        control.set_count(2);
        assert_eq!(control.label().as_deref(), Some("Copy 2 items"));
        control.remove();
        control.set_count(9);
        control.remove();
        assert!(!control.visible());
        assert_eq!(control.label().as_deref(), Some("Copy 2 items"));
        assert_eq!(control.removals(), 1);
    }
}
