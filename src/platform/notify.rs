use super::Notifier;

/// Terminal notification surface.
///
/// Transient messages go to stdout; blocking errors go to stderr and stay
/// "open" until dismissed, which only matters for callers that check
/// [`ConsoleNotifier::has_open_error`].
#[derive(Debug, Default)]
pub struct ConsoleNotifier {
    open_error: std::sync::atomic::AtomicBool,
}

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_open_error(&self) -> bool {
        self.open_error.load(std::sync::atomic::Ordering::Acquire)
    }
}

impl Notifier for ConsoleNotifier {
    fn show_transient_message(&self, text: &str) {
        log::debug!("toast: {}", text);
        println!("✓ {}", text);
    }

    fn show_blocking_error(&self, text: &str) {
        log::debug!("error modal: {}", text);
        self.open_error
            .store(true, std::sync::atomic::Ordering::Release);
        eprintln!("✗ {}", text);
    }

    fn dismiss_error(&self) {
        self.open_error
            .store(false, std::sync::atomic::Ordering::Release);
    }
}
