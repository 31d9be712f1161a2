//! User-visible notices.
//!
//! Rate limits and mid-turn session errors are surfaced to the user
//! separately from the error value the caller receives. The default sink
//! writes them to the log; UIs plug in their own [`Notifier`].

use std::fmt;

use tracing::warn;

/// A notice meant for the user rather than the calling code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A hosted provider rejected a call with a rate-limit status.
    RateLimited {
        /// Provider name.
        provider: String,
    },
    /// The agent backend reported an error mid-turn.
    SessionError {
        /// Backend error message.
        message: String,
    },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited { provider } => write!(
                f,
                "Rate limit reached for {provider}. Wait a moment and try again."
            ),
            Self::SessionError { message } => write!(f, "Agent session error: {message}"),
        }
    }
}

/// Receives user-visible notices.
pub trait Notifier: Send + Sync {
    /// Displays or records a notice.
    fn notify(&self, notice: &Notice);
}

/// Notifier that writes notices to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: &Notice) {
        warn!(notice = %notice, "user notice");
    }
}
