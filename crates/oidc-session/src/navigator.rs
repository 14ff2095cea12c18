//! Navigation seam for authorize and end-session redirects

use parking_lot::Mutex;
use std::fmt;
use url::Url;

use crate::error::Result;

/// Performs the full-page navigation of a redirect-capable host
pub trait Navigator: Send + Sync + fmt::Debug {
    /// Navigate to `url`
    ///
    /// # Errors
    ///
    /// Implementations return an error if the navigation cannot be started.
    fn navigate(&self, url: &Url) -> Result<()>;
}

/// Navigator that records every URL instead of leaving the process
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    visited: Mutex<Vec<Url>>,
}

impl RecordingNavigator {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// URLs navigated to so far
    pub fn visited(&self) -> Vec<Url> {
        self.visited.lock().clone()
    }

    /// Most recent navigation
    pub fn last(&self) -> Option<Url> {
        self.visited.lock().last().cloned()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, url: &Url) -> Result<()> {
        self.visited.lock().push(url.clone());
        Ok(())
    }
}
