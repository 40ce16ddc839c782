//! Scoped ownership of a browser tab.

use crate::renderer::RenderContext;
use tracing::{debug, warn};

/// Holds a render context for the duration of one capture.
///
/// [`TabGuard::close`] closes the tab on the normal path. If the guard is
/// dropped while still holding the tab (early return, timeout, cancelled
/// future, unwinding), the close is scheduled on the current runtime.
pub struct TabGuard {
    context: Option<Box<dyn RenderContext>>,
}

impl TabGuard {
    pub fn new(context: Box<dyn RenderContext>) -> Self {
        Self {
            context: Some(context),
        }
    }

    /// Borrow the held context. `None` only after [`TabGuard::close`].
    pub fn context_mut(&mut self) -> Option<&mut (dyn RenderContext + 'static)> {
        self.context.as_deref_mut()
    }

    /// Close the tab and wait for the browser to acknowledge.
    pub async fn close(mut self) {
        if let Some(context) = self.context.take() {
            if let Err(e) = context.close().await {
                warn!("failed to close tab: {e:#}");
            }
        }
    }
}

impl Drop for TabGuard {
    fn drop(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("tab dropped without explicit close; scheduling close");
                handle.spawn(async move {
                    if let Err(e) = context.close().await {
                        warn!("deferred tab close failed: {e:#}");
                    }
                });
            }
            Err(_) => warn!("tab dropped outside a runtime; browser will reap it on shutdown"),
        }
    }
}
