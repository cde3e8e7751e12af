//! Long-lived background loops with cancellation
//!
//! A loop ticks on the injected clock, runs one pass per tick, and exits once its
//! token is cancelled. A pass that is already running when cancellation arrives is
//! allowed to finish. Panics inside a pass are caught and logged so one bad tick does
//! not take the loop down.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::clock::{ticker, SharedClock};

/// Handle to a running periodic loop
#[derive(Debug)]
pub struct BackgroundLoop {
    name: &'static str,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundLoop {
    /// Spawn `pass` every `period` until `token` is cancelled
    pub fn spawn<F, Fut>(
        name: &'static str,
        clock: SharedClock,
        period: Duration,
        token: CancellationToken,
        mut pass: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            info!("🚀 {} loop started (every {:?})", name, period);
            let mut ticker = ticker(&clock, period);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if let Err(panic) = AssertUnwindSafe(pass()).catch_unwind().await {
                    error!("💥 {} pass panicked: {}", name, panic_message(panic.as_ref()));
                }
            }
            info!("🛑 {} loop stopped", name);
        });

        Self {
            name,
            token,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Cancel and wait for the in-flight pass to drain
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            debug!("{} loop join failed: {}", self.name, e);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
