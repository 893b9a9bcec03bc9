use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use tracing::{debug, warn};

use crate::config::{Settings, MAX_DELAY_SECS};
use crate::error::{FetchError, StageError};

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Raw response of one GET.
#[derive(Debug, Clone)]
pub struct Page {
    pub status: u16,
    pub body: String,
}

/// The only way the crate talks to the network.
pub trait Fetch {
    fn get(&self, url: &str) -> Result<Page, FetchError>;
}

/// Blocking HTTPS client with the configured user agent and timeout.
pub struct HttpFetcher {
    client: Client,
    user_agent: String,
    cancel: CancelToken,
}

impl HttpFetcher {
    pub fn new(settings: &Settings, cancel: CancelToken) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(HttpFetcher {
            client,
            user_agent: settings.user_agent.clone(),
            cancel,
        })
    }
}

impl Fetch for HttpFetcher {
    fn get(&self, url: &str) -> Result<Page, FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled { url: url.to_string() });
        }
        let start = Instant::now();
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()
            .map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let body = response.text().map_err(transport)?;
        debug!(
            url,
            status = status.as_u16(),
            bytes = body.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "fetched"
        );
        Ok(Page {
            status: status.as_u16(),
            body,
        })
    }
}

/// Shared stop flag, tripped by Ctrl-C.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Flat delay between consecutive outbound fetches of one stage.
///
/// The first call to [`Pacer::wait`] returns immediately; every later call
/// sleeps the full delay. The sleep is sliced so a cancellation is observed
/// within ~100ms.
pub struct Pacer {
    delay: Duration,
    cancel: CancelToken,
    started: bool,
}

impl Pacer {
    /// Negative or NaN delays read as zero; delays past [`MAX_DELAY_SECS`]
    /// are capped there.
    pub fn new(delay_secs: f64, cancel: CancelToken) -> Self {
        let max = Duration::from_secs_f64(MAX_DELAY_SECS);
        let delay = match Duration::try_from_secs_f64(delay_secs.max(0.0)) {
            Ok(d) if d <= max => d,
            _ => {
                warn!(delay_secs, "delay out of range, capping at {}s", MAX_DELAY_SECS);
                max
            }
        };
        Pacer {
            delay,
            cancel,
            started: false,
        }
    }

    pub fn wait(&mut self) -> Result<(), StageError> {
        if self.cancel.is_cancelled() {
            return Err(StageError::Interrupted);
        }
        if !self.started {
            self.started = true;
            return Ok(());
        }
        let deadline = Instant::now() + self.delay;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
            if self.cancel.is_cancelled() {
                return Err(StageError::Interrupted);
            }
        }
        Ok(())
    }
}

/// Trip `cancel` on Ctrl-C. Runs a single-threaded runtime on its own thread
/// so the blocking pipeline stays untouched.
pub fn install_ctrl_c(cancel: CancelToken) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                tracing::warn!("Ctrl-C handler unavailable: {}", e);
                return;
            }
        };
        runtime.block_on(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping at the next request boundary");
                cancel.cancel();
            }
        });
    });
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_wait_is_immediate() {
        let mut pacer = Pacer::new(5.0, CancelToken::new());
        let start = Instant::now();
        pacer.wait().unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn cancelled_pacer_interrupts() {
        let cancel = CancelToken::new();
        let mut pacer = Pacer::new(0.0, cancel.clone());
        pacer.wait().unwrap();
        cancel.cancel();
        assert!(matches!(pacer.wait(), Err(StageError::Interrupted)));
    }

    #[test]
    fn later_waits_sleep_the_full_delay() {
        let mut pacer = Pacer::new(0.2, CancelToken::new());
        pacer.wait().unwrap();
        let start = Instant::now();
        pacer.wait().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(200));
        let start = Instant::now();
        pacer.wait().unwrap();
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn huge_or_infinite_delay_is_capped() {
        let max = Duration::from_secs_f64(MAX_DELAY_SECS);
        for secs in [1e20, f64::INFINITY] {
            let pacer = Pacer::new(secs, CancelToken::new());
            assert_eq!(pacer.delay, max);
        }
        assert_eq!(Pacer::new(-3.0, CancelToken::new()).delay, Duration::ZERO);
        assert_eq!(Pacer::new(f64::NAN, CancelToken::new()).delay, Duration::ZERO);
    }

    #[test]
    fn zero_delay_does_not_sleep() {
        let mut pacer = Pacer::new(0.0, CancelToken::new());
        let start = Instant::now();
        for _ in 0..5 {
            pacer.wait().unwrap();
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
