use crate::error::Result;
use crate::reactor::Reactor;

use std::time::Duration;

/// Tunables of a reactor.
#[derive(Clone, Debug)]
pub(crate) struct Config {
    pub(crate) max_sockets: usize,
    pub(crate) event_capacity: usize,
    pub(crate) command_capacity: usize,
    pub(crate) min_read_buffer: usize,
    pub(crate) max_read_buffer: usize,
    pub(crate) udp_buffer: usize,
    pub(crate) warning_threshold: usize,
    pub(crate) wait_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_sockets: 1 << 16,
            event_capacity: 64,
            command_capacity: 4096,
            min_read_buffer: 64,
            max_read_buffer: 1 << 20,
            udp_buffer: 65535,
            warning_threshold: 1 << 20,
            wait_timeout: None,
        }
    }
}

/// Builder for configuring and creating a [`Reactor`].
///
/// # Examples
///
/// ```rust,no_run
/// let reactor = sockmux::ReactorBuilder::new()
///     .max_sockets(1024)
///     .event_capacity(128)
///     .build()
///     .expect("reactor");
/// ```
pub struct ReactorBuilder {
    config: Config,
}

impl ReactorBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Sets the size of the socket slot table, the upper bound on
    /// simultaneously live sockets.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn max_sockets(mut self, n: usize) -> Self {
        assert!(n > 0, "max_sockets must be > 0");

        self.config.max_sockets = n;
        self
    }

    /// Sets how many readiness events one `wait()` may return.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn event_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "event_capacity must be > 0");

        self.config.event_capacity = n;
        self
    }

    /// Sets the capacity of the command channel. Producers block while it
    /// is full.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn command_capacity(mut self, n: usize) -> Self {
        assert!(n > 0, "command_capacity must be > 0");

        self.config.command_capacity = n;
        self
    }

    /// Sets the bounds of the adaptive TCP read buffer.
    ///
    /// # Panics
    ///
    /// Panics if `min == 0` or `min > max`.
    pub fn read_buffer(mut self, min: usize, max: usize) -> Self {
        assert!(min > 0, "read buffer minimum must be > 0");
        assert!(min <= max, "read buffer minimum exceeds maximum");

        self.config.min_read_buffer = min;
        self.config.max_read_buffer = max;
        self
    }

    /// Sets the size of the shared datagram receive buffer.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn udp_buffer(mut self, n: usize) -> Self {
        assert!(n > 0, "udp_buffer must be > 0");

        self.config.udp_buffer = n;
        self
    }

    /// Sets the queued-bytes level at which write-queue warnings start.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn warning_threshold(mut self, n: usize) -> Self {
        assert!(n > 0, "warning_threshold must be > 0");

        self.config.warning_threshold = n;
        self
    }

    /// Bounds each blocking wait of [`Reactor::poll`]. `None` waits
    /// indefinitely.
    pub fn wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.wait_timeout = timeout;
        self
    }

    /// Creates the poller and the command channel.
    pub fn build(self) -> Result<Reactor> {
        Reactor::with_config(self.config)
    }
}

impl Default for ReactorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ReactorBuilder::new().config;

        assert_eq!(config.max_sockets, 65536);
        assert_eq!(config.min_read_buffer, 64);
        assert_eq!(config.udp_buffer, 65535);
        assert!(config.wait_timeout.is_none());
    }

    #[test]
    fn setters_apply() {
        let config = ReactorBuilder::new()
            .max_sockets(8)
            .read_buffer(16, 256)
            .warning_threshold(1024)
            .wait_timeout(Some(Duration::from_millis(5)))
            .config;

        assert_eq!(config.max_sockets, 8);
        assert_eq!((config.min_read_buffer, config.max_read_buffer), (16, 256));
        assert_eq!(config.warning_threshold, 1024);
        assert_eq!(config.wait_timeout, Some(Duration::from_millis(5)));
    }

    #[test]
    #[should_panic(expected = "max_sockets must be > 0")]
    fn zero_sockets_panics() {
        let _ = ReactorBuilder::new().max_sockets(0);
    }

    #[test]
    #[should_panic(expected = "exceeds maximum")]
    fn inverted_read_bounds_panic() {
        let _ = ReactorBuilder::new().read_buffer(128, 64);
    }
}
