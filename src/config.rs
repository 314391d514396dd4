use embassy_time::Duration;

/// Maximum length of a stop tag.
pub const MAX_TAG_LEN: usize = 7;

/// Maximum length of a response or URC prefix.
pub const MAX_PREFIX_LEN: usize = 32;

/// Number of URC handlers that can be registered at once.
pub const MAX_URC_HANDLERS: usize = 16;

/// Bytes of a URC line (after its prefix) made available to the handler.
pub const URC_LINE_LEN: usize = 128;

/// Depth of the deferred callback queue.
pub const CALLBACK_QUEUE_LEN: usize = 10;

/// Default capacity of the receive buffer.
pub const DEFAULT_RX_BUF_LEN: usize = 1024;

/// Compile time configuration of the AT engine.
///
/// Every constant has a default, so an empty `impl` gives the stock timing
/// used by u-blox modules.
pub trait AtConfig {
    /// Time allowed for each command cycle, measured from `lock`.
    const DEFAULT_TIMEOUT: Duration = Duration::from_millis(8000);

    /// Fill timeout used while draining unsolicited data between cycles.
    const URC_TIMEOUT: Duration = Duration::from_millis(100);

    /// Minimum gap between the end of a response and the next command.
    const SEND_DELAY: Duration = Duration::from_millis(25);

    const DEFAULT_DELIMITER: u8 = b',';

    /// Initial "longest structural token" watermark. Registering a longer
    /// URC prefix raises it.
    const MAX_RESP_LENGTH: usize = 64;

    /// Bound on waiting for a background task to exit in `deinit`.
    const TASK_EXIT_TIMEOUT: Duration = Duration::from_millis(1000);

    /// When set, the URC runner also checks the serial port for pending
    /// bytes at this interval, for ports without an RX notification hook.
    const URC_POLL_INTERVAL: Option<Duration> = None;

    /// Initial state of raw traffic tracing.
    const DEBUG: bool = true;
}

/// Stock configuration.
pub struct DefaultConfig;

impl AtConfig for DefaultConfig {}
