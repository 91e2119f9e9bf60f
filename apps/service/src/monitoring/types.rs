use std::time::Duration;

/// Cumulative timing marks for one probe, measured from request start.
///
/// Matches the shape of curl's transfer timings: each mark is the elapsed
/// time from the start of the probe to the end of that phase, not the
/// phase's own duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeTimings {
    /// Elapsed once the hostname resolved.
    pub dns: Duration,
    /// Elapsed once the TCP connection was established.
    pub connection: Duration,
    /// Elapsed once response headers arrived (pre-transfer mark).
    pub transport: Duration,
    /// Elapsed once the exchange finished.
    pub total: Duration,
}

impl ProbeTimings {
    /// Whole milliseconds, truncated.
    pub fn dns_ms(&self) -> u64 {
        self.dns.as_millis() as u64
    }

    pub fn connection_ms(&self) -> u64 {
        self.connection.as_millis() as u64
    }

    pub fn transport_ms(&self) -> u64 {
        self.transport.as_millis() as u64
    }

    pub fn total_ms(&self) -> u64 {
        self.total.as_millis() as u64
    }
}

/// Raw outcome of one HTTP exchange, before it is folded into a snapshot.
#[derive(Debug)]
pub struct ProbeOutcome {
    pub http_status_code: Option<u16>,
    /// Status line plus folded response header lines.
    pub headers: String,
    pub body_content: String,
    pub timings: ProbeTimings,
    /// Transport-level failure text; `None` on success. HTTP error statuses
    /// are not transport failures.
    pub error: Option<String>,
}

impl ProbeOutcome {
    /// Outcome for a probe that never completed its exchange.
    pub fn failed(timings: ProbeTimings, error: String) -> Self {
        Self {
            http_status_code: None,
            headers: String::new(),
            body_content: String::new(),
            timings,
            error: Some(error),
        }
    }
}
