use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use reqwest::{Method, redirect};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::debug;
use url::Url;

use super::matcher;
use super::metrics;
use super::types::{ProbeOutcome, ProbeTimings};
use crate::database::Database;
use crate::database::models::{Monitor, Snapshot};

/// Probe executor - runs one HTTP request per invocation and persists the
/// result as a two-phase snapshot.
///
/// The pending row is inserted before any network I/O, so a crash mid-probe
/// leaves a detectable incomplete record. A persistence failure on either
/// phase aborts the invocation.
pub struct ProbeExecutor {
    database: Arc<dyn Database>,
    timeout: Duration,
    max_redirects: usize,
}

impl ProbeExecutor {
    pub fn new(database: Arc<dyn Database>, timeout_seconds: u64, max_redirects: usize) -> Self {
        Self { database, timeout: Duration::from_secs(timeout_seconds), max_redirects }
    }

    /// Execute one probe for `monitor` and return the completed snapshot.
    pub async fn run(&self, monitor: &Monitor) -> Result<Snapshot> {
        let mut snapshot = Snapshot::pending(monitor.uuid);
        let id = self.database.insert_pending_snapshot(&snapshot).await?;
        snapshot.id = Some(id);

        debug!(monitor = %monitor.uuid, snapshot_id = id, "probing {}", monitor.request_url);
        let outcome = self.perform_request(monitor).await;

        snapshot.http_status_code = outcome.http_status_code;
        snapshot.headers = outcome.headers;
        snapshot.body_content = outcome.body_content;
        snapshot.time_total = outcome.timings.total_ms();
        snapshot.time_dns = outcome.timings.dns_ms();
        snapshot.time_connection = outcome.timings.connection_ms();
        snapshot.time_transport = outcome.timings.transport_ms();

        match outcome.error {
            Some(message) => {
                // transport failure: matching is skipped entirely
                snapshot.is_error = true;
                snapshot.error_message = message;
            }
            None => {
                snapshot.is_match =
                    matcher::for_snapshot(&monitor.match_rule, &snapshot).is_match();
            }
        }

        snapshot.is_done = true;
        self.database.complete_snapshot(&snapshot).await?;

        self.update_monitor_state(monitor, &snapshot).await?;

        Ok(snapshot)
    }

    /// Mirror the snapshot's flags into the monitor and recompute its
    /// rolling averages, persisted as one atomic update.
    async fn update_monitor_state(&self, monitor: &Monitor, snapshot: &Snapshot) -> Result<()> {
        let now = Utc::now();
        let mut monitor = monitor.clone();

        monitor.last_error = snapshot.is_error;
        monitor.last_match = snapshot.is_match;
        // occurrence stamps only; recovery never clears them
        if monitor.last_error {
            monitor.last_error_time = Some(now);
        }
        if monitor.last_match {
            monitor.last_match_time = Some(now);
        }

        monitor.averages = metrics::rolling_averages(self.database.as_ref(), monitor.uuid, now).await?;
        monitor.updated_at = now;

        self.database.update_monitor_state(&monitor).await
    }

    /// One HTTP exchange with fixed policies: fresh connection, up to 5
    /// redirect hops, hard whole-request timeout, full header capture,
    /// optional body suppression.
    async fn perform_request(&self, monitor: &Monitor) -> ProbeOutcome {
        let started = Instant::now();
        let mut timings = ProbeTimings::default();

        let url = match Url::parse(&monitor.request_url) {
            Ok(url) => url,
            Err(e) => return fail(timings, started, format!("request error[url]: {e}")),
        };
        let Some(host) = url.host_str().map(str::to_string) else {
            return fail(timings, started, "request error[url]: missing host".to_string());
        };
        let port = url.port_or_known_default().unwrap_or(80);

        let method = match Method::from_bytes(monitor.request_method.as_bytes()) {
            Ok(method) => method,
            Err(e) => return fail(timings, started, format!("request error[method]: {e}")),
        };

        // Resolve explicitly so the DNS mark is honest; the resolved address
        // is pinned into the client below so the request does not redo it.
        let addr = match timeout(self.remaining(started), lookup_host((host.as_str(), port))).await
        {
            Ok(Ok(mut addrs)) => match addrs.next() {
                Some(addr) => addr,
                None => {
                    return fail(
                        timings,
                        started,
                        format!("request error[dns]: no addresses for {host}"),
                    );
                }
            },
            Ok(Err(e)) => return fail(timings, started, format!("request error[dns]: {e}")),
            Err(_) => {
                return fail(
                    timings,
                    started,
                    "request error[timeout]: name resolution timed out".to_string(),
                );
            }
        };
        timings.dns = started.elapsed();

        // TCP reachability mark; the probe connection itself is opened fresh
        // by the request below.
        match timeout(self.remaining(started), TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => {}
            Ok(Err(e)) => {
                timings.connection = started.elapsed();
                return fail(timings, started, format!("request error[connect]: {e}"));
            }
            Err(_) => {
                timings.connection = started.elapsed();
                return fail(
                    timings,
                    started,
                    "request error[timeout]: connect timed out".to_string(),
                );
            }
        }
        timings.connection = started.elapsed();

        let client = match reqwest::Client::builder()
            .pool_max_idle_per_host(0)
            .redirect(redirect::Policy::limited(self.max_redirects))
            .resolve(&host, addr)
            .timeout(self.remaining(started))
            .build()
        {
            Ok(client) => client,
            Err(e) => return fail(timings, started, format!("request error[client]: {e}")),
        };

        let mut request = client.request(method.clone(), url);
        if method != Method::GET && !monitor.request_no_body {
            request = request.body(monitor.request_body.clone());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                timings.transport = started.elapsed();
                return fail(
                    timings,
                    started,
                    format!("request error[{}]: {e}", classify(&e)),
                );
            }
        };
        timings.transport = started.elapsed();

        let http_status_code = Some(response.status().as_u16());
        let headers = fold_headers(&response);

        let body_content = if monitor.request_no_body {
            String::new()
        } else {
            match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    return fail(timings, started, format!("request error[body]: {e}"));
                }
            }
        };
        timings.total = started.elapsed();

        ProbeOutcome { http_status_code, headers, body_content, timings, error: None }
    }

    /// Time left of the whole-request budget.
    fn remaining(&self, started: Instant) -> Duration {
        self.timeout.saturating_sub(started.elapsed())
    }
}

fn fail(mut timings: ProbeTimings, started: Instant, error: String) -> ProbeOutcome {
    timings.total = started.elapsed();
    ProbeOutcome::failed(timings, error)
}

/// Status line plus one folded line per response header.
fn fold_headers(response: &reqwest::Response) -> String {
    let mut folded = format!("{:?} {}\r\n", response.version(), response.status());
    for (name, value) in response.headers() {
        folded.push_str(name.as_str());
        folded.push_str(": ");
        folded.push_str(&String::from_utf8_lossy(value.as_bytes()));
        folded.push_str("\r\n");
    }
    folded
}

fn classify(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        "timeout"
    } else if error.is_connect() {
        "connect"
    } else if error.is_redirect() {
        "redirect"
    } else if error.is_body() || error.is_decode() {
        "body"
    } else {
        "request"
    }
}
