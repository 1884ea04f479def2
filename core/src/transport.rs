//! Execution boundary between the client and the network.
//!
//! # Design
//! A `Transport` performs one HTTP exchange per `execute` call and reports
//! every completed exchange as an `HttpResponse`, whatever its status.
//! Retries live here, in the provided `send` method, driven by the
//! `RetryPolicy` the client hands over; the client only observes the final
//! outcome.

use std::io::Read;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::retry::{Attempt, RetryPolicy};

pub trait Transport {
    /// Perform a single exchange. Non-2xx statuses are `Ok`.
    fn execute(&self, req: &HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Perform the exchange, re-issuing it while `retry` allows.
    fn send(&self, req: &HttpRequest, retry: &RetryPolicy) -> Result<HttpResponse, TransportError> {
        let mut retries = 0;
        loop {
            debug!(
                method = req.method.as_str(),
                url = %req.url,
                attempt = retries + 1,
                "sending request"
            );
            let outcome = self.execute(req);
            let attempt = match &outcome {
                Ok(response) => Attempt::Response(response),
                Err(err) => Attempt::Error(err),
            };
            if !retry.should_retry(req, &attempt, retries) {
                return outcome;
            }

            let delay = retry.delay(retries);
            match &outcome {
                Ok(response) => warn!(
                    url = %req.url,
                    status = response.status,
                    ?delay,
                    "retrying after transient status"
                ),
                Err(err) => warn!(url = %req.url, error = %err, ?delay, "retrying after transport failure"),
            }
            std::thread::sleep(delay);
            retries += 1;
        }
    }
}

impl<T: Transport + ?Sized> Transport for &T {
    fn execute(&self, req: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).execute(req)
    }
}

/// Blocking transport backed by a `ureq` agent.
///
/// The agent is configured with `http_status_as_error(false)` so 4xx/5xx
/// responses come back as data and the client does the classification.
#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqTransport").finish_non_exhaustive()
    }
}

impl UreqTransport {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Bound every exchange, including long-poll `wait` calls, by `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(timeout))
    }

    fn build(timeout: Option<Duration>) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(timeout)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    fn execute(&self, req: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = req.url.as_str();
        let result = match (req.method, req.body.as_deref()) {
            (HttpMethod::Get, _) => decorate(self.agent.get(url), req).call(),
            (HttpMethod::Delete, None) => decorate(self.agent.delete(url), req).call(),
            (HttpMethod::Delete, Some(body)) => decorate(self.agent.delete(url), req)
                .force_send_body()
                .send(body.as_bytes()),
            (HttpMethod::Post, Some(body)) => decorate(self.agent.post(url), req).send(body.as_bytes()),
            (HttpMethod::Post, None) => decorate(self.agent.post(url), req).send_empty(),
            (HttpMethod::Put, Some(body)) => decorate(self.agent.put(url), req).send(body.as_bytes()),
            (HttpMethod::Put, None) => decorate(self.agent.put(url), req).send_empty(),
        };
        let mut response = result
            .map_err(|e| TransportError::with_source(format!("{} {} failed", req.method.as_str(), req.url), e))?;

        let status = response.status().as_u16();
        let headers = header_pairs(response.headers());
        let mut bytes = Vec::new();
        response
            .body_mut()
            .as_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| TransportError::with_source("reading response body failed", e))?;
        let body = String::from_utf8_lossy(&bytes).into_owned();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Every header the server sent; values that are not UTF-8 are decoded lossily.
fn header_pairs(headers: &ureq::http::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn decorate<B>(mut builder: ureq::RequestBuilder<B>, req: &HttpRequest) -> ureq::RequestBuilder<B> {
    for (name, value) in &req.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    for (key, value) in &req.query {
        builder = builder.query(key, value);
    }
    builder
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    use super::*;

    /// Replays a fixed script of outcomes and counts calls.
    struct Scripted {
        outcomes: RefCell<VecDeque<Result<HttpResponse, TransportError>>>,
        calls: Cell<u32>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<HttpResponse, TransportError>>) -> Self {
            Self {
                outcomes: RefCell::new(outcomes.into()),
                calls: Cell::new(0),
            }
        }
    }

    impl Transport for Scripted {
        fn execute(&self, _req: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.set(self.calls.get() + 1);
            self.outcomes
                .borrow_mut()
                .pop_front()
                .expect("script exhausted")
        }
    }

    fn status(status: u16) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status,
            headers: Vec::new(),
            body: String::new(),
        })
    }

    fn get() -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: "http://localhost/v1/apps/a1".to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    fn fast(policy: RetryPolicy) -> RetryPolicy {
        policy.with_base_delay(Duration::ZERO)
    }

    #[test]
    fn retries_until_success() {
        let transport = Scripted::new(vec![
            status(503),
            Err(TransportError::new("reset")),
            status(200),
        ]);
        let response = transport.send(&get(), &fast(RetryPolicy::safe_transient())).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.calls.get(), 3);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let transport = Scripted::new(vec![status(500), status(500), status(500), status(500)]);
        let response = transport.send(&get(), &fast(RetryPolicy::transient())).unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(transport.calls.get(), 4);
    }

    #[test]
    fn final_transport_error_is_returned() {
        let transport = Scripted::new(vec![Err(TransportError::new("dns"))]);
        let err = transport.send(&get(), &RetryPolicy::never()).unwrap_err();
        assert_eq!(err.message(), "dns");
        assert_eq!(transport.calls.get(), 1);
    }

    #[test]
    fn non_transient_status_is_returned_immediately() {
        let transport = Scripted::new(vec![status(404)]);
        let response = transport.send(&get(), &fast(RetryPolicy::transient())).unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(transport.calls.get(), 1);
    }

    #[test]
    fn post_is_not_retried_by_default_policy() {
        let transport = Scripted::new(vec![status(503)]);
        let mut req = get();
        req.method = HttpMethod::Post;
        let response = transport.send(&req, &fast(RetryPolicy::default())).unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(transport.calls.get(), 1);
    }

    #[test]
    fn unreachable_host_is_a_transport_error() {
        let transport = UreqTransport::with_timeout(Duration::from_secs(2));
        let mut req = get();
        req.url = "http://127.0.0.1:1/v1/apps".to_string();
        let err = transport.execute(&req).unwrap_err();
        assert!(err.message().starts_with("GET http://127.0.0.1:1/v1/apps"));
    }

    /// Serve one raw HTTP response to the first connection and return its URL.
    fn serve_once(raw: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                line.clear();
            }
            stream.write_all(raw).unwrap();
        });
        format!("http://{addr}/v1/apps/a1")
    }

    #[test]
    fn non_utf8_body_still_yields_a_response() {
        let mut req = get();
        req.url = serve_once(
            b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 2\r\nconnection: close\r\n\r\n\xff\xfe",
        );
        let response = UreqTransport::with_timeout(Duration::from_secs(5))
            .execute(&req)
            .unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(response.body, "\u{fffd}\u{fffd}");
    }

    #[test]
    fn non_utf8_header_values_are_kept() {
        let mut headers = ureq::http::HeaderMap::new();
        headers.insert("x-name", ureq::http::HeaderValue::from_bytes(b"caf\xe9").unwrap());
        headers.insert("content-type", ureq::http::HeaderValue::from_static("text/plain"));
        let mut pairs = header_pairs(&headers);
        pairs.sort();
        assert_eq!(
            pairs,
            [
                ("content-type".to_string(), "text/plain".to_string()),
                ("x-name".to_string(), "caf\u{fffd}".to_string()),
            ]
        );
    }
}
