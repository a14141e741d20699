//! Executes one decoded request over HTTP with `ureq`.
//!
//! # Design
//! A fresh agent is configured per request from the request's own options,
//! with status-as-error disabled so 4xx/5xx come back as data. Every failure
//! (bad option, unreachable host, unreadable body) is folded into an `error`
//! result map; this module never panics on input.

use std::time::Duration;

use relay_core::{EngineResponse, OptionValue, RequestOptions, ResultMap};
use tracing::{debug, warn};
use ureq::tls::TlsConfig;
use ureq::{Agent, Proxy, ResponseExt};

/// Redirect limit used when the request sets none.
const DEFAULT_MAX_REDIRECTS: u32 = 10;

/// Options the transport cannot honour; accepted and ignored.
const UNSUPPORTED: [&str; 4] = ["ja3", "akamai", "force_http1", "local_port"];

/// Run the request described by `options` and return its result map.
pub fn execute(options: &RequestOptions) -> ResultMap {
    match run(options) {
        Ok(response) => response.into_result(),
        Err(message) => {
            debug!(error = %message, "request failed");
            EngineResponse::error_result(message)
        }
    }
}

/// Target URL, if the payload names one.
pub fn target_url(options: &RequestOptions) -> Option<&str> {
    options
        .get("url")
        .and_then(OptionValue::as_str)
        .filter(|u| !u.is_empty())
}

fn run(options: &RequestOptions) -> Result<EngineResponse, String> {
    let url = target_url(options).ok_or("missing url")?;
    let method = options
        .get("method")
        .and_then(OptionValue::as_str)
        .map(str::to_ascii_uppercase)
        .unwrap_or_else(|| "GET".to_string());

    for key in UNSUPPORTED {
        if options.contains_key(key) {
            debug!(option = key, "option not supported by this transport, ignored");
        }
    }

    let agent = agent_for(options)?;
    let mut builder = ureq::http::Request::builder().method(method.as_str()).uri(url);
    for (name, value) in ordered_headers(options) {
        builder = builder.header(name, value);
    }

    let body = match options.get("body") {
        Some(OptionValue::Bytes(b)) => b.to_vec(),
        Some(OptionValue::Str(s)) => s.as_bytes().to_vec(),
        Some(other) => return Err(format!("body must be bytes or a string, got {}", other.kind())),
        None => Vec::new(),
    };

    let sent = if body.is_empty() {
        builder.body(()).map_err(|e| e.to_string()).map(|req| agent.run(req))?
    } else {
        builder.body(body).map_err(|e| e.to_string()).map(|req| agent.run(req))?
    };
    let mut response = sent.map_err(|e| e.to_string())?;

    let status = response.status().as_u16();
    let final_url = response.get_uri().to_string();
    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
        .collect();
    let body = response.body_mut().read_to_vec().map_err(|e| e.to_string())?;

    Ok(EngineResponse {
        status,
        headers,
        body: body.into(),
        url: Some(final_url),
    })
}

fn agent_for(options: &RequestOptions) -> Result<Agent, String> {
    let mut config = Agent::config_builder().http_status_as_error(false);

    if let Some(value) = options.get("timeout") {
        let secs = value
            .as_f64()
            .filter(|s| s.is_finite() && *s > 0.0)
            .ok_or_else(|| format!("timeout must be a positive number of seconds, got {value:?}"))?;
        config = config.timeout_global(Some(Duration::from_secs_f64(secs)));
    }

    let follow = options
        .get("follow_redirects")
        .and_then(OptionValue::as_bool)
        .unwrap_or(true);
    let limit = options
        .get("max_redirects")
        .and_then(OptionValue::as_i64)
        .map(|n| u32::try_from(n).unwrap_or(0))
        .unwrap_or(DEFAULT_MAX_REDIRECTS);
    config = config.max_redirects(if follow { limit } else { 0 });

    if let Some(proxy) = options.get("proxy").and_then(OptionValue::as_str) {
        let proxy = Proxy::new(proxy).map_err(|e| format!("invalid proxy {proxy}: {e}"))?;
        config = config.proxy(Some(proxy));
    }

    if options.get("verify").and_then(OptionValue::as_bool) == Some(false) {
        warn!("certificate verification disabled for this request");
        config = config.tls_config(TlsConfig::builder().disable_verification(true).build());
    }

    Ok(config.build().new_agent())
}

/// Request headers with `user_agent` folded in, sorted by `header_order`
/// when given. Names missing from the order keep their relative position
/// after the ordered ones.
fn ordered_headers(options: &RequestOptions) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = options
        .get("headers")
        .and_then(OptionValue::as_headers)
        .map(<[_]>::to_vec)
        .unwrap_or_default();

    if let Some(agent) = options.get("user_agent").and_then(OptionValue::as_str) {
        if !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("user-agent")) {
            headers.push(("user-agent".to_string(), agent.to_string()));
        }
    }

    if let Some(order) = options.get("header_order").and_then(OptionValue::as_list) {
        let rank = |name: &str| {
            order
                .iter()
                .position(|o| o.eq_ignore_ascii_case(name))
                .unwrap_or(order.len())
        };
        headers.sort_by_key(|(name, _)| rank(name));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_url_is_an_error_result() {
        let result = execute(&RequestOptions::new().with("method", "GET"));
        assert_eq!(result.get("error").and_then(OptionValue::as_str), Some("missing url"));
    }

    #[test]
    fn empty_url_is_not_a_target() {
        assert_eq!(target_url(&RequestOptions::new().with("url", "")), None);
        assert_eq!(target_url(&RequestOptions::new().with("url", "http://a")), Some("http://a"));
    }

    #[test]
    fn bad_timeout_is_rejected_before_connecting() {
        let opts = RequestOptions::new().with("url", "http://127.0.0.1:9").with("timeout", -1);
        let result = execute(&opts);
        assert!(result.get("error").and_then(OptionValue::as_str).unwrap().contains("timeout"));
    }

    #[test]
    fn header_order_and_user_agent() {
        let opts = RequestOptions::new()
            .with(
                "headers",
                vec![
                    ("accept".to_string(), "*/*".to_string()),
                    ("x-custom".to_string(), "1".to_string()),
                    ("Host".to_string(), "example".to_string()),
                ],
            )
            .with("user_agent", "relay/0.1")
            .with("header_order", vec!["host", "user-agent", "accept"]);

        let names: Vec<_> = ordered_headers(&opts).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["Host", "user-agent", "accept", "x-custom"]);
    }

    #[test]
    fn explicit_user_agent_header_wins() {
        let opts = RequestOptions::new()
            .with("headers", vec![("User-Agent".to_string(), "mine".to_string())])
            .with("user_agent", "relay/0.1");
        assert_eq!(ordered_headers(&opts), [("User-Agent".to_string(), "mine".to_string())]);
    }
}
