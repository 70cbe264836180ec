//! Solana JSON-RPC mocking on top of mockito.
//!
//! Every helper returns an uncreated [`Mock`] so the test can add expectations before
//! registering it:
//!
//! ```ignore
//! let slot = rpc.result("getSlot", &json!(42)).expect(1).create_async().await;
//! // ... drive the manager ...
//! slot.assert_async().await;
//! ```

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Slot reported in the `context` of contextual responses.
pub const MOCK_SLOT: u64 = 250_000_000;

pub struct SolanaRpcMock {
    server: ServerGuard,
}

impl SolanaRpcMock {
    pub async fn new() -> Self {
        Self { server: Server::new_async().await }
    }

    #[must_use]
    pub fn url(&self) -> String {
        self.server.url()
    }

    fn method_matcher(method: &str) -> Matcher {
        Matcher::Regex(format!(r#""method"\s*:\s*"{method}""#))
    }

    fn for_method(&mut self, method: &str) -> Mock {
        self.server.mock("POST", "/").match_body(Self::method_matcher(method))
    }

    /// Answers `method` with `result`.
    pub fn result(&mut self, method: &str, result: &Value) -> Mock {
        self.for_method(method)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string())
    }

    /// Answers `method` with `{ context: { slot }, value }`.
    pub fn contextual(&mut self, method: &str, value: &Value) -> Mock {
        let context = json!({ "slot": MOCK_SLOT, "apiVersion": "2.0.15" });
        self.result(method, &json!({ "context": context, "value": value }))
    }

    /// Answers only requests for `method` whose body also contains `needle`.
    pub fn result_containing(&mut self, method: &str, needle: &str, result: &Value) -> Mock {
        self.server
            .mock("POST", "/")
            .match_body(Matcher::AllOf(vec![
                Self::method_matcher(method),
                Matcher::Regex(regex_escape(needle)),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "jsonrpc": "2.0", "id": 1, "result": result }).to_string())
    }

    /// [`SolanaRpcMock::result_containing`] with a contextual result.
    pub fn contextual_containing(&mut self, method: &str, needle: &str, value: &Value) -> Mock {
        let result = json!({ "context": { "slot": MOCK_SLOT }, "value": value });
        self.result_containing(method, needle, &result)
    }

    /// Answers `method` with a JSON-RPC error object.
    pub fn rpc_error(&mut self, method: &str, code: i32, message: &str) -> Mock {
        self.for_method(method)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": code, "message": message } })
                    .to_string(),
            )
    }

    /// Answers `method` with a bare HTTP status, e.g. 503.
    pub fn http_status(&mut self, method: &str, status: usize) -> Mock {
        self.for_method(method).with_status(status).with_body("upstream unavailable")
    }

    /// Returns the underlying mockito server for advanced mocking.
    pub fn server(&mut self) -> &mut ServerGuard {
        &mut self.server
    }
}

/// Starts a provider that accepts connections and never answers, returning its URL.
///
/// Sockets stay open until the test's runtime shuts down.
///
/// # Panics
///
/// Panics if no local port can be bound.
pub async fn unresponsive_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind local port");
    let addr = listener.local_addr().expect("bound address");
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{addr}")
}

fn regex_escape(text: &str) -> String {
    text.chars()
        .flat_map(|c| {
            let escaped = if r"\.+*?()|[]{}^$".contains(c) { Some('\\') } else { None };
            escaped.into_iter().chain(std::iter::once(c))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rpc_mock_creation() {
        let rpc = SolanaRpcMock::new().await;
        assert!(rpc.url().starts_with("http://"));
    }

    #[test]
    fn test_regex_escape() {
        assert_eq!(regex_escape("a.b"), r"a\.b");
        assert_eq!(regex_escape("1111"), "1111");
    }
}
