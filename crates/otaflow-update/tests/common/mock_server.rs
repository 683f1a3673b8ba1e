//! Mock server helpers for config and package downloads

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Serve `body` at `route`
pub async fn mock_file(server: &MockServer, route: &str, body: impl Into<Vec<u8>>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.into()))
        .mount(server)
        .await;
}

/// Serve `body` at `route` and require exactly `times` requests
pub async fn mock_file_expect(
    server: &MockServer,
    route: &str,
    body: impl Into<Vec<u8>>,
    times: u64,
) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.into()))
        .expect(times)
        .mount(server)
        .await;
}

/// Answer `route` with `status` and a text body
pub async fn mock_status(server: &MockServer, route: &str, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

/// Serve an HTML page where a config is expected (captive portal)
pub async fn mock_html_page(server: &MockServer, route: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<!DOCTYPE html><html><body>Sign in</body></html>"),
        )
        .mount(server)
        .await;
}

/// Serves a body the way a range-honouring server does: `206` with the
/// requested slice, `416` with `Content-Range: bytes */len` when the range
/// starts at or past the end, `200` when no range is asked for
pub struct RangedBody {
    body: Vec<u8>,
}

impl RangedBody {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self { body: body.into() }
    }

    /// `(start, inclusive end)` from a `bytes=start-[end]` header
    fn requested(&self, request: &Request) -> Option<(u64, Option<u64>)> {
        let value = request.headers.get("Range")?.to_str().ok()?;
        let spec = value.strip_prefix("bytes=")?;
        let (start, end) = spec.split_once('-')?;
        let start = start.parse().ok()?;
        let end = if end.is_empty() { None } else { Some(end.parse().ok()?) };
        Some((start, end))
    }
}

impl Respond for RangedBody {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let len = self.body.len() as u64;
        let Some((start, end)) = self.requested(request) else {
            return ResponseTemplate::new(200).set_body_bytes(self.body.clone());
        };
        if start >= len {
            return ResponseTemplate::new(416)
                .insert_header("Content-Range", format!("bytes */{}", len).as_str());
        }
        let last = end.map_or(len - 1, |end| end.min(len - 1));
        ResponseTemplate::new(206)
            .insert_header(
                "Content-Range",
                format!("bytes {}-{}/{}", start, last, len).as_str(),
            )
            .set_body_bytes(self.body[start as usize..=last as usize].to_vec())
    }
}

/// Serve `body` at `route`, honouring `Range` requests
pub async fn mock_ranged_file(server: &MockServer, route: &str, body: impl Into<Vec<u8>>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(RangedBody::new(body))
        .mount(server)
        .await;
}

/// Full URL of `route` on `server`
pub fn url_of(server: &MockServer, route: &str) -> String {
    format!("{}{}", server.uri(), route)
}
