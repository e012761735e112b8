//! Admin-surface access guard.
//!
//! The admin API is loopback-only. LAN clients get exactly the listener
//! surface: the listener page, the proxy, the public status endpoints.
//! Requests from this machine's own LAN address are redirected to the
//! loopback URL (a browser on the host used the LAN link by mistake);
//! everything else from the LAN is refused - JSON for API routes, HTML
//! for pages.

use std::collections::HashSet;
use std::net::IpAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::AppState;

/// GET paths (and prefixes) reachable from the LAN.
const PUBLIC_EXACT: &[&str] = &[
    "/streams",
    "/api/streams/status",
    "/api/system/config",
    "/api/health",
    "/contact",
];
const PUBLIC_PREFIXES: &[&str] = &["/listen/"];

/// What the guard decided for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Pass through to the handler.
    Allow,
    /// Same-machine request over a LAN address: bounce to loopback.
    Redirect(String),
    /// Refuse with a JSON body (API routes).
    ForbidJson,
    /// Refuse with an HTML body (pages).
    ForbidHtml,
}

/// Pure decision function; the middleware is a thin shell around it.
pub fn classify_request(
    client_ip: IpAddr,
    method: &Method,
    path: &str,
    own_ips: &HashSet<IpAddr>,
    port: u16,
) -> GuardDecision {
    if is_loopback(client_ip) {
        return GuardDecision::Allow;
    }

    let is_public = method == Method::GET
        && (PUBLIC_EXACT.contains(&path)
            || PUBLIC_PREFIXES.iter().any(|p| path.starts_with(p)));
    if is_public {
        return GuardDecision::Allow;
    }

    let is_api = path.starts_with("/api/");

    // The request came from this very machine via its LAN address; for a
    // GET page we can bounce the browser to the loopback origin where the
    // admin surface works.
    if own_ips.contains(&client_ip) && method == Method::GET && !is_api {
        return GuardDecision::Redirect(format!("http://127.0.0.1:{port}{path}"));
    }

    if is_api {
        GuardDecision::ForbidJson
    } else {
        GuardDecision::ForbidHtml
    }
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => v6.is_loopback() || v6.to_ipv4().is_some_and(|v4| v4.is_loopback()),
    }
}

/// Axum middleware enforcing the guard.
pub async fn admin_guard(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let decision = classify_request(
        addr.ip(),
        request.method(),
        request.uri().path(),
        &state.local_ips,
        state.network.get_port(),
    );

    match decision {
        GuardDecision::Allow => next.run(request).await,
        GuardDecision::Redirect(target) => {
            log::debug!("[Guard] Redirecting {} to loopback", addr.ip());
            (
                StatusCode::FOUND,
                [(header::LOCATION, target)],
            )
                .into_response()
        }
        GuardDecision::ForbidJson => {
            log::warn!(
                "[Guard] Refused {} {} from {}",
                request.method(),
                request.uri().path(),
                addr.ip()
            );
            (
                StatusCode::FORBIDDEN,
                Json(json!({
                    "ok": false,
                    "error": {
                        "category": "forbidden",
                        "title": "⚠ Admin access is local-only",
                        "message": "Administrative operations are only available from the host machine"
                    }
                })),
            )
                .into_response()
        }
        GuardDecision::ForbidHtml => (
            StatusCode::FORBIDDEN,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            "<!doctype html><html><body><h1>403</h1>\
             <p>The admin dashboard is only available on the host machine.</p>\
             <p><a href=\"/streams\">Go to the listener page</a></p></body></html>",
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn own_ips() -> HashSet<IpAddr> {
        [
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)),
        ]
        .into_iter()
        .collect()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn loopback_gets_full_access() {
        let d = classify_request(ip("127.0.0.1"), &Method::POST, "/api/streams", &own_ips(), 3001);
        assert_eq!(d, GuardDecision::Allow);
        let d = classify_request(ip("::1"), &Method::DELETE, "/api/streams/x", &own_ips(), 3001);
        assert_eq!(d, GuardDecision::Allow);
    }

    #[test]
    fn lan_clients_reach_listener_surface() {
        for path in ["/streams", "/listen/english", "/api/streams/status", "/api/system/config", "/api/health"] {
            let d = classify_request(ip("192.168.1.77"), &Method::GET, path, &own_ips(), 3001);
            assert_eq!(d, GuardDecision::Allow, "path {path}");
        }
    }

    #[test]
    fn lan_post_to_api_is_forbidden_json() {
        let d = classify_request(
            ip("192.168.1.77"),
            &Method::POST,
            "/api/streams/x/start",
            &own_ips(),
            3001,
        );
        assert_eq!(d, GuardDecision::ForbidJson);
    }

    #[test]
    fn lan_get_to_admin_page_is_forbidden_html() {
        let d = classify_request(ip("192.168.1.77"), &Method::GET, "/", &own_ips(), 3001);
        assert_eq!(d, GuardDecision::ForbidHtml);
    }

    #[test]
    fn own_lan_address_redirects_pages_to_loopback() {
        let d = classify_request(ip("192.168.1.20"), &Method::GET, "/admin", &own_ips(), 3001);
        assert_eq!(
            d,
            GuardDecision::Redirect("http://127.0.0.1:3001/admin".into())
        );
    }

    #[test]
    fn own_lan_address_api_post_still_forbidden() {
        let d = classify_request(
            ip("192.168.1.20"),
            &Method::POST,
            "/api/streams",
            &own_ips(),
            3001,
        );
        assert_eq!(d, GuardDecision::ForbidJson);
    }

    #[test]
    fn public_paths_require_get() {
        let d = classify_request(
            ip("192.168.1.77"),
            &Method::POST,
            "/api/streams/status",
            &own_ips(),
            3001,
        );
        assert_eq!(d, GuardDecision::ForbidJson);
    }
}
