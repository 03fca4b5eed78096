use axum::http::{HeaderMap, Request};
use std::net::IpAddr;
use tower_governor::{GovernorError, key_extractor::KeyExtractor};

/// Requests with no identifiable client all drain one bucket, so an
/// unproxied deployment still gets a hard ceiling instead of no
/// limiting at all.
const SHARED_BUCKET: IpAddr = IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);

/// Rate-limit key for the observation endpoints: the client IP as seen
/// through reverse proxies (X-Forwarded-For, then X-Real-IP), else the
/// peer address, else the shared bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIpKeyExtractor;

/// First parseable address in a proxy header. X-Forwarded-For may carry
/// a hop chain; the leftmost entry is the original client.
fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

impl KeyExtractor for ClientIpKeyExtractor {
    type Key = IpAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        let headers = req.headers();
        if let Some(ip) =
            header_ip(headers, "x-forwarded-for").or_else(|| header_ip(headers, "x-real-ip"))
        {
            return Ok(ip);
        }

        if let Some(connect_info) = req
            .extensions()
            .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        {
            return Ok(connect_info.0.ip());
        }

        tracing::debug!(
            uri = %req.uri(),
            "No client address available for rate limiting, using the shared bucket"
        );
        Ok(SHARED_BUCKET)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(name: &str, value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(
            axum::http::HeaderName::try_from(name).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        map
    }

    #[test]
    fn forwarded_chain_takes_first_hop() {
        let map = headers("x-forwarded-for", "198.51.100.7, 10.0.0.1");
        assert_eq!(
            header_ip(&map, "x-forwarded-for"),
            Some("198.51.100.7".parse().unwrap())
        );
    }

    #[test]
    fn garbage_header_is_ignored() {
        let map = headers("x-real-ip", "not-an-address");
        assert_eq!(header_ip(&map, "x-real-ip"), None);
    }

    #[test]
    fn bare_request_lands_in_shared_bucket() {
        let req = Request::builder().uri("/api/observations").body(()).unwrap();
        let key = ClientIpKeyExtractor.extract(&req).unwrap();
        assert_eq!(key, SHARED_BUCKET);
    }
}
