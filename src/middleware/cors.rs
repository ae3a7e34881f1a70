//! Cross-origin resource sharing.
//!
//! Applied by the router around every dispatch rather than as a chain stage:
//! preflights must be answered for paths that only register non-`OPTIONS`
//! methods, and unmatched routes need the headers too.

use std::time::Duration;

use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_METHOD, ORIGIN, VARY,
};
use http::{HeaderValue, Method, StatusCode};

use crate::error::ConfigurationError;
use crate::request::Request;
use crate::response::Response;

#[derive(Clone, Debug)]
enum AllowOrigin {
    Any,
    List(Vec<HeaderValue>),
}

#[derive(Clone, Debug)]
pub struct CorsPolicy {
    origins: AllowOrigin,
    methods: HeaderValue,
    headers: HeaderValue,
    max_age: Option<Duration>,
}

impl CorsPolicy {
    /// `origins` containing `"*"` allows every origin.
    pub fn new(
        origins: &[String],
        methods: &[String],
        headers: &[String],
        max_age: Option<Duration>,
    ) -> Result<Self, ConfigurationError> {
        let origins = if origins.iter().any(|o| o == "*") {
            AllowOrigin::Any
        } else {
            AllowOrigin::List(
                origins
                    .iter()
                    .map(|o| {
                        HeaderValue::from_str(o)
                            .map_err(|_| ConfigurationError::InvalidOrigin(o.clone()))
                    })
                    .collect::<Result<_, _>>()?,
            )
        };
        Ok(Self {
            origins,
            methods: join_header(methods)?,
            headers: join_header(headers)?,
            max_age,
        })
    }

    /// Any origin, common methods, `authorization` and `content-type` headers.
    pub fn permissive() -> Self {
        Self {
            origins: AllowOrigin::Any,
            methods: HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
            headers: HeaderValue::from_static("authorization, content-type, x-request-id"),
            max_age: Some(Duration::from_secs(600)),
        }
    }

    pub(crate) fn is_preflight(req: &Request) -> bool {
        req.method() == Method::OPTIONS
            && req.headers().contains_key(ORIGIN)
            && req.headers().contains_key(ACCESS_CONTROL_REQUEST_METHOD)
    }

    pub(crate) fn preflight(&self, req: &Request) -> Response {
        let mut res = Response::builder().status(StatusCode::NO_CONTENT).no_body();
        if self.allow_origin(req.headers().get(ORIGIN), &mut res) {
            res.insert_header(ACCESS_CONTROL_ALLOW_METHODS, self.methods.clone());
            res.insert_header(ACCESS_CONTROL_ALLOW_HEADERS, self.headers.clone());
            if let Some(age) = self.max_age {
                res.insert_header(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(age.as_secs()));
            }
        }
        res
    }

    pub(crate) fn decorate(&self, origin: Option<&HeaderValue>, res: &mut Response) {
        self.allow_origin(origin, res);
    }

    fn allow_origin(&self, origin: Option<&HeaderValue>, res: &mut Response) -> bool {
        let Some(origin) = origin else { return false };
        match &self.origins {
            AllowOrigin::Any => {
                res.insert_header(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
                true
            }
            AllowOrigin::List(list) => {
                res.headers.append(VARY, HeaderValue::from_static("origin"));
                if list.contains(origin) {
                    res.insert_header(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
                    true
                } else {
                    false
                }
            }
        }
    }
}

fn join_header(items: &[String]) -> Result<HeaderValue, ConfigurationError> {
    let joined = items.join(", ");
    HeaderValue::from_str(&joined).map_err(|_| ConfigurationError::InvalidOrigin(joined))
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn preflight_from(origin: &str) -> Request {
        Request::from_http(
            http::Request::builder()
                .method(Method::OPTIONS)
                .uri("/api/v1/users/login")
                .header(ORIGIN, origin)
                .header(ACCESS_CONTROL_REQUEST_METHOD, "POST")
                .body(Bytes::new())
                .unwrap(),
        )
    }

    #[test]
    fn listed_origin_is_echoed() {
        let policy = CorsPolicy::new(
            &["https://app.example".into()],
            &["GET".into(), "POST".into()],
            &["authorization".into()],
            None,
        )
        .unwrap();
        let req = preflight_from("https://app.example");
        assert!(CorsPolicy::is_preflight(&req));
        let res = policy.preflight(&req);
        assert_eq!(res.status_code(), StatusCode::NO_CONTENT);
        assert_eq!(res.header("access-control-allow-origin"), Some("https://app.example"));
        assert_eq!(res.header("access-control-allow-methods"), Some("GET, POST"));
    }

    #[test]
    fn unlisted_origin_gets_no_grant() {
        let policy = CorsPolicy::new(&["https://app.example".into()], &[], &[], None).unwrap();
        let res = policy.preflight(&preflight_from("https://evil.example"));
        assert_eq!(res.header("access-control-allow-origin"), None);
        assert_eq!(res.header("vary"), Some("origin"));
    }

    #[test]
    fn wildcard_allows_everyone() {
        let mut res = Response::text("hi");
        CorsPolicy::permissive().decorate(Some(&HeaderValue::from_static("https://x.example")), &mut res);
        assert_eq!(res.header("access-control-allow-origin"), Some("*"));
    }
}
