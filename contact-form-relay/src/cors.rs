use lambda_http::http::{
    header::{
        ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
        ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, VARY,
    },
    HeaderMap, HeaderValue,
};

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

impl AllowedOrigins {
    /// Parses a comma-separated origin list. A `*` entry anywhere allows every origin.
    pub fn parse(list: &str) -> Self {
        let origins: Vec<String> = list
            .split(',')
            .map(|origin| origin.trim().trim_end_matches('/'))
            .filter(|origin| !origin.is_empty())
            .map(String::from)
            .collect();
        if origins.iter().any(|origin| origin == "*") {
            AllowedOrigins::Any
        } else {
            AllowedOrigins::List(origins)
        }
    }

    fn allows(&self, origin: &str) -> bool {
        match self {
            AllowedOrigins::Any => true,
            AllowedOrigins::List(origins) => origins
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(origin)),
        }
    }
}

/// Cross-origin access policy applied to every response the handler produces.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allowed_origins: AllowedOrigins,
    allowed_headers: HeaderValue,
    allow_credentials: bool,
    max_age: u32,
}

impl CorsPolicy {
    pub fn new(
        allowed_origins: AllowedOrigins,
        allowed_headers: HeaderValue,
        allow_credentials: bool,
        max_age: u32,
    ) -> Self {
        Self {
            allowed_origins,
            allowed_headers,
            allow_credentials,
            max_age,
        }
    }

    pub fn apply(&self, request_origin: Option<&HeaderValue>, headers: &mut HeaderMap) {
        match self.allow_origin(request_origin) {
            Some(AllowOrigin::Wildcard) => {
                headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
            }
            Some(AllowOrigin::Echo(origin)) => {
                headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
                headers.append(VARY, HeaderValue::from_static("Origin"));
            }
            None => {}
        }
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, self.allowed_headers.clone());
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(self.max_age));
        if self.allow_credentials {
            headers.insert(
                ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
    }

    fn allow_origin(&self, request_origin: Option<&HeaderValue>) -> Option<AllowOrigin> {
        // Browsers refuse a wildcard on credentialed requests, so the origin is echoed instead.
        if self.allowed_origins == AllowedOrigins::Any && !self.allow_credentials {
            return Some(AllowOrigin::Wildcard);
        }
        let origin = request_origin?;
        self.allowed_origins
            .allows(origin.to_str().ok()?)
            .then(|| AllowOrigin::Echo(origin.clone()))
    }
}

enum AllowOrigin {
    Wildcard,
    Echo(HeaderValue),
}
