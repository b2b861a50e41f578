//! Response header rules.

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::rules::condition::{AllOf, Condition};
use crate::rules::{RequestHead, Rule};

/// Sets a response header; the body passes through untouched.
#[derive(Debug)]
pub struct SetHeaderRule {
    name: String,
    when: AllOf,
    header: HeaderName,
    value: HeaderValue,
}

impl SetHeaderRule {
    pub fn new(name: &str, when: AllOf, header: &str, value: &str) -> Result<Self, String> {
        let header = HeaderName::from_bytes(header.as_bytes()).map_err(|e| e.to_string())?;
        let value = HeaderValue::from_str(value).map_err(|e| e.to_string())?;
        Ok(Self {
            name: name.to_string(),
            when,
            header,
            value,
        })
    }
}

impl Rule for SetHeaderRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, request: &RequestHead, headers: &HeaderMap) -> bool {
        self.when.matches(request, headers)
    }

    fn execute(&self, _request: &RequestHead, headers: &mut HeaderMap, body: Vec<u8>) -> Vec<u8> {
        headers.insert(self.header.clone(), self.value.clone());
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    #[test]
    fn test_set_header_replaces_existing() {
        let rule = SetHeaderRule::new("cache", AllOf::default(), "cache-control", "no-store").unwrap();
        let request = RequestHead::from_request(&Request::builder().body(Body::empty()).unwrap());

        let mut headers = HeaderMap::new();
        headers.append("cache-control", HeaderValue::from_static("max-age=60"));
        headers.append("cache-control", HeaderValue::from_static("public"));

        let body = rule.execute(&request, &mut headers, b"body".to_vec());
        assert_eq!(body, b"body");
        assert_eq!(headers.get_all("cache-control").iter().count(), 1);
        assert_eq!(headers.get("cache-control").unwrap(), "no-store");
    }

    #[test]
    fn test_invalid_value_rejected() {
        assert!(SetHeaderRule::new("bad", AllOf::default(), "x-ok", "line\nbreak").is_err());
    }
}
