use serde::{Deserialize, Serialize};

use crate::database::models::Snapshot;

/// Content-match rule configured on a monitor, stored as JSON in its row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchRule {
    /// No rule; the monitor only tracks reachability.
    #[default]
    None,
    /// Match when the response status equals the expected code.
    StatusCode { expected: u16 },
    /// Match when the response body contains the needle.
    BodyContains { needle: String },
    /// Match when the named response header's value contains the needle.
    HeaderValue { name: String, contains: String },
}

/// Rule evaluator bound to one completed snapshot. Constructed fresh per
/// evaluation, never persisted.
pub trait Matcher: Send {
    fn is_match(&self) -> bool;

    /// Human-readable description, used when a match is being reported.
    fn message(&self) -> String;
}

/// Resolve the matcher variant bound to a snapshot's configured rule.
///
/// Matchers tolerate incomplete snapshots (missing status, empty body) by
/// reporting no match, though the executor never evaluates them on
/// transport error.
pub fn for_snapshot(rule: &MatchRule, snapshot: &Snapshot) -> Box<dyn Matcher> {
    match rule {
        MatchRule::None => Box::new(NeverMatcher),
        MatchRule::StatusCode { expected } => Box::new(StatusCodeMatcher {
            expected: *expected,
            actual: snapshot.http_status_code,
        }),
        MatchRule::BodyContains { needle } => Box::new(BodyMatcher {
            needle: needle.clone(),
            body: snapshot.body_content.clone(),
        }),
        MatchRule::HeaderValue { name, contains } => Box::new(HeaderMatcher {
            name: name.clone(),
            contains: contains.clone(),
            headers: snapshot.headers.clone(),
        }),
    }
}

struct NeverMatcher;

impl Matcher for NeverMatcher {
    fn is_match(&self) -> bool {
        false
    }

    fn message(&self) -> String {
        "no match rule configured".to_string()
    }
}

struct StatusCodeMatcher {
    expected: u16,
    actual: Option<u16>,
}

impl Matcher for StatusCodeMatcher {
    fn is_match(&self) -> bool {
        self.actual == Some(self.expected)
    }

    fn message(&self) -> String {
        format!("http status is {}", self.expected)
    }
}

struct BodyMatcher {
    needle: String,
    body: String,
}

impl Matcher for BodyMatcher {
    fn is_match(&self) -> bool {
        !self.needle.is_empty() && self.body.contains(&self.needle)
    }

    fn message(&self) -> String {
        format!("response body contains {:?}", self.needle)
    }
}

struct HeaderMatcher {
    name: String,
    contains: String,
    headers: String,
}

impl HeaderMatcher {
    /// Header names compare case-insensitively; the first matching line wins.
    fn header_value(&self) -> Option<&str> {
        self.headers.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim().eq_ignore_ascii_case(&self.name).then(|| value.trim())
        })
    }
}

impl Matcher for HeaderMatcher {
    fn is_match(&self) -> bool {
        self.header_value().is_some_and(|value| value.contains(&self.contains))
    }

    fn message(&self) -> String {
        format!("header {} contains {:?}", self.name, self.contains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn snapshot_with(status: Option<u16>, headers: &str, body: &str) -> Snapshot {
        let mut snapshot = Snapshot::pending(Uuid::new_v4());
        snapshot.http_status_code = status;
        snapshot.headers = headers.to_string();
        snapshot.body_content = body.to_string();
        snapshot.is_done = true;
        snapshot
    }

    #[test]
    fn test_status_code_matcher() {
        let snapshot = snapshot_with(Some(503), "", "");

        let rule = MatchRule::StatusCode { expected: 503 };
        assert!(for_snapshot(&rule, &snapshot).is_match());

        let rule = MatchRule::StatusCode { expected: 200 };
        assert!(!for_snapshot(&rule, &snapshot).is_match());

        // no status recorded at all
        let empty = snapshot_with(None, "", "");
        let rule = MatchRule::StatusCode { expected: 503 };
        assert!(!for_snapshot(&rule, &empty).is_match());
    }

    #[test]
    fn test_body_matcher() {
        let snapshot = snapshot_with(Some(200), "", "service temporarily unavailable");

        let rule = MatchRule::BodyContains { needle: "unavailable".to_string() };
        assert!(for_snapshot(&rule, &snapshot).is_match());

        let rule = MatchRule::BodyContains { needle: "maintenance".to_string() };
        assert!(!for_snapshot(&rule, &snapshot).is_match());

        // an empty needle never matches
        let rule = MatchRule::BodyContains { needle: String::new() };
        assert!(!for_snapshot(&rule, &snapshot).is_match());
    }

    #[test]
    fn test_header_matcher_is_case_insensitive_on_names() {
        let headers = "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\n";
        let snapshot = snapshot_with(Some(200), headers, "");

        let rule = MatchRule::HeaderValue {
            name: "content-type".to_string(),
            contains: "text/html".to_string(),
        };
        assert!(for_snapshot(&rule, &snapshot).is_match());

        let rule = MatchRule::HeaderValue {
            name: "content-type".to_string(),
            contains: "application/json".to_string(),
        };
        assert!(!for_snapshot(&rule, &snapshot).is_match());

        let rule = MatchRule::HeaderValue {
            name: "x-missing".to_string(),
            contains: "anything".to_string(),
        };
        assert!(!for_snapshot(&rule, &snapshot).is_match());
    }

    #[test]
    fn test_none_rule_never_matches() {
        let snapshot = snapshot_with(Some(200), "", "anything");
        assert!(!for_snapshot(&MatchRule::None, &snapshot).is_match());
    }

    #[test]
    fn test_rule_serialization_tags() {
        let rule = MatchRule::BodyContains { needle: "down".to_string() };
        let json = serde_json::to_string(&rule).unwrap();
        assert_eq!(json, r#"{"kind":"body_contains","needle":"down"}"#);

        let parsed: MatchRule = serde_json::from_str(r#"{"kind":"none"}"#).unwrap();
        assert_eq!(parsed, MatchRule::None);

        let parsed: MatchRule =
            serde_json::from_str(r#"{"kind":"status_code","expected":500}"#).unwrap();
        assert_eq!(parsed, MatchRule::StatusCode { expected: 500 });
    }
}
