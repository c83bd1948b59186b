use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One structured instruction the model may issue per turn.
///
/// The grammar is closed: anything outside this set is a parse failure.
/// Coordinates are absolute pixels in the most recently captured
/// screenshot's frame; scroll deltas are signed pixels (positive = right/down).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Click { x: u32, y: u32 },
    Type { text: String },
    Press { key: String },
    Scroll { dx: i32, dy: i32 },
    Finished,
}

impl Action {
    pub fn keyword(&self) -> &'static str {
        match self {
            Action::Click { .. } => "Click",
            Action::Type { .. } => "Type",
            Action::Press { .. } => "Press",
            Action::Scroll { .. } => "Scroll",
            Action::Finished => "Finished",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("no action invocation found in reply")]
    NoAction { raw: String },
    #[error("malformed {keyword} invocation: {reason}")]
    BadInvocation {
        keyword: String,
        reason: String,
        raw: String,
    },
}

impl ParseError {
    /// The offending model reply, verbatim.
    pub fn raw(&self) -> &str {
        match self {
            ParseError::NoAction { raw } | ParseError::BadInvocation { raw, .. } => raw,
        }
    }
}

// Keywords are case-sensitive. Argument text runs to the closing paren,
// so `Type` text may contain anything except `)`.
static INVOCATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(Click|Type|Press|Scroll|Finished)\s*\(([^)]*)\)").unwrap());

/// Parse a model reply into an [`Action`].
///
/// The model is expected to think out loud before acting, so the reply is
/// scanned for action invocations and the last well-formed one wins.
/// Malformed candidates are skipped when an earlier well-formed one exists;
/// if none is well-formed the error describes the last failure.
pub fn parse_action(reply: &str) -> Result<Action, ParseError> {
    extract(reply).map(|(action, _)| action)
}

/// The prose preceding the extracted invocation, if any.
///
/// Used by the trajectory writer to store the model's reasoning separately
/// from the action line.
pub fn reasoning_prefix(reply: &str) -> Option<String> {
    let (_, start) = extract(reply).ok()?;
    let prefix = reply[..start].trim();
    if prefix.is_empty() {
        None
    } else {
        Some(prefix.to_string())
    }
}

fn extract(reply: &str) -> Result<(Action, usize), ParseError> {
    let mut last_ok: Option<(Action, usize)> = None;
    let mut last_err: Option<ParseError> = None;

    for caps in INVOCATION_RE.captures_iter(reply) {
        let keyword = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let args = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let start = caps.get(0).map(|m| m.start()).unwrap_or(0);

        match build(keyword, args, reply) {
            Ok(action) => last_ok = Some((action, start)),
            Err(e) => last_err = Some(e),
        }
    }

    if let Some(found) = last_ok {
        return Ok(found);
    }
    // A keyword may have appeared without any candidate being well-formed.
    match last_err {
        Some(err) => Err(err),
        None => Err(ParseError::NoAction {
            raw: reply.to_string(),
        }),
    }
}

fn build(keyword: &str, args: &str, raw: &str) -> Result<Action, ParseError> {
    let bad = |reason: String| ParseError::BadInvocation {
        keyword: keyword.to_string(),
        reason,
        raw: raw.to_string(),
    };

    match keyword {
        "Click" => {
            let (a, b) = two_ints(args).map_err(&bad)?;
            let x = u32::try_from(a)
                .map_err(|_| bad(format!("coordinates must be non-negative, got {}", a)))?;
            let y = u32::try_from(b)
                .map_err(|_| bad(format!("coordinates must be non-negative, got {}", b)))?;
            Ok(Action::Click { x, y })
        }
        "Scroll" => {
            let (a, b) = two_ints(args).map_err(&bad)?;
            let dx = i32::try_from(a).map_err(|_| bad(format!("delta out of range: {}", a)))?;
            let dy = i32::try_from(b).map_err(|_| bad(format!("delta out of range: {}", b)))?;
            Ok(Action::Scroll { dx, dy })
        }
        "Type" => {
            let text = strip_quote_pair(args.trim());
            if text.is_empty() {
                return Err(bad("requires text to type".to_string()));
            }
            Ok(Action::Type {
                text: text.to_string(),
            })
        }
        "Press" => {
            let key = args.trim();
            if key.is_empty() {
                return Err(bad("requires a key name, e.g. Press(Enter)".to_string()));
            }
            Ok(Action::Press {
                key: key.to_string(),
            })
        }
        "Finished" => {
            if !args.trim().is_empty() {
                return Err(bad("takes no arguments".to_string()));
            }
            Ok(Action::Finished)
        }
        _ => Err(bad("unknown action".to_string())),
    }
}

fn two_ints(args: &str) -> Result<(i64, i64), String> {
    let parts: Vec<&str> = args.split(',').map(str::trim).collect();
    if parts.len() != 2 {
        return Err(format!("expected 2 arguments, got {}", parts.len()));
    }
    let a = parts[0]
        .parse::<i64>()
        .map_err(|_| format!("'{}' is not an integer", parts[0]))?;
    let b = parts[1]
        .parse::<i64>()
        .map_err(|_| format!("'{}' is not an integer", parts[1]))?;
    Ok((a, b))
}

/// Strip one matching surrounding quote pair, if present. Inner quotes are
/// left alone; unmatched quotes are kept verbatim.
fn strip_quote_pair(text: &str) -> &str {
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_valid() {
        assert_eq!(
            parse_action("Click(500, 300)"),
            Ok(Action::Click { x: 500, y: 300 })
        );
    }

    #[test]
    fn test_click_with_reasoning_prose() {
        let reply = "I can see the search bar near the top.\nI will click it.\nClick(250, 41)";
        assert_eq!(parse_action(reply), Ok(Action::Click { x: 250, y: 41 }));
        assert_eq!(
            reasoning_prefix(reply).unwrap(),
            "I can see the search bar near the top.\nI will click it."
        );
    }

    #[test]
    fn test_last_invocation_wins() {
        let reply = "Earlier I considered Click(1, 2) but instead:\nClick(500, 300)";
        assert_eq!(parse_action(reply), Ok(Action::Click { x: 500, y: 300 }));
    }

    #[test]
    fn test_malformed_last_falls_back_to_earlier_wellformed() {
        let reply = "Click(100, 200) or maybe Click(oops)";
        assert_eq!(parse_action(reply), Ok(Action::Click { x: 100, y: 200 }));
    }

    #[test]
    fn test_click_boundary_zero() {
        assert_eq!(parse_action("Click(0, 0)"), Ok(Action::Click { x: 0, y: 0 }));
    }

    #[test]
    fn test_click_negative_is_parse_error() {
        let err = parse_action("Click(-1, 500)").unwrap_err();
        assert!(matches!(err, ParseError::BadInvocation { .. }));
        assert!(err.to_string().contains("non-negative"));
    }

    #[test]
    fn test_click_wrong_arity() {
        let err = parse_action("Click(500)").unwrap_err();
        assert!(err.to_string().contains("expected 2 arguments"));
    }

    #[test]
    fn test_click_non_integer() {
        let err = parse_action("Click(abc, 300)").unwrap_err();
        assert!(err.to_string().contains("not an integer"));
    }

    #[test]
    fn test_whitespace_around_arguments() {
        assert_eq!(
            parse_action("Click(  500 ,  300  )"),
            Ok(Action::Click { x: 500, y: 300 })
        );
    }

    #[test]
    fn test_type_verbatim_with_spaces() {
        assert_eq!(
            parse_action("Type(flights to Paris)"),
            Ok(Action::Type {
                text: "flights to Paris".to_string()
            })
        );
    }

    #[test]
    fn test_type_strips_single_quote_pair() {
        assert_eq!(
            parse_action("Type(\"shoes\")"),
            Ok(Action::Type {
                text: "shoes".to_string()
            })
        );
        assert_eq!(
            parse_action("Type('shoes')"),
            Ok(Action::Type {
                text: "shoes".to_string()
            })
        );
    }

    #[test]
    fn test_type_keeps_inner_quotes() {
        assert_eq!(
            parse_action("Type(it's \"fine\")"),
            Ok(Action::Type {
                text: "it's \"fine\"".to_string()
            })
        );
    }

    #[test]
    fn test_type_empty_is_error() {
        assert!(parse_action("Type()").is_err());
    }

    #[test]
    fn test_press_valid() {
        assert_eq!(
            parse_action("Press(Enter)"),
            Ok(Action::Press {
                key: "Enter".to_string()
            })
        );
    }

    #[test]
    fn test_press_empty_is_error() {
        assert!(parse_action("Press()").is_err());
    }

    #[test]
    fn test_scroll_signed_deltas() {
        assert_eq!(
            parse_action("Scroll(0, -300)"),
            Ok(Action::Scroll { dx: 0, dy: -300 })
        );
    }

    #[test]
    fn test_finished_no_args() {
        assert_eq!(parse_action("Done. Finished()"), Ok(Action::Finished));
    }

    #[test]
    fn test_finished_with_args_is_error() {
        let err = parse_action("Finished(all done)").unwrap_err();
        assert!(err.to_string().contains("no arguments"));
    }

    #[test]
    fn test_no_action_found() {
        let err = parse_action("I am not sure what to do next.").unwrap_err();
        assert!(matches!(err, ParseError::NoAction { .. }));
        assert_eq!(err.raw(), "I am not sure what to do next.");
    }

    #[test]
    fn test_keywords_are_case_sensitive() {
        assert!(matches!(
            parse_action("click(10, 20)").unwrap_err(),
            ParseError::NoAction { .. }
        ));
    }

    #[test]
    fn test_bare_keyword_without_parens_is_no_action() {
        assert!(matches!(
            parse_action("Finished").unwrap_err(),
            ParseError::NoAction { .. }
        ));
    }

    #[test]
    fn test_error_carries_offending_text() {
        let err = parse_action("Click(1)").unwrap_err();
        assert_eq!(err.raw(), "Click(1)");
    }

    #[test]
    fn test_reasoning_prefix_absent_when_reply_is_bare_action() {
        assert_eq!(reasoning_prefix("Click(1, 2)"), None);
    }

    #[test]
    fn test_serde_tag_shape() {
        let json = serde_json::to_value(Action::Click { x: 1, y: 2 }).unwrap();
        assert_eq!(json["action"], "click");
        assert_eq!(json["x"], 1);
        let json = serde_json::to_value(Action::Finished).unwrap();
        assert_eq!(json["action"], "finished");
    }
}
