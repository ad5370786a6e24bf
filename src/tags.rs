//! Parsing of the tagged action grammar the model replies with.
//!
//! ```text
//! <goto>URL</goto>
//! <click><pointer>N</pointer></click>
//! <type-without-pressing-enter><pointer>N</pointer><text>STR</text></type-without-pressing-enter>
//! <type-and-press-enter><pointer>N</pointer><text>STR</text></type-and-press-enter>
//! <answer>INTEGER</answer>
//! ```

use crate::error::ParseError;
use crate::types::Action;

pub const GOTO: &str = "goto";
pub const CLICK: &str = "click";
pub const TYPE_WITHOUT_ENTER: &str = "type-without-pressing-enter";
pub const TYPE_AND_ENTER: &str = "type-and-press-enter";
pub const ANSWER: &str = "answer";

/// Tags checked in priority order; the first one present wins.
pub const ACTION_TAGS: [&str; 5] = [GOTO, CLICK, TYPE_WITHOUT_ENTER, TYPE_AND_ENTER, ANSWER];

/// Extract the trimmed content of `<tag>...</tag>` from `input`.
///
/// Returns `Ok(None)` when neither marker occurs. A lone marker, markers in
/// the wrong order, or either marker occurring twice is an error.
pub fn parse_tag(input: &str, tag: &str) -> Result<Option<String>, ParseError> {
    let start_tag = format!("<{tag}>");
    let end_tag = format!("</{tag}>");

    let starts = input.matches(&start_tag).count();
    let ends = input.matches(&end_tag).count();

    if starts == 0 && ends == 0 {
        return Ok(None);
    }

    let malformed = || ParseError::MalformedTag {
        tag: tag.to_string(),
    };

    if starts != 1 || ends != 1 {
        return Err(malformed());
    }

    let start = input.find(&start_tag).ok_or_else(malformed)?;
    let end = input.find(&end_tag).ok_or_else(malformed)?;
    let content_start = start + start_tag.len();
    if content_start > end {
        return Err(malformed());
    }

    Ok(Some(strip_code_fence(input[content_start..end].trim()).to_string()))
}

fn strip_code_fence(content: &str) -> &str {
    let mut content = content;
    if content.starts_with("```") {
        // Drop the opening fence line, language hint included.
        content = match content.find('\n') {
            Some(newline) => &content[newline + 1..],
            None => &content[3..],
        };
    }
    if let Some(stripped) = content.strip_suffix("```") {
        content = stripped;
    }
    content.trim()
}

/// Find the first action in `response`, honouring [`ACTION_TAGS`] order.
///
/// Only the first tag present is parsed; later tags are ignored even if
/// they are malformed.
pub fn parse_action(response: &str) -> Result<Option<Action>, ParseError> {
    for tag in ACTION_TAGS {
        let Some(payload) = parse_tag(response, tag)? else {
            continue;
        };

        let action = match tag {
            GOTO => Action::Goto {
                url: required(Some(payload), "goto", "a url")?,
            },
            CLICK => Action::Click {
                pointer: parse_pointer(&payload, "click")?,
            },
            TYPE_WITHOUT_ENTER | TYPE_AND_ENTER => {
                let pointer = parse_pointer(&payload, tag)?;
                let text = required(parse_tag(&payload, "text")?, tag, "text")?;
                Action::Type {
                    pointer,
                    text,
                    press_enter: tag == TYPE_AND_ENTER,
                }
            }
            _ => Action::Answer {
                value: parse_answer(&payload)?,
            },
        };
        return Ok(Some(action));
    }
    Ok(None)
}

fn required(
    value: Option<String>,
    action: &'static str,
    field: &'static str,
) -> Result<String, ParseError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or(ParseError::MissingField { action, field })
}

fn parse_pointer(payload: &str, action: &'static str) -> Result<u32, ParseError> {
    let raw = required(parse_tag(payload, "pointer")?, action, "a pointer")?;
    raw.parse::<u32>()
        .map_err(|_| ParseError::InvalidPointer(raw.clone()))
}

/// Lenient integer parse: separators are dropped and the leading digits taken.
pub fn parse_answer(payload: &str) -> Result<i64, ParseError> {
    let cleaned: String = payload
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '_')
        .collect();

    let (sign, digits) = match cleaned.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, cleaned.strip_prefix('+').unwrap_or(&cleaned)),
    };
    let leading: String = digits.chars().take_while(|c| c.is_ascii_digit()).collect();
    if leading.is_empty() {
        return Err(ParseError::InvalidAnswer(payload.to_string()));
    }

    leading
        .parse::<i64>()
        .map(|v| sign * v)
        .map_err(|_| ParseError::InvalidAnswer(payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_tag_is_none() {
        assert_eq!(parse_tag("just thinking out loud", "goto").unwrap(), None);
    }

    #[test]
    fn content_is_trimmed() {
        let text = "I will search.\n<goto>\n  https://example.com/  \n</goto>\n";
        assert_eq!(
            parse_tag(text, "goto").unwrap().as_deref(),
            Some("https://example.com/")
        );
    }

    #[test]
    fn wrapping_then_parsing_returns_trimmed_content() {
        for content in ["plain", "  padded  ", "multi\nline\ntext", "<pointer>3</pointer>"] {
            let wrapped = format!("prefix <answer>{content}</answer> suffix");
            assert_eq!(
                parse_tag(&wrapped, "answer").unwrap(),
                Some(content.trim().to_string())
            );
        }
    }

    #[test]
    fn fenced_content_is_unwrapped() {
        let text = "<goto>\n```text\nhttps://example.com/\n```\n</goto>";
        assert_eq!(
            parse_tag(text, "goto").unwrap().as_deref(),
            Some("https://example.com/")
        );
    }

    #[test]
    fn duplicate_markers_are_rejected() {
        let twice = "<goto>a</goto> or maybe <goto>b</goto>";
        assert!(matches!(
            parse_tag(twice, "goto"),
            Err(ParseError::MalformedTag { .. })
        ));
        assert!(parse_tag("<goto>a</goto></goto>", "goto").is_err());
        assert!(parse_tag("<goto><goto>a</goto>", "goto").is_err());
    }

    #[test]
    fn unpaired_or_reversed_markers_are_rejected() {
        assert!(parse_tag("<goto>https://example.com", "goto").is_err());
        assert!(parse_tag("https://example.com</goto>", "goto").is_err());
        assert!(parse_tag("</goto>https://example.com<goto>", "goto").is_err());
    }

    #[test]
    fn similar_tag_names_do_not_collide() {
        let text = "<type-and-press-enter><pointer>4</pointer><text>rust</text></type-and-press-enter>";
        assert_eq!(parse_tag(text, "type-without-pressing-enter").unwrap(), None);
        assert_eq!(
            parse_action(text).unwrap(),
            Some(Action::Type {
                pointer: 4,
                text: "rust".into(),
                press_enter: true,
            })
        );
    }

    #[test]
    fn actions_follow_priority_order() {
        let text = "<answer>5</answer>\n<click><pointer>12</pointer></click>";
        assert_eq!(
            parse_action(text).unwrap(),
            Some(Action::Click { pointer: 12 })
        );
    }

    #[test]
    fn no_action_is_none() {
        assert_eq!(parse_action("<scroll>down</scroll>").unwrap(), None);
    }

    #[test]
    fn click_without_pointer_is_an_error() {
        assert_eq!(
            parse_action("<click>the login button</click>"),
            Err(ParseError::MissingField {
                action: "click",
                field: "a pointer",
            })
        );
        assert!(matches!(
            parse_action("<click><pointer>abc</pointer></click>"),
            Err(ParseError::InvalidPointer(_))
        ));
    }

    #[test]
    fn typing_requires_text() {
        let text = "<type-without-pressing-enter><pointer>2</pointer></type-without-pressing-enter>";
        assert_eq!(
            parse_action(text),
            Err(ParseError::MissingField {
                action: TYPE_WITHOUT_ENTER,
                field: "text",
            })
        );
    }

    #[test]
    fn answers_parse_leniently() {
        assert_eq!(parse_answer("8200000").unwrap(), 8_200_000);
        assert_eq!(parse_answer(" 8,200,000 ").unwrap(), 8_200_000);
        assert_eq!(parse_answer("-42").unwrap(), -42);
        assert_eq!(parse_answer("42.9").unwrap(), 42);
        assert_eq!(parse_answer("17 degrees").unwrap(), 17);
        assert!(matches!(
            parse_answer("about forty"),
            Err(ParseError::InvalidAnswer(_))
        ));
    }
}
