/// One example of each action the model may request.
pub const ACTIONS_PROMPT: &str = r#"<goto>https://example.com/</goto>
<click><pointer>123</pointer></click>
<type-without-pressing-enter><pointer>123</pointer><text>some text to type</text></type-without-pressing-enter>
<type-and-press-enter><pointer>123</pointer><text>some text to type</text></type-and-press-enter>
<answer>8200000</answer>"#;

pub fn system_prompt() -> String {
    format!(
        r#"You are an automated web browsing AI. The user wants help finding a numeric answer to their question. You have access to a web browser, and the ability to navigate, click, and type. You can reference elements on the page like buttons and text fields by their pointer number.

Each time you respond, take the following steps:

1. Describe what you see on the page
2. Write down your thoughts as you brainstorm
3. After you've written down all relevant info, take one of the actions below

{ACTIONS_PROMPT}

Make sure to check for overlays like cookie approval and take care of them before using a site.

Do not give up. If you get stuck on one path, try something else. You can always Google relevant sources if you're stumped."#
    )
}

/// Sent when a reply contains no recognised action.
pub fn no_action_message() -> String {
    format!("I'm not sure what to do. Please request one of these actions:\n\n{ACTIONS_PROMPT}")
}

/// First message of every run.
pub fn task_message(task: &str) -> String {
    format!(
        "User task:\n\n{task}\n\nCurrent URL: {none}\n\nCurrent page content:\n{none}",
        none = crate::types::NO_PAGE_LOADED
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::{ACTION_TAGS, parse_tag};

    #[test]
    fn actions_prompt_shows_every_action_once() {
        for tag in ACTION_TAGS {
            assert!(parse_tag(ACTIONS_PROMPT, tag).unwrap().is_some(), "{tag}");
        }
        assert!(system_prompt().contains(ACTIONS_PROMPT));
    }

    #[test]
    fn task_message_starts_without_a_page() {
        let msg = task_message("How many stars does the rust-lang/rust repo have?");
        assert!(msg.starts_with("User task:\n\nHow many stars"));
        assert!(msg.ends_with("Current page content:\n<no page loaded>"));
    }
}
