//! Server-sent-events framing shared by the providers.

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::StreamExt;

use crate::error::BrainError;

/// Feed every event of `response` to `handle` until it returns `true` or the body ends.
///
/// Returns `true` when `handle` stopped the stream, `false` when the body ran out first.
pub async fn for_each_event<F>(
    provider: &'static str,
    response: reqwest::Response,
    mut handle: F,
) -> Result<bool, BrainError>
where
    F: FnMut(Event) -> Result<bool, BrainError>,
{
    let mut events = response.bytes_stream().eventsource();

    while let Some(event) = events.next().await {
        let event = event.map_err(|e| match e {
            EventStreamError::Transport(e) => BrainError::Http(e),
            other => BrainError::Protocol {
                provider,
                detail: format!("unreadable event stream: {other}"),
            },
        })?;
        if handle(event)? {
            return Ok(true);
        }
    }
    Ok(false)
}
