//! Live progress: agent events on a broadcast channel, shown in the terminal
//! and optionally on a small web page fed by server-sent events.

use std::convert::Infallible;
use std::io::Write;
use std::net::SocketAddr;

use anyhow::Result;
use axum::Router;
use axum::extract::State;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

/// Events published while an agent run progresses.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Thinking { turn: usize, provider: String },
    Delta { text: String },
    Replied { turn: usize },
    Action { turn: usize, description: String },
    ActionError { message: String },
    Observation { url: String },
    Answered { value: i64 },
    Failed { message: String },
}

impl AgentEvent {
    fn name(&self) -> &'static str {
        match self {
            AgentEvent::Thinking { .. } => "thinking",
            AgentEvent::Delta { .. } => "delta",
            AgentEvent::Replied { .. } => "replied",
            AgentEvent::Action { .. } => "action",
            AgentEvent::ActionError { .. } => "action_error",
            AgentEvent::Observation { .. } => "observation",
            AgentEvent::Answered { .. } => "answered",
            AgentEvent::Failed { .. } => "failed",
        }
    }

    fn to_sse_event(&self) -> Event {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        Event::default().event(self.name()).data(data)
    }
}

pub fn channel() -> broadcast::Sender<AgentEvent> {
    let (tx, _) = broadcast::channel(256);
    tx
}

/// Print streamed completions to stderr as they arrive.
pub fn echo_to_terminal(events: &broadcast::Sender<AgentEvent>) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        let mut line_open = false;
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let mut err = std::io::stderr().lock();
            let _ = match event {
                AgentEvent::Thinking { provider, .. } => writeln!(err, "\n--- {provider} ---"),
                AgentEvent::Delta { text } => {
                    line_open = !text.ends_with('\n');
                    write!(err, "{text}")
                }
                AgentEvent::Replied { .. } => {
                    if line_open {
                        let _ = writeln!(err);
                        line_open = false;
                    }
                    writeln!(err, "-----------\n")
                }
                _ => Ok(()),
            };
            let _ = err.flush();
        }
    })
}

/// Serve the progress page on the first free port from `port` upward.
pub async fn start_server(port: u16, events: broadcast::Sender<AgentEvent>) -> Result<SocketAddr> {
    let app = Router::new()
        .route("/", get(index_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { axum::http::StatusCode::NO_CONTENT }),
        )
        .with_state(events);

    let mut listener = None;
    for p in port..port.saturating_add(10) {
        match tokio::net::TcpListener::bind(("127.0.0.1", p)).await {
            Ok(l) => {
                listener = Some(l);
                break;
            }
            Err(_) => continue,
        }
    }
    let listener = listener.ok_or_else(|| {
        anyhow::anyhow!("Could not bind to any port {}-{}", port, port.saturating_add(9))
    })?;
    let addr = listener.local_addr()?;
    info!("Progress page at http://{}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("progress server stopped: {e}");
        }
    });

    Ok(addr)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn sse_handler(
    State(events): State<broadcast::Sender<AgentEvent>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(events.subscribe()).filter_map(|result| match result {
        Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>browser-oracle</title>
<style>
  body { background: #0a0a0f; color: #e0e0e0; font-family: system-ui, sans-serif; margin: 0; }
  header { padding: 16px 24px; border-bottom: 1px solid #1a1a2e; font-weight: 600; }
  #log { max-width: 900px; margin: 0 auto; padding: 16px 24px; }
  .turn { white-space: pre-wrap; background: #14141f; border-radius: 8px; padding: 10px 14px; margin: 8px 0; font-size: 14px; }
  .note { color: #9ca3af; font-size: 13px; margin: 4px 0; }
  .error { color: #f87171; }
  .answer { color: #22c55e; font-size: 18px; font-weight: 600; }
</style>
</head>
<body>
<header>browser-oracle: live progress</header>
<div id="log"></div>
<script>
  const log = document.getElementById('log');
  let current = null;
  function note(text, cls) {
    const div = document.createElement('div');
    div.className = 'note ' + (cls || '');
    div.textContent = text;
    log.appendChild(div);
    window.scrollTo(0, document.body.scrollHeight);
  }
  const es = new EventSource('/events');
  es.addEventListener('thinking', e => {
    const d = JSON.parse(e.data);
    note('turn ' + d.turn + ' (' + d.provider + ')');
    current = document.createElement('div');
    current.className = 'turn';
    log.appendChild(current);
  });
  es.addEventListener('delta', e => {
    if (current) current.textContent += JSON.parse(e.data).text;
    window.scrollTo(0, document.body.scrollHeight);
  });
  es.addEventListener('action', e => note('action: ' + JSON.parse(e.data).description));
  es.addEventListener('action_error', e => note('error: ' + JSON.parse(e.data).message, 'error'));
  es.addEventListener('observation', e => note('now at ' + JSON.parse(e.data).url));
  es.addEventListener('answered', e => note('answer: ' + JSON.parse(e.data).value, 'answer'));
  es.addEventListener('failed', e => note('failed: ' + JSON.parse(e.data).message, 'error'));
</script>
</body>
</html>
"##;
