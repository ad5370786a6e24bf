use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::brain::CompletionBackend;
use crate::error::{AgentError, TurnError};
use crate::face::AgentEvent;
use crate::hands::BrowserDriver;
use crate::prompts;
use crate::tags::parse_action;
use crate::types::{Action, ChatMessage, PageSnapshot};

#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    /// Give up after this many completions. `None` runs until an answer.
    pub max_turns: Option<usize>,
}

/// Drives a browser toward a numeric answer, one completion per turn.
pub struct Agent {
    backend: Arc<dyn CompletionBackend>,
    events: broadcast::Sender<AgentEvent>,
    options: AgentOptions,
    system: String,
}

/// State owned by a single run; dropped when the run ends.
#[derive(Debug)]
struct RunState {
    conversation: Vec<ChatMessage>,
    last_wait: Duration,
    turn: usize,
}

enum TurnOutcome {
    Observed(PageSnapshot),
    Answered(i64),
    NoAction,
}

impl Agent {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        events: broadcast::Sender<AgentEvent>,
        options: AgentOptions,
    ) -> Self {
        Self {
            backend,
            events,
            options,
            system: prompts::system_prompt(),
        }
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.events.send(event);
    }

    /// Run `task` to completion on `browser`.
    ///
    /// Parse and action errors are handed back to the model; completion
    /// failures and fatal browser errors end the run.
    pub async fn run(&self, browser: &mut dyn BrowserDriver, task: &str) -> Result<i64, AgentError> {
        let mut run = RunState {
            conversation: vec![ChatMessage::user(prompts::task_message(task))],
            last_wait: Duration::ZERO,
            turn: 0,
        };

        let result = self.run_turns(browser, &mut run).await;
        match &result {
            Ok(value) => {
                info!(turns = run.turn, value, "answered");
                self.emit(AgentEvent::Answered { value: *value });
            }
            Err(e) => {
                warn!(turns = run.turn, "run aborted: {e}");
                self.emit(AgentEvent::Failed {
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn run_turns(
        &self,
        browser: &mut dyn BrowserDriver,
        run: &mut RunState,
    ) -> Result<i64, AgentError> {
        loop {
            if let Some(max) = self.options.max_turns {
                if run.turn >= max {
                    return Err(AgentError::TurnLimit(max));
                }
            }
            run.turn += 1;

            debug!(turn = run.turn, messages = run.conversation.len(), "requesting completion");
            self.emit(AgentEvent::Thinking {
                turn: run.turn,
                provider: self.backend.name().to_string(),
            });
            let events = &self.events;
            let reply = self
                .backend
                .complete(&self.system, &run.conversation, &mut |delta: &str| {
                    let _ = events.send(AgentEvent::Delta {
                        text: delta.to_string(),
                    });
                })
                .await?;
            self.emit(AgentEvent::Replied { turn: run.turn });
            run.conversation.push(ChatMessage::assistant(reply.clone()));

            let next = match self.take_turn(browser, run, &reply).await {
                Ok(TurnOutcome::Answered(value)) => return Ok(value),
                Ok(TurnOutcome::Observed(snapshot)) => snapshot.to_message(),
                Ok(TurnOutcome::NoAction) => {
                    debug!(turn = run.turn, "no action in reply");
                    prompts::no_action_message()
                }
                Err(TurnError::Action(e)) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!(turn = run.turn, "step failed: {e}");
                    self.emit(AgentEvent::ActionError {
                        message: e.to_string(),
                    });
                    e.to_string()
                }
            };
            run.conversation.push(ChatMessage::user(next));
        }
    }

    async fn take_turn(
        &self,
        browser: &mut dyn BrowserDriver,
        run: &mut RunState,
        reply: &str,
    ) -> Result<TurnOutcome, TurnError> {
        let Some(action) = parse_action(reply)? else {
            return Ok(TurnOutcome::NoAction);
        };

        info!(turn = run.turn, "action: {action}");
        self.emit(AgentEvent::Action {
            turn: run.turn,
            description: action.to_string(),
        });

        match &action {
            Action::Answer { value } => return Ok(TurnOutcome::Answered(*value)),
            Action::Goto { url } => browser.navigate(url).await?,
            Action::Click { pointer } => browser.click(*pointer).await?,
            Action::Type {
                pointer,
                text,
                press_enter,
            } => browser.type_text(*pointer, text, *press_enter).await?,
        }

        run.last_wait = action.settle_time(&browser.settle_times());
        debug!(wait = ?run.last_wait, "letting the page settle");
        tokio::time::sleep(run.last_wait).await;

        let snapshot = browser.snapshot().await?;
        self.emit(AgentEvent::Observation {
            url: snapshot.url.clone(),
        });
        Ok(TurnOutcome::Observed(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{ActionError, BrainError};
    use crate::face;
    use crate::types::SettleTimes;

    /// Replies from a fixed script and records every conversation it was shown.
    struct ScriptedBackend {
        replies: Mutex<VecDeque<String>>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedBackend {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn conversation(&self, call: usize) -> Vec<ChatMessage> {
            self.seen.lock().unwrap()[call].clone()
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn complete(
            &self,
            _system: &str,
            conversation: &[ChatMessage],
            on_delta: &mut (dyn for<'d> FnMut(&'d str) + Send),
        ) -> Result<String, BrainError> {
            self.seen.lock().unwrap().push(conversation.to_vec());
            let reply = self.replies.lock().unwrap().pop_front().ok_or(BrainError::Protocol {
                provider: "scripted",
                detail: "script exhausted".into(),
            })?;
            on_delta(&reply);
            Ok(reply)
        }
    }

    #[derive(Default)]
    struct FakeBrowser {
        known_pointers: HashSet<u32>,
        url: Option<String>,
        calls: Vec<String>,
        lose_pages: bool,
        connection_closed: bool,
        goto_settle: Duration,
    }

    #[async_trait]
    impl BrowserDriver for FakeBrowser {
        async fn navigate(&mut self, url: &str) -> Result<(), ActionError> {
            self.calls.push(format!("goto {url}"));
            if self.lose_pages {
                return Err(ActionError::NoOpenPages);
            }
            self.url = Some(url.to_string());
            self.known_pointers = [1, 2].into_iter().collect();
            Ok(())
        }

        async fn click(&mut self, pointer: u32) -> Result<(), ActionError> {
            self.calls.push(format!("click {pointer}"));
            if self.known_pointers.contains(&pointer) {
                Ok(())
            } else {
                Err(ActionError::PointerNotFound(pointer))
            }
        }

        async fn type_text(
            &mut self,
            pointer: u32,
            text: &str,
            press_enter: bool,
        ) -> Result<(), ActionError> {
            self.calls.push(format!("type {pointer} {text} {press_enter}"));
            if self.known_pointers.contains(&pointer) {
                Ok(())
            } else {
                Err(ActionError::PointerNotFound(pointer))
            }
        }

        async fn snapshot(&mut self) -> Result<PageSnapshot, ActionError> {
            if self.connection_closed {
                return Err(ActionError::BrowserLost(
                    "underlying connection is closed".into(),
                ));
            }
            Ok(match &self.url {
                Some(url) => PageSnapshot {
                    url: url.clone(),
                    content: "- pointer: 1\n  tag: BUTTON\n".into(),
                },
                None => PageSnapshot::not_loaded(),
            })
        }

        fn settle_times(&self) -> SettleTimes {
            SettleTimes {
                goto: self.goto_settle,
                ..SettleTimes::none()
            }
        }
    }

    fn agent(backend: Arc<ScriptedBackend>, max_turns: Option<usize>) -> Agent {
        Agent::new(
            backend,
            face::channel(),
            AgentOptions { max_turns },
        )
    }

    #[tokio::test]
    async fn immediate_answer_touches_no_browser() {
        let backend = ScriptedBackend::new(&["The answer is known.\n<answer>42</answer>"]);
        let mut browser = FakeBrowser::default();

        let value = agent(backend.clone(), None)
            .run(&mut browser, "What is six times seven?")
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert!(browser.calls.is_empty());
        assert_eq!(
            backend.conversation(0),
            vec![ChatMessage::user(prompts::task_message("What is six times seven?"))]
        );
    }

    #[tokio::test]
    async fn missing_pointer_is_reported_and_the_model_recovers() {
        let backend = ScriptedBackend::new(&[
            "<click><pointer>999</pointer></click>",
            "<answer>7</answer>",
        ]);
        let mut browser = FakeBrowser::default();

        let value = agent(backend.clone(), None)
            .run(&mut browser, "task")
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(browser.calls, vec!["click 999"]);
        let second = backend.conversation(1);
        assert_eq!(second.len(), 3);
        assert_eq!(
            second[2],
            ChatMessage::user("element with pointer 999 not found")
        );
    }

    #[tokio::test]
    async fn navigation_is_followed_by_an_observation() {
        let backend = ScriptedBackend::new(&[
            "<goto>https://example.com/</goto>",
            "<type-and-press-enter><pointer>2</pointer><text>rust</text></type-and-press-enter>",
            "<answer>3</answer>",
        ]);
        let mut browser = FakeBrowser::default();

        let value = agent(backend.clone(), None)
            .run(&mut browser, "task")
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(
            browser.calls,
            vec!["goto https://example.com/", "type 2 rust true"]
        );
        let observed = &backend.conversation(1)[2];
        assert!(observed.content.starts_with(
            "Current URL: https://example.com/\n\nCurrent page content:\n- pointer: 1"
        ));
    }

    #[tokio::test]
    async fn reply_without_action_gets_guidance() {
        let backend = ScriptedBackend::new(&["I am thinking...", "<answer>1</answer>"]);
        let mut browser = FakeBrowser::default();

        agent(backend.clone(), None)
            .run(&mut browser, "task")
            .await
            .unwrap();

        assert_eq!(
            backend.conversation(1)[2],
            ChatMessage::user(prompts::no_action_message())
        );
    }

    #[tokio::test]
    async fn malformed_tags_are_reported_not_guessed() {
        let backend = ScriptedBackend::new(&[
            "<goto>https://a.example/</goto> or <goto>https://b.example/</goto>",
            "<answer>5</answer>",
        ]);
        let mut browser = FakeBrowser::default();

        let value = agent(backend.clone(), None)
            .run(&mut browser, "task")
            .await
            .unwrap();

        assert_eq!(value, 5);
        assert!(browser.calls.is_empty());
        assert!(backend.conversation(1)[2].content.contains("improperly placed"));
    }

    #[tokio::test]
    async fn turn_limit_gives_up() {
        let backend = ScriptedBackend::new(&["hmm", "hmm", "<answer>1</answer>"]);
        let mut browser = FakeBrowser::default();

        let err = agent(backend.clone(), Some(2))
            .run(&mut browser, "task")
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::TurnLimit(2)));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn fatal_browser_errors_abort_the_run() {
        let backend = ScriptedBackend::new(&["<goto>https://example.com/</goto>", "<answer>1</answer>"]);
        let mut browser = FakeBrowser {
            lose_pages: true,
            ..Default::default()
        };

        let err = agent(backend.clone(), None)
            .run(&mut browser, "task")
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Action(ActionError::NoOpenPages)));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn waits_for_the_drivers_settle_time() {
        let backend = ScriptedBackend::new(&[
            "<goto>https://example.com/</goto>",
            "<answer>2</answer>",
        ]);
        let mut browser = FakeBrowser {
            goto_settle: Duration::from_millis(60),
            ..Default::default()
        };

        let started = std::time::Instant::now();
        agent(backend, None).run(&mut browser, "task").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn lost_browser_ends_the_run_instead_of_looping() {
        let backend = ScriptedBackend::new(&[
            "<goto>https://example.com/</goto>",
            "<goto>https://example.com/</goto>",
            "<answer>1</answer>",
        ]);
        let mut browser = FakeBrowser {
            connection_closed: true,
            ..Default::default()
        };

        let err = agent(backend.clone(), None)
            .run(&mut browser, "task")
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Action(ActionError::BrowserLost(_))));
        assert_eq!(backend.calls(), 1);
        assert_eq!(browser.calls, vec!["goto https://example.com/"]);
    }

    #[tokio::test]
    async fn completion_failure_aborts_the_run() {
        let backend = ScriptedBackend::new(&[]);
        let mut browser = FakeBrowser::default();

        let err = agent(backend, None)
            .run(&mut browser, "task")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Brain(BrainError::Protocol { .. })));
    }

    #[tokio::test]
    async fn progress_events_are_published() {
        let backend = ScriptedBackend::new(&["<answer>9</answer>"]);
        let events = face::channel();
        let mut rx = events.subscribe();
        let agent = Agent::new(
            backend,
            events,
            AgentOptions { max_turns: None },
        );

        agent.run(&mut FakeBrowser::default(), "task").await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen.first(),
            Some(&AgentEvent::Thinking {
                turn: 1,
                provider: "scripted".into(),
            })
        );
        assert!(seen.contains(&AgentEvent::Delta {
            text: "<answer>9</answer>".into(),
        }));
        assert_eq!(seen.last(), Some(&AgentEvent::Answered { value: 9 }));
    }
}
