use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info, warn};

use crate::dom::{self, RawNode};
use crate::error::ActionError;
use crate::types::{FOCUS_CLICKS, PageSnapshot, SettleTimes};

/// Primitive browser actions the agent loop relies on.
#[async_trait]
pub trait BrowserDriver: Send {
    /// Load `url` in the current page.
    async fn navigate(&mut self, url: &str) -> Result<(), ActionError>;

    async fn click(&mut self, pointer: u32) -> Result<(), ActionError>;

    /// Focus the element, type `text`, and optionally press Enter.
    async fn type_text(
        &mut self,
        pointer: u32,
        text: &str,
        press_enter: bool,
    ) -> Result<(), ActionError>;

    /// Current URL and page content, or the "no page loaded" sentinel
    /// before the first navigation.
    async fn snapshot(&mut self) -> Result<PageSnapshot, ActionError>;

    /// Pauses this driver applies around its actions.
    fn settle_times(&self) -> SettleTimes;
}

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub window_size: (u32, u32),
    /// Where copies of each page content snapshot are written.
    pub audit_dir: PathBuf,
    pub settle: SettleTimes,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: false,
            window_size: (1000, 2000),
            audit_dir: std::env::temp_dir(),
            settle: SettleTimes::default(),
        }
    }
}

/// Pointers issued by the last extraction, valid only for the page they came from.
#[derive(Debug, Default)]
pub struct PointerMap {
    target_id: Option<String>,
    tags: BTreeMap<u32, String>,
}

impl PointerMap {
    pub fn replace(&mut self, target_id: String, tags: BTreeMap<u32, String>) {
        self.target_id = Some(target_id);
        self.tags = tags;
    }

    pub fn clear(&mut self) {
        self.target_id = None;
        self.tags.clear();
    }

    /// Tag of `pointer` if it was issued for `target_id`.
    pub fn resolve(&self, target_id: &str, pointer: u32) -> Result<&str, ActionError> {
        match &self.target_id {
            Some(t) if t == target_id => self
                .tags
                .get(&pointer)
                .map(String::as_str)
                .ok_or(ActionError::PointerNotFound(pointer)),
            _ => Err(ActionError::PointerNotFound(pointer)),
        }
    }
}

/// One Chrome process and its tabs. The newest tab is the current page,
/// which follows links that open in a new tab.
pub struct ChromeSession {
    browser: Browser,
    options: BrowserOptions,
    has_navigated: bool,
    pointers: PointerMap,
}

impl ChromeSession {
    pub async fn launch(options: BrowserOptions) -> Result<Self> {
        let headless = options.headless;
        let window_size = options.window_size;

        info!(headless, "Starting Chrome...");
        let browser = tokio::task::spawn_blocking(move || -> Result<Browser> {
            let launch = LaunchOptions {
                headless,
                window_size: Some(window_size),
                args: vec![
                    OsStr::new("--no-first-run"),
                    OsStr::new("--no-default-browser-check"),
                ],
                // Completions can take a while; keep the browser alive between turns.
                idle_browser_timeout: Duration::from_secs(600),
                ..Default::default()
            };
            let browser = Browser::new(launch)
                .map_err(|e| anyhow::anyhow!("Browser launch failed: {}", e))?;
            let needs_tab = browser
                .get_tabs()
                .lock()
                .map(|tabs| tabs.is_empty())
                .unwrap_or(true);
            if needs_tab {
                browser.new_tab()?;
            }
            Ok(browser)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Browser launch panicked: {}", e))??;
        info!("Chrome ready.");

        Ok(Self {
            browser,
            options,
            has_navigated: false,
            pointers: PointerMap::default(),
        })
    }

    fn current_tab(&self) -> Result<Arc<Tab>, ActionError> {
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .map_err(|_| ActionError::BrowserLost("tab list poisoned".into()))?;
        tabs.last().cloned().ok_or(ActionError::NoOpenPages)
    }

    /// Reclassify a failed action as [`ActionError::BrowserLost`] when the
    /// DevTools connection no longer responds.
    async fn check_alive<T: Send>(
        &self,
        result: Result<T, ActionError>,
    ) -> Result<T, ActionError> {
        let err = match result {
            Err(
                err @ (ActionError::Browser(_)
                | ActionError::Navigation { .. }
                | ActionError::PointerNotFound(_)),
            ) => err,
            other => return other,
        };
        let browser = self.browser.clone();
        let alive = tokio::task::spawn_blocking(move || browser.get_version().map(|_| ()))
            .await
            .map_err(|e| e.to_string())
            .and_then(|r| r.map_err(|e| format!("{e:#}")));
        if let Err(reason) = &alive {
            warn!("Chrome stopped responding: {reason}");
        }
        Err(lost_or(err, alive))
    }

    /// Current tab, after checking `pointer` belongs to it.
    fn tab_for_pointer(&self, pointer: u32) -> Result<Arc<Tab>, ActionError> {
        let tab = self.current_tab()?;
        let tag = self.pointers.resolve(tab.get_target_id(), pointer)?;
        debug!(pointer, tag, "resolved pointer");
        Ok(tab)
    }
}

/// Run `f` against `tab` on the blocking pool; headless_chrome is synchronous.
async fn on_tab<T, F>(tab: Arc<Tab>, f: F) -> Result<T, ActionError>
where
    F: FnOnce(&Tab) -> Result<T, ActionError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&tab))
        .await
        .map_err(|e| ActionError::BrowserLost(e.to_string()))?
}

fn browser_err(e: anyhow::Error) -> ActionError {
    ActionError::Browser(format!("{e:#}"))
}

/// Keep `err` if Chrome still answers, otherwise report the session as lost.
fn lost_or(err: ActionError, alive: Result<(), String>) -> ActionError {
    match alive {
        Ok(()) => err,
        Err(reason) => ActionError::BrowserLost(format!("{err} ({reason})")),
    }
}

#[async_trait]
impl BrowserDriver for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), ActionError> {
        let tab = self.current_tab()?;
        let target = url.to_string();
        let navigated = on_tab(tab, move |tab| {
            tab.navigate_to(&target)
                .and_then(|tab| tab.wait_until_navigated())
                .map(|_| ())
                .map_err(|e| ActionError::Navigation {
                    url: target.clone(),
                    message: format!("{e:#}"),
                })
        })
        .await;
        self.check_alive(navigated).await?;

        self.has_navigated = true;
        self.pointers.clear();
        Ok(())
    }

    async fn click(&mut self, pointer: u32) -> Result<(), ActionError> {
        let tab = self.tab_for_pointer(pointer)?;
        let clicked = on_tab(tab, move |tab| {
            let element = tab
                .find_element(&dom::pointer_selector(pointer))
                .map_err(|_| ActionError::PointerNotFound(pointer))?;
            element.click().map_err(browser_err)?;
            Ok(())
        })
        .await;
        self.check_alive(clicked).await
    }

    async fn type_text(
        &mut self,
        pointer: u32,
        text: &str,
        press_enter: bool,
    ) -> Result<(), ActionError> {
        let tab = self.tab_for_pointer(pointer)?;
        let text = text.to_string();
        let focus_pause = self.options.settle.focus_pause;
        let before_enter = self.options.settle.before_enter;

        let typed = on_tab(tab, move |tab| {
            let element = tab
                .find_element(&dom::pointer_selector(pointer))
                .map_err(|_| ActionError::PointerNotFound(pointer))?;

            // Several clicks: real sites often swallow the first focus.
            for _ in 0..FOCUS_CLICKS {
                element.click().map_err(browser_err)?;
                std::thread::sleep(focus_pause);
            }
            tab.type_str(&text).map_err(browser_err)?;

            if press_enter {
                std::thread::sleep(before_enter);
                tab.press_key("Enter").map_err(browser_err)?;
            }
            Ok(())
        })
        .await;
        self.check_alive(typed).await
    }

    async fn snapshot(&mut self) -> Result<PageSnapshot, ActionError> {
        if !self.has_navigated {
            return Ok(PageSnapshot::not_loaded());
        }

        let tab = self.current_tab()?;
        let target_id = tab.get_target_id().clone();
        let audit_dir = self.options.audit_dir.clone();

        let extracted = on_tab(tab, move |tab| {
            let dumped = tab.evaluate(dom::DUMP_JS, false).map_err(browser_err)?;
            let json = dumped
                .value
                .and_then(|v| v.as_str().map(String::from))
                .ok_or_else(|| ActionError::Browser("page dump returned nothing".into()))?;
            let raw: RawNode = serde_json::from_str(&json)
                .map_err(|e| ActionError::Browser(format!("unreadable page dump: {e}")))?;

            let content = dom::extract(&raw, &audit_dir)
                .map_err(|e| ActionError::Browser(format!("could not render page: {e}")))?;
            tab.evaluate(&dom::mark_pointers_js(&content.assignments), false)
                .map_err(browser_err)?;

            Ok((tab.get_url(), content))
        })
        .await;
        let (url, content) = self.check_alive(extracted).await?;

        debug!(url = %url, pointers = content.pointers.len(), "page extracted");
        self.pointers.replace(target_id, content.pointers);
        Ok(PageSnapshot {
            url,
            content: content.text,
        })
    }

    fn settle_times(&self) -> SettleTimes {
        self.options.settle
    }
}
