//! WhatsApp Web actuator, driven over the Chrome DevTools Protocol.
//!
//! Selector-driven by necessity: each affordance is located through a
//! fallback list (localized `aria-label`s first, structural attributes
//! last) with a bounded poll, and every miss degrades into a `false`
//! return for the caller to account. Session establishment is the only
//! path with typed errors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use crate::actuator::Actuator;
use crate::error::SessionError;

const SURFACE_URL: &str = "https://web.whatsapp.com/";

/// Chat-list pane; only rendered once the session is authenticated.
const READY_SELECTOR: &str = "#side";

/// WhatsApp Web serves a QR login to desktop agents; the tablet agent keeps
/// the persisted profile session usable headless.
const TABLET_USER_AGENT: &str = "Mozilla/5.0 (iPad; CPU OS 13_6 like Mac OS X) \
AppleWebKit/605.1.15 (KHTML, like Gecko) Version/13.1.2 Mobile/15E148 Safari/604.1";

const SEARCH_SELECTORS: &[&str] = &[
    r#"[aria-label="Search contacts or groups"]"#,
    r#"[aria-label="Поиск контактов или групп"]"#,
    r#"div[contenteditable="true"][data-tab="3"]"#,
];

const COMPOSER_SELECTORS: &[&str] = &[
    r#"div[aria-label="Type a message"]"#,
    r#"div[aria-label="Введите сообщение"]"#,
    r#"div[contenteditable="true"][data-tab="10"]"#,
];

const ATTACH_SELECTORS: &[&str] = &[
    r#"button[title="Attach"]"#,
    r#"button[title="Прикрепить"]"#,
    r#"span[data-icon="clip"]"#,
];

const CAPTION_SELECTORS: &[&str] = &[
    r#"div[aria-label="Type a message"]"#,
    r#"div[aria-label="Введите сообщение"]"#,
];

const SEND_BUTTON_SELECTORS: &[&str] = &[
    r#"div[aria-label="Send"]"#,
    r#"div[aria-label="Отправить"]"#,
    r#"div[data-icon="wds-ic-send-filled"]"#,
    r#"[data-icon="wds-ic-send-filled"]"#,
];

const FILE_INPUT_SELECTOR: &str = r#"input[type="file"][accept*="image"]"#;

const ELEMENT_POLL_STEP: Duration = Duration::from_millis(250);
const SEARCH_WAIT: Duration = Duration::from_secs(5);
const CONTACT_WAIT: Duration = Duration::from_secs(10);
const COMPOSER_WAIT: Duration = Duration::from_secs(5);
const ATTACH_WAIT: Duration = Duration::from_secs(3);
const FILE_INPUT_WAIT: Duration = Duration::from_secs(4);
const CAPTION_WAIT: Duration = Duration::from_secs(1);
const SEND_BUTTON_WAIT: Duration = Duration::from_secs(3);
/// Preview render time after injecting a file into the attach input.
const UPLOAD_SETTLE: Duration = Duration::from_secs(3);
/// Let the search result list / opened chat settle before the next step.
const UI_SETTLE: Duration = Duration::from_secs(1);

/// Production actuator: one Chrome instance on the worker's profile.
pub struct BrowserActuator {
    profile_path: PathBuf,
    headless: bool,
    ready_timeout: Duration,
    session: Option<BrowserSession>,
}

struct BrowserSession {
    browser: Browser,
    page: Page,
    events: JoinHandle<()>,
}

impl BrowserSession {
    /// Best-effort close; the reaper catches anything this misses.
    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!(error = %e, "Browser close failed");
        }
        self.events.abort();
    }
}

impl BrowserActuator {
    pub fn new(profile_path: PathBuf, headless: bool, ready_timeout: Duration) -> Self {
        Self {
            profile_path,
            headless,
            ready_timeout,
            session: None,
        }
    }

    async fn launch(&self) -> Result<BrowserSession, SessionError> {
        let mut builder = BrowserConfig::builder()
            .user_data_dir(&self.profile_path)
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-extensions")
            .arg(format!("--user-agent={TABLET_USER_AGENT}"));
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|reason| SessionError::Launch { reason })?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::Launch {
                reason: e.to_string(),
            })?;
        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match timeout(self.ready_timeout, browser.new_page(SURFACE_URL)).await {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                let mut browser = browser;
                let _ = browser.close().await;
                events.abort();
                return Err(SessionError::Launch {
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                let mut browser = browser;
                let _ = browser.close().await;
                events.abort();
                return Err(SessionError::ReadyTimeout {
                    timeout: self.ready_timeout,
                });
            }
        };

        Ok(BrowserSession {
            browser,
            page,
            events,
        })
    }

    fn page(&self) -> Option<&Page> {
        self.session.as_ref().map(|s| &s.page)
    }
}

#[async_trait]
impl Actuator for BrowserActuator {
    async fn acquire(&mut self) -> Result<(), SessionError> {
        if self.session.is_some() {
            return Ok(());
        }

        let session = self.launch().await?;

        // The chat pane appearing is the logged-in ready signal.
        match wait_for_element(&session.page, READY_SELECTOR, self.ready_timeout).await {
            Some(_) => {
                info!("Messaging surface ready");
                self.session = Some(session);
                Ok(())
            }
            None => {
                // Never hold a half-initialized session.
                session.close().await;
                Err(SessionError::ReadyTimeout {
                    timeout: self.ready_timeout,
                })
            }
        }
    }

    async fn release(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
            debug!("Browser session released");
        }
    }

    fn is_live(&self) -> bool {
        self.session.is_some()
    }

    async fn open_conversation(&mut self, name: &str) -> bool {
        let Some(page) = self.page() else {
            return false;
        };

        let Some((search_selector, search)) =
            wait_for_any(page, SEARCH_SELECTORS, SEARCH_WAIT).await
        else {
            warn!("Search box not found");
            return false;
        };

        // Clear any leftover query before typing the new one.
        let clear_js = format!(
            "(() => {{ const el = document.querySelector('{search_selector}'); if (el) el.textContent = ''; }})()"
        );
        let _ = page.evaluate(clear_js).await;

        if search.click().await.is_err() || search.type_str(name).await.is_err() {
            warn!(target = %name, "Could not type into the search box");
            return false;
        }
        sleep(UI_SETTLE).await;

        let hit_selector = format!(r#"span[title="{}"]"#, css_escape(name));
        let Some(hit) = wait_for_element(page, &hit_selector, CONTACT_WAIT).await else {
            warn!(target = %name, "Conversation not found in search results");
            return false;
        };
        if hit.click().await.is_err() {
            warn!(target = %name, "Could not open conversation");
            return false;
        }
        sleep(UI_SETTLE).await;

        debug!(target = %name, "Conversation opened");
        true
    }

    async fn send_text(&mut self, message: &str) -> bool {
        let Some(page) = self.page() else {
            return false;
        };

        let Some((_, composer)) = wait_for_any(page, COMPOSER_SELECTORS, COMPOSER_WAIT).await
        else {
            warn!("Message composer not found");
            return false;
        };

        composer.click().await.is_ok()
            && composer.type_str(message).await.is_ok()
            && composer.press_key("Enter").await.is_ok()
    }

    async fn send_media(&mut self, path: &Path, caption: Option<&str>) -> bool {
        let Some(page) = self.page() else {
            return false;
        };

        let absolute = match tokio::fs::canonicalize(path).await {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Media file is not readable");
                return false;
            }
        };

        let Some((_, attach)) = wait_for_any(page, ATTACH_SELECTORS, ATTACH_WAIT).await else {
            warn!("Attach button not found");
            return false;
        };
        if attach.click().await.is_err() {
            return false;
        }

        let Some(input) = wait_for_element(page, FILE_INPUT_SELECTOR, FILE_INPUT_WAIT).await
        else {
            warn!("File input not found");
            return false;
        };
        let params = SetFileInputFilesParams {
            files: vec![absolute.to_string_lossy().into_owned()],
            node_id: None,
            backend_node_id: Some(input.backend_node_id.clone()),
            object_id: None,
        };
        if page.execute(params).await.is_err() {
            warn!("Could not inject media file into the attach input");
            return false;
        }
        sleep(UPLOAD_SETTLE).await;

        if let Some(caption) = caption {
            // The caption box shares the composer's labels; missing it only
            // drops the caption, not the send.
            if let Some((_, caption_box)) = wait_for_any(page, CAPTION_SELECTORS, CAPTION_WAIT).await
            {
                let _ = caption_box.type_str(caption).await;
            }
        }

        let Some((_, send)) = wait_for_any(page, SEND_BUTTON_SELECTORS, SEND_BUTTON_WAIT).await
        else {
            warn!("Send button not found");
            return false;
        };
        send.click().await.is_ok()
    }
}

/// Poll for a selector until it appears or the timeout elapses.
async fn wait_for_element(page: &Page, selector: &str, wait: Duration) -> Option<Element> {
    let deadline = Instant::now() + wait;
    loop {
        if let Ok(element) = page.find_element(selector).await {
            return Some(element);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(ELEMENT_POLL_STEP).await;
    }
}

/// Try each selector in turn until one matches within the shared timeout.
/// Returns the matching selector alongside the element.
async fn wait_for_any<'a>(
    page: &Page,
    selectors: &'a [&'a str],
    wait: Duration,
) -> Option<(&'a str, Element)> {
    let deadline = Instant::now() + wait;
    loop {
        for selector in selectors {
            if let Ok(element) = page.find_element(*selector).await {
                return Some((*selector, element));
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(ELEMENT_POLL_STEP).await;
    }
}

/// Escape a contact name for embedding in a double-quoted CSS attribute
/// selector.
fn css_escape(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}
