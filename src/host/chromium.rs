//! Chromium host over CDP.
//!
//! Owns the browser process (launched or attached), maps our tab handles
//! to CDP targets, and forwards two event families to the orchestrator:
//! `Network.requestWillBeSent` from every managed page, and target
//! destruction for tabs that disappear outside our control.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network;
use chromiumoxide::cdp::browser_protocol::network::EventRequestWillBeSent;
use chromiumoxide::cdp::browser_protocol::target::EventTargetDestroyed;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Settings;

use super::{HostError, HostEvent, PageContext, ResourceType, SearchForm, TabHost, TabId};

/// Browser-backed [`TabHost`].
pub struct CdpHost {
    browser: Mutex<Browser>,
    events: mpsc::Sender<HostEvent>,
    pages: Mutex<HashMap<TabId, Page>>,
    targets: Mutex<HashMap<String, TabId>>,
    watchers: Mutex<HashMap<TabId, JoinHandle<()>>>,
    background: std::sync::Mutex<Vec<JoinHandle<()>>>,
    next_tab: AtomicU64,
}

impl CdpHost {
    /// Launch a Chromium (or attach to a running one) per the settings and
    /// return the host together with its event stream.
    pub async fn launch(settings: &Settings) -> Result<(Arc<Self>, mpsc::Receiver<HostEvent>)> {
        let (browser, mut handler) = match &settings.connect_url {
            Some(url) => Browser::connect(url.clone())
                .await
                .with_context(|| format!("attaching to browser at {url}"))?,
            None => {
                let mut builder = BrowserConfig::builder();
                if !settings.headless {
                    builder = builder.with_head();
                }
                if let Some(path) = &settings.chromium_path {
                    builder = builder.chrome_executable(path);
                }
                let config = builder.build().map_err(|e| anyhow!(e))?;
                Browser::launch(config).await.context("launching browser")?
            }
        };
        info!(headless = settings.headless, "browser up");

        let (events, events_rx) = mpsc::channel(256);

        // The handler future is the CDP connection; it must be polled for
        // anything else to make progress.
        let driver = tokio::spawn(async move {
            while let Some(message) = handler.next().await {
                if message.is_err() {
                    break;
                }
            }
            debug!("browser handler loop ended");
        });

        let host = Arc::new(Self {
            browser: Mutex::new(browser),
            events,
            pages: Mutex::new(HashMap::new()),
            targets: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
            background: std::sync::Mutex::new(vec![driver]),
            next_tab: AtomicU64::new(1),
        });
        host.watch_target_destruction().await?;
        Ok((host, events_rx))
    }

    /// Close the browser. Launched instances are also waited on so the
    /// child process is reaped.
    pub async fn shutdown(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(err) = browser.close().await {
            debug!(error = %err, "browser close reported an error");
        }
        if let Err(err) = browser.wait().await {
            debug!(error = %err, "browser wait reported an error");
        }
    }

    /// Forward destruction of managed targets as `TabClosed`.
    async fn watch_target_destruction(self: &Arc<Self>) -> Result<()> {
        let mut destroyed = {
            let browser = self.browser.lock().await;
            browser
                .event_listener::<EventTargetDestroyed>()
                .await
                .context("subscribing to target destruction")?
        };
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(event) = destroyed.next().await {
                let Some(host) = weak.upgrade() else { break };
                let target = event.target_id.inner().clone();
                let tab = host.targets.lock().await.remove(&target);
                let Some(tab) = tab else { continue };
                host.pages.lock().await.remove(&tab);
                if let Some(watcher) = host.watchers.lock().await.remove(&tab) {
                    watcher.abort();
                }
                if host.events.send(HostEvent::TabClosed(tab)).await.is_err() {
                    break;
                }
            }
        });
        self.push_background(task);
        Ok(())
    }

    /// Subscribe one page's outbound requests and forward them.
    async fn watch_requests(&self, tab: TabId, page: &Page) {
        if let Err(err) = page.execute(network::EnableParams::default()).await {
            warn!(%tab, error = %err, "could not enable network domain");
        }
        let mut requests = match page.event_listener::<EventRequestWillBeSent>().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(%tab, error = %err, "request observation unavailable");
                return;
            }
        };
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = requests.next().await {
                let Some(origin) = page_origin(&event.document_url) else {
                    continue;
                };
                let observed = HostEvent::Request {
                    origin,
                    url: event.request.url.clone(),
                    resource_type: map_resource_type(event.r#type.as_ref()),
                };
                if events.send(observed).await.is_err() {
                    break;
                }
            }
        });
        self.watchers.lock().await.insert(tab, task);
    }

    fn push_background(&self, task: JoinHandle<()>) {
        if let Ok(mut background) = self.background.lock() {
            background.push(task);
        }
    }
}

impl Drop for CdpHost {
    fn drop(&mut self) {
        if let Ok(mut background) = self.background.lock() {
            for task in background.drain(..) {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl TabHost for CdpHost {
    async fn open_tab(&self, url: &str) -> Result<TabId, HostError> {
        let page = {
            let browser = self.browser.lock().await;
            browser
                .new_page(url)
                .await
                .map_err(|e| HostError::BrowserGone(e.to_string()))?
        };
        let tab = TabId(self.next_tab.fetch_add(1, Ordering::SeqCst));
        let target = page.target_id().inner().clone();

        self.watch_requests(tab, &page).await;
        self.pages.lock().await.insert(tab, page);
        self.targets.lock().await.insert(target, tab);
        debug!(%tab, url, "tab opened");
        Ok(tab)
    }

    async fn close_tab(&self, tab: TabId) -> Result<(), HostError> {
        // Forget the target first so our own close does not come back as a
        // TabClosed event.
        self.targets.lock().await.retain(|_, t| *t != tab);
        if let Some(watcher) = self.watchers.lock().await.remove(&tab) {
            watcher.abort();
        }
        let Some(page) = self.pages.lock().await.remove(&tab) else {
            return Ok(());
        };
        if let Err(err) = page.close().await {
            debug!(%tab, error = %err, "page close reported an error");
        }
        Ok(())
    }

    async fn page(&self, tab: TabId) -> Result<Arc<dyn PageContext>, HostError> {
        let pages = self.pages.lock().await;
        let page = pages.get(&tab).ok_or(HostError::TabNotFound(tab))?.clone();
        Ok(Arc::new(CdpPage { page }))
    }
}

/// One tab's DOM surface, driven through JavaScript evaluation.
struct CdpPage {
    page: Page,
}

#[async_trait]
impl PageContext for CdpPage {
    async fn current_url(&self) -> Result<String, HostError> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| HostError::BrowserGone(e.to_string()))?;
        Ok(url.unwrap_or_default())
    }

    async fn wait_for_load(&self) -> Result<(), HostError> {
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| HostError::BrowserGone(e.to_string()))?;
        Ok(())
    }

    async fn link_hrefs(&self) -> Result<Vec<String>, HostError> {
        let js = r#"(() => {
            return [...document.querySelectorAll('a[href]')]
                .map(a => a.href)
                .filter(h => h.startsWith('http'));
        })()"#;
        let hrefs: Vec<String> = self
            .page
            .evaluate(js)
            .await
            .map_err(script_err)?
            .into_value()
            .map_err(|e| HostError::Script(format!("{e:?}")))?;
        Ok(hrefs)
    }

    async fn activate_link(&self, href: &str) -> Result<(), HostError> {
        let js = format!(
            r#"(() => {{
                const target = '{0}';
                const link = [...document.querySelectorAll('a[href]')]
                    .find(a => a.href === target);
                if (link) {{ link.click(); return true; }}
                window.location.assign(target);
                return true;
            }})()"#,
            js_escape(href)
        );
        self.page.evaluate(js.as_str()).await.map_err(script_err)?;
        Ok(())
    }

    async fn find_search_form(&self) -> Result<Option<SearchForm>, HostError> {
        let js = r#"(() => {
            const inputs = [...document.querySelectorAll(
                "input[type='search'], input[type='text'], input:not([type])")];
            for (const input of inputs) {
                const form = input.closest('form');
                if (!form) continue;
                const action = (form.getAttribute('action') || '').toLowerCase();
                const role = (form.getAttribute('role') || '').toLowerCase();
                const name = (input.getAttribute('name') || '').toLowerCase();
                if (action.includes('search') || role === 'search'
                    || name === 'q' || name.includes('search')) {
                    if (!form.id) { form.id = 'chaff-form'; }
                    if (!input.id) { input.id = 'chaff-input'; }
                    return { form: '#' + CSS.escape(form.id),
                             input: '#' + CSS.escape(input.id) };
                }
            }
            return null;
        })()"#;
        let found: serde_json::Value = self
            .page
            .evaluate(js)
            .await
            .map_err(script_err)?
            .into_value()
            .map_err(|e| HostError::Script(format!("{e:?}")))?;
        let (Some(form), Some(input)) = (
            found.get("form").and_then(|v| v.as_str()),
            found.get("input").and_then(|v| v.as_str()),
        ) else {
            return Ok(None);
        };
        Ok(Some(SearchForm {
            form_selector: form.to_string(),
            input_selector: input.to_string(),
        }))
    }

    async fn submit_search(&self, form: &SearchForm, term: &str) -> Result<(), HostError> {
        let js = format!(
            r#"(() => {{
                const input = document.querySelector('{input}');
                const form = document.querySelector('{form}');
                if (!input || !form) {{ return false; }}
                input.value = '{term}';
                input.dispatchEvent(new Event('input', {{ bubbles: true }}));
                if (form.requestSubmit) {{ form.requestSubmit(); }}
                else {{ form.submit(); }}
                return true;
            }})()"#,
            input = js_escape(&form.input_selector),
            form = js_escape(&form.form_selector),
            term = js_escape(term),
        );
        let submitted: bool = self
            .page
            .evaluate(js.as_str())
            .await
            .map_err(script_err)?
            .into_value()
            .unwrap_or(false);
        if !submitted {
            return Err(HostError::Script(
                "search form vanished before submit".into(),
            ));
        }
        Ok(())
    }
}

fn script_err(err: CdpError) -> HostError {
    HostError::Script(err.to_string())
}

/// Escape a string for embedding in a single-quoted JS literal.
fn js_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Origin of the document a request belongs to; `None` for opaque origins
/// (about:blank, data URLs) which carry no audience signal.
fn page_origin(document_url: &str) -> Option<String> {
    let parsed = Url::parse(document_url).ok()?;
    let origin = parsed.origin();
    if !origin.is_tuple() {
        return None;
    }
    Some(origin.ascii_serialization())
}

fn map_resource_type(cdp: Option<&network::ResourceType>) -> ResourceType {
    match cdp {
        Some(network::ResourceType::Document) => ResourceType::Document,
        Some(network::ResourceType::Script) => ResourceType::Script,
        Some(network::ResourceType::Stylesheet) => ResourceType::Stylesheet,
        Some(network::ResourceType::Image) => ResourceType::Image,
        Some(network::ResourceType::Font) => ResourceType::Font,
        Some(network::ResourceType::Media) => ResourceType::Media,
        Some(network::ResourceType::Xhr) => ResourceType::Xhr,
        Some(network::ResourceType::Fetch) => ResourceType::Fetch,
        Some(network::ResourceType::WebSocket) => ResourceType::Websocket,
        _ => ResourceType::Other,
    }
}
