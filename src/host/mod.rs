//! Host platform seam — tabs, pages, and the events they emit.
//!
//! The orchestrator never talks to a browser directly. It opens and closes
//! tabs through [`TabHost`], drives page content through [`PageContext`],
//! and consumes out-of-band [`HostEvent`]s (external tab closes, observed
//! network requests) from a channel it receives at startup. The production
//! implementation wraps Chromium over CDP ([`chromium::CdpHost`]); tests
//! substitute a scripted mock.

pub mod chromium;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Opaque identifier of a tab owned by the host platform.
///
/// The orchestrator holds only this reference; the tab itself belongs to
/// the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(pub u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

/// Coarse classification of an observed network request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Document,
    Script,
    Stylesheet,
    Image,
    Font,
    Media,
    Xhr,
    Fetch,
    Websocket,
    Other,
}

/// Out-of-band notifications delivered by the host platform.
///
/// The channel carrying these is handed to the host at construction time;
/// the orchestrator takes the receiving end once at startup.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// A tab went away outside the orchestrator's control (user closed it,
    /// renderer crashed). Must release the matching pool slot whether or
    /// not a disconnect was also seen.
    TabClosed(TabId),
    /// An outbound network request left one of the open pages.
    Request {
        /// Origin of the page that issued the request.
        origin: String,
        /// Full URL the request went to.
        url: String,
        resource_type: ResourceType,
    },
}

/// Errors crossing the host seam.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("tab {0} is not open")]
    TabNotFound(TabId),
    #[error("browser connection lost: {0}")]
    BrowserGone(String),
    #[error("page script failed: {0}")]
    Script(String),
}

/// A search form located on a page, addressed by CSS selectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchForm {
    pub form_selector: String,
    pub input_selector: String,
}

/// Tab lifecycle operations provided by the host platform.
#[async_trait]
pub trait TabHost: Send + Sync {
    /// Open a new tab at `url` and return its handle.
    async fn open_tab(&self, url: &str) -> Result<TabId, HostError>;

    /// Close a tab. Closing a tab that is already gone is not an error.
    async fn close_tab(&self, tab: TabId) -> Result<(), HostError>;

    /// Page handle for driving content inside an open tab.
    async fn page(&self, tab: TabId) -> Result<Arc<dyn PageContext>, HostError>;
}

/// DOM primitives a behavior strategy needs from its page.
///
/// Deliberately dumb: selection heuristics are not tuned here, and
/// implementations may be stubbed wholesale in tests.
#[async_trait]
pub trait PageContext: Send + Sync {
    /// URL the page currently shows.
    async fn current_url(&self) -> Result<String, HostError>;

    /// Block until the current navigation (if any) has finished loading.
    async fn wait_for_load(&self) -> Result<(), HostError>;

    /// Hrefs of all anchor elements on the page.
    async fn link_hrefs(&self) -> Result<Vec<String>, HostError>;

    /// Simulate activating the anchor with the given href.
    async fn activate_link(&self, href: &str) -> Result<(), HostError>;

    /// Locate a text/search input whose enclosing form looks like a search
    /// form (action URL or role attribute contains "search").
    async fn find_search_form(&self) -> Result<Option<SearchForm>, HostError>;

    /// Fill the located input with `term` and submit its form.
    async fn submit_search(&self, form: &SearchForm, term: &str) -> Result<(), HostError>;
}
