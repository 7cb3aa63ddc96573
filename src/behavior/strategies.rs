//! The three dispatchable behaviors.
//!
//! All of them are single-shot and delay-then-act: pause for a
//! human-looking interval, do at most one visible thing, report one
//! outcome. The counters they bump are the public statistics, so an
//! increment lands only once the corresponding action has succeeded.

use rand::Rng;
use tracing::{debug, warn};

use crate::host::PageContext;
use crate::observer::terms::NO_TERM;
use crate::orchestrator::timer::sleep_jittered;
use crate::pool::Algorithm;
use crate::protocol::ProtocolClient;
use crate::stats::StatCounter;

use super::Outcome;

/// Run the behavior assigned to this session.
pub async fn execute(
    algorithm: Algorithm,
    page: &dyn PageContext,
    client: &ProtocolClient,
    delay: crate::orchestrator::timer::JitterRange,
) -> Outcome {
    sleep_jittered(delay).await;
    match algorithm {
        Algorithm::Idle => Outcome::Remove,
        Algorithm::Navigate => navigate(page, client).await,
        Algorithm::Search => search(page, client).await,
    }
}

/// Pick one anchor uniformly at random and activate it.
async fn navigate(page: &dyn PageContext, client: &ProtocolClient) -> Outcome {
    let links = match page.link_hrefs().await {
        Ok(links) => links,
        Err(err) => {
            warn!(error = %err, "could not enumerate links");
            return Outcome::Remove;
        }
    };
    if links.is_empty() {
        debug!("no links on page");
        return Outcome::Remove;
    }
    // Scoped so the thread-local rng is gone before the awaits below.
    let target = {
        let mut rng = rand::thread_rng();
        links[rng.gen_range(0..links.len())].clone()
    };

    if let Err(err) = page.activate_link(&target).await {
        warn!(error = %err, url = %target, "link activation failed");
        return Outcome::Remove;
    }
    let _ = client.increment(StatCounter::ClickedLinks).await;
    Outcome::Navigate
}

/// Find a search field, type the harvested term, submit.
async fn search(page: &dyn PageContext, client: &ProtocolClient) -> Outcome {
    let term = match client.search_term().await {
        Ok(term) => term,
        Err(_) => return Outcome::SearchFail,
    };
    if term == NO_TERM {
        debug!("no harvested term for this site");
        return Outcome::SearchFail;
    }

    let form = match page.find_search_form().await {
        Ok(Some(form)) => form,
        Ok(None) => {
            debug!("no search form on page");
            return Outcome::SearchFail;
        }
        Err(err) => {
            warn!(error = %err, "search form lookup failed");
            return Outcome::SearchFail;
        }
    };
    if let Err(err) = page.submit_search(&form, &term).await {
        warn!(error = %err, "search submission failed");
        return Outcome::SearchFail;
    }

    let _ = client.increment(StatCounter::KeywordSearches).await;
    Outcome::Search
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostError, SearchForm, TabId};
    use crate::orchestrator::timer::JitterRange;
    use crate::protocol::{Envelope, WorkerRequest, WorkerResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    const NO_DELAY: JitterRange = JitterRange { min_ms: 0, max_ms: 0 };

    /// Scripted page for exercising strategies without a browser.
    struct ScriptedPage {
        links: Vec<String>,
        form: Option<SearchForm>,
        fail_activate: bool,
        activated: Mutex<Vec<String>>,
        submitted: Mutex<Vec<String>>,
    }

    impl ScriptedPage {
        fn new(links: &[&str], form: Option<SearchForm>) -> Self {
            Self {
                links: links.iter().map(|s| s.to_string()).collect(),
                form,
                fail_activate: false,
                activated: Mutex::new(Vec::new()),
                submitted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PageContext for ScriptedPage {
        async fn current_url(&self) -> Result<String, HostError> {
            Ok("https://example.com/".into())
        }
        async fn wait_for_load(&self) -> Result<(), HostError> {
            Ok(())
        }
        async fn link_hrefs(&self) -> Result<Vec<String>, HostError> {
            Ok(self.links.clone())
        }
        async fn activate_link(&self, url: &str) -> Result<(), HostError> {
            if self.fail_activate {
                return Err(HostError::Script("click target gone".into()));
            }
            self.activated.lock().unwrap().push(url.to_string());
            Ok(())
        }
        async fn find_search_form(&self) -> Result<Option<SearchForm>, HostError> {
            Ok(self.form.clone())
        }
        async fn submit_search(&self, _form: &SearchForm, term: &str) -> Result<(), HostError> {
            self.submitted.lock().unwrap().push(term.to_string());
            Ok(())
        }
    }

    /// Protocol stub that answers term lookups and records increments.
    fn stub_client(term: &str) -> (ProtocolClient, mpsc::UnboundedReceiver<StatCounter>) {
        let term = term.to_string();
        let (tx, mut rx) = mpsc::channel::<Envelope>(8);
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let reply = match envelope.request {
                    WorkerRequest::GetSearchTerm => {
                        Some(WorkerResponse::SearchTerm(term.clone()))
                    }
                    WorkerRequest::IncrementStat(counter) => {
                        let _ = seen_tx.send(counter);
                        None
                    }
                    _ => Some(WorkerResponse::Ack),
                };
                let _ = envelope.reply.send(reply);
            }
        });
        (ProtocolClient::new(TabId(1), tx), seen_rx)
    }

    #[tokio::test]
    async fn test_idle_reports_remove() {
        let page = ScriptedPage::new(&[], None);
        let (client, mut seen) = stub_client(NO_TERM);
        let outcome = execute(Algorithm::Idle, &page, &client, NO_DELAY).await;
        assert_eq!(outcome, Outcome::Remove);
        assert!(seen.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_navigate_activates_one_known_link() {
        let page = ScriptedPage::new(&["https://a.example/", "https://b.example/"], None);
        let (client, mut seen) = stub_client(NO_TERM);
        let outcome = execute(Algorithm::Navigate, &page, &client, NO_DELAY).await;
        assert_eq!(outcome, Outcome::Navigate);
        let activated = page.activated.lock().unwrap();
        assert_eq!(activated.len(), 1);
        assert!(page.links.contains(&activated[0]));
        assert_eq!(seen.try_recv().unwrap(), StatCounter::ClickedLinks);
    }

    #[tokio::test]
    async fn test_failed_activation_is_not_counted() {
        let page = ScriptedPage {
            fail_activate: true,
            ..ScriptedPage::new(&["https://a.example/"], None)
        };
        let (client, mut seen) = stub_client(NO_TERM);
        let outcome = execute(Algorithm::Navigate, &page, &client, NO_DELAY).await;
        assert_eq!(outcome, Outcome::Remove);
        assert!(page.activated.lock().unwrap().is_empty());
        assert!(seen.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_navigate_without_links_reports_remove() {
        let page = ScriptedPage::new(&[], None);
        let (client, mut seen) = stub_client(NO_TERM);
        let outcome = execute(Algorithm::Navigate, &page, &client, NO_DELAY).await;
        assert_eq!(outcome, Outcome::Remove);
        assert!(seen.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_search_submits_harvested_term() {
        let form = SearchForm {
            form_selector: "form[role=search]".into(),
            input_selector: "input[name=q]".into(),
        };
        let page = ScriptedPage::new(&[], Some(form));
        let (client, mut seen) = stub_client("hiking boots");
        let outcome = execute(Algorithm::Search, &page, &client, NO_DELAY).await;
        assert_eq!(outcome, Outcome::Search);
        assert_eq!(*page.submitted.lock().unwrap(), vec!["hiking boots".to_string()]);
        assert_eq!(seen.try_recv().unwrap(), StatCounter::KeywordSearches);
    }

    #[tokio::test]
    async fn test_search_with_sentinel_term_fails_without_submitting() {
        let form = SearchForm {
            form_selector: "form".into(),
            input_selector: "input".into(),
        };
        let page = ScriptedPage::new(&[], Some(form));
        let (client, mut seen) = stub_client(NO_TERM);
        let outcome = execute(Algorithm::Search, &page, &client, NO_DELAY).await;
        assert_eq!(outcome, Outcome::SearchFail);
        assert!(page.submitted.lock().unwrap().is_empty());
        assert!(seen.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_search_without_form_fails() {
        let page = ScriptedPage::new(&[], None);
        let (client, _seen) = stub_client("anything");
        let outcome = execute(Algorithm::Search, &page, &client, NO_DELAY).await;
        assert_eq!(outcome, Outcome::SearchFail);
    }
}
