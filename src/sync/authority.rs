//! Authoring side of rule synchronization.
//!
//! The [`AuthoringService`] owns the persistent [`RuleStore`] and the set of
//! live page contexts. Every change accepted through the command protocol is
//! published to all http(s) pages as one immutable snapshot; a page that
//! refuses delivery is skipped without affecting the others.
use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    config::{
        loader::snapshot_to_string,
        models::{RuleSnapshot, RuleTable},
    },
    ports::{
        rule_store::{RuleStore, StoreError, StoreResult},
        subscriber::PageSubscriber,
    },
    tracing_setup::configure_component_tracing,
};

const COMMAND_BUFFER: usize = 32;

fn default_enabled() -> bool {
    true
}

/// Requests accepted from the authoring surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    GetRules,
    SaveRules {
        #[serde(default)]
        rules: RuleTable,
        #[serde(default = "default_enabled")]
        enabled: bool,
    },
    SetEnabled { enabled: bool },
}

/// Exactly one of these answers each [`Command`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandResponse {
    Rules { rules: RuleTable, enabled: bool },
    Failed { success: bool, error: String },
    Ack { success: bool },
}

impl CommandResponse {
    fn failed(error: impl ToString) -> Self {
        CommandResponse::Failed {
            success: false,
            error: error.to_string(),
        }
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
    /// Pages whose URL is not http(s)
    pub skipped: usize,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AuthorityError {
    #[error("Authoring service is not running")]
    Stopped,

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn accepts_injection(page_url: &str) -> bool {
    page_url.starts_with("http://") || page_url.starts_with("https://")
}

pub struct AuthoringService {
    store: Arc<dyn RuleStore>,
    pages: scc::HashMap<Uuid, Arc<dyn PageSubscriber>>,
}

impl AuthoringService {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self {
            store,
            pages: scc::HashMap::new(),
        }
    }

    /// Track a live page context. It receives every later publish.
    pub async fn register_page(&self, page: Arc<dyn PageSubscriber>) {
        let id = page.id();
        let _ = self.pages.remove_async(&id).await;
        let _ = self.pages.insert_async(id, page).await;
        tracing::debug!(page = %id, "page registered");
    }

    pub async fn unregister_page(&self, id: Uuid) -> bool {
        self.pages.remove_async(&id).await.is_some()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Answer one command.
    pub async fn handle(&self, command: Command) -> CommandResponse {
        match command {
            Command::GetRules => match self.store.load().await {
                Ok(snapshot) => CommandResponse::Rules {
                    rules: snapshot.rules,
                    enabled: snapshot.enabled,
                },
                Err(e) => {
                    tracing::error!(error = %e, "failed to load rules");
                    CommandResponse::failed(e)
                }
            },
            Command::SaveRules { rules, enabled } => {
                let saved = match self.store.save_rules(&rules).await {
                    Ok(()) => self.store.set_enabled(enabled).await,
                    Err(e) => Err(e),
                };
                self.after_write(saved, "rules saved").await
            }
            Command::SetEnabled { enabled } => {
                let saved = self.store.set_enabled(enabled).await;
                self.after_write(saved, if enabled { "mocking enabled" } else { "mocking disabled" })
                    .await
            }
        }
    }

    async fn after_write(&self, saved: StoreResult<()>, what: &str) -> CommandResponse {
        if let Err(e) = saved {
            tracing::error!(error = %e, "failed to persist rules");
            return CommandResponse::failed(e);
        }
        tracing::info!("{what}");
        match self.publish().await {
            Ok(report) => {
                tracing::debug!(?report, "snapshot published");
                CommandResponse::Ack { success: true }
            }
            Err(e) => CommandResponse::failed(e),
        }
    }

    async fn current_text(&self) -> Result<String, AuthorityError> {
        let snapshot: RuleSnapshot = self.store.load().await?;
        snapshot_to_string(&snapshot)
            .map_err(|e| AuthorityError::from(StoreError::Corrupt(e.to_string())))
    }

    async fn live_pages(&self) -> Vec<Arc<dyn PageSubscriber>> {
        let mut pages = Vec::with_capacity(self.pages.len());
        self.pages
            .retain_async(|_, page| {
                pages.push(page.clone());
                true
            })
            .await;
        pages
    }

    /// Push the stored snapshot to every live http(s) page.
    ///
    /// Deliveries run concurrently and fail independently.
    pub async fn publish(&self) -> Result<PublishReport, AuthorityError> {
        let text = self.current_text().await?;
        let mut report = PublishReport::default();
        let mut targets = Vec::new();
        for page in self.live_pages().await {
            if accepts_injection(&page.page_url()) {
                targets.push(page);
            } else {
                report.skipped += 1;
            }
        }

        let outcomes = join_all(targets.iter().map(|page| page.deliver(&text))).await;
        for (page, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::debug!(page = %page.id(), page_url = %page.page_url(), error = %e, "snapshot delivery failed");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// A page finished loading: hand it the current snapshot.
    ///
    /// Returns whether a delivery happened.
    pub async fn navigation_complete(&self, id: Uuid) -> Result<bool, AuthorityError> {
        let Some(page) = self.pages.read_async(&id, |_, page| page.clone()).await else {
            return Ok(false);
        };
        if !accepts_injection(&page.page_url()) {
            return Ok(false);
        }
        let text = self.current_text().await?;
        match page.deliver(&text).await {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::debug!(page = %id, error = %e, "snapshot delivery failed");
                Ok(false)
            }
        }
    }

    /// Serve commands from a channel until every client is dropped.
    pub fn spawn(self: Arc<Self>) -> (AuthoringClient, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Envelope>(COMMAND_BUFFER);
        let span = configure_component_tracing("authoring");
        let handle = tokio::spawn(
            async move {
                while let Some(Envelope { command, reply }) = rx.recv().await {
                    let response = self.handle(command).await;
                    // the requester may have gone away
                    let _ = reply.send(response);
                }
                tracing::debug!("authoring command loop stopped");
            }
            .instrument(span),
        );
        (AuthoringClient { tx }, handle)
    }
}

struct Envelope {
    command: Command,
    reply: oneshot::Sender<CommandResponse>,
}

/// Handle for sending commands to a running [`AuthoringService`].
#[derive(Clone)]
pub struct AuthoringClient {
    tx: mpsc::Sender<Envelope>,
}

impl AuthoringClient {
    pub async fn request(&self, command: Command) -> Result<CommandResponse, AuthorityError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Envelope { command, reply })
            .await
            .map_err(|_| AuthorityError::Stopped)?;
        response.await.map_err(|_| AuthorityError::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        adapters::stores::MemoryRuleStore,
        config::{loader::parse_snapshot, models::Rule},
        ports::subscriber::DeliveryError,
    };

    struct RecordingPage {
        id: Uuid,
        url: String,
        refuse: bool,
        received: Mutex<Vec<String>>,
    }

    impl RecordingPage {
        fn new(url: &str, refuse: bool) -> Arc<Self> {
            Arc::new(Self {
                id: Uuid::new_v4(),
                url: url.to_string(),
                refuse,
                received: Mutex::new(Vec::new()),
            })
        }

        fn last(&self) -> Option<RuleSnapshot> {
            self.received
                .lock()
                .unwrap()
                .last()
                .map(|text| parse_snapshot(text).unwrap())
        }
    }

    #[async_trait]
    impl PageSubscriber for RecordingPage {
        fn id(&self) -> Uuid {
            self.id
        }

        fn page_url(&self) -> String {
            self.url.clone()
        }

        async fn deliver(&self, snapshot: &str) -> Result<(), DeliveryError> {
            if self.refuse {
                return Err(DeliveryError::Refused("cannot inject".to_string()));
            }
            self.received.lock().unwrap().push(snapshot.to_string());
            Ok(())
        }
    }

    fn rules() -> RuleTable {
        let mut rules = RuleTable::new();
        rules.insert("/api/*".to_string(), Rule::new(json!({"ok": true})));
        rules
    }

    #[tokio::test]
    async fn test_get_rules_initial_state() {
        let service = AuthoringService::new(Arc::new(MemoryRuleStore::new()));
        assert_eq!(
            service.handle(Command::GetRules).await,
            CommandResponse::Rules {
                rules: RuleTable::new(),
                enabled: true
            }
        );
    }

    #[tokio::test]
    async fn test_save_rules_propagates_best_effort() {
        let service = AuthoringService::new(Arc::new(MemoryRuleStore::new()));
        let good = RecordingPage::new("https://app.test/", false);
        let refusing = RecordingPage::new("https://locked.test/", true);
        let internal = RecordingPage::new("chrome://settings", false);
        service.register_page(good.clone()).await;
        service.register_page(refusing.clone()).await;
        service.register_page(internal.clone()).await;

        let response = service
            .handle(Command::SaveRules {
                rules: rules(),
                enabled: true,
            })
            .await;
        assert_eq!(response, CommandResponse::Ack { success: true });

        let delivered = good.last().unwrap();
        assert_eq!(delivered.rules, rules());
        assert!(delivered.enabled);
        assert!(internal.last().is_none());

        let report = service.publish().await.unwrap();
        assert_eq!(
            report,
            PublishReport {
                delivered: 1,
                failed: 1,
                skipped: 1
            }
        );
    }

    #[tokio::test]
    async fn test_set_enabled_keeps_rules() {
        let store = Arc::new(MemoryRuleStore::with_snapshot(RuleSnapshot::new(rules(), true)));
        let service = AuthoringService::new(store);
        let page = RecordingPage::new("http://localhost:3000/", false);
        service.register_page(page.clone()).await;

        service.handle(Command::SetEnabled { enabled: false }).await;
        let delivered = page.last().unwrap();
        assert!(!delivered.enabled);
        assert_eq!(delivered.rules, rules());
    }

    #[tokio::test]
    async fn test_navigation_complete_syncs_one_page() {
        let service = AuthoringService::new(Arc::new(MemoryRuleStore::new()));
        let page = RecordingPage::new("https://app.test/", false);
        let other = RecordingPage::new("https://other.test/", false);
        service.register_page(page.clone()).await;
        service.register_page(other.clone()).await;

        assert!(service.navigation_complete(page.id()).await.unwrap());
        assert_eq!(page.received.lock().unwrap().len(), 1);
        assert!(other.received.lock().unwrap().is_empty());
        assert!(!service.navigation_complete(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_unregistered_page_gets_nothing() {
        let service = AuthoringService::new(Arc::new(MemoryRuleStore::new()));
        let page = RecordingPage::new("https://app.test/", false);
        service.register_page(page.clone()).await;
        assert_eq!(service.page_count(), 1);
        assert!(service.unregister_page(page.id()).await);

        service.handle(Command::SetEnabled { enabled: false }).await;
        assert!(page.last().is_none());
    }

    #[tokio::test]
    async fn test_client_round_trip() {
        let service = Arc::new(AuthoringService::new(Arc::new(MemoryRuleStore::new())));
        let (client, handle) = service.spawn();

        let ack = client
            .request(Command::SaveRules {
                rules: rules(),
                enabled: false,
            })
            .await
            .unwrap();
        assert_eq!(ack, CommandResponse::Ack { success: true });
        match client.request(Command::GetRules).await.unwrap() {
            CommandResponse::Rules { rules: got, enabled } => {
                assert_eq!(got, rules());
                assert!(!enabled);
            }
            other => panic!("unexpected response: {other:?}"),
        }

        drop(client);
        handle.await.unwrap();
    }

    #[test]
    fn test_command_wire_format() {
        let command: Command = serde_json::from_value(json!({
            "type": "SAVE_RULES",
            "rules": {"/a": {"response": "x", "status": "201"}},
            "enabled": true
        }))
        .unwrap();
        match command {
            Command::SaveRules { rules, enabled } => {
                assert!(enabled);
                assert_eq!(rules["/a"].effective_status(), 201);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let ack = serde_json::to_value(CommandResponse::Ack { success: true }).unwrap();
        assert_eq!(ack, json!({"success": true}));
        let get: Command = serde_json::from_value(json!({"type": "GET_RULES"})).unwrap();
        assert_eq!(get, Command::GetRules);
    }
}
