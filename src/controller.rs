//! List view controller: owns one screen's cached collection, its filters
//! and the open edit dialog, and re-fetches after every mutation.
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::error::{ApiError, FieldError};
use crate::filter::{self, FilterSet};
use crate::model::{record_id, Attachment, ListQuery, Record};
use crate::remote::RemoteCollection;
use crate::resource::ResourceSpec;
use crate::session::{CommitReport, EditSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewState {
    Idle,
    Loading,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A message the UI must show the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Identifies one outstanding load; results for older tickets are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
}

#[derive(Debug)]
pub enum SaveOutcome {
    NoSession,
    Invalid(Vec<FieldError>),
    Committed(CommitReport),
    Failed(ApiError),
}

pub struct ListController {
    remote: Arc<dyn RemoteCollection>,
    references: Option<Arc<dyn RemoteCollection>>,
    spec: ResourceSpec,
    state: ViewState,
    mounted: bool,
    generation: u64,
    records: Vec<Record>,
    filters: FilterSet,
    query: ListQuery,
    session: Option<EditSession>,
    notices: Vec<Notice>,
}

impl fmt::Debug for ListController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListController")
            .field("resource", &self.spec.kind)
            .field("state", &self.state)
            .field("records", &self.records.len())
            .finish_non_exhaustive()
    }
}

impl ListController {
    pub fn new(remote: Arc<dyn RemoteCollection>) -> Self {
        let spec = remote.spec().clone();
        Self {
            remote,
            references: None,
            spec,
            state: ViewState::Idle,
            mounted: false,
            generation: 0,
            records: Vec::new(),
            filters: FilterSet::new(),
            query: ListQuery::new(),
            session: None,
            notices: Vec::new(),
        }
    }

    /// Collection that reference names (a product's category) resolve
    /// against when saving.
    pub fn with_reference_source(mut self, source: Arc<dyn RemoteCollection>) -> Self {
        self.references = Some(source);
        self
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    pub fn state(&self) -> ViewState {
        self.state
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// The last successfully fetched collection, unfiltered.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    pub fn query(&self) -> &ListQuery {
        &self.query
    }

    pub fn session(&self) -> Option<&EditSession> {
        self.session.as_ref()
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub async fn mount(&mut self) {
        self.mounted = true;
        self.refresh().await;
    }

    /// Leave the screen: pending loads are ignored and the dialog is dropped.
    pub fn unmount(&mut self) {
        self.mounted = false;
        self.generation += 1;
        self.session = None;
        self.state = ViewState::Idle;
    }

    pub fn begin_load(&mut self) -> LoadTicket {
        self.generation += 1;
        self.state = ViewState::Loading;
        LoadTicket {
            generation: self.generation,
        }
    }

    /// Apply a list result. Returns false when the result was stale or the
    /// view is gone. Failures leave an empty collection and a notice.
    pub fn finish_load(&mut self, ticket: LoadTicket, result: Result<Vec<Record>, ApiError>) -> bool {
        if !self.mounted || ticket.generation != self.generation {
            debug!(resource = %self.spec.kind, "dropping stale list response");
            return false;
        }
        match result {
            Ok(records) => {
                debug!(resource = %self.spec.kind, count = records.len(), "collection loaded");
                self.records = records;
            }
            Err(err) => {
                warn!(resource = %self.spec.kind, %err, "failed to load collection");
                self.records.clear();
                self.notify(NoticeLevel::Error, format!("Failed to load {}: {}", self.spec.kind, err));
            }
        }
        self.state = ViewState::Ready;
        true
    }

    #[instrument(skip_all, fields(resource = %self.spec.kind))]
    pub async fn refresh(&mut self) {
        let ticket = self.begin_load();
        let remote = Arc::clone(&self.remote);
        let result = remote.list(&self.query).await;
        self.finish_load(ticket, result);
    }

    pub fn set_filter(&mut self, key: &str, value: &str) {
        if !self.spec.filter_keys().any(|k| k == key) {
            debug!(resource = %self.spec.kind, key, "ignoring unknown filter key");
            return;
        }
        self.filters.set(key, value);
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
    }

    /// Records passing the current filters, in collection order.
    pub fn visible(&self) -> Vec<&Record> {
        filter::visible(&self.records, &self.spec.filters, &self.filters)
    }

    /// Exactly the visible records, for handing to an exporter.
    pub fn export_rows(&self) -> Vec<Record> {
        self.visible().into_iter().cloned().collect()
    }

    /// Visible records counted by the resource's status field.
    pub fn tally(&self) -> BTreeMap<String, usize> {
        match &self.spec.status_field {
            Some(field) => filter::tally(self.visible(), field),
            None => BTreeMap::new(),
        }
    }

    /// Change a server-side query parameter and re-list.
    pub async fn set_query(&mut self, key: &str, value: &str) {
        self.query.set(key, value);
        self.refresh().await;
    }

    pub async fn apply_query(&mut self, query: ListQuery) {
        self.query = query;
        self.refresh().await;
    }

    pub fn open_editor(&mut self, record: Option<&Record>) -> &EditSession {
        self.session.insert(EditSession::begin(&self.spec, record))
    }

    /// Open the dialog on the cached record with identity `id`.
    pub fn open_editor_for(&mut self, id: &str) -> Option<&EditSession> {
        let record = self
            .records
            .iter()
            .find(|r| record_id(r, &self.spec.id_key).as_deref() == Some(id))
            .cloned()?;
        Some(self.open_editor(Some(&record)))
    }

    pub fn edit_field(&mut self, key: &str, value: Value) -> bool {
        match self.session.as_mut() {
            Some(session) => {
                session.set_field(key, value);
                true
            }
            None => false,
        }
    }

    pub fn attach(&mut self, attachment: Attachment) -> bool {
        match self.session.as_mut() {
            Some(session) => {
                session.attach(attachment);
                true
            }
            None => false,
        }
    }

    pub fn cancel_edit(&mut self) {
        self.session = None;
    }

    /// Commit the open dialog, then re-fetch once the mutation settles.
    /// The dialog stays open unless every call succeeded.
    #[instrument(skip_all, fields(resource = %self.spec.kind))]
    pub async fn save(&mut self) -> SaveOutcome {
        self.resolve_reference().await;
        let remote = Arc::clone(&self.remote);
        let result = match self.session.as_ref() {
            Some(session) => session.commit(remote.as_ref()).await,
            None => return SaveOutcome::NoSession,
        };

        let report = match result {
            Ok(report) => report,
            Err(ApiError::Validation(errors)) => {
                let listed: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                self.notify(
                    NoticeLevel::Error,
                    format!("Cannot save {}: {}", self.spec.kind, listed.join(", ")),
                );
                return SaveOutcome::Invalid(errors);
            }
            Err(err) => {
                self.notify(NoticeLevel::Error, format!("Failed to save {}: {}", self.spec.kind, err));
                return SaveOutcome::Failed(err);
            }
        };

        let failures: Vec<String> = report
            .failures()
            .map(|(call, err)| format!("Failed to {} {}: {}", call, self.spec.kind, err))
            .collect();
        for message in failures {
            self.notify(NoticeLevel::Error, message);
        }

        if report.any_landed() {
            self.refresh().await;
        }
        if report.is_success() {
            info!(calls = report.steps.len(), "saved");
            self.session = None;
            self.notify(NoticeLevel::Info, format!("Saved {}", self.spec.kind));
        }
        SaveOutcome::Committed(report)
    }

    async fn resolve_reference(&mut self) {
        let pending = self.session.as_ref().and_then(EditSession::unresolved_reference);
        let (Some(name), Some(source)) = (pending, self.references.clone()) else {
            return;
        };
        let known = source.list_or_empty(&ListQuery::new()).await;
        if let Some(session) = self.session.as_mut() {
            if !session.resolve_reference(&known) {
                debug!(resource = %self.spec.kind, name = %name, "reference name not found");
            }
        }
    }

    /// Delete a record and re-fetch. A record that is already gone counts as
    /// removed. Returns false when the delete failed.
    #[instrument(skip_all, fields(resource = %self.spec.kind, id = %id))]
    pub async fn remove(&mut self, id: &str) -> bool {
        let remote = Arc::clone(&self.remote);
        match remote.remove(id).await {
            Ok(()) => {
                info!("removed");
                self.notify(NoticeLevel::Info, format!("Deleted {} {}", self.spec.kind, id));
            }
            Err(err) if err.is_not_found() => {
                info!("already removed");
            }
            Err(err) => {
                self.notify(NoticeLevel::Error, format!("Failed to delete {} {}: {}", self.spec.kind, id, err));
                return false;
            }
        }
        self.refresh().await;
        true
    }

    /// React to the auth token changing elsewhere. Losing the token ends
    /// the view.
    pub fn on_token_change(&mut self, token: Option<&str>) {
        let present = token.map(|t| !t.trim().is_empty()).unwrap_or(false);
        if !present && self.mounted {
            warn!(resource = %self.spec.kind, "auth token cleared; closing view");
            self.unmount();
            self.notify(NoticeLevel::Error, "Session ended. Please log in again.".to_string());
        }
    }

    fn notify(&mut self, level: NoticeLevel, message: String) {
        self.notices.push(Notice { level, message });
    }
}
