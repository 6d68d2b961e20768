use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

use agro_admin::controller::{ListController, NoticeLevel, SaveOutcome, ViewState};
use agro_admin::error::ApiError;
use agro_admin::model::{ListQuery, Record};
use agro_admin::remote::{encode_payload, RemoteCollection};
use agro_admin::resource::{NarrowField, ResourceSpec};
use agro_admin::session::{Draft, EditSession, MutationCall};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    List(ListQuery),
    Get(String),
    Create(Record),
    Update(String, Record),
    Narrow(String, String, Value),
    Remove(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    List,
    Update,
    Narrow,
    Remove,
}

/// In-memory backend that records every call and can fail chosen ones.
#[derive(Clone)]
struct RecordingCollection {
    spec: ResourceSpec,
    rows: Arc<Mutex<Vec<Record>>>,
    calls: Arc<Mutex<Vec<Call>>>,
    failures: Arc<Mutex<Vec<(CallKind, ApiError)>>>,
    next_id: Arc<Mutex<i64>>,
}

impl RecordingCollection {
    fn new(spec: ResourceSpec, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();
        Self {
            spec,
            rows: Arc::new(Mutex::new(rows)),
            calls: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(Mutex::new(1000)),
        }
    }

    async fn fail_next(&self, kind: CallKind, err: ApiError) {
        self.failures.lock().await.push((kind, err));
    }

    async fn take_failure(&self, kind: CallKind) -> Option<ApiError> {
        let mut guard = self.failures.lock().await;
        let pos = guard.iter().position(|(k, _)| *k == kind)?;
        Some(guard.remove(pos).1)
    }

    async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    async fn mutation_calls(&self) -> Vec<Call> {
        self.calls()
            .await
            .into_iter()
            .filter(|c| !matches!(c, Call::List(_) | Call::Get(_)))
            .collect()
    }

    async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    fn id_of(&self, row: &Record) -> Option<String> {
        agro_admin::model::record_id(row, &self.spec.id_key)
    }
}

#[async_trait]
impl RemoteCollection for RecordingCollection {
    fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<Record>, ApiError> {
        self.calls.lock().await.push(Call::List(query.clone()));
        if let Some(err) = self.take_failure(CallKind::List).await {
            return Err(err);
        }
        Ok(self.rows.lock().await.clone())
    }

    async fn get(&self, id: &str) -> Result<Record, ApiError> {
        self.calls.lock().await.push(Call::Get(id.to_string()));
        self.rows
            .lock()
            .await
            .iter()
            .find(|r| self.id_of(r).as_deref() == Some(id))
            .cloned()
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }

    async fn create(&self, draft: &Draft) -> Result<Record, ApiError> {
        self.calls.lock().await.push(Call::Create(draft.fields().clone()));
        let mut next = self.next_id.lock().await;
        *next += 1;
        let mut row = draft.fields().clone();
        row.insert(self.spec.id_key.clone(), json!(*next));
        self.rows.lock().await.push(row.clone());
        Ok(row)
    }

    async fn update(&self, id: &str, draft: &Draft) -> Result<Record, ApiError> {
        self.calls
            .lock()
            .await
            .push(Call::Update(id.to_string(), draft.fields().clone()));
        if let Some(err) = self.take_failure(CallKind::Update).await {
            return Err(err);
        }
        let mut rows = self.rows.lock().await;
        let row = rows
            .iter_mut()
            .find(|r| self.id_of(r).as_deref() == Some(id))
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        for (k, v) in draft.fields() {
            row.insert(k.clone(), v.clone());
        }
        Ok(row.clone())
    }

    async fn update_narrow(&self, id: &str, field: &NarrowField, value: &Value) -> Result<(), ApiError> {
        self.calls
            .lock()
            .await
            .push(Call::Narrow(id.to_string(), field.field.clone(), value.clone()));
        if let Some(err) = self.take_failure(CallKind::Narrow).await {
            return Err(err);
        }
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.iter_mut().find(|r| self.id_of(r).as_deref() == Some(id)) {
            row.insert(field.field.clone(), value.clone());
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), ApiError> {
        self.calls.lock().await.push(Call::Remove(id.to_string()));
        if let Some(err) = self.take_failure(CallKind::Remove).await {
            return Err(err);
        }
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|r| self.id_of(r).as_deref() != Some(id));
        if rows.len() == before {
            return Err(ApiError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

fn soil_test_rows() -> Vec<Value> {
    let statuses = [
        "PENDING", "COMPLETED", "PENDING", "IN_PROGRESS", "COMPLETED",
        "PENDING", "COMPLETED", "COMPLETED", "IN_PROGRESS", "COMPLETED",
    ];
    statuses
        .iter()
        .enumerate()
        .map(|(i, status)| {
            json!({
                "soilTestId": i + 1,
                "userName": format!("Farmer {}", i + 1),
                "farmLocation": if i % 2 == 0 { "Nashik" } else { "Pune" },
                "soilType": "Loam",
                "status": status,
                "testDate": format!("2024-03-{:02}", i + 1),
            })
        })
        .collect()
}

fn product_rows() -> Vec<Value> {
    vec![
        json!({ "productId": 1, "name": "Urea", "price": 450, "stock": 10, "category": { "categoryId": 2, "name": "Fertilizer" } }),
        json!({ "productId": 2, "name": "Hybrid Seeds", "price": 120, "stock": 50, "category": { "categoryId": 1, "name": "Seeds" } }),
    ]
}

fn category_rows() -> Vec<Value> {
    vec![
        json!({ "categoryId": 1, "name": "Seeds" }),
        json!({ "categoryId": 2, "name": "Fertilizer" }),
    ]
}

async fn mounted_products() -> (RecordingCollection, RecordingCollection, ListController) {
    let products = RecordingCollection::new(ResourceSpec::products(), product_rows());
    let categories = RecordingCollection::new(ResourceSpec::categories(), category_rows());
    let mut controller = ListController::new(Arc::new(products.clone()))
        .with_reference_source(Arc::new(categories.clone()));
    controller.mount().await;
    products.clear_calls().await;
    (products, categories, controller)
}

fn agent_rows() -> Vec<Value> {
    vec![
        json!({ "userId": 1, "name": "Rohan Gupta", "location": "North", "mobileNumber": "900001", "active": true }),
        json!({ "userId": 2, "name": "Anjali Mehta", "location": "South", "mobileNumber": "900002", "active": false }),
        json!({ "userId": 3, "name": "Karan Singh", "location": "North", "mobileNumber": "900003", "active": true }),
    ]
}

async fn mounted(remote: &RecordingCollection) -> ListController {
    let mut controller = ListController::new(Arc::new(remote.clone()));
    assert_eq!(controller.state(), ViewState::Idle);
    controller.mount().await;
    controller
}

fn ids(rows: &[&Record], key: &str) -> Vec<i64> {
    rows.iter().map(|r| r[key].as_i64().unwrap()).collect()
}

#[tokio::test]
async fn soil_test_status_filter_keeps_order_and_clears() {
    let remote = RecordingCollection::new(ResourceSpec::soil_tests(), soil_test_rows());
    let mut controller = mounted(&remote).await;
    assert_eq!(controller.state(), ViewState::Ready);
    assert_eq!(controller.visible().len(), 10);

    controller.set_filter("status", "PENDING");
    assert_eq!(ids(&controller.visible(), "soilTestId"), vec![1, 3, 6]);
    assert_eq!(controller.state(), ViewState::Ready);

    controller.set_filter("status", "");
    assert_eq!(controller.visible().len(), 10);

    // Client-side filtering never goes back to the backend.
    assert_eq!(remote.calls().await.len(), 1);
}

#[tokio::test]
async fn filters_compose_and_tally_counts_visible_rows() {
    let remote = RecordingCollection::new(ResourceSpec::soil_tests(), soil_test_rows());
    let mut controller = mounted(&remote).await;

    controller.set_filter("location", "nash");
    controller.set_filter("from", "2024-03-03");
    controller.set_filter("to", "2024-03-07");
    assert_eq!(ids(&controller.visible(), "soilTestId"), vec![3, 5, 7]);

    let tally = controller.tally();
    assert_eq!(tally.get("PENDING"), Some(&1));
    assert_eq!(tally.get("COMPLETED"), Some(&2));

    let exported = controller.export_rows();
    assert_eq!(exported.len(), 3);
    assert_eq!(exported[0], *controller.visible()[0]);

    controller.clear_filters();
    assert_eq!(controller.visible().len(), 10);
}

#[tokio::test]
async fn unknown_filter_keys_are_ignored() {
    let remote = RecordingCollection::new(ResourceSpec::agents(), agent_rows());
    let mut controller = mounted(&remote).await;
    controller.set_filter("colour", "red");
    assert!(controller.filters().is_empty());
    assert_eq!(controller.visible().len(), 3);
}

#[tokio::test]
async fn failed_list_lands_in_ready_with_empty_collection() {
    let remote = RecordingCollection::new(ResourceSpec::agents(), agent_rows());
    remote
        .fail_next(CallKind::List, ApiError::Network("connection refused".into()))
        .await;
    let mut controller = mounted(&remote).await;

    assert_eq!(controller.state(), ViewState::Ready);
    assert!(controller.visible().is_empty());
    let notices = controller.take_notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert!(notices[0].message.contains("agents"));

    controller.refresh().await;
    assert_eq!(controller.visible().len(), 3);
}

#[tokio::test]
async fn server_side_query_reloads() {
    let remote = RecordingCollection::new(ResourceSpec::orders(), vec![]);
    let mut controller = mounted(&remote).await;
    controller.set_query("from", "2024-01-01").await;
    controller.set_query("region", "North").await;

    let calls = remote.calls().await;
    assert_eq!(calls.len(), 3);
    assert_eq!(
        calls[2],
        Call::List(ListQuery::new().with("from", "2024-01-01").with("region", "North"))
    );
    assert_eq!(controller.state(), ViewState::Ready);
}

#[tokio::test]
async fn stale_and_unmounted_loads_are_ignored() {
    let remote = RecordingCollection::new(ResourceSpec::agents(), agent_rows());
    let mut controller = mounted(&remote).await;

    let first = controller.begin_load();
    let second = controller.begin_load();
    assert!(!controller.finish_load(first, Ok(Vec::new())));
    assert_eq!(controller.state(), ViewState::Loading);
    assert_eq!(controller.records().len(), 3);

    assert!(controller.finish_load(second, Ok(Vec::new())));
    assert_eq!(controller.state(), ViewState::Ready);
    assert!(controller.records().is_empty());

    let late = controller.begin_load();
    controller.unmount();
    assert!(!controller.finish_load(late, Err(ApiError::Network("late".into()))));
    assert!(controller.take_notices().is_empty());
}

#[tokio::test]
async fn new_record_commits_through_create_only() {
    let remote = RecordingCollection::new(ResourceSpec::agents(), agent_rows());
    let mut controller = mounted(&remote).await;

    controller.open_editor(None);
    controller.edit_field("name", json!("Simran Kaur"));
    controller.edit_field("location", json!("West"));
    controller.edit_field("mobileNumber", json!("900004"));
    remote.clear_calls().await;

    let SaveOutcome::Committed(report) = controller.save().await else {
        panic!("expected a commit");
    };
    assert_eq!(report.calls(), vec![MutationCall::Create]);
    assert!(report.is_success());

    let calls = remote.calls().await;
    assert!(matches!(calls[0], Call::Create(_)));
    assert!(matches!(calls[1], Call::List(_)));
    assert_eq!(calls.len(), 2);
    assert!(controller.session().is_none());
    assert_eq!(controller.records().len(), 4);
}

#[tokio::test]
async fn existing_record_commits_through_update_only() {
    let remote = RecordingCollection::new(ResourceSpec::agents(), agent_rows());
    let mut controller = mounted(&remote).await;

    controller.open_editor_for("2").unwrap();
    remote.clear_calls().await;
    let SaveOutcome::Committed(report) = controller.save().await else {
        panic!("expected a commit");
    };
    assert_eq!(report.calls(), vec![MutationCall::Update]);
    let mutations = remote.mutation_calls().await;
    assert_eq!(mutations.len(), 1);
    let Call::Update(id, _) = &mutations[0] else {
        panic!("expected update, got {:?}", mutations[0]);
    };
    assert_eq!(id, "2");
}

#[tokio::test]
async fn invalid_draft_makes_no_call_and_keeps_dialog_open() {
    let remote = RecordingCollection::new(ResourceSpec::agents(), agent_rows());
    let mut controller = mounted(&remote).await;
    controller.open_editor(None);
    controller.edit_field("name", json!("Only A Name"));
    remote.clear_calls().await;

    let SaveOutcome::Invalid(errors) = controller.save().await else {
        panic!("expected validation failure");
    };
    let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
    assert_eq!(fields, vec!["location", "mobileNumber"]);
    assert!(remote.calls().await.is_empty());
    assert!(controller.session().is_some());
    let notices = controller.take_notices();
    assert!(notices[0].message.contains("location is required"));
    assert!(notices[0].message.contains("mobileNumber is required"));
}

#[tokio::test]
async fn stock_only_edit_uses_narrow_endpoint_alone() {
    let remote = RecordingCollection::new(ResourceSpec::products(), product_rows());
    let mut controller = mounted(&remote).await;

    controller.open_editor_for("1").unwrap();
    controller.edit_field("stock", json!(25));
    remote.clear_calls().await;
    controller.save().await;

    assert_eq!(
        remote.mutation_calls().await,
        vec![Call::Narrow("1".into(), "stock".into(), json!(25))]
    );
    assert_eq!(controller.records()[0]["stock"], 25);
}

#[tokio::test]
async fn name_and_stock_edit_issues_both_calls() {
    let remote = RecordingCollection::new(ResourceSpec::products(), product_rows());
    let mut controller = mounted(&remote).await;

    controller.open_editor_for("1").unwrap();
    controller.edit_field("name", json!("Urea 46%"));
    controller.edit_field("stock", json!(5));
    remote.clear_calls().await;
    let SaveOutcome::Committed(report) = controller.save().await else {
        panic!("expected a commit");
    };

    assert_eq!(
        report.calls(),
        vec![MutationCall::Update, MutationCall::Narrow("stock".into())]
    );
    let mutations = remote.mutation_calls().await;
    assert_eq!(mutations.len(), 2);
    let Call::Update(_, body) = &mutations[0] else {
        panic!("expected update first");
    };
    assert_eq!(body["name"], "Urea 46%");
    assert!(!body.contains_key("stock"));
    assert_eq!(mutations[1], Call::Narrow("1".into(), "stock".into(), json!(5)));
}

#[tokio::test]
async fn partial_failure_reports_both_outcomes_and_refetches() {
    let remote = RecordingCollection::new(ResourceSpec::products(), product_rows());
    let mut controller = mounted(&remote).await;
    remote
        .fail_next(
            CallKind::Update,
            ApiError::Server { status: 500, message: "db down".into() },
        )
        .await;

    controller.open_editor_for("2").unwrap();
    controller.edit_field("name", json!("Seeds v2"));
    controller.edit_field("stock", json!(0));
    remote.clear_calls().await;
    let SaveOutcome::Committed(report) = controller.save().await else {
        panic!("expected a commit");
    };

    assert!(!report.is_success());
    assert!(report.any_landed());
    let failed: Vec<String> = report.failures().map(|(c, _)| c.to_string()).collect();
    assert_eq!(failed, vec!["update"]);

    // Refetched so the landed stock change is visible; dialog stays open.
    assert!(matches!(remote.calls().await.last(), Some(Call::List(_))));
    assert_eq!(controller.records()[1]["stock"], 0);
    assert_eq!(controller.records()[1]["name"], "Hybrid Seeds");
    assert!(controller.session().is_some());

    let notices = controller.take_notices();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].message.contains("Failed to update products"));
    assert!(notices[0].message.contains("db down"));
}

#[tokio::test]
async fn order_status_goes_through_status_endpoint() {
    let remote = RecordingCollection::new(
        ResourceSpec::orders(),
        vec![json!({ "orderId": 101, "user": "Rohan", "product": "Urea", "quantity": 2, "payment": "Paid", "status": "Processing" })],
    );
    let mut controller = mounted(&remote).await;
    controller.open_editor_for("101").unwrap();
    controller.edit_field("status", json!("Shipped"));
    remote.clear_calls().await;
    controller.save().await;
    assert_eq!(
        remote.mutation_calls().await,
        vec![Call::Narrow("101".into(), "status".into(), json!("Shipped"))]
    );
}

#[tokio::test]
async fn delete_then_list_drops_exactly_one() {
    let remote = RecordingCollection::new(ResourceSpec::agents(), agent_rows());
    let mut controller = mounted(&remote).await;
    assert_eq!(controller.records().len(), 3);

    assert!(controller.remove("2").await);
    assert_eq!(controller.records().len(), 2);
    assert!(controller
        .records()
        .iter()
        .all(|r| r["userId"] != json!(2)));

    // Second delete: backend says 404, treated as already removed.
    remote.clear_calls().await;
    assert!(controller.remove("2").await);
    let calls = remote.calls().await;
    assert_eq!(calls[0], Call::Remove("2".into()));
    assert!(matches!(calls[1], Call::List(_)));
    assert_eq!(controller.records().len(), 2);
}

#[tokio::test]
async fn failed_delete_is_reported_without_refetch() {
    let remote = RecordingCollection::new(ResourceSpec::agents(), agent_rows());
    let mut controller = mounted(&remote).await;
    remote
        .fail_next(CallKind::Remove, ApiError::Server { status: 403, message: "forbidden".into() })
        .await;
    remote.clear_calls().await;

    assert!(!controller.remove("1").await);
    assert_eq!(remote.calls().await, vec![Call::Remove("1".into())]);
    assert_eq!(controller.state(), ViewState::Ready);
    let notices = controller.take_notices();
    assert!(notices[0].message.contains("Failed to delete agents 1"));
}

#[tokio::test]
async fn cancel_discards_the_draft() {
    let remote = RecordingCollection::new(ResourceSpec::agents(), agent_rows());
    let mut controller = mounted(&remote).await;
    controller.open_editor_for("1").unwrap();
    controller.edit_field("name", json!("Changed"));
    controller.cancel_edit();
    assert!(controller.session().is_none());
    assert!(!controller.edit_field("name", json!("ignored")));
    assert!(matches!(controller.save().await, SaveOutcome::NoSession));

    let session = controller.open_editor_for("1").unwrap();
    assert_eq!(session.draft().get("name"), Some(&json!("Rohan Gupta")));
}

#[tokio::test]
async fn token_loss_unmounts_the_view() {
    let remote = RecordingCollection::new(ResourceSpec::agents(), agent_rows());
    let mut controller = mounted(&remote).await;
    controller.on_token_change(Some("still-here"));
    assert!(controller.is_mounted());

    let pending = controller.begin_load();
    controller.on_token_change(None);
    assert!(!controller.is_mounted());
    assert!(!controller.finish_load(pending, Ok(Vec::new())));
    assert_eq!(controller.records().len(), 3);
    assert!(controller.take_notices()[0].message.contains("log in again"));
}

#[tokio::test]
async fn session_commit_can_be_used_without_controller() {
    let remote = RecordingCollection::new(ResourceSpec::agents(), agent_rows());
    let spec = ResourceSpec::agents();
    let record = remote.get("3").await.unwrap();
    let mut session = EditSession::begin(&spec, Some(&record));
    session.set_field("status", json!("Inactive"));

    let report = session.commit(&remote).await.unwrap();
    assert_eq!(report.calls(), vec![MutationCall::Update]);
    assert_eq!(report.record().unwrap()["status"], "Inactive");
}

#[tokio::test]
async fn category_change_submits_the_new_category_id() {
    let (products, categories, mut controller) = mounted_products().await;

    controller.open_editor_for("1").unwrap();
    controller.edit_field("category", json!("Seeds"));
    let SaveOutcome::Committed(report) = controller.save().await else {
        panic!("expected a commit");
    };
    assert!(report.is_success());
    assert_eq!(categories.calls().await, vec![Call::List(ListQuery::new())]);

    let mutations = products.mutation_calls().await;
    assert_eq!(mutations.len(), 1);
    let Call::Update(id, body) = &mutations[0] else {
        panic!("expected update, got {:?}", mutations[0]);
    };
    assert_eq!(id, "1");
    assert_eq!(body["categoryId"], 1);
    let payload = encode_payload(&ResourceSpec::products(), body);
    assert_eq!(payload.get("categoryId"), Some(&json!(1)));
}

#[tokio::test]
async fn new_product_is_created_with_its_category_id() {
    let (products, _categories, mut controller) = mounted_products().await;

    controller.open_editor(None);
    controller.edit_field("name", json!("Drip Kit"));
    controller.edit_field("price", json!(1200));
    controller.edit_field("category", json!("Fertilizer"));
    controller.save().await;

    let mutations = products.mutation_calls().await;
    let [Call::Create(body)] = mutations.as_slice() else {
        panic!("expected one create, got {:?}", mutations);
    };
    let payload = encode_payload(&ResourceSpec::products(), body);
    assert_eq!(payload.get("categoryId"), Some(&json!(2)));
    assert!(payload.get("category").is_none());
}

#[tokio::test]
async fn unknown_category_blocks_the_save() {
    let (products, _categories, mut controller) = mounted_products().await;

    controller.open_editor_for("2").unwrap();
    controller.edit_field("category", json!("Tools"));
    let SaveOutcome::Invalid(errors) = controller.save().await else {
        panic!("expected validation failure");
    };
    assert_eq!(errors[0].field, "category");
    assert!(products.calls().await.is_empty());
    assert!(controller.session().is_some());
    assert!(controller.take_notices()[0]
        .message
        .contains("unknown category 'Tools'"));
}

#[tokio::test]
async fn unchanged_category_needs_no_lookup() {
    let (products, categories, mut controller) = mounted_products().await;

    controller.open_editor_for("2").unwrap();
    controller.edit_field("name", json!("Hybrid Seeds v2"));
    controller.save().await;

    assert!(categories.calls().await.is_empty());
    let mutations = products.mutation_calls().await;
    let Call::Update(_, body) = &mutations[0] else {
        panic!("expected update");
    };
    assert_eq!(body["categoryId"], 1);
}
