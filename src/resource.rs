//! Per-resource configuration: endpoint paths, identity keys, draft
//! templates, required fields, narrow-field endpoints and filter mappings.
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

use crate::filter::{FilterKind, FilterSpec};
use crate::model::{display_text, scalar_text, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Agents,
    Orders,
    Products,
    SoilTests,
    Categories,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Agents,
        ResourceKind::Orders,
        ResourceKind::Products,
        ResourceKind::SoilTests,
        ResourceKind::Categories,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Agents => "agents",
            ResourceKind::Orders => "orders",
            ResourceKind::Products => "products",
            ResourceKind::SoilTests => "soil-tests",
            ResourceKind::Categories => "categories",
        }
    }

    pub fn spec(&self) -> ResourceSpec {
        match self {
            ResourceKind::Agents => ResourceSpec::agents(),
            ResourceKind::Orders => ResourceSpec::orders(),
            ResourceKind::Products => ResourceSpec::products(),
            ResourceKind::SoilTests => ResourceSpec::soil_tests(),
            ResourceKind::Categories => ResourceSpec::categories(),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("unknown resource '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Json,
    Multipart,
}

/// A field the backend updates through its own endpoint,
/// e.g. `PUT /products/{id}/stock` with `{"quantity": ..}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrowField {
    pub field: String,
    pub endpoint: String,
    pub body_key: String,
}

/// A boolean record field edited as a two-valued label in the dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagLabel {
    pub flag_field: String,
    pub label_field: String,
    pub on: String,
    pub off: String,
}

/// A nested reference (`{"categoryId": 3, "name": "Seeds"}`) edited by name
/// and submitted by id. Names resolve against the `source` collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub field: String,
    pub id_key: String,
    pub source: ResourceKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    pub path: String,
    pub id_key: String,
    /// Key wrapping the list in `{<key>: [..]}` envelopes.
    pub envelope_key: String,
    pub encoding: BodyEncoding,
    pub template: Record,
    pub required: Vec<String>,
    pub narrow_fields: Vec<NarrowField>,
    /// Dialog-only fields that never survive into a new session.
    pub transient_fields: Vec<String>,
    /// Draft key -> payload key.
    pub outbound_renames: Vec<(String, String)>,
    pub flag_label: Option<FlagLabel>,
    pub reference: Option<Reference>,
    pub filters: Vec<FilterSpec>,
    /// Field tallied for summary cards.
    pub status_field: Option<String>,
}

impl ResourceSpec {
    fn base(kind: ResourceKind, path: &str, id_key: &str, envelope_key: &str) -> Self {
        Self {
            kind,
            path: path.to_string(),
            id_key: id_key.to_string(),
            envelope_key: envelope_key.to_string(),
            encoding: BodyEncoding::Json,
            template: Record::new(),
            required: Vec::new(),
            narrow_fields: Vec::new(),
            transient_fields: Vec::new(),
            outbound_renames: Vec::new(),
            flag_label: None,
            reference: None,
            filters: Vec::new(),
            status_field: None,
        }
    }

    pub fn agents() -> Self {
        let mut spec = Self::base(ResourceKind::Agents, "admin/agents", "userId", "agents");
        spec.template = template(&[
            ("name", json!("")),
            ("location", json!("")),
            ("mobileNumber", json!("")),
            ("status", json!("Active")),
        ]);
        spec.required = strings(&["name", "location", "mobileNumber"]);
        spec.outbound_renames = vec![("mobileNumber".into(), "phoneNumber".into())];
        spec.flag_label = Some(FlagLabel {
            flag_field: "active".into(),
            label_field: "status".into(),
            on: "Active".into(),
            off: "Inactive".into(),
        });
        spec.filters = vec![
            FilterSpec::new("search", FilterKind::Contains { field: "name".into() }),
            FilterSpec::new("region", FilterKind::Equals { field: "location".into() }),
        ];
        spec.status_field = Some("active".into());
        spec
    }

    pub fn orders() -> Self {
        let mut spec = Self::base(ResourceKind::Orders, "orders", "orderId", "orders");
        spec.template = template(&[
            ("user", json!("")),
            ("product", json!("")),
            ("quantity", json!("")),
            ("payment", json!("Pending")),
            ("status", json!("Processing")),
        ]);
        spec.required = strings(&["user", "product", "quantity"]);
        spec.narrow_fields = vec![NarrowField {
            field: "status".into(),
            endpoint: "status".into(),
            body_key: "status".into(),
        }];
        spec.filters = vec![
            FilterSpec::new("search", FilterKind::Contains { field: "user".into() }),
            FilterSpec::new("status", FilterKind::Equals { field: "status".into() }),
            FilterSpec::new("payment", FilterKind::Equals { field: "payment".into() }),
            FilterSpec::new("from", FilterKind::DateFrom { fields: strings(&["orderDate"]) }),
            FilterSpec::new("to", FilterKind::DateTo { fields: strings(&["orderDate"]) }),
        ];
        spec.status_field = Some("status".into());
        spec
    }

    pub fn products() -> Self {
        let mut spec = Self::base(ResourceKind::Products, "products", "productId", "products");
        spec.encoding = BodyEncoding::Multipart;
        spec.template = template(&[
            ("name", json!("")),
            ("description", json!("")),
            ("category", json!("")),
            ("price", json!("")),
            ("stock", json!("")),
        ]);
        spec.required = strings(&["name", "price"]);
        spec.narrow_fields = vec![NarrowField {
            field: "stock".into(),
            endpoint: "stock".into(),
            body_key: "quantity".into(),
        }];
        spec.transient_fields = strings(&["imageFile"]);
        spec.reference = Some(Reference {
            field: "category".into(),
            id_key: "categoryId".into(),
            source: ResourceKind::Categories,
        });
        spec.filters = vec![
            FilterSpec::new("search", FilterKind::AnyField),
            FilterSpec::new("category", FilterKind::Equals { field: "category".into() }),
        ];
        spec
    }

    pub fn soil_tests() -> Self {
        let mut spec = Self::base(
            ResourceKind::SoilTests,
            "soil-test/reports",
            "soilTestId",
            "reports",
        );
        spec.template = template(&[
            ("userName", json!("")),
            ("farmLocation", json!("")),
            ("soilType", json!("")),
            ("status", json!("PENDING")),
        ]);
        spec.required = strings(&["userName", "farmLocation"]);
        spec.filters = vec![
            FilterSpec::new("farmer", FilterKind::Contains { field: "userName".into() }),
            FilterSpec::new("location", FilterKind::Contains { field: "farmLocation".into() }),
            FilterSpec::new("soilType", FilterKind::Contains { field: "soilType".into() }),
            FilterSpec::new("status", FilterKind::Equals { field: "status".into() }),
            FilterSpec::new("from", FilterKind::DateFrom { fields: strings(&["testDate"]) }),
            FilterSpec::new("to", FilterKind::DateTo { fields: strings(&["testDate"]) }),
        ];
        spec.status_field = Some("status".into());
        spec
    }

    pub fn categories() -> Self {
        let mut spec = Self::base(ResourceKind::Categories, "category", "categoryId", "categories");
        spec.template = template(&[("name", json!(""))]);
        spec.required = strings(&["name"]);
        spec.filters = vec![FilterSpec::new(
            "search",
            FilterKind::Contains { field: "name".into() },
        )];
        spec
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.trim_matches('/').to_string();
        self
    }

    pub fn narrow_field(&self, field: &str) -> Option<&NarrowField> {
        self.narrow_fields.iter().find(|n| n.field == field)
    }

    pub fn is_transient(&self, field: &str) -> bool {
        self.transient_fields.iter().any(|f| f == field)
    }

    pub fn filter_keys(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(|f| f.key.as_str())
    }
}

/// Find the id of the record in `records` whose display name is `name`.
pub fn lookup_reference_id(records: &[Record], name: &str, id_key: &str) -> Option<Value> {
    records
        .iter()
        .find(|r| r.get("name").and_then(display_text).as_deref() == Some(name))
        .and_then(|r| r.get(id_key))
        .filter(|id| scalar_text(id).is_some())
        .cloned()
}

fn template(fields: &[(&str, Value)]) -> Record {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
