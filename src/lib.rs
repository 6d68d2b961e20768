//! Client-side core of the agricultural commerce admin dashboard.
//!
//! Every list screen is a [`ListController`] over one [`RemoteCollection`]:
//! fetch, filter locally, edit through an [`EditSession`], re-fetch.

pub mod auth;
pub mod config;
pub mod controller;
pub mod error;
pub mod filter;
pub mod model;
pub mod remote;
pub mod resource;
pub mod session;

pub use auth::{AuthSession, TokenStore};
pub use controller::{ListController, Notice, NoticeLevel, SaveOutcome, ViewState};
pub use error::{ApiError, FieldError};
pub use filter::{FilterKind, FilterSet, FilterSpec};
pub use model::{Attachment, ListQuery, Record};
pub use remote::{HttpCollection, RemoteCollection};
pub use resource::{ResourceKind, ResourceSpec};
pub use session::{CommitReport, Draft, EditSession, MutationCall};
