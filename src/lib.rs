//! promptx - schema-driven entity collections over a local embedding index
//!
//! Entities are fanned out into one document record plus one record per non-scalar
//! field, stored in a persistent vector store and reconstructed from field-level
//! matches by score aggregation. Prompt templates render entities into prompts and
//! validate generated output against JSON Schema.

pub mod app;
pub mod cli;
pub mod collection;
pub mod config;
pub mod embedding;
pub mod entity;
pub mod error;
pub mod schema;
pub mod store;
pub mod template;

pub use app::App;
pub use collection::{Collection, Query, QueryOptions, Subscription};
pub use entity::{Entity, EntityDef, FieldDef, FieldType, Model};
pub use error::{PxError, Result};
pub use store::Where;
pub use template::{Template, TemplateRunner};
