//! OData module
//!
//! Authenticated HTTP client, query building and metadata parsing for SAP Gateway

pub mod client;
pub mod metadata;
pub mod query;

pub use client::{RequestBody, RequestOptions, SapClient, ServiceInfo};
pub use metadata::{entity_sets, entity_types, parse_xml, EntityTypeInfo};
pub use query::{build_filter, key_predicate, QueryOptions};
