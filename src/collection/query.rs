use crate::entity::{new_id, EntityDef, FieldType, Model};
use crate::store::Where;
use serde::{Deserialize, Serialize};

/// Default minimum aggregate score of a query hit
pub const DEFAULT_THRESHOLD: f32 = 0.1;
/// Default number of nearest records fetched per query text
pub const DEFAULT_N_RESULTS: usize = 10;

/// Parameters of [`super::Collection::embedding_query`]
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    /// Query texts; empty strings are ignored
    pub texts: Vec<String>,
    pub ids: Option<Vec<String>>,
    pub filter: Option<Where>,
    pub threshold: f32,
    pub limit: Option<usize>,
    pub n_results: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            texts: Vec::new(),
            ids: None,
            filter: None,
            threshold: DEFAULT_THRESHOLD,
            limit: None,
            n_results: DEFAULT_N_RESULTS,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.texts.push(text.into());
        self
    }

    pub fn texts<I, S>(mut self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.texts.extend(texts.into_iter().map(Into::into));
        self
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn filter(mut self, filter: Where) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn n_results(mut self, n_results: usize) -> Self {
        self.n_results = n_results;
        self
    }
}

/// Stateless query request, as received by an API layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Where>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: Some(collection.into()),
            ..Self::default()
        }
    }

    pub fn text(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn filter(mut self, filter: Where) -> Self {
        self.filter = Some(filter);
        self
    }
}

fn subscription_type() -> String {
    "subscription".to_string()
}

/// A stored standing query; kept in the `subscriptions` collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(rename = "type", default = "subscription_type")]
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Query>,
}

impl Subscription {
    pub fn new(query: Query) -> Self {
        Self {
            id: new_id(),
            entity_type: subscription_type(),
            query: Some(query),
        }
    }
}

impl Model for Subscription {
    fn definition() -> EntityDef {
        EntityDef::new("Subscription").field("query", FieldType::Any)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = QueryOptions::new();
        assert_eq!(options.threshold, 0.1);
        assert_eq!(options.n_results, 10);
        assert!(options.limit.is_none());
    }

    #[test]
    fn test_query_json_form() {
        let query: Query = serde_json::from_value(json!({
            "query": "hello",
            "where": {"type": "user"},
            "collection": "users"
        }))
        .unwrap();
        assert_eq!(query.query.as_deref(), Some("hello"));
        assert_eq!(query.filter, Some(Where::eq("type", "user")));

        let empty: Query = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty, Query::default());
        assert_eq!(serde_json::to_value(&Query::new("users")).unwrap(), json!({"collection": "users"}));
    }

    #[test]
    fn test_subscription_entity_carries_query() {
        let subscription = Subscription::new(Query::new("inbox").text("invoices"));
        let entity = crate::entity::Entity::from_model(&subscription).unwrap();
        assert_eq!(entity.entity_type, "subscription");
        assert_eq!(
            entity.get("query"),
            Some(&json!({"query": "invoices", "collection": "inbox"}))
        );

        let back: Subscription = entity.into_model().unwrap();
        assert_eq!(back, subscription);
    }
}
