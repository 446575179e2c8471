use promptx::collection::{Collection, QueryOptions, DOCUMENT_ITEM, FIELD_ITEM};
use promptx::embedding::HashEmbedder;
use promptx::entity::{Entity, EntityDef, FieldType, Model};
use promptx::error::{PxError, Result};
use promptx::store::{
    GetResult, Metadata, QueryResult, SqliteStore, StoreCollection, VectorStore, Where,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    age: i64,
}

impl Model for User {
    fn definition() -> EntityDef {
        EntityDef::new("User")
            .required("name", FieldType::String)
            .required("age", FieldType::Integer)
    }
}

fn open_store(temp_dir: &TempDir) -> SqliteStore {
    SqliteStore::open(
        &temp_dir.path().join("store.sqlite"),
        Arc::new(HashEmbedder::new(256)),
        2,
        8,
    )
    .expect("Failed to open store")
}

fn metadata(value: Value) -> Metadata {
    value.as_object().cloned().unwrap_or_default()
}

/// Store collection with canned search results
struct CannedCollection {
    records: GetResult,
    hits: QueryResult,
}

impl StoreCollection for CannedCollection {
    fn name(&self) -> &str {
        "canned"
    }

    fn get(&self, ids: Option<&[String]>, filter: Option<&Where>) -> Result<GetResult> {
        let mut result = GetResult::default();
        for ((id, document), meta) in self
            .records
            .ids
            .iter()
            .zip(&self.records.documents)
            .zip(&self.records.metadatas)
        {
            let id_ok = ids.map(|ids| ids.contains(id)).unwrap_or(true);
            let filter_ok = filter.map(|f| f.matches(meta)).unwrap_or(true);
            if id_ok && filter_ok {
                result.ids.push(id.clone());
                result.documents.push(document.clone());
                result.metadatas.push(meta.clone());
            }
        }
        Ok(result)
    }

    fn query(
        &self,
        _texts: &[String],
        _n_results: usize,
        _filter: Option<&Where>,
        _ids: Option<&[String]>,
    ) -> Result<QueryResult> {
        Ok(self.hits.clone())
    }

    fn upsert(&self, _ids: &[String], _documents: &[String], _metadatas: &[Metadata]) -> Result<()> {
        Ok(())
    }

    fn delete(&self, _ids: Option<&[String]>, _filter: Option<&Where>) -> Result<()> {
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}

fn canned() -> Arc<CannedCollection> {
    let doc = |id: &str| {
        (
            id.to_string(),
            json!({"type": "note", "title": id}).to_string(),
            metadata(json!({"collection": "canned", "type": "note", "item": DOCUMENT_ITEM})),
        )
    };
    let mut records = GetResult::default();
    for (id, document, meta) in [doc("a"), doc("b")] {
        records.ids.push(id);
        records.documents.push(document);
        records.metadatas.push(meta);
    }

    let field = |owner: &str, name: &str| {
        metadata(json!({"field": name, "collection": "canned", "item": FIELD_ITEM, "item_id": owner}))
    };
    let hits = QueryResult {
        ids: vec![vec!["a_tags".into(), "a_links".into(), "b".into()]],
        distances: vec![vec![0.2, 0.4, 0.1]],
        documents: vec![vec![String::new(), String::new(), String::new()]],
        metadatas: vec![vec![
            field("a", "tags"),
            field("a", "links"),
            records.metadatas[1].clone(),
        ]],
    };
    Arc::new(CannedCollection { records, hits })
}

#[test]
fn test_fragment_scores_add_up_per_entity() {
    let collection = Collection::load(canned()).unwrap();
    assert_eq!(collection.len(), 2);

    let result = collection
        .embedding_query(&QueryOptions::new().text("anything"))
        .unwrap()
        .expect("rows are loaded");

    let ids: Vec<&str> = result.ids().collect();
    assert_eq!(ids, vec!["a", "b"]);
    assert!((result.scores()[0] - 1.4).abs() < 1e-5);
    assert!((result.scores()[1] - 0.9).abs() < 1e-5);
}

#[test]
fn test_limit_and_threshold() {
    let collection = Collection::load(canned()).unwrap();

    let limited = collection
        .embedding_query(&QueryOptions::new().text("anything").limit(1))
        .unwrap()
        .unwrap();
    assert_eq!(limited.ids().collect::<Vec<_>>(), vec!["a"]);

    let strict = collection
        .embedding_query(&QueryOptions::new().text("anything").threshold(1.0))
        .unwrap()
        .unwrap();
    assert_eq!(strict.ids().collect::<Vec<_>>(), vec!["a"]);
}

#[test]
fn test_scores_without_rows_resolve_to_none() {
    let store = canned();
    let empty = Collection::from_rows(store, Vec::new());
    let result = empty
        .embedding_query(&QueryOptions::new().text("anything"))
        .unwrap();
    assert!(result.is_none());
}

#[test]
fn test_user_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let mut users = Collection::load(store.get_or_create_collection("users").unwrap()).unwrap();

    let user = User {
        id: None,
        name: "test".to_string(),
        age: 20,
    };
    let added = users.embed(&[Entity::from_model(&user).unwrap()]).unwrap();
    assert_eq!(added, 1);
    assert_eq!(users.store().count().unwrap(), 1);

    let objects = users.objects().unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].get_str("name"), Some("test"));
    assert_eq!(objects[0].entity_type, "user");

    let back: User = objects[0].into_model().unwrap();
    assert_eq!(back.name, "test");
    assert_eq!(back.age, 20);
    assert_eq!(back.id.as_deref(), Some(objects[0].id.as_str()));
}

#[test]
fn test_non_scalar_fields_add_one_record_each() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let mut posts = Collection::load(store.get_or_create_collection("posts").unwrap()).unwrap();

    let post = Entity::new("post")
        .with("title", json!("Hello"))
        .with("tags", json!(["intro", "rust"]))
        .with("meta", json!({"words": 120}));
    posts.embed(&[post.clone()]).unwrap();

    assert_eq!(posts.store().count().unwrap(), 3);
    let fields = posts
        .store()
        .get(None, Some(&Where::eq("item_id", post.id.as_str())))
        .unwrap();
    let mut ids = fields.ids.clone();
    ids.sort();
    assert_eq!(
        ids,
        vec![format!("{}_meta", post.id), format!("{}_tags", post.id)]
    );
}

#[test]
fn test_embed_nothing_fails() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let mut empty = Collection::load(store.get_or_create_collection("empty").unwrap()).unwrap();
    assert!(matches!(empty.embed(&[]), Err(PxError::NothingToEmbed)));
}

#[test]
fn test_text_query_finds_closest_entity() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let mut notes = Collection::load(store.get_or_create_collection("notes").unwrap()).unwrap();
    let items = notes
        .embed_text(&[
            "rust ownership borrowing",
            "banana smoothie recipe",
            "sqlite write ahead log",
        ])
        .unwrap();

    let result = notes.call(&["banana smoothie recipe"]).unwrap().unwrap();
    assert_eq!(result.ids().next(), Some(items[1].id.as_str()));
    assert_eq!(
        result.first().unwrap().unwrap().get_str("value"),
        Some("banana smoothie recipe")
    );
}

#[test]
fn test_filter_only_query_scores_one_per_record() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let mut items = Collection::load(store.get_or_create_collection("items").unwrap()).unwrap();
    items
        .embed(&[
            Entity::new("book").with("title", json!("Dune")),
            Entity::new("film").with("title", json!("Alien")),
            Entity::new("book")
                .with("title", json!("Emma"))
                .with("tags", json!(["classic"])),
        ])
        .unwrap();

    let everything = items.embedding_query(&QueryOptions::new()).unwrap().unwrap();
    assert_eq!(everything.len(), 3);
    // the entity with a field record collects a second point
    assert_eq!(everything.rows()[0]["title"], json!("Emma"));
    assert_eq!(everything.scores().to_vec(), vec![2.0, 1.0, 1.0]);

    let books = items
        .embedding_query(&QueryOptions::new().filter(Where::eq("type", "book")))
        .unwrap()
        .unwrap();
    let titles: Vec<&Value> = books.rows().iter().map(|r| &r["title"]).collect();
    assert_eq!(titles, vec![&json!("Dune"), &json!("Emma")]);
}

#[test]
fn test_delete_removes_entity_and_field_records() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let mut posts = Collection::load(store.get_or_create_collection("posts").unwrap()).unwrap();

    let keep = Entity::new("post").with("title", json!("keep"));
    let drop = Entity::new("post")
        .with("title", json!("drop"))
        .with("tags", json!(["a"]));
    posts.embed(&[keep.clone(), drop.clone()]).unwrap();
    assert_eq!(posts.store().count().unwrap(), 3);

    posts.delete(&[drop]).unwrap();
    assert_eq!(posts.store().count().unwrap(), 1);
    assert_eq!(posts.ids().collect::<Vec<_>>(), vec![keep.id.as_str()]);
}

#[test]
fn test_rows_reload_after_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let id = {
        let store = open_store(&temp_dir);
        let mut users =
            Collection::load(store.get_or_create_collection("users").unwrap()).unwrap();
        let user = Entity::new("user").with("name", json!("ann"));
        users.embed(&[user.clone()]).unwrap();
        user.id
    };

    let store = open_store(&temp_dir);
    let users = Collection::load(store.get_collection("users").unwrap().unwrap()).unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users.row(&id).unwrap()["name"], json!("ann"));
}

#[test]
fn test_reembed_updates_store_but_not_cached_row() {
    let temp_dir = TempDir::new().unwrap();
    let store = open_store(&temp_dir);
    let mut users = Collection::load(store.get_or_create_collection("users").unwrap()).unwrap();

    let user = Entity::new("user").with("name", json!("ann"));
    assert_eq!(users.embed(&[user.clone()]).unwrap(), 1);

    let renamed = Entity::with_id(user.id.clone(), "user").with("name", json!("bea"));
    assert_eq!(users.embed(&[renamed]).unwrap(), 0);

    let stored = users
        .store()
        .get(Some(&[user.id.clone()]), None)
        .unwrap();
    assert_eq!(stored.len(), 1);
    let document: Value = serde_json::from_str(&stored.documents[0]).unwrap();
    assert_eq!(document["name"], json!("bea"));

    // the local row keeps the first version until the collection is reloaded
    assert_eq!(users.len(), 1);
    assert_eq!(users.row(&user.id).unwrap()["name"], json!("ann"));

    let reloaded = Collection::load(users.store().clone()).unwrap();
    assert_eq!(reloaded.row(&user.id).unwrap()["name"], json!("bea"));
}
