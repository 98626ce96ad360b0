//! Integration tests against a live MongoDB server
//!
//! All tests are `#[ignore]` and run only when a server is reachable:
//!
//! ```sh
//! MONGODB_URI=mongodb://localhost:27017/datakit_test cargo test -- --ignored
//! ```
//!
//! The transaction tests additionally require a replica set.

use bson::doc;
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use datakit_mongodb::{
    BulkWriteOptions, Connection, FacetOptions, FindOptions, FindOptionsPaging, Query, Update,
    WriteOp,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Person {
    name: String,
    age: i32,
}

fn uri() -> String {
    std::env::var("MONGODB_URI")
        .unwrap_or_else(|_| "mongodb://localhost:27017/datakit_test".to_string())
}

async fn fresh_db_set(name: &str) -> datakit_mongodb::DbSet {
    let connection = Connection::new(&uri()).await.unwrap();
    let db_set = connection.db_set(name).unwrap();
    db_set.delete_many(&Query::new()).await.unwrap();
    db_set
}

#[tokio::test]
#[ignore]
async fn test_insert_and_find_round_trip() {
    let db_set = fresh_db_set("it_round_trip").await;

    let id = db_set
        .insert_one(doc! { "name": "ada", "age": 36 })
        .await
        .unwrap();
    assert_ne!(id, bson::Bson::Null);

    let found: Vec<Person> = db_set
        .find(&Query::eq("name", "ada"), &FindOptions::new())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(found, vec![Person { name: "ada".to_string(), age: 36 }]);
}

#[tokio::test]
#[ignore]
async fn test_find_one_with_attached_update_returns_post_image() {
    let db_set = fresh_db_set("it_find_modify").await;
    db_set
        .insert_one(doc! { "name": "grace", "age": 46 })
        .await
        .unwrap();

    let query = Query::eq("name", "grace").with_update(Update::new().inc("age", 1));
    let person: Option<Person> = db_set.find_one(&query, &FindOptions::new()).await.unwrap();
    assert_eq!(person.unwrap().age, 47);
}

#[tokio::test]
#[ignore]
async fn test_find_paged_trailing_page() {
    let db_set = fresh_db_set("it_paging").await;
    let documents: Vec<_> = (0..25)
        .map(|i| doc! { "name": format!("p{:02}", i), "age": i })
        .collect();
    db_set.insert_many(documents, true).await.unwrap();

    let paging = FindOptionsPaging::new(2, 10)
        .with_options(FindOptions::new().sort(doc! { "age": 1 }));
    let page: datakit_mongodb::PagedResult<Person> =
        db_set.find_paged(&Query::new(), &paging).await.unwrap();

    assert_eq!(page.len(), 5);
    assert_eq!(page.total(), 25);
    assert_eq!(page.page_count(), 3);
    assert_eq!(page.items()[0].name, "p20");
}

#[tokio::test]
#[ignore]
async fn test_update_and_delete_counts() {
    let db_set = fresh_db_set("it_updates").await;
    db_set
        .insert_many(
            vec![
                doc! { "name": "a", "age": 10 },
                doc! { "name": "b", "age": 20 },
                doc! { "name": "c", "age": 30 },
            ],
            true,
        )
        .await
        .unwrap();

    let outcome = db_set
        .update_many(&Query::gte("age", 20), &Update::new().inc("age", 1))
        .await
        .unwrap();
    assert_eq!(outcome.matched, 2);
    assert_eq!(outcome.modified, 2);

    let deleted = db_set.delete_many(&Query::gt("age", 25)).await.unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(db_set.count(&Query::new()).await.unwrap(), 2);
}

#[tokio::test]
#[ignore]
async fn test_aggregate_facet_page() {
    let db_set = fresh_db_set("it_facet").await;
    let documents: Vec<_> = (0..12).map(|i| doc! { "name": "n", "age": i }).collect();
    db_set.insert_many(documents, true).await.unwrap();

    let page: datakit_mongodb::FacetPage<Person> = db_set
        .aggregate(
            vec![doc! { "$match": { "age": { "$gte": 2 } } }, doc! { "$sort": { "age": 1 } }],
            &FacetOptions::new(4, 3),
        )
        .await
        .unwrap();

    assert_eq!(page.total, 10);
    assert_eq!(page.items.len(), 3);
    assert_eq!(page.items[0].age, 6);
}

#[tokio::test]
#[ignore]
async fn test_aggregate_empty_match_is_zero_results() {
    let db_set = fresh_db_set("it_facet_empty").await;

    let page: datakit_mongodb::FacetPage<Person> = db_set
        .aggregate(
            vec![doc! { "$match": { "age": { "$gt": 1000 } } }],
            &FacetOptions::new(0, 10),
        )
        .await
        .unwrap();

    assert_eq!(page.total, 0);
    assert!(page.items.is_empty());
}

#[tokio::test]
#[ignore]
async fn test_bulk_write_mixed_operations() {
    let db_set = fresh_db_set("it_bulk").await;
    db_set
        .insert_one(doc! { "name": "seed", "age": 1 })
        .await
        .unwrap();

    let summary = db_set
        .bulk_write(
            vec![
                WriteOp::InsertOne {
                    document: doc! { "name": "x", "age": 5 },
                },
                WriteOp::UpdateOne {
                    filter: Query::eq("name", "seed"),
                    update: Update::new().set("age", 2),
                    upsert: false,
                },
                WriteOp::DeleteMany {
                    filter: Query::gt("age", 4),
                },
            ],
            &BulkWriteOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.matched, 1);
    assert_eq!(summary.modified, 1);
    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.affected(), 4);
}

#[tokio::test]
#[ignore]
async fn test_transaction_commit_and_abort() {
    let connection = Connection::new(&uri()).await.unwrap();
    let db_set = connection.transactional_db_set("it_tx").await.unwrap();
    db_set.delete_many(&Query::new()).await.unwrap();

    db_set.begin_transaction().await.unwrap();
    db_set
        .insert_one(doc! { "name": "committed", "age": 1 })
        .await
        .unwrap();
    db_set.commit_transaction().await.unwrap();
    assert_eq!(db_set.count(&Query::new()).await.unwrap(), 1);

    db_set.begin_transaction().await.unwrap();
    db_set
        .insert_one(doc! { "name": "rolled back", "age": 2 })
        .await
        .unwrap();
    db_set.abort_transaction().await.unwrap();
    assert_eq!(db_set.count(&Query::new()).await.unwrap(), 1);
}

#[tokio::test]
#[ignore]
async fn test_sessionless_transaction_is_rejected() {
    let db_set = fresh_db_set("it_no_session").await;
    assert!(db_set.begin_transaction().await.is_err());
}
