mod common;

use common::{customer, ids, order, Customer, Order, TestStore};
use unitwork_core::{
    Entity, EntityState, Filter, QueryDescriptor, SortDirection, StoreError, UnitOfWork,
    UowError,
};

fn seeded_store() -> (TestStore, Vec<Order>) {
    let store = TestStore::new();
    let uow = store.factory().create().unwrap();
    let customers = uow.repository::<Customer>().unwrap();
    customers.stage_create(&customer(1, "Ada", "gold")).unwrap();
    customers.stage_create(&customer(2, "Grace", "silver")).unwrap();

    let statuses = ["open", "shipped", "cancelled"];
    let mut orders = Vec::new();
    for id in 1..=12_i64 {
        let mut item = order(id, 1 + id % 2, id * 250, statuses[(id % 3) as usize]);
        if id % 4 == 0 {
            item.note = Some(format!("gift wrap #{id}"));
        }
        orders.push(item);
    }
    let repo = uow.repository::<Order>().unwrap();
    for item in &orders {
        repo.stage_create(item).unwrap();
    }
    uow.save().unwrap();
    (store, orders)
}

fn open(store: &TestStore) -> UnitOfWork {
    store.factory().create().unwrap()
}

/// Applies a descriptor to an in-memory collection: key order, predicate,
/// skip, take.
fn reference(orders: &[Order], descriptor: &QueryDescriptor) -> Vec<i64> {
    let mut sorted = orders.to_vec();
    sorted.sort_by_key(|item| item.id);
    let matching = sorted.into_iter().filter(|item| {
        descriptor
            .predicate
            .as_ref()
            .map_or(true, |predicate| predicate.evaluate(&|column: &str| item.field(column)))
    });
    let paged = matching.skip(descriptor.skip as usize);
    let taken: Vec<Order> = if descriptor.take == 0 {
        paged.collect()
    } else {
        paged.take(descriptor.take as usize).collect()
    };
    ids(&taken)
}

#[test]
fn get_entity_on_empty_store_returns_none() {
    let store = TestStore::new();
    let uow = open(&store);
    let repo = uow.repository::<Order>().unwrap();

    let found = repo
        .get_entity(&QueryDescriptor::filtered(Filter::eq("id", 5_i64)))
        .unwrap();
    assert!(found.is_none());
    assert!(repo.get_all(&QueryDescriptor::new()).unwrap().is_empty());
}

#[test]
fn get_all_matches_in_memory_reference_for_every_descriptor() {
    let (store, orders) = seeded_store();
    let uow = open(&store);
    let repo = uow.repository::<Order>().unwrap();

    let descriptors = vec![
        QueryDescriptor::new(),
        QueryDescriptor::filtered(Filter::eq("status", "open")),
        QueryDescriptor::filtered(Filter::gt("total_cents", 1_000_i64)).skip(2),
        QueryDescriptor::new().skip(3).take(4),
        QueryDescriptor::filtered(Filter::is_not_null("note")).take(2),
        QueryDescriptor::filtered(
            Filter::in_list("status", ["open", "shipped"]).and(Filter::not(Filter::eq("customer_id", 1_i64))),
        )
        .skip(1)
        .take(3),
        QueryDescriptor::filtered(Filter::like("note", "GIFT%").or(Filter::lt("id", 3_i64))),
        QueryDescriptor::filtered(Filter::not(Filter::like("note", "%#8"))),
        QueryDescriptor::new().skip(50),
    ];

    for descriptor in descriptors {
        let from_store = ids(&repo.get_all(&descriptor).unwrap());
        assert_eq!(
            from_store,
            reference(&orders, &descriptor),
            "descriptor: {descriptor:?}"
        );
    }
}

#[test]
fn get_entity_honors_skip_before_taking_first() {
    let (store, _) = seeded_store();
    let uow = open(&store);
    let repo = uow.repository::<Order>().unwrap();

    let descriptor = QueryDescriptor::filtered(Filter::eq("status", "shipped")).skip(1);
    let found = repo.get_entity(&descriptor).unwrap().unwrap();
    assert_eq!(found.id, 4);
}

#[test]
fn explicit_ordering_runs_before_pagination() {
    let (store, _) = seeded_store();
    let uow = open(&store);
    let repo = uow.repository::<Order>().unwrap();

    let page = repo
        .get_all(
            &QueryDescriptor::new()
                .order_by("total_cents", SortDirection::Desc)
                .skip(1)
                .take(2),
        )
        .unwrap();
    assert_eq!(ids(&page), vec![11, 10]);
}

#[test]
fn include_loads_relation_and_allows_filtering_on_it() {
    let (store, _) = seeded_store();
    let uow = open(&store);
    let repo = uow.repository::<Order>().unwrap();

    let without = repo
        .get_entity(&QueryDescriptor::filtered(Filter::eq("id", 1_i64)))
        .unwrap()
        .unwrap();
    assert_eq!(without.customer_name, None);

    let with = repo
        .get_all(
            &QueryDescriptor::new()
                .include("customer")
                .filter(Filter::eq("customer.tier", "gold"))
                .take(2),
        )
        .unwrap();
    assert_eq!(ids(&with), vec![2, 4]);
    assert!(with
        .iter()
        .all(|item| item.customer_name.as_deref() == Some("Ada")));
}

#[test]
fn filtering_on_relation_without_include_is_a_repository_error() {
    let (store, _) = seeded_store();
    let uow = open(&store);
    let repo = uow.repository::<Order>().unwrap();

    let err = repo
        .get_all(&QueryDescriptor::filtered(Filter::eq("customer.tier", "gold")))
        .unwrap_err();
    assert!(matches!(
        err,
        UowError::Repository {
            entity: "orders",
            operation: "get_all",
            source: StoreError::MalformedPredicate(_),
        }
    ));
}

#[test]
fn unknown_include_and_unknown_column_are_wrapped_store_errors() {
    let (store, _) = seeded_store();
    let uow = open(&store);
    let repo = uow.repository::<Order>().unwrap();

    let err = repo
        .get_entity(&QueryDescriptor::new().include("warehouse"))
        .unwrap_err();
    assert!(matches!(
        err,
        UowError::Repository {
            source: StoreError::UnknownRelation { .. },
            ..
        }
    ));

    let err = repo
        .get_all(&QueryDescriptor::filtered(Filter::eq("no_such_column", 1_i64)))
        .unwrap_err();
    match err {
        UowError::Repository {
            entity,
            operation,
            source: StoreError::Sqlite(_),
        } => {
            assert_eq!(entity, "orders");
            assert_eq!(operation, "get_all");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn exists_without_predicate_is_false_even_with_rows() {
    let (store, _) = seeded_store();
    let uow = open(&store);
    let repo = uow.repository::<Order>().unwrap();

    assert!(!repo.exists(None).unwrap());
    assert!(repo.exists(Some(&Filter::eq("status", "open"))).unwrap());
    assert!(!repo.exists(Some(&Filter::eq("status", "lost"))).unwrap());
}

#[test]
fn count_shares_the_predicate_semantics() {
    let (store, orders) = seeded_store();
    let uow = open(&store);
    let repo = uow.repository::<Order>().unwrap();

    assert_eq!(repo.count(None).unwrap(), orders.len() as u64);
    let shipped = Filter::eq("status", "shipped");
    assert_eq!(
        repo.count(Some(&shipped)).unwrap(),
        repo.get_all(&QueryDescriptor::filtered(shipped)).unwrap().len() as u64
    );
}

#[test]
fn get_query_drops_paging_and_defers_execution() {
    let (store, _) = seeded_store();
    let uow = open(&store);
    let repo = uow.repository::<Order>().unwrap();

    let query = repo
        .get_query(
            &QueryDescriptor::filtered(Filter::eq("customer_id", 2_i64))
                .include("customer")
                .skip(100)
                .take(1),
        )
        .unwrap();
    assert_eq!(query.descriptor().skip, 0);
    assert_eq!(query.descriptor().take, 0);

    // Rows staged and saved after the handle was built are visible to it.
    repo.stage_create(&order(13, 2, 99, "open")).unwrap();
    uow.save().unwrap();

    let all = query.to_vec().unwrap();
    assert_eq!(ids(&all), vec![1, 3, 5, 7, 9, 11, 13]);
    assert!(all
        .iter()
        .all(|item| item.customer_name.as_deref() == Some("Grace")));

    let narrowed = query
        .clone()
        .filter(Filter::eq("status", "open"))
        .skip(1)
        .take(1);
    assert_eq!(narrowed.count().unwrap(), 1);
    assert_eq!(narrowed.first().unwrap().map(|item| item.id), Some(9));
    assert!(narrowed.any().unwrap());
    assert!(!query.clone().filter(Filter::eq("id", 2_i64)).any().unwrap());
}

#[test]
fn tracked_reads_attach_and_untracked_reads_stay_detached() {
    let (store, _) = seeded_store();
    let uow = open(&store);
    let repo = uow.repository::<Order>().unwrap();

    let untracked = repo
        .get_all(&QueryDescriptor::filtered(Filter::eq("id", 1_i64)).untracked())
        .unwrap();
    assert_eq!(uow.entity_state(&untracked[0]), None);

    let tracked = repo
        .get_entity(&QueryDescriptor::filtered(Filter::eq("id", 2_i64)))
        .unwrap()
        .unwrap();
    assert_eq!(uow.entity_state(&tracked), Some(EntityState::Unchanged));
    assert!(!uow.has_changes());
}

#[test]
fn tracked_read_does_not_clobber_a_staged_update() {
    let (store, _) = seeded_store();
    let uow = open(&store);
    let repo = uow.repository::<Order>().unwrap();

    let mut item = repo
        .get_entity(&QueryDescriptor::filtered(Filter::eq("id", 3_i64)))
        .unwrap()
        .unwrap();
    item.status = "shipped".to_string();
    repo.stage_update(&item).unwrap();

    let reread = repo
        .get_entity(&QueryDescriptor::filtered(Filter::eq("id", 3_i64)))
        .unwrap()
        .unwrap();
    assert_eq!(reread.status, "open");
    assert_eq!(uow.entity_state(&item), Some(EntityState::Modified));

    assert_eq!(uow.save().unwrap(), 1);
    let saved = repo
        .get_entity(&QueryDescriptor::filtered(Filter::eq("id", 3_i64)).untracked())
        .unwrap()
        .unwrap();
    assert_eq!(saved.status, "shipped");
}

#[test]
fn descriptors_round_trip_through_json() {
    let descriptor = QueryDescriptor::new()
        .include("customer")
        .filter(Filter::eq("customer.tier", "gold").and(Filter::is_null("note")))
        .order_by("total_cents", SortDirection::Desc)
        .skip(10)
        .take(5)
        .untracked();

    let json = serde_json::to_string(&descriptor).unwrap();
    let parsed: QueryDescriptor = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, descriptor);

    let minimal: QueryDescriptor = serde_json::from_str(r#"{"take": 3}"#).unwrap();
    assert_eq!(minimal, QueryDescriptor::new().take(3));
}
