#![forbid(unsafe_code)]

use ldb_core::{BinOp, Const, Expr, Select, Table, Template, Value};
use ldb_storage::{Access, LogsStore, StoreConfig, StoreError};
use std::path::PathBuf;

fn temp_dir(test_name: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let nonce = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base.join(format!("ldb_storage_{test_name}_{pid}_{nonce}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// Three programs across two lists: L1 holds p1 and p2, L2 holds p3 and p1
/// again (a program may belong to several lists).
fn seeded_store(test_name: &str) -> (LogsStore, [i64; 3]) {
    let dir = temp_dir(test_name);
    let mut store = LogsStore::open(StoreConfig::new(&dir), Access::ReadWrite).expect("open store");

    let mut prog_ids = [0i64; 3];
    for (slot, (arch, code)) in [("arm8", "nop"), ("riscv", "ret"), ("arm8", "mov x0, #1")]
        .into_iter()
        .enumerate()
    {
        let prog = Template::empty(Table::ExpProgs)
            .with("arch", arch)
            .expect("set arch")
            .with("code", code)
            .expect("set code");
        prog_ids[slot] = store.insert(&prog).expect("insert prog").id().expect("id");
    }

    let mut list_ids = [0i64; 2];
    for (slot, name) in ["L1", "L2"].into_iter().enumerate() {
        let list = Template::empty(Table::ExpProgsLists)
            .with("name", name)
            .expect("set name");
        list_ids[slot] = store.insert(&list).expect("insert list").id().expect("id");
    }

    for (list, prog, index) in [
        (list_ids[0], prog_ids[0], 0),
        (list_ids[0], prog_ids[1], 1),
        (list_ids[1], prog_ids[2], 0),
        (list_ids[1], prog_ids[0], 1),
    ] {
        let entry = Template::empty(Table::ExpProgsListsEntries)
            .with("list_id", list)
            .expect("set list_id")
            .with("prog_id", prog)
            .expect("set prog_id")
            .with("list_index", index)
            .expect("set list_index");
        store.insert(&entry).expect("insert entry");
    }

    (store, prog_ids)
}

fn progs_in_list(list_name: &str) -> Select {
    let mut select = Select::from_root(Table::ExpProgs);
    select.joins = vec![
        (Table::ExpProgsListsEntries, 0),
        (Table::ExpProgsLists, 1),
    ];
    select.filter = Some(Expr::bin(
        BinOp::Eq,
        Expr::field(2, "name"),
        Expr::constant(list_name),
    ));
    select
}

#[test]
fn join_chain_filters_root_rows_by_list_membership() {
    let (store, prog_ids) = seeded_store("join_chain_filters_root_rows_by_list_membership");

    let records = store.select(&progs_in_list("L1")).expect("select L1 progs");
    let mut ids: Vec<i64> = records.iter().filter_map(|r| r.id()).collect();
    ids.sort_unstable();
    let mut expected = vec![prog_ids[0], prog_ids[1]];
    expected.sort_unstable();
    assert_eq!(ids, expected);

    for record in &records {
        assert_eq!(record.table(), Table::ExpProgs);
        assert!(record.get("code").expect("code field").is_some());
    }
}

#[test]
fn joined_duplicates_collapse_to_one_row() {
    let (store, prog_ids) = seeded_store("joined_duplicates_collapse_to_one_row");

    // p1 is in both lists; joining through entries alone must still report
    // it once.
    let mut select = Select::from_root(Table::ExpProgs);
    select.joins = vec![(Table::ExpProgsListsEntries, 0)];

    let ids = store.select_ids(&select).expect("select ids");
    assert_eq!(ids.len(), 3);
    assert_eq!(ids.iter().filter(|id| **id == prog_ids[0]).count(), 1);
    assert_eq!(store.select_count(&select).expect("select count"), 3);
}

#[test]
fn projections_agree_on_the_same_query() {
    let (store, _) = seeded_store("projections_agree_on_the_same_query");

    let select = progs_in_list("L2");
    let rows = store.select(&select).expect("rows");
    let ids = store.select_ids(&select).expect("ids");
    let count = store.select_count(&select).expect("count");

    assert_eq!(rows.len(), 2);
    assert_eq!(ids.len(), 2);
    assert_eq!(count, 2);
    for record in rows {
        assert!(ids.contains(&record.id().expect("row id")));
    }
}

#[test]
fn like_and_in_and_not_filters_work() {
    let (store, prog_ids) = seeded_store("like_and_in_and_not_filters_work");

    let mut like = Select::from_root(Table::ExpProgs);
    like.filter = Some(Expr::bin(
        BinOp::Like,
        Expr::field(0, "code"),
        Expr::constant("mov%"),
    ));
    assert_eq!(
        store.select_ids(&like).expect("like ids"),
        vec![prog_ids[2]]
    );

    let mut within = Select::from_root(Table::ExpProgs);
    within.filter = Some(Expr::bin(
        BinOp::In,
        Expr::field(0, "id"),
        Expr::Const(Const::List(vec![
            Const::Int(prog_ids[0]),
            Const::Int(prog_ids[1]),
            Const::Int(-1),
        ])),
    ));
    assert_eq!(store.select_count(&within).expect("in count"), 2);

    let mut negated = Select::from_root(Table::ExpProgs);
    negated.filter = Some(Expr::not(Expr::bin(
        BinOp::Eq,
        Expr::field(0, "arch"),
        Expr::constant("arm8"),
    )));
    assert_eq!(
        store.select_ids(&negated).expect("not ids"),
        vec![prog_ids[1]]
    );
}

#[test]
fn disjunction_of_disjoint_filters_is_their_union() {
    let (store, prog_ids) = seeded_store("disjunction_of_disjoint_filters_is_their_union");

    // No program satisfies both arms.
    let mut select = Select::from_root(Table::ExpProgs);
    select.filter = Some(Expr::bin(
        BinOp::Or,
        Expr::bin(BinOp::Eq, Expr::field(0, "arch"), Expr::constant("riscv")),
        Expr::bin(BinOp::Like, Expr::field(0, "code"), Expr::constant("mov%")),
    ));

    let mut ids = store.select_ids(&select).expect("union ids");
    ids.sort_unstable();
    let mut expected = vec![prog_ids[1], prog_ids[2]];
    expected.sort_unstable();
    assert_eq!(ids, expected);
    assert_eq!(store.select_count(&select).expect("union count"), 2);
}

#[test]
fn disjunction_with_overlapping_arms_reports_each_row_once() {
    let (store, prog_ids) = seeded_store("disjunction_with_overlapping_arms_reports_each_row_once");

    // p3 satisfies both arms; it must still come back once.
    let mut select = Select::from_root(Table::ExpProgs);
    select.filter = Some(Expr::bin(
        BinOp::Or,
        Expr::bin(BinOp::Eq, Expr::field(0, "arch"), Expr::constant("arm8")),
        Expr::bin(BinOp::Like, Expr::field(0, "code"), Expr::constant("mov%")),
    ));

    let ids = store.select_ids(&select).expect("union ids");
    assert_eq!(ids.len(), 2);
    assert_eq!(ids.iter().filter(|id| **id == prog_ids[2]).count(), 1);
}

#[test]
fn conjunction_intersects_two_independent_join_paths() {
    let (mut store, prog_ids) = seeded_store("conjunction_intersects_two_independent_join_paths");

    // "time" metadata on p2 and p3; list L1 holds p1 and p2.
    for prog_id in [prog_ids[1], prog_ids[2]] {
        let meta = Template::empty(Table::ExpProgsMeta)
            .with("prog_id", prog_id)
            .expect("set prog_id")
            .with("kind", "time")
            .expect("set kind")
            .with("name", "wall")
            .expect("set name")
            .with("value", "2.0s")
            .expect("set value");
        store.insert(&meta).expect("insert meta");
    }

    // Two join paths fan out from the root: t1/t2 reach the list, t3
    // reaches the metadata. The conjunction intersects them.
    let mut select = Select::from_root(Table::ExpProgs);
    select.joins = vec![
        (Table::ExpProgsListsEntries, 0),
        (Table::ExpProgsLists, 1),
        (Table::ExpProgsMeta, 0),
    ];
    select.filter = Some(Expr::bin(
        BinOp::And,
        Expr::bin(BinOp::Eq, Expr::field(2, "name"), Expr::constant("L1")),
        Expr::bin(BinOp::Eq, Expr::field(3, "kind"), Expr::constant("time")),
    ));

    assert_eq!(
        store.select_ids(&select).expect("intersection ids"),
        vec![prog_ids[1]]
    );
    assert_eq!(store.select_count(&select).expect("intersection count"), 1);
}

#[test]
fn conjunction_spans_join_positions() {
    let (store, prog_ids) = seeded_store("conjunction_spans_join_positions");

    // arm8 programs that are members of L2.
    let mut select = progs_in_list("L2");
    let membership = select.filter.take().expect("membership filter");
    select.filter = Some(Expr::bin(
        BinOp::And,
        membership,
        Expr::bin(BinOp::Eq, Expr::field(0, "arch"), Expr::constant("arm8")),
    ));

    let mut ids = store.select_ids(&select).expect("select ids");
    ids.sort_unstable();
    let mut expected = vec![prog_ids[0], prog_ids[2]];
    expected.sort_unstable();
    assert_eq!(ids, expected);
}

#[test]
fn order_by_controls_row_order() {
    let (store, prog_ids) = seeded_store("order_by_controls_row_order");

    let mut select = Select::from_root(Table::ExpProgs);
    select.order_by = vec![(0, "id".to_string(), false)];

    let ids = store.select_ids(&select).expect("select ids");
    let mut expected = prog_ids.to_vec();
    expected.sort_unstable();
    expected.reverse();
    assert_eq!(ids, expected);
}

#[test]
fn join_on_unlinked_tables_is_rejected() {
    let (store, _) = seeded_store("join_on_unlinked_tables_is_rejected");

    let mut select = Select::from_root(Table::ExpProgs);
    select.joins = vec![(Table::ExpExpsLists, 0)];

    let err = store.select(&select).expect_err("no link between tables");
    assert!(matches!(err, StoreError::Query(_)));
}

#[test]
fn forward_reference_in_join_chain_is_rejected() {
    let (store, _) = seeded_store("forward_reference_in_join_chain_is_rejected");

    let mut select = Select::from_root(Table::ExpProgs);
    select.joins = vec![(Table::ExpProgsListsEntries, 1)];

    let err = store.select(&select).expect_err("self reference must fail");
    assert!(matches!(err, StoreError::Query(_)));
}

#[test]
fn null_filter_matches_nothing_under_equality() {
    let (mut store, _) = seeded_store("null_filter_matches_nothing_under_equality");

    let nameless = Template::empty(Table::ExpProgsLists);
    store.insert(&nameless).expect("insert nameless list");

    // SQL equality against NULL is never true, even for NULL cells.
    let mut select = Select::from_root(Table::ExpProgsLists);
    select.filter = Some(Expr::bin(
        BinOp::Eq,
        Expr::field(0, "name"),
        Expr::Const(Const::Null),
    ));
    assert_eq!(store.select_count(&select).expect("count"), 0);
}

#[test]
fn meta_rows_reach_entities_through_joins() {
    let (mut store, prog_ids) = seeded_store("meta_rows_reach_entities_through_joins");

    let meta = Template::empty(Table::ExpProgsMeta)
        .with("prog_id", prog_ids[1])
        .expect("set prog_id")
        .with("kind", "time")
        .expect("set kind")
        .with("name", "wall")
        .expect("set name")
        .with("value", "1.5s")
        .expect("set value");
    store.insert(&meta).expect("insert meta");

    // Programs that carry a "time" metadata entry.
    let mut select = Select::from_root(Table::ExpProgs);
    select.joins = vec![(Table::ExpProgsMeta, 0)];
    select.filter = Some(Expr::bin(
        BinOp::Eq,
        Expr::field(1, "kind"),
        Expr::constant("time"),
    ));
    assert_eq!(
        store.select_ids(&select).expect("select ids"),
        vec![prog_ids[1]]
    );
}
