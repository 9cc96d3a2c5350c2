#![forbid(unsafe_code)]

use crate::error::QueryError;

/// Closed catalog of the experiment-log tables.
///
/// Every table name or field name that ends up inside an SQL statement is
/// validated through this enum first; unknown names never reach the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    HolbaRuns,
    HolbaRunsMeta,
    ExpRuns,
    ExpRunsMeta,
    ExpProgs,
    ExpProgsMeta,
    ExpExps,
    ExpExpsMeta,
    ExpProgsLists,
    ExpProgsListsEntries,
    ExpExpsLists,
    ExpExpsListsEntries,
    DbMeta,
}

impl Table {
    pub const ALL: [Table; 13] = [
        Table::HolbaRuns,
        Table::HolbaRunsMeta,
        Table::ExpRuns,
        Table::ExpRunsMeta,
        Table::ExpProgs,
        Table::ExpProgsMeta,
        Table::ExpExps,
        Table::ExpExpsMeta,
        Table::ExpProgsLists,
        Table::ExpProgsListsEntries,
        Table::ExpExpsLists,
        Table::ExpExpsListsEntries,
        Table::DbMeta,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::HolbaRuns => "holba_runs",
            Table::HolbaRunsMeta => "holba_runs_meta",
            Table::ExpRuns => "exp_runs",
            Table::ExpRunsMeta => "exp_runs_meta",
            Table::ExpProgs => "exp_progs",
            Table::ExpProgsMeta => "exp_progs_meta",
            Table::ExpExps => "exp_exps",
            Table::ExpExpsMeta => "exp_exps_meta",
            Table::ExpProgsLists => "exp_progs_lists",
            Table::ExpProgsListsEntries => "exp_progs_lists_entries",
            Table::ExpExpsLists => "exp_exps_lists",
            Table::ExpExpsListsEntries => "exp_exps_lists_entries",
            Table::DbMeta => "db_meta",
        }
    }

    pub fn from_name(name: &str) -> Result<Table, QueryError> {
        Table::ALL
            .into_iter()
            .find(|table| table.name() == name)
            .ok_or_else(|| QueryError::UnknownTable(name.to_string()))
    }

    /// Ordered field list, exactly as the columns appear in the schema.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Table::HolbaRuns => &["id", "name", "prog_list_id", "exp_list_id"],
            Table::HolbaRunsMeta => &["run_id", "kind", "name", "value"],
            Table::ExpRuns => &["id", "name"],
            Table::ExpRunsMeta => &["run_id", "kind", "name", "value"],
            Table::ExpProgs => &["id", "arch", "code"],
            Table::ExpProgsMeta => &["prog_id", "kind", "name", "value"],
            Table::ExpExps => &["id", "prog_id", "type", "params", "input_data"],
            Table::ExpExpsMeta => &["exp_id", "kind", "name", "value"],
            Table::ExpProgsLists => &["id", "name", "description"],
            Table::ExpProgsListsEntries => &["list_id", "prog_id", "list_index"],
            Table::ExpExpsLists => &["id", "name", "description"],
            Table::ExpExpsListsEntries => &["list_id", "exp_id", "list_index"],
            Table::DbMeta => &["id", "kind", "name", "value"],
        }
    }

    /// Entity tables carry a store-assigned surrogate `id`.
    pub fn has_id(self) -> bool {
        matches!(
            self,
            Table::HolbaRuns
                | Table::ExpRuns
                | Table::ExpProgs
                | Table::ExpExps
                | Table::ExpProgsLists
                | Table::ExpExpsLists
                | Table::DbMeta
        )
    }

    /// Metadata-shaped tables own a `(kind, name, value)` attribute group
    /// and are the only valid targets for the append operation.
    pub fn is_meta_shaped(self) -> bool {
        let fields = self.fields();
        fields.contains(&"kind") && fields.contains(&"name") && fields.contains(&"value")
    }

    pub fn field_index(self, field: &str) -> Result<usize, QueryError> {
        self.fields()
            .iter()
            .position(|candidate| *candidate == field)
            .ok_or_else(|| QueryError::UnknownField {
                table: self.name(),
                field: field.to_string(),
            })
    }
}

/// Declared foreign-key graph: `(child table, child field, parent table, parent field)`.
const LINKS: &[(Table, &'static str, Table, &'static str)] = &[
    (Table::HolbaRuns, "prog_list_id", Table::ExpProgsLists, "id"),
    (Table::HolbaRuns, "exp_list_id", Table::ExpExpsLists, "id"),
    (Table::HolbaRunsMeta, "run_id", Table::HolbaRuns, "id"),
    (Table::ExpRunsMeta, "run_id", Table::ExpRuns, "id"),
    (Table::ExpProgsMeta, "prog_id", Table::ExpProgs, "id"),
    (Table::ExpExpsMeta, "exp_id", Table::ExpExps, "id"),
    (Table::ExpExps, "prog_id", Table::ExpProgs, "id"),
    (Table::ExpProgsListsEntries, "list_id", Table::ExpProgsLists, "id"),
    (Table::ExpProgsListsEntries, "prog_id", Table::ExpProgs, "id"),
    (Table::ExpExpsListsEntries, "list_id", Table::ExpExpsLists, "id"),
    (Table::ExpExpsListsEntries, "exp_id", Table::ExpExps, "id"),
];

/// Resolve the declared link between two tables, in either argument order.
///
/// The returned pair is `(field on a, field on b)`.
pub fn link_between(a: Table, b: Table) -> Result<(&'static str, &'static str), QueryError> {
    for (child, child_field, parent, parent_field) in LINKS {
        if *child == a && *parent == b {
            return Ok((child_field, parent_field));
        }
        if *child == b && *parent == a {
            return Ok((parent_field, child_field));
        }
    }
    Err(QueryError::NoLink {
        from: a.name(),
        to: b.name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_table_round_trips_through_its_name() {
        for table in Table::ALL {
            let resolved = Table::from_name(table.name()).expect("known name must resolve");
            assert_eq!(resolved, table);
        }
    }

    #[test]
    fn unknown_table_name_is_rejected() {
        let err = Table::from_name("exp_progs_typo").expect_err("unknown table must fail");
        assert!(matches!(err, QueryError::UnknownTable(name) if name == "exp_progs_typo"));
    }

    #[test]
    fn entity_tables_lead_with_id() {
        for table in Table::ALL {
            assert_eq!(table.has_id(), table.fields()[0] == "id");
        }
    }

    #[test]
    fn meta_shape_covers_meta_tables_and_db_meta() {
        assert!(Table::HolbaRunsMeta.is_meta_shaped());
        assert!(Table::DbMeta.is_meta_shaped());
        assert!(!Table::ExpProgs.is_meta_shaped());
        assert!(!Table::ExpProgsListsEntries.is_meta_shaped());
    }

    #[test]
    fn link_resolution_works_in_both_directions() {
        let (on_entry, on_list) =
            link_between(Table::ExpProgsListsEntries, Table::ExpProgsLists)
                .expect("entries link to their list");
        assert_eq!((on_entry, on_list), ("list_id", "id"));

        let (on_list, on_entry) =
            link_between(Table::ExpProgsLists, Table::ExpProgsListsEntries)
                .expect("reverse order resolves the same link");
        assert_eq!((on_list, on_entry), ("id", "list_id"));
    }

    #[test]
    fn undeclared_link_is_rejected() {
        let err = link_between(Table::ExpProgs, Table::ExpExpsLists)
            .expect_err("no declared link between progs and exps lists");
        assert!(matches!(err, QueryError::NoLink { .. }));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = Table::ExpProgs
            .field_index("codez")
            .expect_err("unknown field must fail");
        assert!(matches!(
            err,
            QueryError::UnknownField { table: "exp_progs", field } if field == "codez"
        ));
    }
}
