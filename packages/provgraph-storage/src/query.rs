//! Lineage query compiler
//!
//! Translates a `LineageQuery` into a boolean membership predicate of the
//! shape `column IN (seed-set)`, where the seed set is computed by a
//! recursive CTE over the persisted edge records. The predicate is a
//! `SqlFragment` with positional parameters so it can be embedded as a
//! sub-predicate inside any larger filter.

use crate::domain::ProvenanceStore;
use crate::lineage::{LineageDirection, LineageQuery};
use crate::{Result, StorageError};

/// Hard recursion guard for unbounded traversals. The in-memory graph uses
/// a visited set; the CTE needs an explicit depth ceiling because a
/// malformed cycle re-enters at ever-increasing depth.
pub const MAX_TRAVERSAL_DEPTH: u32 = 100;

/// A bound SQL parameter inside a fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
}

/// A composable SQL predicate fragment with positional parameters.
///
/// Placeholders are plain `?`; a caller embedding the fragment appends its
/// parameters in order alongside its own.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl SqlFragment {
    pub fn new(sql: impl Into<String>, params: Vec<SqlParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// The defensive default: a predicate that matches zero rows.
    pub fn unsatisfiable() -> Self {
        Self::new("1 = 0", Vec::new())
    }

    pub fn is_unsatisfiable(&self) -> bool {
        self.sql == "1 = 0"
    }

    /// Parameters as rusqlite values, for executing the enclosing query.
    #[cfg(feature = "sqlite")]
    pub fn rusqlite_params(&self) -> Vec<rusqlite::types::Value> {
        self.params
            .iter()
            .map(|p| match p {
                SqlParam::Text(s) => rusqlite::types::Value::Text(s.clone()),
                SqlParam::Int(i) => rusqlite::types::Value::Integer(*i),
            })
            .collect()
    }
}

fn valid_column_name(column: &str) -> bool {
    let mut chars = column.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Compile a lineage traversal request into a membership predicate on
/// `column`.
///
/// The seed value is resolved against the store (LSID first, then name);
/// an unresolvable seed compiles to an unsatisfiable predicate rather than
/// failing the query or matching all rows. A contradictory direction/depth
/// combination is a caller error and fails fast.
pub fn compile_lineage_filter(
    store: &dyn ProvenanceStore,
    column: &str,
    query: &LineageQuery,
) -> Result<SqlFragment> {
    if !valid_column_name(column) {
        return Err(StorageError::invalid_query(format!(
            "invalid filter column: {:?}",
            column
        )));
    }

    let options = query.options()?;

    let seed = match store.resolve_node(&query.seed_value)? {
        Some(node) => node,
        None => {
            tracing::debug!(
                seed = %query.seed_value,
                "lineage seed did not resolve, compiling unsatisfiable predicate"
            );
            return Ok(SqlFragment::unsatisfiable());
        }
    };

    // An explicit depth is preserved as given; a bounded CTE terminates on
    // cycles through its own depth predicate. The recursion ceiling only
    // backstops unbounded traversals.
    let depth_bound = options.max_depth.unwrap_or(MAX_TRAVERSAL_DEPTH);

    // UNION (not UNION ALL) deduplicates (lsid, depth) rows; the depth
    // bound terminates re-entry through malformed cycles.
    let (step_select, join_on) = match options.direction {
        LineageDirection::Descendants => ("e.to_lsid", "e.from_lsid = l.lsid"),
        LineageDirection::Ancestors => ("e.from_lsid", "e.to_lsid = l.lsid"),
    };

    let sql = format!(
        "{column} IN (\
         WITH RECURSIVE lineage(lsid, depth) AS (\
         SELECT ?, 0 \
         UNION \
         SELECT {step_select}, l.depth + 1 \
         FROM prov_edge e JOIN lineage l ON {join_on} \
         WHERE l.depth < ?\
         ) \
         SELECT lsid FROM lineage WHERE depth > 0\
         )"
    );

    Ok(SqlFragment::new(
        sql,
        vec![
            SqlParam::Text(seed.lsid),
            SqlParam::Int(i64::from(depth_bound)),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lineage::LineageDirection;

    #[test]
    fn test_valid_column_names() {
        assert!(valid_column_name("lsid"));
        assert!(valid_column_name("d.object_lsid"));
        assert!(valid_column_name("_hidden"));

        assert!(!valid_column_name(""));
        assert!(!valid_column_name("1col"));
        assert!(!valid_column_name("lsid; DROP TABLE prov_node"));
        assert!(!valid_column_name("lsid)"));
    }

    #[test]
    fn test_unsatisfiable_fragment() {
        let fragment = SqlFragment::unsatisfiable();
        assert_eq!(fragment.sql, "1 = 0");
        assert!(fragment.params.is_empty());
        assert!(fragment.is_unsatisfiable());
    }

    #[cfg(feature = "sqlite")]
    mod sqlite {
        use super::*;
        use crate::domain::{
            new_lsid, NodeKind, ProvEdge, ProvNode, ProvenanceStore, ROLE_INPUT, ROLE_OUTPUT,
        };
        use crate::infrastructure::SqliteProvenanceStore;
        use crate::lineage::LineageQuery;

        /// run A -> O -> run B
        fn seeded_store() -> (SqliteProvenanceStore, String, String, String) {
            let store = SqliteProvenanceStore::new_in_memory().unwrap();

            let run_a = new_lsid("Run");
            let data_o = new_lsid("Data");
            let run_b = new_lsid("Run");

            store
                .insert_node(&ProvNode::new(&run_a, NodeKind::Run, "run A"))
                .unwrap();
            store
                .insert_node(&ProvNode::new(&data_o, NodeKind::Data, "output O"))
                .unwrap();
            store
                .insert_node(&ProvNode::new(&run_b, NodeKind::Run, "run B"))
                .unwrap();

            store
                .insert_edge(&ProvEdge::new(&run_a, &data_o, ROLE_OUTPUT))
                .unwrap();
            store
                .insert_edge(&ProvEdge::new(&data_o, &run_b, ROLE_INPUT))
                .unwrap();

            (store, run_a, data_o, run_b)
        }

        fn matching_lsids(store: &SqliteProvenanceStore, fragment: &SqlFragment) -> Vec<String> {
            store
                .select_node_lsids_where(fragment)
                .expect("fragment should execute")
        }

        #[test]
        fn test_descendants_predicate_depth_one() {
            let (store, run_a, data_o, _) = seeded_store();

            let query = LineageQuery::new(&run_a, LineageDirection::Descendants, 1);
            let fragment = compile_lineage_filter(&store, "lsid", &query).unwrap();

            let rows = matching_lsids(&store, &fragment);
            assert_eq!(rows, vec![data_o]);
        }

        #[test]
        fn test_descendants_predicate_depth_two() {
            let (store, run_a, data_o, run_b) = seeded_store();

            let query = LineageQuery::new(&run_a, LineageDirection::Descendants, 2);
            let fragment = compile_lineage_filter(&store, "lsid", &query).unwrap();

            let mut rows = matching_lsids(&store, &fragment);
            rows.sort();
            let mut expected = vec![data_o, run_b];
            expected.sort();
            assert_eq!(rows, expected);
        }

        #[test]
        fn test_ancestors_predicate() {
            let (store, run_a, data_o, run_b) = seeded_store();

            let query = LineageQuery::new(&run_b, LineageDirection::Ancestors, -2);
            let fragment = compile_lineage_filter(&store, "lsid", &query).unwrap();

            let mut rows = matching_lsids(&store, &fragment);
            rows.sort();
            let mut expected = vec![run_a, data_o];
            expected.sort();
            assert_eq!(rows, expected);
        }

        #[test]
        fn test_seed_excluded_from_predicate() {
            let (store, run_a, _, _) = seeded_store();

            let query = LineageQuery::new(&run_a, LineageDirection::Descendants, 0);
            let fragment = compile_lineage_filter(&store, "lsid", &query).unwrap();

            let rows = matching_lsids(&store, &fragment);
            assert!(!rows.contains(&run_a));
        }

        #[test]
        fn test_seed_resolved_by_name() {
            let (store, _, _, run_b) = seeded_store();

            let query = LineageQuery::new("output O", LineageDirection::Descendants, 1);
            let fragment = compile_lineage_filter(&store, "lsid", &query).unwrap();

            assert!(!fragment.is_unsatisfiable());
            let rows = matching_lsids(&store, &fragment);
            assert_eq!(rows, vec![run_b]);
        }

        #[test]
        fn test_unknown_seed_matches_zero_rows() {
            let (store, _, _, _) = seeded_store();

            let query = LineageQuery::new("no-such-seed", LineageDirection::Descendants, 0);
            let fragment = compile_lineage_filter(&store, "lsid", &query).unwrap();

            assert!(fragment.is_unsatisfiable());
            assert!(matching_lsids(&store, &fragment).is_empty());
        }

        #[test]
        fn test_soft_deleted_seed_does_not_resolve() {
            let (store, run_a, _, _) = seeded_store();
            store.soft_delete_node(&run_a).unwrap();

            let query = LineageQuery::new(&run_a, LineageDirection::Descendants, 0);
            let fragment = compile_lineage_filter(&store, "lsid", &query).unwrap();
            assert!(fragment.is_unsatisfiable());
        }

        #[test]
        fn test_malformed_depth_fails_fast() {
            let (store, run_a, _, _) = seeded_store();

            let query = LineageQuery::new(&run_a, LineageDirection::Ancestors, 3);
            let err = compile_lineage_filter(&store, "lsid", &query).unwrap_err();
            assert_eq!(err.kind, crate::ErrorKind::InvalidQuery);
        }

        #[test]
        fn test_explicit_depth_beyond_recursion_ceiling() {
            let store = SqliteProvenanceStore::new_in_memory().unwrap();

            // A chain longer than the unbounded-traversal ceiling; an
            // explicit bound must reach the whole chain.
            let ids: Vec<String> = (0..=120).map(|i| format!("n{:03}", i)).collect();
            for id in &ids {
                store
                    .insert_node(&ProvNode::new(id, NodeKind::Data, id))
                    .unwrap();
            }
            for pair in ids.windows(2) {
                store
                    .insert_edge(&ProvEdge::new(&pair[0], &pair[1], ROLE_OUTPUT))
                    .unwrap();
            }

            let query = LineageQuery::new(&ids[0], LineageDirection::Descendants, 120);
            let fragment = compile_lineage_filter(&store, "lsid", &query).unwrap();

            let rows = matching_lsids(&store, &fragment);
            assert_eq!(rows.len(), 120);
            assert!(rows.contains(&ids[120]));
        }

        #[test]
        fn test_cyclic_edges_terminate() {
            let store = SqliteProvenanceStore::new_in_memory().unwrap();
            store
                .insert_node(&ProvNode::new("a", NodeKind::Data, "a"))
                .unwrap();
            store
                .insert_node(&ProvNode::new("b", NodeKind::Data, "b"))
                .unwrap();
            store
                .insert_edge(&ProvEdge::new("a", "b", ROLE_OUTPUT))
                .unwrap();
            store
                .insert_edge(&ProvEdge::new("b", "a", ROLE_OUTPUT))
                .unwrap();

            let query = LineageQuery::new("a", LineageDirection::Descendants, 0);
            let fragment = compile_lineage_filter(&store, "lsid", &query).unwrap();

            let mut rows = matching_lsids(&store, &fragment);
            rows.sort();
            // Cycle edge makes the seed reachable from itself; the guard
            // only has to keep the query terminating.
            assert_eq!(rows, vec!["a".to_string(), "b".to_string()]);
        }

        #[test]
        fn test_fragment_composes_into_larger_filter() {
            let (store, run_a, data_o, _) = seeded_store();

            let query = LineageQuery::new(&run_a, LineageDirection::Descendants, 2);
            let fragment = compile_lineage_filter(&store, "lsid", &query).unwrap();

            // Embed as a sub-predicate next to an independent condition.
            let sql = format!(
                "SELECT lsid FROM prov_node WHERE kind = ? AND {} ORDER BY lsid",
                fragment.sql
            );
            let mut params = vec![rusqlite::types::Value::Text("data".to_string())];
            params.extend(fragment.rusqlite_params());

            let rows = store.select_lsids(&sql, &params).unwrap();
            assert_eq!(rows, vec![data_o]);
        }
    }
}
