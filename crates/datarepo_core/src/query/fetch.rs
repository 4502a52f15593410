//! Relation paths materialized in the same round trip as their owner.

use crate::model::{EntitySchema, RelationDef};
use crate::repo::{RepoError, RepoResult};

/// Entity graph: relationship paths loaded eagerly by one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchPlan {
    paths: Vec<String>,
}

impl FetchPlan {
    /// Lazy loading only.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn of(paths: &[&str]) -> Self {
        let mut plan = Self::default();
        for path in paths {
            if !plan.paths.iter().any(|known| known == path) {
                plan.paths.push((*path).to_string());
            }
        }
        plan
    }

    /// Maps every path to a relation of `schema`.
    ///
    /// # Errors
    /// - `UnknownProperty` for a path that is not a relation. Nested paths
    ///   (`a.b`) are not supported and fail the same way.
    pub fn resolve(&self, schema: &EntitySchema) -> RepoResult<Vec<&'static RelationDef>> {
        self.paths
            .iter()
            .map(|path| {
                schema.relation(path).ok_or_else(|| RepoError::UnknownProperty {
                    entity: schema.name,
                    property: path.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::FetchPlan;
    use crate::model::{MEMBER_SCHEMA, TEAM_SCHEMA};
    use crate::repo::RepoError;

    #[test]
    fn resolves_known_relations_once() {
        let plan = FetchPlan::of(&["team", "team"]);
        let relations = plan.resolve(&MEMBER_SCHEMA).unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].join_column, "team_id");
        assert!(FetchPlan::none().resolve(&TEAM_SCHEMA).unwrap().is_empty());
    }

    #[test]
    fn scalar_or_nested_paths_are_rejected() {
        for path in ["username", "team.name"] {
            let err = FetchPlan::of(&[path]).resolve(&MEMBER_SCHEMA).unwrap_err();
            assert!(matches!(err, RepoError::UnknownProperty { .. }));
        }
    }
}
