//! Execute tests for plan command.

#[cfg(test)]
mod tests {
    use crate::db::DatabaseBackend;
    use super::super::PlanCmd;
    use crate::test_utils::{env, execute_cmd};
    use rstest::rstest;

    fn cmd(resource: &str, params: &str) -> PlanCmd {
        PlanCmd {
            resource: resource.to_string(),
            params: params.to_string(),
        }
    }

    #[rstest]
    #[case("", 0)]
    #[case("include[]=groups.", 1)]
    #[case("include[]=groups.permissions.", 2)]
    #[case("include[]=location.&include[]=groups.", 2)]
    fn test_prefetch_count(#[case] params: &str, #[case] expected: usize) {
        let result = execute_cmd(cmd("users", params), &env()).expect("Plan should succeed");
        assert_eq!(result.prefetch_count, expected);
        assert_eq!(result.plan.query.model, "User");
    }

    #[rstest]
    fn test_plan_does_not_touch_storage() {
        let env = env();
        env.db.reset_query_count();
        execute_cmd(cmd("users", "include[]=groups.permissions."), &env).unwrap();
        assert_eq!(env.db.query_count(), 0);
    }

    #[rstest]
    fn test_plan_generic_targets() {
        let result = execute_cmd(cmd("users", "include[]=favorite_pet."), &env()).unwrap();
        let prefetch = result.plan.prefetch("favorite_pet").expect("Generic prefetch expected");
        assert!(prefetch.plan.is_none());
        assert!(prefetch.targets.contains_key("Cat"));
    }

    #[rstest]
    fn test_plan_sort() {
        let result = execute_cmd(cmd("users", "sort[]=-name"), &env()).unwrap();
        let ordering: Vec<String> = result.plan.query.ordering.iter().map(ToString::to_string).collect();
        assert_eq!(ordering, vec!["-name"]);
    }

    #[rstest]
    fn test_plan_unknown_field() {
        let result = execute_cmd(cmd("users", "include[]=nope"), &env());
        assert!(result.is_err());
    }
}
