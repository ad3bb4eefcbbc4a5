use std::error::Error;

use serde::Serialize;

use super::PlanCmd;
use crate::commands::{Env, Execute};
use crate::queries::plan::QueryPlan;
use crate::serializer::RequestContext;
use crate::viewset::ViewSet;

/// Result of the plan command execution
#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub resource: String,
    pub prefetch_count: usize,
    pub plan: QueryPlan,
}

impl Execute for PlanCmd {
    type Output = PlanResult;

    fn execute(self, env: &Env) -> Result<Self::Output, Box<dyn Error>> {
        let ctx = RequestContext::new(&env.catalog, &env.settings);
        let plan = ViewSet::for_resource(&env.catalog, &self.resource)?.plan(&ctx, &self.params)?;

        Ok(PlanResult {
            resource: self.resource,
            prefetch_count: plan.prefetch_count(),
            plan,
        })
    }
}
