use std::error::Error;

use serde::Serialize;

use super::QueryCmd;
use crate::commands::{Env, Execute};
use crate::db::DatabaseBackend;
use crate::queries::executor::{Executor, QueryExecutor};
use crate::serializer::RequestContext;
use crate::sideload::Envelope;
use crate::viewset::ViewSet;

/// Result of the query command execution
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub resource: String,
    pub executor: String,
    pub round_trips: usize,
    /// `None` when a to-one relation is empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Envelope>,
}

impl Execute for QueryCmd {
    type Output = QueryResult;

    fn execute(self, env: &Env) -> Result<Self::Output, Box<dyn Error>> {
        let ctx = RequestContext::new(&env.catalog, &env.settings);
        let executor = Executor::for_settings(self.fast || env.settings.use_fast_executor);
        let view = ViewSet::for_resource(&env.catalog, &self.resource)?.executor(executor);

        env.db.reset_query_count();
        let response = match (&self.id, &self.related) {
            (Some(id), Some(field)) => view.try_list_related(&ctx, &env.db, &self.params, id, field)?,
            (Some(id), None) => Some(view.try_retrieve(&ctx, &env.db, &self.params, id)?),
            (None, _) => Some(view.try_list(&ctx, &env.db, &self.params)?),
        };

        Ok(QueryResult {
            resource: self.resource,
            executor: executor.name().to_string(),
            round_trips: env.db.query_count(),
            response,
        })
    }
}
