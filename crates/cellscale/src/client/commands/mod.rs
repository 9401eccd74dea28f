pub mod autoscale;
pub mod hosts;

use crate::clients::CellClients;
use crate::clients::command::CommandClient;
use crate::common::config::CellConfig;

/// Collaborator clients driven by the commands configured in the `[backend]` table.
pub fn create_clients(config: &CellConfig) -> anyhow::Result<CellClients> {
    Ok(CellClients::from_single(CommandClient::new(
        config.backend.clone(),
    )?))
}
