use super::{ScenarioContext, ScenarioError, GOVERNANCE_TIMELOCK_SECS};
use crate::contracts::token;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployedContracts {
    pub overseer: String,
    pub token: String,
}

/// Deploys the overseer as its own admin, then a token governed by it.
///
/// The overseer starts out administered by the signer so that it can be handed over to
/// itself, and registers itself so its own migrations go through the timelock too.
pub fn instantiate_all_contracts(
    ctx: &mut ScenarioContext,
    token_msg: &token::InstantiateMsg,
) -> Result<DeployedContracts, ScenarioError> {
    let owner = ctx.address();
    let overseer = ctx.deploy_overseer(GOVERNANCE_TIMELOCK_SECS, Some(&owner))?;
    ctx.update_admin(&overseer, &overseer)?;
    ctx.register(&overseer, &overseer)?;

    let token_code_id = ctx.upload_token(false)?;
    let token = ctx.instantiate(token_code_id, token_msg, Some(&overseer))?;
    ctx.register(&overseer, &token)?;

    info!("overseer {} governs token {}", overseer, token);
    Ok(DeployedContracts { overseer, token })
}
