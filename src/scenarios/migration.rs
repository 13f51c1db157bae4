use std::thread;

use super::{expect_rejection, ScenarioContext, ScenarioError, GOVERNANCE_TIMELOCK_SECS};
use crate::contracts::overseer::{ExecuteMsg, MigrateMsg};
use crate::contracts::{Binary, Duration};

/// Initiates a migration through the overseer, checks that executing it is refused
/// while the timelock runs, then executes it once the timelock has expired.
fn timelocked_migration(
    ctx: &mut ScenarioContext,
    overseer: &str,
    contract: &str,
    new_code_id: u64,
    migrate_msg: Binary,
) -> Result<(), ScenarioError> {
    ctx.execute(
        overseer,
        &ExecuteMsg::InitiateMigrate {
            contract_addr: contract.to_string(),
            new_code_id,
            msg: migrate_msg,
        },
        vec![],
    )?;

    let migrate = ExecuteMsg::Migrate {
        contract_addr: contract.to_string(),
    };
    let rejection = expect_rejection(
        "migrate before timelock expiry",
        ctx.execute(overseer, &migrate, vec![]),
    )?;
    info!("migration refused while timelocked: {}", rejection.detail);

    let wait = ctx.settings.timelock + ctx.settings.timelock_grace;
    info!("waiting {:?} for the timelock to expire", wait);
    thread::sleep(wait);

    ctx.execute(overseer, &migrate, vec![])?;
    info!("{} migrated to code id {}", contract, new_code_id);
    Ok(())
}

fn encode(msg: &MigrateMsg) -> Result<Binary, ScenarioError> {
    Binary::from_json(msg).map_err(ScenarioError::Assertion)
}

pub fn migrate_token(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    let owner = ctx.address();
    let timelock = ctx.settings.timelock.as_secs();
    let overseer = ctx.deploy_overseer(timelock, Some(&owner))?;

    let token_code_id = ctx.upload_token(false)?;
    let init_msg = ctx.test_token_msg();
    let token = ctx.instantiate(token_code_id, &init_msg, Some(&overseer))?;
    ctx.register(&overseer, &token)?;

    // same bytecode, fresh code id
    let new_code_id = ctx.upload_token(true)?;
    timelocked_migration(ctx, &overseer, &token, new_code_id, encode(&MigrateMsg::default())?)
}

pub fn migrate_overseer(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    let owner = ctx.address();
    let timelock = ctx.settings.timelock.as_secs();
    let overseer = ctx.deploy_overseer(timelock, Some(&owner))?;
    ctx.update_admin(&overseer, &overseer)?;
    ctx.register(&overseer, &overseer)?;

    let new_code_id = ctx.upload_overseer(true)?;
    let migrate_msg = encode(&MigrateMsg {
        timelock_duration: Some(Duration::Time(GOVERNANCE_TIMELOCK_SECS)),
        ..Default::default()
    })?;
    timelocked_migration(ctx, &overseer, &overseer, new_code_id, migrate_msg)
}
