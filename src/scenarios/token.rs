use terra_rpc_client::Coin;

use super::{ensure, ScenarioContext, ScenarioError, STABLE_DENOM};
use crate::contracts::token::ExecuteMsg;

pub const DEPOSIT_AMOUNT: u128 = 10_000_000;
pub const TRANSFER_AMOUNT: u128 = 5_000_000;

/// Deploys a token administered by the signer and deposits into it.
fn deploy_funded_token(ctx: &mut ScenarioContext) -> Result<String, ScenarioError> {
    let code_id = ctx.upload_token(false)?;
    let owner = ctx.address();
    let init_msg = ctx.test_token_msg();
    let token = ctx.instantiate(code_id, &init_msg, Some(&owner))?;

    ctx.execute(
        &token,
        &ExecuteMsg::DepositStable {
            recipient: Some(owner),
        },
        vec![Coin::new(STABLE_DENOM, DEPOSIT_AMOUNT)],
    )?;
    ctx.settle();
    Ok(token)
}

pub fn basic_deposit_redeem(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    let owner = ctx.address();
    let token = deploy_funded_token(ctx)?;

    let balance = ctx.token_balance(&token, &owner)?;
    ensure(
        balance > 0,
        format!("deposit of {} {} minted nothing", DEPOSIT_AMOUNT, STABLE_DENOM),
    )?;

    let stable_before = ctx.bank_balance(&owner)?;
    info!("{} balance before redeem: {}", STABLE_DENOM, stable_before);

    ctx.execute(
        &token,
        &ExecuteMsg::RedeemStable {
            recipient: Some(owner.clone()),
            burn_amount: balance.to_string(),
        },
        vec![],
    )?;
    ctx.settle();

    let stable_after = ctx.bank_balance(&owner)?;
    info!("{} balance after redeem: {}", STABLE_DENOM, stable_after);
    ensure(
        stable_after > stable_before,
        format!(
            "{} balance did not increase after redeem ({} -> {})",
            STABLE_DENOM, stable_before, stable_after
        ),
    )?;

    let remaining = ctx.token_balance(&token, &owner)?;
    ensure(
        remaining == 0,
        format!("{} tokens left after redeeming everything", remaining),
    )
}

pub fn basic_transfer(ctx: &mut ScenarioContext) -> Result<(), ScenarioError> {
    let owner = ctx.address();
    let recipient = ctx.counterparty.clone();
    let token = deploy_funded_token(ctx)?;

    let sender_before = ctx.token_balance(&token, &owner)?;
    let recipient_before = ctx.token_balance(&token, &recipient)?;

    ctx.execute(
        &token,
        &ExecuteMsg::Transfer {
            recipient: recipient.clone(),
            amount: TRANSFER_AMOUNT.to_string(),
        },
        vec![],
    )?;
    ctx.settle();

    let sender_after = ctx.token_balance(&token, &owner)?;
    let recipient_after = ctx.token_balance(&token, &recipient)?;
    ensure(
        sender_after < sender_before,
        format!(
            "sender balance did not decrease ({} -> {})",
            sender_before, sender_after
        ),
    )?;
    ensure(
        recipient_after > recipient_before,
        format!(
            "recipient balance did not increase ({} -> {})",
            recipient_before, recipient_after
        ),
    )
}
