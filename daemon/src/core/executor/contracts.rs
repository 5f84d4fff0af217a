//! Native system contracts.
//!
//! These ship with the chain and back the genesis state: the currency
//! token, the contract submission entrypoint, and the variable-only
//! governance contracts (stamp rate, reward ratios, validator membership,
//! foundation account). Each carries an interface source (the thing that
//! lives at `<name>.__code__`) and a table of native handlers.

use super::compiler::compile_interface;
use super::registry::{fixed_kwarg, str_kwarg, ContractRegistry, NativeContract};
use super::{ContractError, ExecContext};
use kura_common::{
    config::{code_key, compiled_key, MAX_CONTRACT_NAME_LEN, USER_CONTRACT_PREFIX},
    fixed::Fixed,
    transaction::contract_name_is_formatted,
};
use serde_json::{Map, Value};

pub const CURRENCY_SOURCE: &str = r#"# currency token interface
var balances: hash
var metadata: hash

@export
fn transfer(amount: decimal, to: str)

@export
fn approve(amount: decimal, to: str)

@export
fn transfer_from(amount: decimal, to: str, main_account: str)

@export
fn balance_of(address: str)

@export
fn change_metadata(key: str, value: json)
"#;

pub const SUBMISSION_SOURCE: &str = r#"# contract submission entrypoint
@export
fn submit_contract(name: str, code: str)
"#;

pub const STAMP_COST_SOURCE: &str = "var S: hash\n";

pub const REWARDS_SOURCE: &str = "# reward ratios [validators, foundation, burn, developer]\nvar S: hash\n";

pub const MASTERNODES_SOURCE: &str = "# active validator member list\nvar S: hash\n";

pub const FOUNDATION_SOURCE: &str = "var owner: str\n";

/// Registry holding every system contract.
pub fn system_registry() -> ContractRegistry {
    let mut registry = ContractRegistry::new();
    registry.register(
        NativeContract::new("currency", CURRENCY_SOURCE)
            .with_handler("transfer", currency_transfer)
            .with_handler("approve", currency_approve)
            .with_handler("transfer_from", currency_transfer_from)
            .with_handler("balance_of", currency_balance_of)
            .with_handler("change_metadata", currency_change_metadata),
    );
    registry.register(
        NativeContract::new("submission", SUBMISSION_SOURCE)
            .with_handler("submit_contract", submission_submit_contract),
    );
    registry.register(NativeContract::new("stamp_cost", STAMP_COST_SOURCE));
    registry.register(NativeContract::new("rewards", REWARDS_SOURCE));
    registry.register(NativeContract::new("masternodes", MASTERNODES_SOURCE));
    registry.register(NativeContract::new("foundation", FOUNDATION_SOURCE));
    registry
}

// -- currency ---------------------------------------------------------------

fn read_balance(ctx: &mut ExecContext, account: &str) -> Result<Fixed, ContractError> {
    let value = ctx.get_var("currency", "balances", &[account])?;
    Ok(value.as_ref().and_then(Fixed::from_value).unwrap_or(Fixed::ZERO))
}

fn write_balance(ctx: &mut ExecContext, account: &str, balance: Fixed) -> Result<(), ContractError> {
    ctx.set_var("currency", "balances", &[account], balance.to_value())
}

fn currency_transfer(
    ctx: &mut ExecContext,
    kwargs: &Map<String, Value>,
) -> Result<Value, ContractError> {
    let amount = fixed_kwarg(kwargs, "amount")?;
    let to = str_kwarg(kwargs, "to")?;

    ctx.assert_that(amount > Fixed::ZERO, "Cannot send negative balances.")?;

    let caller = ctx.caller().to_string();
    let sender_balance = read_balance(ctx, &caller)?;
    ctx.assert_that(sender_balance >= amount, "Not enough coins to send.")?;

    let receiver_balance = read_balance(ctx, &to)?;
    write_balance(ctx, &caller, sender_balance - amount)?;
    write_balance(ctx, &to, receiver_balance + amount)?;
    Ok(Value::Null)
}

fn currency_approve(
    ctx: &mut ExecContext,
    kwargs: &Map<String, Value>,
) -> Result<Value, ContractError> {
    let amount = fixed_kwarg(kwargs, "amount")?;
    let to = str_kwarg(kwargs, "to")?;

    ctx.assert_that(amount >= Fixed::ZERO, "Cannot approve negative balances.")?;

    let caller = ctx.caller().to_string();
    ctx.set_var("currency", "balances", &[&caller, &to], amount.to_value())?;
    Ok(Value::Null)
}

fn currency_transfer_from(
    ctx: &mut ExecContext,
    kwargs: &Map<String, Value>,
) -> Result<Value, ContractError> {
    let amount = fixed_kwarg(kwargs, "amount")?;
    let to = str_kwarg(kwargs, "to")?;
    let main_account = str_kwarg(kwargs, "main_account")?;

    ctx.assert_that(amount > Fixed::ZERO, "Cannot send negative balances.")?;

    let caller = ctx.caller().to_string();
    let approved = ctx
        .get_var("currency", "balances", &[&main_account, &caller])?
        .as_ref()
        .and_then(Fixed::from_value)
        .unwrap_or(Fixed::ZERO);
    ctx.assert_that(approved >= amount, "Not enough coins approved to send.")?;

    let main_balance = read_balance(ctx, &main_account)?;
    ctx.assert_that(main_balance >= amount, "Not enough coins to send.")?;

    let receiver_balance = read_balance(ctx, &to)?;
    ctx.set_var(
        "currency",
        "balances",
        &[&main_account, &caller],
        (approved - amount).to_value(),
    )?;
    write_balance(ctx, &main_account, main_balance - amount)?;
    write_balance(ctx, &to, receiver_balance + amount)?;
    Ok(Value::Null)
}

fn currency_balance_of(
    ctx: &mut ExecContext,
    kwargs: &Map<String, Value>,
) -> Result<Value, ContractError> {
    let address = str_kwarg(kwargs, "address")?;
    let balance = read_balance(ctx, &address)?;
    Ok(balance.to_value())
}

fn currency_change_metadata(
    ctx: &mut ExecContext,
    kwargs: &Map<String, Value>,
) -> Result<Value, ContractError> {
    let key = str_kwarg(kwargs, "key")?;
    let value = super::registry::require_kwarg(kwargs, "value")?.clone();

    let operator = ctx
        .get_var("currency", "metadata", &["operator"])?
        .and_then(|v| v.as_str().map(str::to_string));
    ctx.assert_that(
        operator.as_deref() == Some(ctx.caller()),
        "Only operator can set metadata.",
    )?;

    ctx.set_var("currency", "metadata", &[&key], value)?;
    Ok(Value::Null)
}

// -- submission -------------------------------------------------------------

fn submission_submit_contract(
    ctx: &mut ExecContext,
    kwargs: &Map<String, Value>,
) -> Result<Value, ContractError> {
    let name = str_kwarg(kwargs, "name")?;
    let code = str_kwarg(kwargs, "code")?;

    ctx.assert_that(
        name.len() <= MAX_CONTRACT_NAME_LEN
            && name.starts_with(USER_CONTRACT_PREFIX)
            && contract_name_is_formatted(&name),
        "Invalid contract name.",
    )?;
    let exists = ctx.contract_exists(&name)?;
    ctx.assert_that(!exists, "Contract already exists.")?;

    let compiled = compile_interface(&name, &code)
        .map_err(|e| ContractError::TypeError(format!("code does not compile: {}", e)))?;

    ctx.set(&code_key(&name), Value::String(code))?;
    ctx.set(&compiled_key(&name), Value::String(compiled))?;
    Ok(Value::String(name))
}
