pub mod compiler;
pub mod contracts;
pub mod environment;
pub mod registry;

pub use environment::{BlockMeta, Environment};
pub use registry::{ContractRegistry, Handler, NativeContract};

use crate::core::storage::{StateStore, WriteSet};
use indexmap::IndexMap;
use kura_common::config::{
    INDEX_SEPARATOR, KEY_DELIMITER, STAMP_COST_CALL, STAMP_COST_READ, STAMP_COST_WRITE,
};
use log::{debug, trace};
use serde_json::{Map, Value};
use thiserror::Error;

/// Depth bound for cross-contract calls.
const MAX_CALL_DEPTH: u8 = 8;

/// Failure inside a contract call. All variants roll the call back; only
/// the status code distinguishes metering exhaustion from everything else.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContractError {
    #[error("AssertionError: {0}")]
    AssertionFailed(String),

    #[error("Missing kwarg '{0}'")]
    MissingKwarg(String),

    #[error("TypeError: {0}")]
    TypeError(String),

    #[error("Contract '{0}' not found")]
    ContractNotFound(String),

    #[error("Function '{function}' not found in contract '{contract}'")]
    FunctionNotFound { contract: String, function: String },

    #[error("Call depth limit exceeded")]
    CallDepthExceeded,

    #[error("Out of stamps")]
    OutOfStamps,

    #[error("Storage failure: {0}")]
    Storage(String),
}

/// Execution status reported per transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Error,
    OutOfStamps,
}

impl StatusCode {
    pub fn code(&self) -> u32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::Error => 1,
            StatusCode::OutOfStamps => 2,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

/// Stamp meter. When disabled it neither counts nor aborts: the fee-free
/// configuration executes contracts at zero cost.
#[derive(Debug, Clone)]
pub struct StampMeter {
    enabled: bool,
    limit: u64,
    used: u64,
}

impl StampMeter {
    pub fn new(enabled: bool, limit: u64) -> Self {
        Self {
            enabled,
            limit,
            used: 0,
        }
    }

    pub fn charge(&mut self, amount: u64) -> Result<(), ContractError> {
        if !self.enabled {
            return Ok(());
        }
        self.used = self.used.saturating_add(amount);
        if self.used > self.limit {
            self.used = self.limit;
            return Err(ContractError::OutOfStamps);
        }
        Ok(())
    }

    pub fn used(&self) -> u64 {
        self.used
    }
}

/// Result of executing one contract call.
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub status_code: StatusCode,
    /// Return value on success, error string on failure.
    pub result: Value,
    /// Final write set, empty on failure.
    pub writes: IndexMap<String, Value>,
    pub stamps_used: u64,
}

/// Inputs to one execution.
pub struct ExecutionRequest<'a> {
    pub sender: &'a str,
    pub contract: &'a str,
    pub function: &'a str,
    pub kwargs: &'a Map<String, Value>,
    pub stamps_supplied: u64,
    pub environment: &'a Environment,
    pub metering: bool,
}

/// Scoped execution handle given to contract handlers.
///
/// Writes stage into a call-local overlay; reads see the overlay first and
/// fall back to the store. The overlay is promoted into the output only on
/// success, so a failure at any nested depth discards every mutation,
/// including mutations made before a cross-contract call that failed.
pub struct ExecContext<'a> {
    store: &'a StateStore,
    registry: &'a ContractRegistry,
    pub environment: &'a Environment,
    overlay: WriteSet,
    meter: StampMeter,
    sender: String,
    contract: String,
    caller: String,
    depth: u8,
}

impl<'a> ExecContext<'a> {
    /// Identity of the transaction sender.
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Contract currently executing.
    pub fn this_contract(&self) -> &str {
        &self.contract
    }

    /// Immediate caller: the sender for the top-level call, the calling
    /// contract inside a cross-contract call.
    pub fn caller(&self) -> &str {
        &self.caller
    }

    /// Read a state cell, charging read stamps. The returned value is the
    /// caller's to mutate; only `set` makes a mutation stick.
    pub fn get(&mut self, key: &str) -> Result<Option<Value>, ContractError> {
        self.meter.charge(STAMP_COST_READ)?;
        trace!("exec get {}", key);
        if let Some(staged) = self.overlay.get(key) {
            return Ok(staged.clone());
        }
        self.store
            .get(key)
            .map_err(|e| ContractError::Storage(e.to_string()))
    }

    /// Stage a write, charging write stamps.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), ContractError> {
        self.meter.charge(STAMP_COST_WRITE)?;
        trace!("exec set {}", key);
        self.overlay.set(key, value);
        Ok(())
    }

    /// Read `contract.variable[:index…]`.
    pub fn get_var(
        &mut self,
        contract: &str,
        variable: &str,
        indexes: &[&str],
    ) -> Result<Option<Value>, ContractError> {
        self.get(&build_key(contract, variable, indexes))
    }

    /// Write `contract.variable[:index…]` on the executing contract's own
    /// namespace or another contract's (cross-contract writes are what the
    /// transaction-scope rollback exists for).
    pub fn set_var(
        &mut self,
        contract: &str,
        variable: &str,
        indexes: &[&str],
        value: Value,
    ) -> Result<(), ContractError> {
        self.set(&build_key(contract, variable, indexes), value)
    }

    /// Whether a contract is known, either as a native handler or as
    /// submitted code in state.
    pub fn contract_exists(&mut self, name: &str) -> Result<bool, ContractError> {
        if self.registry.contains(name) {
            return Ok(true);
        }
        Ok(self.get(&kura_common::config::code_key(name))?.is_some())
    }

    /// Contract-level assertion.
    pub fn assert_that(&self, condition: bool, message: &str) -> Result<(), ContractError> {
        if condition {
            Ok(())
        } else {
            Err(ContractError::AssertionFailed(message.to_string()))
        }
    }

    /// Cross-contract call. The callee shares this context's overlay and
    /// meter, so its writes and stamp usage are part of the same
    /// transaction scope.
    pub fn call(
        &mut self,
        contract: &str,
        function: &str,
        kwargs: &Map<String, Value>,
    ) -> Result<Value, ContractError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ContractError::CallDepthExceeded);
        }
        self.meter.charge(STAMP_COST_CALL)?;
        let handler = self.registry.handler(contract, function)?;

        let saved_contract = std::mem::replace(&mut self.contract, contract.to_string());
        let saved_caller = std::mem::replace(&mut self.caller, saved_contract.clone());
        self.depth += 1;

        let result = handler(self, kwargs);

        self.depth -= 1;
        self.caller = saved_caller;
        self.contract = saved_contract;
        result
    }
}

fn build_key(contract: &str, variable: &str, indexes: &[&str]) -> String {
    let mut key = format!("{}{}{}", contract, KEY_DELIMITER, variable);
    for index in indexes {
        key.push(INDEX_SEPARATOR);
        key.push_str(index);
    }
    key
}

/// The deterministic executor. Holds the contract registry; all mutable
/// state is per-call.
pub struct Executor {
    registry: ContractRegistry,
}

impl Executor {
    pub fn new(registry: ContractRegistry) -> Self {
        Self { registry }
    }

    pub fn with_system_contracts() -> Self {
        Self::new(contracts::system_registry())
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ContractRegistry {
        &mut self.registry
    }

    /// Execute a single contract function call against `store`.
    ///
    /// Never returns an error: every failure mode is folded into the
    /// output's status code so the caller can apply the fee-only write.
    pub fn execute(&self, store: &StateStore, request: ExecutionRequest<'_>) -> ExecutionOutput {
        debug!(
            "executing {}.{} for {}",
            request.contract, request.function, request.sender
        );

        let mut ctx = ExecContext {
            store,
            registry: &self.registry,
            environment: request.environment,
            overlay: WriteSet::new(),
            meter: StampMeter::new(request.metering, request.stamps_supplied),
            sender: request.sender.to_string(),
            contract: request.contract.to_string(),
            caller: request.sender.to_string(),
            depth: 0,
        };

        let outcome = ctx
            .meter
            .charge(STAMP_COST_CALL)
            .and_then(|_| self.registry.handler(request.contract, request.function))
            .and_then(|handler| handler(&mut ctx, request.kwargs));

        let stamps_used = ctx.meter.used();
        match outcome {
            Ok(result) => {
                let mut writes = IndexMap::new();
                for (key, staged) in ctx.overlay.iter() {
                    if let Some(value) = staged {
                        writes.insert(key.clone(), value.clone());
                    }
                }
                ExecutionOutput {
                    status_code: StatusCode::Ok,
                    result,
                    writes,
                    stamps_used,
                }
            }
            Err(err) => {
                let status_code = match err {
                    ContractError::OutOfStamps => StatusCode::OutOfStamps,
                    _ => StatusCode::Error,
                };
                debug!(
                    "execution of {}.{} failed: {}",
                    request.contract, request.function, err
                );
                ExecutionOutput {
                    status_code,
                    result: Value::String(err.to_string()),
                    writes: IndexMap::new(),
                    stamps_used,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn environment() -> Environment {
        Environment::for_block_tx(
            &BlockMeta {
                nanos: 1_000_000_000,
                height: 1,
                hash: "00".repeat(32),
            },
            "sig",
        )
    }

    fn set_and_return(
        ctx: &mut ExecContext,
        _kwargs: &Map<String, Value>,
    ) -> Result<Value, ContractError> {
        ctx.set_var("con_t", "v", &[], json!(1))?;
        Ok(json!("done"))
    }

    fn set_then_fail(
        ctx: &mut ExecContext,
        _kwargs: &Map<String, Value>,
    ) -> Result<Value, ContractError> {
        ctx.set_var("con_t", "v", &[], json!(2))?;
        ctx.assert_that(false, "always fails")?;
        Ok(Value::Null)
    }

    fn call_other_then_fail(
        ctx: &mut ExecContext,
        kwargs: &Map<String, Value>,
    ) -> Result<Value, ContractError> {
        ctx.call("con_t", "set_and_return", kwargs)?;
        Err(ContractError::AssertionFailed("outer failure".into()))
    }

    fn executor() -> Executor {
        let mut registry = ContractRegistry::new();
        registry.register(
            NativeContract::new("con_t", "var v: int\n@export\nfn set_and_return()")
                .with_handler("set_and_return", set_and_return)
                .with_handler("set_then_fail", set_then_fail),
        );
        registry.register(
            NativeContract::new("con_outer", "@export\nfn call_other_then_fail()")
                .with_handler("call_other_then_fail", call_other_then_fail),
        );
        Executor::new(registry)
    }

    fn run(executor: &Executor, store: &StateStore, contract: &str, function: &str, stamps: u64) -> ExecutionOutput {
        let env = environment();
        executor.execute(
            store,
            ExecutionRequest {
                sender: "alice",
                contract,
                function,
                kwargs: &Map::new(),
                stamps_supplied: stamps,
                environment: &env,
                metering: true,
            },
        )
    }

    #[test]
    fn test_successful_call_returns_writes() {
        let store = StateStore::temporary().unwrap();
        let out = run(&executor(), &store, "con_t", "set_and_return", 10_000);
        assert!(out.status_code.is_ok());
        assert_eq!(out.result, json!("done"));
        assert_eq!(out.writes.get("con_t.v"), Some(&json!(1)));
        assert!(out.stamps_used > 0);
    }

    #[test]
    fn test_failure_discards_writes_but_reports_stamps() {
        let store = StateStore::temporary().unwrap();
        let out = run(&executor(), &store, "con_t", "set_then_fail", 10_000);
        assert_eq!(out.status_code, StatusCode::Error);
        assert!(out.writes.is_empty());
        assert!(out.stamps_used > 0);
        assert!(out.result.as_str().unwrap().contains("always fails"));
    }

    #[test]
    fn test_out_of_stamps_aborts_with_distinct_status() {
        let store = StateStore::temporary().unwrap();
        let out = run(&executor(), &store, "con_t", "set_and_return", 15);
        assert_eq!(out.status_code, StatusCode::OutOfStamps);
        assert!(out.writes.is_empty());
        // Usage is capped at the supplied budget
        assert_eq!(out.stamps_used, 15);
    }

    #[test]
    fn test_nested_failure_rolls_back_inner_writes() {
        let store = StateStore::temporary().unwrap();
        let out = run(
            &executor(),
            &store,
            "con_outer",
            "call_other_then_fail",
            100_000,
        );
        assert_eq!(out.status_code, StatusCode::Error);
        // The inner call's write is gone with the rest
        assert!(out.writes.is_empty());
    }

    #[test]
    fn test_unknown_contract_and_function() {
        let store = StateStore::temporary().unwrap();
        let out = run(&executor(), &store, "nope", "x", 1_000);
        assert_eq!(out.status_code, StatusCode::Error);
        assert!(out.result.as_str().unwrap().contains("not found"));

        let out = run(&executor(), &store, "con_t", "nope", 1_000);
        assert_eq!(out.status_code, StatusCode::Error);
    }

    #[test]
    fn test_metering_disabled_never_aborts() {
        let store = StateStore::temporary().unwrap();
        let env = environment();
        let out = executor().execute(
            &store,
            ExecutionRequest {
                sender: "alice",
                contract: "con_t",
                function: "set_and_return",
                kwargs: &Map::new(),
                stamps_supplied: 0,
                environment: &env,
                metering: false,
            },
        );
        assert!(out.status_code.is_ok());
        assert_eq!(out.stamps_used, 0);
    }

    #[test]
    fn test_deterministic_stamp_usage() {
        let store = StateStore::temporary().unwrap();
        let a = run(&executor(), &store, "con_t", "set_and_return", 10_000);
        let b = run(&executor(), &store, "con_t", "set_and_return", 10_000);
        assert_eq!(a.stamps_used, b.stamps_used);
    }
}
