//! Native contract registry.
//!
//! The set of executable contracts is a closed registry of native handlers
//! keyed by `(contract, function)`. A contract's interface (what the query
//! surface and submission flow see) comes from its compiled manifest; its
//! behavior is the registered handler. Submitted user contracts store their
//! interface but have no handler, so calling them is an execution error,
//! taking the same rollback-and-charge path as any other contract failure.

use super::compiler::{compile_interface, Manifest, parse_interface};
use super::ExecContext;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::ContractError;

/// A native contract function. Receives the execution context and the
/// canonicalized keyword arguments.
pub type Handler = fn(&mut ExecContext, &Map<String, Value>) -> Result<Value, ContractError>;

/// One native contract: interface source plus its function table.
pub struct NativeContract {
    pub name: &'static str,
    pub source: &'static str,
    handlers: BTreeMap<&'static str, Handler>,
}

impl NativeContract {
    pub fn new(name: &'static str, source: &'static str) -> Self {
        Self {
            name,
            source,
            handlers: BTreeMap::new(),
        }
    }

    pub fn with_handler(mut self, function: &'static str, handler: Handler) -> Self {
        self.handlers.insert(function, handler);
        self
    }

    pub fn manifest(&self) -> Manifest {
        // Native sources are fixed at compile time; parse failures are
        // developer errors caught by the registry tests.
        parse_interface(self.name, self.source).unwrap_or(Manifest {
            contract: self.name.to_string(),
            methods: vec![],
            variables: vec![],
        })
    }

    pub fn compiled_hex(&self) -> String {
        compile_interface(self.name, self.source).unwrap_or_default()
    }
}

/// Registry of every executable contract.
#[derive(Default)]
pub struct ContractRegistry {
    contracts: BTreeMap<String, NativeContract>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, contract: NativeContract) {
        self.contracts.insert(contract.name.to_string(), contract);
    }

    pub fn contains(&self, contract: &str) -> bool {
        self.contracts.contains_key(contract)
    }

    pub fn contract(&self, name: &str) -> Option<&NativeContract> {
        self.contracts.get(name)
    }

    pub fn handler(&self, contract: &str, function: &str) -> Result<Handler, ContractError> {
        let native = self
            .contracts
            .get(contract)
            .ok_or_else(|| ContractError::ContractNotFound(contract.to_string()))?;
        native
            .handlers
            .get(function)
            .copied()
            .ok_or_else(|| ContractError::FunctionNotFound {
                contract: contract.to_string(),
                function: function.to_string(),
            })
    }

    /// Iterate registered contracts in name order.
    pub fn iter(&self) -> impl Iterator<Item = &NativeContract> {
        self.contracts.values()
    }
}

// Kwarg extraction helpers shared by native contracts.

pub fn require_kwarg<'a>(
    kwargs: &'a Map<String, Value>,
    name: &str,
) -> Result<&'a Value, ContractError> {
    kwargs
        .get(name)
        .ok_or_else(|| ContractError::MissingKwarg(name.to_string()))
}

pub fn str_kwarg(kwargs: &Map<String, Value>, name: &str) -> Result<String, ContractError> {
    require_kwarg(kwargs, name)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ContractError::TypeError(format!("kwarg '{}' must be a string", name)))
}

pub fn fixed_kwarg(
    kwargs: &Map<String, Value>,
    name: &str,
) -> Result<kura_common::fixed::Fixed, ContractError> {
    kura_common::fixed::Fixed::from_value(require_kwarg(kwargs, name)?)
        .ok_or_else(|| ContractError::TypeError(format!("kwarg '{}' must be a number", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut ExecContext, _: &Map<String, Value>) -> Result<Value, ContractError> {
        Ok(Value::Null)
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ContractRegistry::new();
        registry.register(
            NativeContract::new("con_test", "@export\nfn run()").with_handler("run", noop),
        );

        assert!(registry.handler("con_test", "run").is_ok());
        assert!(matches!(
            registry.handler("con_test", "missing"),
            Err(ContractError::FunctionNotFound { .. })
        ));
        assert!(matches!(
            registry.handler("nope", "run"),
            Err(ContractError::ContractNotFound(_))
        ));
    }

    #[test]
    fn test_manifest_from_source() {
        let contract = NativeContract::new("con_test", "var state: hash\n@export\nfn run()");
        let manifest = contract.manifest();
        assert_eq!(manifest.methods.len(), 1);
        assert_eq!(manifest.variables.len(), 1);
        assert!(!contract.compiled_hex().is_empty());
    }

    #[test]
    fn test_kwarg_helpers() {
        let mut kwargs = Map::new();
        kwargs.insert("to".into(), Value::String("bob".into()));
        kwargs.insert("amount".into(), serde_json::json!(5));

        assert_eq!(str_kwarg(&kwargs, "to").unwrap(), "bob");
        assert_eq!(
            fixed_kwarg(&kwargs, "amount").unwrap(),
            kura_common::fixed::Fixed::from_int(5)
        );
        assert!(matches!(
            str_kwarg(&kwargs, "missing"),
            Err(ContractError::MissingKwarg(_))
        ));
        assert!(matches!(
            str_kwarg(&kwargs, "amount"),
            Err(ContractError::TypeError(_))
        ));
    }
}
