//! Simulation scenarios.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Accounts opened before the first step.
    pub accounts: Vec<AccountSeed>,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

/// An account opened with a starting balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSeed {
    pub label: String,
    pub balance: String,
}

/// Expected outcome of a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expect {
    /// The operation commits.
    Success,
    /// The operation fails with this error code.
    Error(String),
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Transfer between two labelled accounts.
    Transfer {
        from: String,
        to: String,
        amount: String,
        expect: Expect,
    },
    /// Reverse the most recent committed transfer.
    ReverseLast { expect: Expect },
    /// Fire `count` identical transfers concurrently.
    Burst {
        from: String,
        to: String,
        amount: String,
        count: usize,
        expect_successes: usize,
    },
    /// Fire `count` transfers concurrently, alternating direction.
    Crossfire {
        a: String,
        b: String,
        amount: String,
        count: usize,
    },
    /// Inject a store fault.
    InjectFault { fault_type: FaultType },
    /// Assert an account balance.
    AssertBalance { account: String, amount: String },
    /// Assert the total balance equals the total seeded.
    AssertConserved,
}

/// Store faults that can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultType {
    /// The next transaction-record write fails.
    FailNextWrite,
    /// The next commit fails.
    FailNextCommit,
}

fn seed(label: &str, balance: &str) -> AccountSeed {
    AccountSeed {
        label: label.to_string(),
        balance: balance.to_string(),
    }
}

fn transfer(from: &str, to: &str, amount: &str, expect: Expect) -> ScenarioStep {
    ScenarioStep::Transfer {
        from: from.to_string(),
        to: to.to_string(),
        amount: amount.to_string(),
        expect,
    }
}

fn assert_balance(account: &str, amount: &str) -> ScenarioStep {
    ScenarioStep::AssertBalance {
        account: account.to_string(),
        amount: amount.to_string(),
    }
}

fn error(code: &str) -> Expect {
    Expect::Error(code.to_string())
}

impl Scenario {
    /// Load a built-in scenario by name, or a scenario from a JSON file.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "basic-transfer" => Ok(Self::basic_transfer()),
            "insufficient-balance" => Ok(Self::insufficient_balance()),
            "contention" => Ok(Self::contention()),
            "failure-recovery" => Ok(Self::failure_recovery()),
            path if path.ends_with(".json") => {
                let raw = std::fs::read_to_string(Path::new(path))?;
                Ok(serde_json::from_str(&raw)?)
            }
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Whether any step needs store fault injection.
    pub fn injects_faults(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s, ScenarioStep::InjectFault { .. }))
    }

    /// Transfer, reverse, then reverse again.
    fn basic_transfer() -> Self {
        Self {
            name: "basic-transfer".to_string(),
            description: "Transfer and reverse between two funded accounts".to_string(),
            accounts: vec![seed("A", "200"), seed("B", "100")],
            steps: vec![
                transfer("A", "B", "100", Expect::Success),
                assert_balance("A", "100"),
                assert_balance("B", "200"),
                ScenarioStep::ReverseLast {
                    expect: Expect::Success,
                },
                assert_balance("A", "200"),
                assert_balance("B", "100"),
                ScenarioStep::ReverseLast {
                    expect: error("NOT_REVERSIBLE"),
                },
                ScenarioStep::AssertConserved,
            ],
        }
    }

    /// Rejected transfers leave no trace.
    fn insufficient_balance() -> Self {
        Self {
            name: "insufficient-balance".to_string(),
            description: "Overdrafts and invalid amounts are refused".to_string(),
            accounts: vec![seed("A", "50"), seed("B", "0")],
            steps: vec![
                transfer("A", "B", "100", error("INSUFFICIENT_BALANCE")),
                transfer("A", "B", "0", error("INVALID_AMOUNT")),
                transfer("A", "B", "0.001", error("INVALID_AMOUNT")),
                transfer("A", "A", "10", error("INVALID_PARTICIPANTS")),
                assert_balance("A", "50"),
                assert_balance("B", "0"),
                ScenarioStep::AssertConserved,
            ],
        }
    }

    /// Concurrent transfers competing for the same accounts.
    fn contention() -> Self {
        Self {
            name: "contention".to_string(),
            description: "Concurrent debits on one sender and opposite-direction traffic".to_string(),
            accounts: vec![seed("A", "100"), seed("B", "100"), seed("C", "0")],
            steps: vec![
                ScenarioStep::Burst {
                    from: "A".to_string(),
                    to: "C".to_string(),
                    amount: "30".to_string(),
                    count: 10,
                    expect_successes: 3,
                },
                assert_balance("A", "10"),
                assert_balance("C", "90"),
                ScenarioStep::Crossfire {
                    a: "B".to_string(),
                    b: "C".to_string(),
                    amount: "1".to_string(),
                    count: 100,
                },
                assert_balance("B", "100"),
                assert_balance("C", "90"),
                ScenarioStep::AssertConserved,
            ],
        }
    }

    /// Injected store failures roll back fully; retries succeed.
    fn failure_recovery() -> Self {
        Self {
            name: "failure-recovery".to_string(),
            description: "Store failures leave no partial effects".to_string(),
            accounts: vec![seed("A", "100"), seed("B", "0")],
            steps: vec![
                ScenarioStep::InjectFault {
                    fault_type: FaultType::FailNextWrite,
                },
                transfer("A", "B", "40", error("STORAGE_UNAVAILABLE")),
                assert_balance("A", "100"),
                assert_balance("B", "0"),
                transfer("A", "B", "40", Expect::Success),
                ScenarioStep::InjectFault {
                    fault_type: FaultType::FailNextCommit,
                },
                ScenarioStep::ReverseLast {
                    expect: error("STORAGE_UNAVAILABLE"),
                },
                assert_balance("A", "60"),
                ScenarioStep::ReverseLast {
                    expect: Expect::Success,
                },
                assert_balance("A", "100"),
                ScenarioStep::AssertConserved,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_builtin() {
        for name in ["basic-transfer", "insufficient-balance", "contention", "failure-recovery"] {
            assert_eq!(Scenario::load(name).unwrap().name, name);
        }
        assert!(Scenario::load("nope").is_err());
        assert!(Scenario::load("failure-recovery").unwrap().injects_faults());
        assert!(!Scenario::load("contention").unwrap().injects_faults());
    }

    #[test]
    fn test_scenario_json_shape() {
        let json = serde_json::to_string(&Scenario::load("basic-transfer").unwrap()).unwrap();
        let parsed: Scenario = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.steps.len(), 8);
    }
}
