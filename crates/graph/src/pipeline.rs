use std::collections::{BTreeMap, HashMap, HashSet};

use rowmill_common::{Result, RowmillError};
use serde::{Deserialize, Serialize};

use crate::cluster::ClusterSchema;
use crate::step::{StepKind, StepMeta};

/// Named parameter with optional default and current value. Parameters
/// override same-named variables in every launch overlay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    pub description: String,
    pub default: String,
    pub value: Option<String>,
}

/// Directed edge between two steps; rows flow from `from` to `to` in FIFO
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    pub from: String,
    pub to: String,
}

impl Hop {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// The logical dataflow graph: ordered steps, hops, a parameter table, a
/// variable namespace inherited from the execution context, and an optional
/// cluster schema assigning steps to workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: String,
    pub steps: Vec<StepMeta>,
    pub hops: Vec<Hop>,
    pub parameters: Vec<ParameterDef>,
    pub variables: BTreeMap<String, String>,
    pub cluster: Option<ClusterSchema>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            hops: Vec::new(),
            parameters: Vec::new(),
            variables: BTreeMap::new(),
            cluster: None,
        }
    }

    /// Append a step.
    pub fn add_step(&mut self, step: StepMeta) {
        self.steps.push(step);
    }

    /// Append a hop between two named steps.
    pub fn add_hop(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.hops.push(Hop::new(from, to));
    }

    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&StepMeta> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Declare a parameter with default and description.
    pub fn add_parameter(
        &mut self,
        name: impl Into<String>,
        default: impl Into<String>,
        description: impl Into<String>,
    ) {
        self.parameters.push(ParameterDef {
            name: name.into(),
            description: description.into(),
            default: default.into(),
            value: None,
        });
    }

    /// Declared parameter names, in declaration order.
    pub fn list_parameters(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    /// Current value of a parameter, if set.
    pub fn parameter_value(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.value.as_deref())
    }

    /// Declared default of a parameter.
    pub fn parameter_default(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.default.as_str())
    }

    /// Set a parameter's current value. Unknown names are ignored, matching
    /// the permissive behavior of the command-line surface.
    pub fn set_parameter_value(&mut self, name: &str, value: impl Into<String>) {
        if let Some(p) = self.parameters.iter_mut().find(|p| p.name == name) {
            p.value = Some(value.into());
        }
    }

    /// Read a pipeline-level variable.
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    /// Set a pipeline-level variable.
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(name.into(), value.into());
    }

    /// Structural validation: unique step names, hops referencing existing
    /// steps, and an acyclic hop graph.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(RowmillError::Execution(format!(
                    "pipeline '{}' declares step '{}' more than once",
                    self.name, step.name
                )));
            }
        }
        for hop in &self.hops {
            for endpoint in [&hop.from, &hop.to] {
                if !names.contains(endpoint.as_str()) {
                    return Err(RowmillError::Execution(format!(
                        "hop '{}' -> '{}' references unknown step '{}'",
                        hop.from, hop.to, endpoint
                    )));
                }
            }
        }
        self.check_acyclic()?;
        Ok(())
    }

    fn check_acyclic(&self) -> Result<()> {
        // Kahn's algorithm: leftover nodes after peeling indicate a cycle.
        let mut indegree: HashMap<&str, usize> =
            self.steps.iter().map(|s| (s.name.as_str(), 0)).collect();
        let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
        for hop in &self.hops {
            *indegree.entry(hop.to.as_str()).or_insert(0) += 1;
            outgoing
                .entry(hop.from.as_str())
                .or_default()
                .push(hop.to.as_str());
        }
        let mut ready: Vec<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        let mut visited = 0_usize;
        while let Some(name) = ready.pop() {
            visited += 1;
            if let Some(nexts) = outgoing.get(name) {
                for next in nexts.clone() {
                    let d = indegree.get_mut(next).expect("hop endpoints validated");
                    *d -= 1;
                    if *d == 0 {
                        ready.push(next);
                    }
                }
            }
        }
        if visited != self.steps.len() {
            return Err(RowmillError::Execution(format!(
                "pipeline '{}' contains a hop cycle",
                self.name
            )));
        }
        Ok(())
    }

    /// Names of steps with no incoming hop.
    pub fn source_steps(&self) -> Vec<&str> {
        let targets: HashSet<&str> = self.hops.iter().map(|h| h.to.as_str()).collect();
        self.steps
            .iter()
            .filter(|s| !targets.contains(s.name.as_str()))
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Hops leaving `step`.
    pub fn hops_from(&self, step: &str) -> Vec<&Hop> {
        self.hops.iter().filter(|h| h.from == step).collect()
    }

    /// Hops entering `step`.
    pub fn hops_to(&self, step: &str) -> Vec<&Hop> {
        self.hops.iter().filter(|h| h.to == step).collect()
    }

    /// Whether any step carries relay shims, i.e. the pipeline is a
    /// splitter-produced sub-pipeline.
    pub fn has_relay_steps(&self) -> bool {
        self.steps.iter().any(|s| {
            matches!(
                s.kind,
                StepKind::RelaySend { .. } | StepKind::RelayReceive { .. }
            )
        })
    }

    /// Wire representation used to transmit a (sub-)pipeline to a worker.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| RowmillError::Execution(format!("pipeline encode failed: {e}")))
    }

    /// Decode the wire representation.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| RowmillError::Execution(format!("pipeline decode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::Pipeline;
    use crate::step::{FieldDef, StepKind, StepMeta};

    fn two_step_pipeline() -> Pipeline {
        let mut p = Pipeline::new("copy rows");
        p.add_step(StepMeta::new(
            "gen",
            StepKind::Generator {
                rows: 3,
                fields: vec![FieldDef::new("id", "1")],
            },
        ));
        p.add_step(StepMeta::new("out", StepKind::Sink));
        p.add_hop("gen", "out");
        p
    }

    #[test]
    fn valid_pipeline_passes_validation() {
        two_step_pipeline().validate().expect("valid");
    }

    #[test]
    fn hop_to_unknown_step_is_rejected() {
        let mut p = two_step_pipeline();
        p.add_hop("gen", "missing");
        assert!(p.validate().is_err());
    }

    #[test]
    fn duplicate_step_name_is_rejected() {
        let mut p = two_step_pipeline();
        p.add_step(StepMeta::new("gen", StepKind::Sink));
        assert!(p.validate().is_err());
    }

    #[test]
    fn hop_cycle_is_rejected() {
        let mut p = two_step_pipeline();
        p.add_step(StepMeta::new(
            "calc",
            StepKind::Calculator {
                field: FieldDef::new("id", "2"),
            },
        ));
        p.add_hop("out", "calc");
        p.add_hop("calc", "gen");
        assert!(p.validate().is_err());
    }

    #[test]
    fn json_round_trip_preserves_the_graph() {
        let p = two_step_pipeline();
        let decoded =
            Pipeline::from_json(&p.to_json().expect("encode")).expect("decode");
        assert_eq!(decoded, p);
    }

    #[test]
    fn parameter_table_get_set() {
        let mut p = two_step_pipeline();
        p.add_parameter("p1", "7", "row multiplier");
        assert_eq!(p.list_parameters(), vec!["p1"]);
        assert_eq!(p.parameter_default("p1"), Some("7"));
        assert_eq!(p.parameter_value("p1"), None);
        p.set_parameter_value("p1", "42");
        assert_eq!(p.parameter_value("p1"), Some("42"));
    }
}
