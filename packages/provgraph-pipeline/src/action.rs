//! Recorded action model
//!
//! A `RecordedAction` captures one unit of pipeline work: its named
//! inputs/outputs (URIs with roles), typed parameters, property values,
//! and timing. It is populated incrementally during execution and consumed
//! exactly once by the staging protocol, which translates it into durable
//! provenance edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file reference participating in an action, with its semantic role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataFile {
    pub uri: String,
    pub role: String,
    /// Transient files are not expected to exist after the job finishes
    #[serde(default)]
    pub transient: bool,
}

impl DataFile {
    pub fn input(uri: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            role: role.into(),
            transient: false,
        }
    }

    pub fn output(uri: impl Into<String>, role: impl Into<String>, transient: bool) -> Self {
        Self {
            uri: uri.into(),
            role: role.into(),
            transient,
        }
    }
}

/// Declared value type of an action parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValueType {
    Text,
    Integer,
    Decimal,
    Boolean,
    DateTime,
    FileLink,
}

/// A typed parameter declaration: display name, URI, declared type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParameterType {
    pub name: String,
    pub uri: String,
    pub value_type: ParamValueType,
}

impl ParameterType {
    pub fn new(
        name: impl Into<String>,
        uri: impl Into<String>,
        value_type: ParamValueType,
    ) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            value_type,
        }
    }
}

/// One recorded unit of pipeline work.
///
/// Equality is structural over name/description/inputs/outputs/parameters/
/// properties/record count; timestamps are excluded, so two replays of the
/// same logical step compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedAction {
    name: String,
    description: Option<String>,
    inputs: Vec<DataFile>,
    outputs: Vec<DataFile>,
    /// Insertion-ordered (parameter, value) pairs
    params: Vec<(ParameterType, String)>,
    /// Insertion-ordered (property URI, value) pairs
    props: Vec<(String, String)>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    record_count: Option<u64>,
}

impl RecordedAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            params: Vec::new(),
            props: Vec::new(),
            start_time: None,
            end_time: None,
            record_count: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    /// Record an input. Adding an identical entry twice keeps one logical
    /// entry; the same URI under a different role is a distinct entry.
    pub fn add_input(&mut self, uri: impl Into<String>, role: impl Into<String>) {
        let file = DataFile::input(uri, role);
        if !self.inputs.contains(&file) {
            self.inputs.push(file);
        }
    }

    /// Record an output; deduplicated the same way as inputs.
    pub fn add_output(
        &mut self,
        uri: impl Into<String>,
        role: impl Into<String>,
        transient: bool,
    ) {
        let file = DataFile::output(uri, role, transient);
        if !self.outputs.contains(&file) {
            self.outputs.push(file);
        }
    }

    /// Record a typed parameter value. Re-adding a parameter with the same
    /// name replaces its value but keeps its original position.
    pub fn add_parameter(&mut self, param: ParameterType, value: impl Into<String>) {
        let value = value.into();
        if let Some(slot) = self.params.iter_mut().find(|(p, _)| p.name == param.name) {
            *slot = (param, value);
        } else {
            self.params.push((param, value));
        }
    }

    /// Record a property value, keyed by descriptor URI; replace-in-place
    /// like `add_parameter`.
    pub fn add_property(&mut self, uri: impl Into<String>, value: impl Into<String>) {
        let uri = uri.into();
        let value = value.into();
        if let Some(slot) = self.props.iter_mut().find(|(u, _)| *u == uri) {
            slot.1 = value;
        } else {
            self.props.push((uri, value));
        }
    }

    // Accessors are immutable views; callers never mutate the collections
    // directly.

    pub fn inputs(&self) -> &[DataFile] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[DataFile] {
        &self.outputs
    }

    pub fn params(&self) -> &[(ParameterType, String)] {
        &self.params
    }

    pub fn props(&self) -> &[(String, String)] {
        &self.props
    }

    pub fn mark_started(&mut self) {
        self.start_time = Some(Utc::now());
    }

    pub fn mark_ended(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn set_record_count(&mut self, count: u64) {
        self.record_count = Some(count);
    }

    pub fn record_count(&self) -> Option<u64> {
        self.record_count
    }
}

impl PartialEq for RecordedAction {
    fn eq(&self, other: &Self) -> bool {
        // Timestamps intentionally excluded
        self.name == other.name
            && self.description == other.description
            && self.inputs == other.inputs
            && self.outputs == other.outputs
            && self.params == other.params
            && self.props == other.props
            && self.record_count == other.record_count
    }
}

impl Eq for RecordedAction {}

/// The set of actions recorded by one job execution, consumed by
/// provenance persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedActionSet {
    actions: Vec<RecordedAction>,
}

impl RecordedActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: RecordedAction) {
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[RecordedAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl FromIterator<RecordedAction> for RecordedActionSet {
    fn from_iter<T: IntoIterator<Item = RecordedAction>>(iter: T) -> Self {
        Self {
            actions: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_add_input_idempotent() {
        let mut action = RecordedAction::new("upload");

        action.add_input("file:///data/plate.tsv", "data");
        action.add_input("file:///data/plate.tsv", "data");

        assert_eq!(action.inputs().len(), 1);
    }

    #[test]
    fn test_add_output_idempotent() {
        let mut action = RecordedAction::new("upload");

        action.add_output("file:///out/result.tsv", "result", false);
        action.add_output("file:///out/result.tsv", "result", false);

        assert_eq!(action.outputs().len(), 1);
    }

    #[test]
    fn test_same_uri_different_role_is_distinct() {
        let mut action = RecordedAction::new("upload");

        action.add_input("file:///data/plate.tsv", "data");
        action.add_input("file:///data/plate.tsv", "metadata");

        assert_eq!(action.inputs().len(), 2);
    }

    #[test]
    fn test_inputs_and_outputs_tracked_separately() {
        let mut action = RecordedAction::new("transform");

        action.add_input("file:///x.tsv", "data");
        action.add_output("file:///x.tsv", "data", false);

        assert_eq!(action.inputs().len(), 1);
        assert_eq!(action.outputs().len(), 1);
    }

    #[test]
    fn test_parameter_insertion_order_preserved() {
        let mut action = RecordedAction::new("upload");

        action.add_parameter(
            ParameterType::new("threshold", "urn:param:threshold", ParamValueType::Decimal),
            "0.5",
        );
        action.add_parameter(
            ParameterType::new("operator", "urn:param:operator", ParamValueType::Text),
            "lab-3",
        );
        // Replace keeps position
        action.add_parameter(
            ParameterType::new("threshold", "urn:param:threshold", ParamValueType::Decimal),
            "0.75",
        );

        let params = action.params();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].0.name, "threshold");
        assert_eq!(params[0].1, "0.75");
        assert_eq!(params[1].0.name, "operator");
    }

    #[test]
    fn test_property_replace_in_place() {
        let mut action = RecordedAction::new("upload");

        action.add_property("urn:prop:comment", "first pass");
        action.add_property("urn:prop:instrument", "cytometer-2");
        action.add_property("urn:prop:comment", "second pass");

        let props = action.props();
        assert_eq!(props.len(), 2);
        assert_eq!(props[0], ("urn:prop:comment".to_string(), "second pass".to_string()));
    }

    #[test]
    fn test_equality_ignores_timestamps() {
        let mut a = RecordedAction::new("upload");
        a.add_input("file:///data/plate.tsv", "data");
        a.mark_started();
        a.mark_ended();

        let mut b = RecordedAction::new("upload");
        b.add_input("file:///data/plate.tsv", "data");
        // b never timestamped

        assert_eq!(a, b);
    }

    #[test]
    fn test_equality_structural() {
        let mut a = RecordedAction::new("upload");
        a.add_input("file:///data/plate.tsv", "data");

        let mut b = RecordedAction::new("upload");
        b.add_input("file:///data/plate.tsv", "other role");

        assert_ne!(a, b);
    }

    #[test]
    fn test_action_serde_roundtrip() {
        let mut action = RecordedAction::new("upload");
        action.set_description("assay upload step");
        action.add_input("file:///data/plate.tsv", "data");
        action.add_output("file:///out/result.tsv", "result", true);
        action.set_record_count(96);

        let json = serde_json::to_string(&action).unwrap();
        let back: RecordedAction = serde_json::from_str(&json).unwrap();

        assert_eq!(action, back);
        assert_eq!(back.outputs()[0].transient, true);
    }

    #[test]
    fn test_action_set_collects() {
        let set: RecordedActionSet = vec![
            RecordedAction::new("step-1"),
            RecordedAction::new("step-2"),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.len(), 2);
        assert_eq!(set.actions()[1].name(), "step-2");
    }

    proptest! {
        /// Repeated identical add calls never grow the input set beyond the
        /// number of distinct (uri, role) pairs.
        #[test]
        fn prop_add_input_dedupes(entries in proptest::collection::vec(("[a-z]{1,8}", "[a-z]{1,4}"), 0..32)) {
            let mut action = RecordedAction::new("prop");
            for (uri, role) in &entries {
                action.add_input(uri.clone(), role.clone());
                action.add_input(uri.clone(), role.clone());
            }

            let distinct: std::collections::HashSet<_> = entries.iter().collect();
            prop_assert_eq!(action.inputs().len(), distinct.len());
        }
    }
}
