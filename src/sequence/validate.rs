// src/sequence/validate.rs

//! Schema and structural validation for [`Sequence`], [`Step`] and [`Gate`].
//!
//! Schema checks collect every violation instead of stopping at the first one
//! so callers can show the full list. Acyclicity is checked last, and only
//! once the schema is clean, because the cycle walk assumes known IDs.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::dag::DagGraph;
use crate::errors::{FieldViolation, Result, SeqError};
use crate::sequence::model::{Gate, SEQUENCE_VERSION, Sequence, Step};

static ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9-]{1,64}$").expect("static id pattern is valid")
});

/// Check a step/gate ID against the allowed alphabet and length.
pub fn check_id(field: &str, id: &str) -> Option<FieldViolation> {
    if ID_PATTERN.is_match(id) {
        None
    } else {
        Some(FieldViolation::new(
            field,
            format!("'{id}' must be 1-64 characters of lowercase letters, digits or '-'"),
        ))
    }
}

fn check_non_empty(field: &str, value: &str, out: &mut Vec<FieldViolation>) {
    if value.trim().is_empty() {
        out.push(FieldViolation::new(field, "must not be empty"));
    }
}

impl Step {
    /// Field-level checks that need no knowledge of the rest of the sequence.
    pub fn schema_violations(&self, prefix: &str) -> Vec<FieldViolation> {
        let mut out = Vec::new();

        out.extend(check_id(&format!("{prefix}.id"), &self.id));
        check_non_empty(&format!("{prefix}.name"), &self.name, &mut out);
        check_non_empty(&format!("{prefix}.prompt_file"), &self.prompt_file, &mut out);

        if let Some(cwd) = &self.cwd {
            check_non_empty(&format!("{prefix}.cwd"), cwd, &mut out);
        }
        if let Some(group) = &self.group_id {
            check_non_empty(&format!("{prefix}.group_id"), group, &mut out);
        }
        if self.fanout == Some(0) {
            out.push(FieldViolation::new(format!("{prefix}.fanout"), "must be >= 1"));
        }
        if self.timeout_ms == Some(0) {
            out.push(FieldViolation::new(
                format!("{prefix}.timeout_ms"),
                "must be >= 1",
            ));
        }
        if self.watchdog_for.as_deref() == Some(self.id.as_str()) {
            out.push(FieldViolation::new(
                format!("{prefix}.watchdog_for"),
                "a step cannot watch itself",
            ));
        }

        check_dep_list(prefix, &self.id, &self.depends_on, &mut out);
        out
    }
}

impl Gate {
    pub fn schema_violations(&self, prefix: &str) -> Vec<FieldViolation> {
        let mut out = Vec::new();

        out.extend(check_id(&format!("{prefix}.id"), &self.id));
        check_non_empty(&format!("{prefix}.name"), &self.name, &mut out);
        check_dep_list(prefix, &self.id, &self.depends_on, &mut out);
        out
    }
}

fn check_dep_list(prefix: &str, id: &str, deps: &[String], out: &mut Vec<FieldViolation>) {
    let mut seen = HashSet::new();
    for dep in deps {
        if dep == id {
            out.push(FieldViolation::new(
                format!("{prefix}.depends_on"),
                format!("'{id}' cannot depend on itself"),
            ));
        }
        if !seen.insert(dep.as_str()) {
            out.push(FieldViolation::new(
                format!("{prefix}.depends_on"),
                format!("duplicate dependency '{dep}'"),
            ));
        }
    }
}

impl Sequence {
    /// Every schema and referential violation in the document.
    pub fn schema_violations(&self) -> Vec<FieldViolation> {
        let mut out = Vec::new();

        if self.version == 0 || self.version > SEQUENCE_VERSION {
            out.push(FieldViolation::new(
                "version",
                format!(
                    "unsupported version {} (expected 1..={SEQUENCE_VERSION})",
                    self.version
                ),
            ));
        }
        check_non_empty("name", &self.name, &mut out);

        for (i, step) in self.steps.iter().enumerate() {
            out.extend(step.schema_violations(&format!("steps[{i}]")));
        }
        for (i, gate) in self.gates.iter().enumerate() {
            out.extend(gate.schema_violations(&format!("gates[{i}]")));
        }

        self.check_unique_ids(&mut out);
        self.check_references(&mut out);
        out
    }

    fn check_unique_ids(&self, out: &mut Vec<FieldViolation>) {
        let mut seen: HashSet<&str> = HashSet::new();
        let fields = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (format!("steps[{i}].id"), s.id.as_str()))
            .chain(
                self.gates
                    .iter()
                    .enumerate()
                    .map(|(i, g)| (format!("gates[{i}].id"), g.id.as_str())),
            );

        for (field, id) in fields {
            if !seen.insert(id) {
                out.push(FieldViolation::new(field, format!("duplicate id '{id}'")));
            }
        }
    }

    fn check_references(&self, out: &mut Vec<FieldViolation>) {
        let unknown = |field: String, id: &str| {
            FieldViolation::new(field, format!("unknown id '{id}'"))
        };

        for (i, step) in self.steps.iter().enumerate() {
            for dep in &step.depends_on {
                if !self.contains(dep) {
                    out.push(unknown(format!("steps[{i}].depends_on"), dep));
                }
            }
            if let Some(target) = &step.watchdog_for {
                if self.step(target).is_none() {
                    out.push(unknown(format!("steps[{i}].watchdog_for"), target));
                }
            }
            if let Some(synth) = &step.fusion_synth {
                if self.step(synth).is_none() {
                    out.push(unknown(format!("steps[{i}].fusion_synth"), synth));
                }
            }
            for candidate in step.fusion_candidates.iter().flatten() {
                if self.step(candidate).is_none() {
                    out.push(unknown(format!("steps[{i}].fusion_candidates"), candidate));
                }
            }
        }

        for (i, gate) in self.gates.iter().enumerate() {
            for dep in &gate.depends_on {
                if !self.contains(dep) {
                    out.push(unknown(format!("gates[{i}].depends_on"), dep));
                }
            }
        }
    }

    /// Full validation: schema first, then acyclicity.
    pub fn validate(&self) -> Result<()> {
        let violations = self.schema_violations();
        if !violations.is_empty() {
            return Err(SeqError::Validation(violations));
        }
        DagGraph::from_sequence(self).validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Model;

    fn step(id: &str, deps: &[&str]) -> Step {
        let mut s = Step::new(id, id.to_uppercase(), Model::Codex, format!("prompts/{id}.md"));
        s.depends_on = deps.iter().map(|d| d.to_string()).collect();
        s
    }

    #[test]
    fn id_alphabet() {
        assert!(check_id("id", "build-1").is_none());
        assert!(check_id("id", "Build").is_some());
        assert!(check_id("id", "").is_some());
        assert!(check_id("id", "a_b").is_some());
        assert!(check_id("id", &"a".repeat(65)).is_some());
        assert!(check_id("id", &"a".repeat(64)).is_none());
    }

    #[test]
    fn collects_all_violations() {
        let mut seq = Sequence::new("demo");
        let mut bad = step("Bad", &["missing", "missing"]);
        bad.name = " ".into();
        seq.steps.push(bad);
        seq.gates.push(Gate::new("Bad", "dup"));

        let violations = seq.schema_violations();
        let fields: Vec<_> = violations.iter().map(|v| v.field.as_str()).collect();

        assert!(fields.contains(&"steps[0].id"));
        assert!(fields.contains(&"steps[0].name"));
        assert!(fields.contains(&"gates[0].id"));
        assert_eq!(
            violations
                .iter()
                .filter(|v| v.field == "steps[0].depends_on")
                .count(),
            3,
            "one duplicate + two unknown references: {violations:?}"
        );
    }

    #[test]
    fn cycle_is_reported_after_schema() {
        let mut seq = Sequence::new("demo");
        seq.steps.push(step("a", &["b"]));
        seq.steps.push(step("b", &["a"]));

        match seq.validate() {
            Err(SeqError::CircularDependency(path)) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 3);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn dangling_optional_references_are_rejected() {
        let mut seq = Sequence::new("demo");
        let mut s = step("a", &[]);
        s.watchdog_for = Some("ghost".into());
        s.fanout = Some(0);
        seq.steps.push(s);

        let err = seq.validate().unwrap_err();
        match err {
            SeqError::Validation(v) => {
                assert!(v.iter().any(|f| f.field == "steps[0].watchdog_for"));
                assert!(v.iter().any(|f| f.field == "steps[0].fanout"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
