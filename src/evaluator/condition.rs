use serde_json::{Map, Value};

use super::expression::{parse_condition, ExpressionError};
use super::operators::{compare_numbers, contains, equal, is_truthy};
use crate::dsl::schema::DecisionCondition;
use crate::template::lookup_path;

/// Comparison operators understood by decision conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    In,
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Field(String),
    Literal(Value),
}

impl Operand {
    fn resolve<'a>(&'a self, values: &'a Map<String, Value>) -> &'a Value {
        static NULL: Value = Value::Null;
        match self {
            Operand::Field(path) => lookup_path(values, path).unwrap_or(&NULL),
            Operand::Literal(value) => value,
        }
    }
}

/// Compiled condition. Evaluation only reads the context.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Const(bool),
    Truthy(Operand),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn evaluate(&self, values: &Map<String, Value>) -> bool {
        match self {
            Predicate::Const(b) => *b,
            Predicate::Truthy(operand) => is_truthy(operand.resolve(values)),
            Predicate::Compare { left, op, right } => {
                compare(left.resolve(values), *op, right.resolve(values))
            }
            Predicate::Not(inner) => !inner.evaluate(values),
            Predicate::And(items) => items.iter().all(|p| p.evaluate(values)),
            Predicate::Or(items) => items.iter().any(|p| p.evaluate(values)),
        }
    }

    /// Field paths referenced anywhere in the tree.
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        let mut push = |operand: &'a Operand| {
            if let Operand::Field(path) = operand {
                out.push(path.as_str());
            }
        };
        match self {
            Predicate::Const(_) => {}
            Predicate::Truthy(operand) => push(operand),
            Predicate::Compare { left, right, .. } => {
                push(left);
                push(right);
            }
            Predicate::Not(inner) => inner.collect_fields(out),
            Predicate::And(items) | Predicate::Or(items) => {
                for item in items {
                    item.collect_fields(out);
                }
            }
        }
    }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> bool {
    use std::cmp::Ordering;
    match op {
        CompareOp::Eq => equal(left, right),
        CompareOp::Ne => !equal(left, right),
        CompareOp::Gt => compare_numbers(left, right) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(
            compare_numbers(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CompareOp::Lt => compare_numbers(left, right) == Some(Ordering::Less),
        CompareOp::Le => matches!(
            compare_numbers(left, right),
            Some(Ordering::Less | Ordering::Equal)
        ),
        CompareOp::Contains => contains(left, right),
        CompareOp::In => contains(right, left),
    }
}

/// A single `(condition, target)` pair of a decision node.
#[derive(Debug, Clone)]
pub struct DecisionBranch {
    pub label: String,
    pub target: String,
    pub source: String,
    pub predicate: Predicate,
}

/// Decision node resolved once per flow version.
#[derive(Debug, Clone)]
pub struct CompiledDecision {
    pub branches: Vec<DecisionBranch>,
    pub default_target: String,
}

/// Result of resolving a decision against a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSelection {
    pub label: String,
    pub target: String,
    /// Index of the matching branch; `None` when the default was taken.
    pub matched: Option<usize>,
}

pub const DEFAULT_BRANCH_LABEL: &str = "default";

impl CompiledDecision {
    /// Compile every condition. The error carries the index of the first
    /// condition that failed.
    pub fn compile(
        conditions: &[DecisionCondition],
        default_target: impl Into<String>,
    ) -> Result<Self, (usize, ExpressionError)> {
        let branches = conditions
            .iter()
            .enumerate()
            .map(|(index, cond)| {
                let predicate = parse_condition(&cond.condition).map_err(|e| (index, e))?;
                Ok(DecisionBranch {
                    label: cond
                        .label
                        .clone()
                        .unwrap_or_else(|| cond.target_node_id.clone()),
                    target: cond.target_node_id.clone(),
                    source: cond.condition.clone(),
                    predicate,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            branches,
            default_target: default_target.into(),
        })
    }

    /// First true condition in declaration order, else the default target.
    pub fn select(&self, values: &Map<String, Value>) -> BranchSelection {
        for (index, branch) in self.branches.iter().enumerate() {
            if branch.predicate.evaluate(values) {
                return BranchSelection {
                    label: branch.label.clone(),
                    target: branch.target.clone(),
                    matched: Some(index),
                };
            }
        }
        self.default_selection()
    }

    pub fn default_selection(&self) -> BranchSelection {
        BranchSelection {
            label: DEFAULT_BRANCH_LABEL.to_string(),
            target: self.default_target.clone(),
            matched: None,
        }
    }

    /// Every node id this decision can route to.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.branches
            .iter()
            .map(|b| b.target.as_str())
            .chain(std::iter::once(self.default_target.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn cond(condition: &str, target: &str) -> DecisionCondition {
        DecisionCondition {
            condition: condition.to_string(),
            target_node_id: target.to_string(),
            label: None,
        }
    }

    fn routing() -> CompiledDecision {
        CompiledDecision::compile(
            &[
                cond("intent == '投诉' && emotion == 'angry'", "staff"),
                cond("needHuman == true", "staff_general"),
                cond("qaMatched == true", "send"),
                cond("intent in ['售后', '退款']", "after_sales"),
            ],
            "ai_reply",
        )
        .unwrap()
    }

    #[test]
    fn test_first_true_in_array_order_table() {
        let decision = routing();
        let table = vec![
            (json!({"intent": "投诉", "emotion": "angry", "needHuman": true}), "staff"),
            (json!({"intent": "投诉", "emotion": "calm", "needHuman": true}), "staff_general"),
            (json!({"intent": "chat", "qaMatched": true, "needHuman": true}), "staff_general"),
            (json!({"intent": "chat", "qaMatched": true}), "send"),
            (json!({"intent": "退款"}), "after_sales"),
            (json!({"intent": "chat"}), "ai_reply"),
            (json!({}), "ai_reply"),
        ];
        for (values, expected) in table {
            let selection = decision.select(&ctx(values.clone()));
            assert_eq!(selection.target, expected, "context: {}", values);
        }
    }

    #[test]
    fn test_default_selection_label() {
        let selection = routing().select(&ctx(json!({"intent": "chat"})));
        assert_eq!(selection.label, DEFAULT_BRANCH_LABEL);
        assert_eq!(selection.matched, None);
    }

    #[test]
    fn test_missing_field_is_null() {
        let p = parse_condition("score > 0.5").unwrap();
        assert!(!p.evaluate(&Map::new()));
        let p = parse_condition("missing == null").unwrap();
        assert!(p.evaluate(&Map::new()));
    }

    #[test]
    fn test_nested_paths_and_contains() {
        let values = ctx(json!({"event": {"spoken": "我要退货", "tags": ["vip"]}}));
        assert!(parse_condition("event.spoken contains '退货'").unwrap().evaluate(&values));
        assert!(parse_condition("event.tags contains 'vip'").unwrap().evaluate(&values));
        assert!(parse_condition("not (event.tags contains 'new')").unwrap().evaluate(&values));
    }

    #[test]
    fn test_numeric_comparisons() {
        let values = ctx(json!({"confidence": 0.82, "count": "3"}));
        assert!(parse_condition("confidence >= 0.8").unwrap().evaluate(&values));
        assert!(parse_condition("count < 4 || confidence < 0").unwrap().evaluate(&values));
        assert!(!parse_condition("confidence > 'abc'").unwrap().evaluate(&values));
    }

    #[test]
    fn test_compile_reports_failing_index() {
        let err = CompiledDecision::compile(&[cond("a == 1", "x"), cond("a = 1", "y")], "z")
            .unwrap_err();
        assert_eq!(err.0, 1);
    }

    #[test]
    fn test_fields_and_targets() {
        let decision = routing();
        assert_eq!(decision.branches[0].predicate.fields(), vec!["intent", "emotion"]);
        let targets: Vec<&str> = decision.targets().collect();
        assert_eq!(targets.last(), Some(&"ai_reply"));
        assert_eq!(targets.len(), 5);
    }
}
