// 🏷️ Transformation Rules - rules as data
// One loosely-typed entry per target column → a typed, compiled plan

use crate::config::ConfigSet;
use crate::error::{NormalizeError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Reserved key whose list of column names is appended after the declared columns
pub const OTHER_COLUMNS_KEY: &str = "other columns";

// ============================================================================
// RULE DEFINITION
// ============================================================================

/// A source column referenced from a mapping rule, with the checks folded onto it
#[derive(Debug, Clone, PartialEq)]
pub struct SourceColumn {
    pub name: String,
    pub require_non_null: bool,
    pub numeric: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateTimeRule {
    pub source: String,
    /// chrono format string; `None` means lenient mixed-format parsing
    pub format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Credit,
    Debit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalFill {
    pub source: String,
    pub criteria_column: String,
    /// `None` selects rows where the criteria column is null
    pub criteria_value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPart {
    /// Name of the file's parent directory
    Dir,
    /// File name without extension
    Stem,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathToken {
    pub part: PathPart,
    pub delimiter: String,
    /// Negative values count from the end
    pub index: i64,
}

/// One configuration entry, classified by shape
#[derive(Debug, Clone, PartialEq)]
pub enum RawRule {
    Constant(String),
    RequireNonNull,
    Numeric { require_non_null: bool },
    RenameFrom(SourceColumn),
    MergeFrom(Vec<SourceColumn>),
    DateFrom(DateTimeRule),
    TimeFrom(DateTimeRule),
    CreditDebitSplit {
        side: Side,
        indicator: String,
        tag: String,
        amount: String,
    },
    ConditionalFill(ConditionalFill),
    AccountRelation {
        account_key: String,
        account_value: String,
        statement_key: String,
    },
    DeriveFromPath(PathToken),
}

impl RawRule {
    /// Classify one configuration value for `column`. `Ok(None)` means the
    /// entry carries no rule (null or `false`) but still takes part in ordering.
    pub fn from_value(column: &str, value: &Value) -> Result<Option<RawRule>> {
        let rule = match value {
            Value::Null | Value::Bool(false) => return Ok(None),
            Value::Bool(true) => RawRule::RequireNonNull,
            Value::String(s) => RawRule::Constant(s.clone()),
            Value::Number(n) => {
                if n.is_f64() {
                    return Err(NormalizeError::config(
                        column,
                        "floating point rule values are not supported",
                    ));
                }
                RawRule::Numeric {
                    require_non_null: n.as_i64().map(|i| i != 0).unwrap_or(true),
                }
            }
            Value::Object(map) => Self::from_mapping(column, map)?,
            Value::Array(items) => Self::from_list(column, items)?,
        };
        Ok(Some(rule))
    }

    fn from_mapping(column: &str, map: &Map<String, Value>) -> Result<RawRule> {
        let mut sources = map
            .iter()
            .map(|(name, flag)| source_column(column, name, flag))
            .collect::<Result<Vec<_>>>()?;

        match sources.len() {
            0 => Err(NormalizeError::config(column, "empty mapping")),
            1 => Ok(RawRule::RenameFrom(sources.remove(0))),
            _ => Ok(RawRule::MergeFrom(sources)),
        }
    }

    fn from_list(column: &str, items: &[Value]) -> Result<RawRule> {
        let tag = match items.first() {
            Some(Value::String(tag)) => tag.as_str(),
            Some(_) => return Err(NormalizeError::config(column, "list rule must start with a tag")),
            None => return Err(NormalizeError::config(column, "empty list rule")),
        };

        match tag {
            "date" | "time" => {
                expect_len(column, tag, items, 2..=3)?;
                let rule = DateTimeRule {
                    source: string_at(column, items, 1)?,
                    format: optional_string_at(column, items, 2)?,
                };
                Ok(if tag == "date" {
                    RawRule::DateFrom(rule)
                } else {
                    RawRule::TimeFrom(rule)
                })
            }
            "C" | "D" => {
                expect_len(column, tag, items, 4..=4)?;
                Ok(RawRule::CreditDebitSplit {
                    side: if tag == "C" { Side::Credit } else { Side::Debit },
                    indicator: string_at(column, items, 1)?,
                    tag: scalar_at(column, items, 2)?.ok_or_else(|| {
                        NormalizeError::config(column, "credit/debit tag must not be null")
                    })?,
                    amount: string_at(column, items, 3)?,
                })
            }
            "fill" => {
                expect_len(column, tag, items, 4..=4)?;
                Ok(RawRule::ConditionalFill(ConditionalFill {
                    criteria_column: string_at(column, items, 1)?,
                    criteria_value: scalar_at(column, items, 2)?,
                    source: string_at(column, items, 3)?,
                }))
            }
            "acc" => {
                expect_len(column, tag, items, 4..=4)?;
                Ok(RawRule::AccountRelation {
                    account_key: string_at(column, items, 1)?,
                    account_value: string_at(column, items, 2)?,
                    statement_key: string_at(column, items, 3)?,
                })
            }
            "path" => {
                expect_len(column, tag, items, 4..=4)?;
                let part = match string_at(column, items, 1)?.as_str() {
                    "dir" => PathPart::Dir,
                    "stem" => PathPart::Stem,
                    other => {
                        return Err(NormalizeError::config(
                            column,
                            format!("path part must be 'dir' or 'stem', got '{}'", other),
                        ))
                    }
                };
                let index = items[3].as_i64().ok_or_else(|| {
                    NormalizeError::config(column, "path token index must be an integer")
                })?;
                Ok(RawRule::DeriveFromPath(PathToken {
                    part,
                    delimiter: string_at(column, items, 2)?,
                    index,
                }))
            }
            other => Err(NormalizeError::config(
                column,
                format!("unknown list rule tag '{}'", other),
            )),
        }
    }
}

fn source_column(column: &str, name: &str, flag: &Value) -> Result<SourceColumn> {
    let (require_non_null, numeric) = match flag {
        Value::Null | Value::Bool(false) => (false, false),
        Value::Bool(true) => (true, false),
        Value::String(s) => (!s.is_empty(), false),
        Value::Number(n) if !n.is_f64() => (n.as_i64().map(|i| i != 0).unwrap_or(true), true),
        _ => {
            return Err(NormalizeError::config(
                column,
                format!("unsupported flag for source column '{}'", name),
            ))
        }
    };
    Ok(SourceColumn {
        name: name.to_string(),
        require_non_null,
        numeric,
    })
}

fn expect_len(
    column: &str,
    tag: &str,
    items: &[Value],
    range: std::ops::RangeInclusive<usize>,
) -> Result<()> {
    if range.contains(&items.len()) {
        Ok(())
    } else {
        Err(NormalizeError::config(
            column,
            format!(
                "'{}' rule expects {} to {} elements, got {}",
                tag,
                range.start(),
                range.end(),
                items.len()
            ),
        ))
    }
}

fn string_at(column: &str, items: &[Value], i: usize) -> Result<String> {
    match items.get(i) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(NormalizeError::config(
            column,
            format!("element {} must be a string", i),
        )),
    }
}

fn optional_string_at(column: &str, items: &[Value], i: usize) -> Result<Option<String>> {
    match items.get(i) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(NormalizeError::config(
            column,
            format!("element {} must be a string or null", i),
        )),
    }
}

/// Strings and numbers compare against cell text, so numbers are kept in rendered form
fn scalar_at(column: &str, items: &[Value], i: usize) -> Result<Option<String>> {
    match items.get(i) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(NormalizeError::config(
            column,
            format!("element {} must be a string, number or null", i),
        )),
    }
}

// ============================================================================
// COMPILED PLAN
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CreditDebitSplit {
    pub indicator: String,
    pub credit_tag: String,
    /// Informational only: every row whose indicator is not the credit tag is debit
    pub debit_tag: String,
    pub amount: String,
    pub credit_column: String,
    pub debit_column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountRelation {
    /// Statement column that receives the joined value
    pub target: String,
    pub account_key: String,
    pub account_value: String,
    pub statement_key: String,
}

/// Rule set partitioned by kind, in declaration order within each kind
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledPlan {
    pub constants: Vec<(String, String)>,
    pub path_tokens: Vec<(String, PathToken)>,
    pub required: Vec<String>,
    pub numeric: Vec<String>,
    /// (source, target)
    pub renames: Vec<(String, String)>,
    pub merges: Vec<(String, Vec<String>)>,
    pub dates: Vec<(String, DateTimeRule)>,
    pub times: Vec<(String, DateTimeRule)>,
    pub credit_debit: Option<CreditDebitSplit>,
    pub fills: Vec<(String, ConditionalFill)>,
    pub account_relations: Vec<AccountRelation>,
    /// Final output columns, each exactly once
    pub column_order: Vec<String>,
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}

type PendingSide = Option<(String, String, String, String)>;

/// Compile a rule set (target column → rule value) into a plan
pub fn compile(rules: &Map<String, Value>) -> Result<CompiledPlan> {
    let mut plan = CompiledPlan::default();
    let mut credit: PendingSide = None;
    let mut debit: PendingSide = None;
    let mut other_columns: Vec<String> = Vec::new();

    for (target, value) in rules {
        if target == OTHER_COLUMNS_KEY {
            other_columns = parse_other_columns(value)?;
            continue;
        }
        push_unique(&mut plan.column_order, target);

        let rule = match RawRule::from_value(target, value)? {
            Some(rule) => rule,
            None => continue,
        };

        match rule {
            RawRule::Constant(text) => plan.constants.push((target.clone(), text)),
            RawRule::RequireNonNull => push_unique(&mut plan.required, target),
            RawRule::Numeric { require_non_null } => {
                push_unique(&mut plan.numeric, target);
                if require_non_null {
                    push_unique(&mut plan.required, target);
                }
            }
            RawRule::RenameFrom(source) => {
                if plan.renames.iter().any(|(from, _)| *from == source.name) {
                    return Err(NormalizeError::config(
                        target,
                        format!("source column '{}' is renamed more than once", source.name),
                    ));
                }
                fold_source_flags(&mut plan, &source);
                plan.renames.push((source.name, target.clone()));
            }
            RawRule::MergeFrom(sources) => {
                for source in &sources {
                    fold_source_flags(&mut plan, source);
                }
                plan.merges
                    .push((target.clone(), sources.into_iter().map(|s| s.name).collect()));
            }
            RawRule::DateFrom(rule) => plan.dates.push((target.clone(), rule)),
            RawRule::TimeFrom(rule) => plan.times.push((target.clone(), rule)),
            RawRule::CreditDebitSplit {
                side,
                indicator,
                tag,
                amount,
            } => {
                let slot = match side {
                    Side::Credit => &mut credit,
                    Side::Debit => &mut debit,
                };
                if slot.is_some() {
                    return Err(NormalizeError::config(
                        target,
                        "credit/debit side declared more than once",
                    ));
                }
                *slot = Some((target.clone(), indicator, tag, amount));
            }
            RawRule::ConditionalFill(fill) => plan.fills.push((target.clone(), fill)),
            RawRule::AccountRelation {
                account_key,
                account_value,
                statement_key,
            } => plan.account_relations.push(AccountRelation {
                target: target.clone(),
                account_key,
                account_value,
                statement_key,
            }),
            RawRule::DeriveFromPath(token) => plan.path_tokens.push((target.clone(), token)),
        }
    }

    plan.credit_debit = pair_credit_debit(credit, debit)?;

    for column in other_columns {
        push_unique(&mut plan.column_order, &column);
    }

    Ok(plan)
}

fn fold_source_flags(plan: &mut CompiledPlan, source: &SourceColumn) {
    if source.require_non_null {
        push_unique(&mut plan.required, &source.name);
    }
    if source.numeric {
        push_unique(&mut plan.numeric, &source.name);
    }
}

fn pair_credit_debit(credit: PendingSide, debit: PendingSide) -> Result<Option<CreditDebitSplit>> {
    match (credit, debit) {
        (None, None) => Ok(None),
        (Some((c_col, c_ind, c_tag, c_amt)), Some((d_col, d_ind, d_tag, d_amt))) => {
            if c_ind != d_ind || c_amt != d_amt {
                return Err(NormalizeError::config(
                    format!("{}/{}", c_col, d_col),
                    "credit and debit rules must share indicator and amount columns",
                ));
            }
            Ok(Some(CreditDebitSplit {
                indicator: c_ind,
                credit_tag: c_tag,
                debit_tag: d_tag,
                amount: c_amt,
                credit_column: c_col,
                debit_column: d_col,
            }))
        }
        (Some((col, ..)), None) | (None, Some((col, ..))) => Err(NormalizeError::config(
            col,
            "credit/debit split needs both a 'C' and a 'D' rule",
        )),
    }
}

fn parse_other_columns(value: &Value) -> Result<Vec<String>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    NormalizeError::config(OTHER_COLUMNS_KEY, "entries must be column names")
                })
            })
            .collect(),
        _ => Err(NormalizeError::config(
            OTHER_COLUMNS_KEY,
            "must be a list of column names",
        )),
    }
}

// ============================================================================
// PLAN REGISTRY
// ============================================================================

/// Compiled plans for one batch, keyed by (source, category label).
/// Entries are immutable once inserted.
#[derive(Debug, Default)]
pub struct PlanRegistry {
    plans: HashMap<(String, String), Arc<CompiledPlan>>,
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached plan for (source, category), compiling it on first use
    pub fn get_or_compile(
        &mut self,
        config: &ConfigSet,
        source: &str,
        category: &str,
    ) -> Result<Arc<CompiledPlan>> {
        let key = (source.to_string(), category.to_string());
        if let Some(plan) = self.plans.get(&key) {
            log::debug!("plan cache hit for {}:{}", source, category);
            return Ok(Arc::clone(plan));
        }

        let rules = config.rule_set(source, category)?;
        let plan = Arc::new(compile(rules)?);
        log::debug!(
            "compiled plan for {}:{} ({} output columns)",
            source,
            category,
            plan.column_order.len()
        );
        self.plans.insert(key, Arc::clone(&plan));
        Ok(plan)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
