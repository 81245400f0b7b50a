use indexmap::IndexMap;

use crate::error::IamqlError;
use crate::iamql::ast::{
    And, Attribute, Comparison, EntityDefinition, EntityKind, InOperator, LikeOperator, Literal,
    Not, Or, Projection, Query, QuerySet, SafeJoin, Token, UnsafeJoin, Visitor, walk_query_set,
};
use crate::iamql::plan::{PlanVariable, Predicate, QueryPlan, Scalar, Slot};
use crate::iamql::relations::{self, AttributeType};

#[derive(Debug, Clone, Copy)]
struct Variable {
    slot: Slot,
    kind: EntityKind,
}

#[derive(Debug, Default)]
struct QueryBuilder {
    name: String,
    variables: IndexMap<String, Variable>,
    predicates: Vec<Predicate>,
    projection: Vec<Slot>,
}

/// Lowers a `QuerySet` into one `QueryPlan` per query.
#[derive(Debug, Default)]
pub struct CompilationContext {
    plans: IndexMap<String, QueryPlan>,
    current: QueryBuilder,
    current_variable: Option<Variable>,
    filter_stack: Vec<Predicate>,
}

fn literal_type(literal: &Literal) -> AttributeType {
    match literal {
        Literal::String { .. } => AttributeType::String,
        Literal::Number { .. } => AttributeType::Number,
    }
}

fn scalar(literal: &Literal) -> Scalar {
    match literal {
        Literal::String { value, .. } => Scalar::String(value.clone()),
        Literal::Number { value, .. } => Scalar::Number(*value),
    }
}

impl CompilationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_plans(self) -> Vec<QueryPlan> {
        self.plans.into_values().collect()
    }

    fn variable(&self, token: &Token) -> Result<Variable, IamqlError> {
        self.current
            .variables
            .get(&token.lexeme)
            .copied()
            .ok_or_else(|| IamqlError::UndefinedVariable {
                query: self.current.name.clone(),
                variable: token.lexeme.clone(),
            })
    }

    fn resolve_attribute(
        &self,
        kind: EntityKind,
        attribute: &Attribute,
    ) -> Result<(&'static str, AttributeType), IamqlError> {
        relations::attribute(kind, &attribute.name.lexeme).ok_or_else(|| {
            IamqlError::UnknownAttribute {
                kind: kind.to_string(),
                attribute: attribute.name.lexeme.clone(),
            }
        })
    }

    /// Resolves a filter attribute against the entity being defined.
    fn filter_attribute(
        &self,
        attribute: &Attribute,
    ) -> Result<(Variable, &'static str, AttributeType), IamqlError> {
        let Some(variable) = self.current_variable else {
            return Err(IamqlError::Type(format!(
                "attribute `{}` used outside of an entity definition",
                attribute.name.lexeme
            )));
        };
        let (name, attribute_type) = self.resolve_attribute(variable.kind, attribute)?;
        Ok((variable, name, attribute_type))
    }

    fn pop_filter(&mut self) -> Result<Predicate, IamqlError> {
        self.filter_stack
            .pop()
            .ok_or_else(|| IamqlError::Type("malformed filter expression".to_owned()))
    }

    fn check_join_args(
        &self,
        rule: &relations::JoinRule,
        args: &[Variable],
    ) -> Result<(), IamqlError> {
        if rule.arg_kinds.len() != args.len() {
            return Err(IamqlError::Type(format!(
                "Relation: {}, expected {} argument(s), got {}",
                rule.relation,
                rule.arg_kinds.len(),
                args.len()
            )));
        }
        for (expected, actual) in rule.arg_kinds.iter().zip(args) {
            if !expected.accepts(actual.kind) {
                return Err(IamqlError::JoinArgumentType {
                    relation: rule.relation.to_owned(),
                    expected: expected.to_string(),
                    actual: actual.kind.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Visitor for CompilationContext {
    type Error = IamqlError;

    fn enter_query(&mut self, node: &Query) -> Result<(), IamqlError> {
        let name = node.name.lexeme.clone();
        if self.plans.contains_key(&name) {
            return Err(IamqlError::DuplicateQuery(name));
        }
        self.current = QueryBuilder {
            name,
            ..QueryBuilder::default()
        };
        Ok(())
    }

    fn enter_entity_definition(&mut self, node: &EntityDefinition) -> Result<(), IamqlError> {
        let name = node.variable.lexeme.clone();
        if self.current.variables.contains_key(&name) {
            return Err(IamqlError::DuplicateVariable {
                query: self.current.name.clone(),
                variable: name,
            });
        }
        let variable = Variable {
            slot: self.current.variables.len(),
            kind: node.kind,
        };
        self.current.variables.insert(name, variable);
        if let Some(kinds) = relations::implicit_member_kinds(node.kind) {
            self.current.predicates.push(Predicate::MemberKindIn {
                slot: variable.slot,
                kinds,
            });
        }
        self.current_variable = Some(variable);
        Ok(())
    }

    fn leave_entity_definition(&mut self, node: &EntityDefinition) -> Result<(), IamqlError> {
        if node.filter.is_some() {
            let predicate = self.pop_filter()?;
            self.current.predicates.push(predicate);
        }
        self.current_variable = None;
        Ok(())
    }

    fn leave_comparison(&mut self, node: &Comparison) -> Result<(), IamqlError> {
        let (variable, attribute, attribute_type) = self.filter_attribute(&node.attribute)?;
        let value_type = literal_type(&node.value);
        if attribute_type != value_type {
            return Err(IamqlError::Type(format!(
                "cannot compare {} attribute `{}` with {} literal {}",
                attribute_type,
                attribute,
                value_type,
                node.value.token().lexeme
            )));
        }
        self.filter_stack.push(Predicate::Compare {
            slot: variable.slot,
            attribute,
            operator: node.operator,
            value: scalar(&node.value),
        });
        Ok(())
    }

    fn leave_in_operator(&mut self, node: &InOperator) -> Result<(), IamqlError> {
        let (variable, attribute, attribute_type) = self.filter_attribute(&node.attribute)?;
        let mut item_types = node.list.items.iter().map(literal_type);
        if let Some(first) = item_types.next() {
            if item_types.any(|item_type| item_type != first) {
                return Err(IamqlError::Type(format!(
                    "list literal for `{}` mixes strings and numbers",
                    attribute
                )));
            }
            if first != attribute_type {
                return Err(IamqlError::Type(format!(
                    "cannot match {} attribute `{}` against a list of {} literals",
                    attribute_type, attribute, first
                )));
            }
        }
        self.filter_stack.push(Predicate::In {
            slot: variable.slot,
            attribute,
            values: node.list.items.iter().map(scalar).collect(),
        });
        Ok(())
    }

    fn leave_like_operator(&mut self, node: &LikeOperator) -> Result<(), IamqlError> {
        let (variable, attribute, attribute_type) = self.filter_attribute(&node.attribute)?;
        let Literal::String { value, .. } = &node.pattern else {
            return Err(IamqlError::Type(format!(
                "LIKE pattern for `{}` must be a string",
                attribute
            )));
        };
        if attribute_type != AttributeType::String {
            return Err(IamqlError::Type(format!(
                "LIKE requires a string attribute, `{}` is {}",
                attribute, attribute_type
            )));
        }
        self.filter_stack.push(Predicate::Like {
            slot: variable.slot,
            attribute,
            pattern: value.clone(),
        });
        Ok(())
    }

    fn leave_and(&mut self, _node: &And) -> Result<(), IamqlError> {
        let right = self.pop_filter()?;
        let left = self.pop_filter()?;
        self.filter_stack
            .push(Predicate::And(Box::new(left), Box::new(right)));
        Ok(())
    }

    fn leave_or(&mut self, _node: &Or) -> Result<(), IamqlError> {
        let right = self.pop_filter()?;
        let left = self.pop_filter()?;
        self.filter_stack
            .push(Predicate::Or(Box::new(left), Box::new(right)));
        Ok(())
    }

    fn leave_not(&mut self, _node: &Not) -> Result<(), IamqlError> {
        let inner = self.pop_filter()?;
        self.filter_stack.push(Predicate::Not(Box::new(inner)));
        Ok(())
    }

    fn enter_safe_join(&mut self, node: &SafeJoin) -> Result<(), IamqlError> {
        let declaring = self.variable(&node.variable)?;
        let args = node
            .args
            .iter()
            .map(|arg| self.variable(arg))
            .collect::<Result<Vec<_>, _>>()?;

        let relation = node.relation.lexeme.as_str();
        let candidates: Vec<&relations::JoinRule> = relations::join_rules(declaring.kind)
            .iter()
            .filter(|rule| rule.relation == relation)
            .collect();
        if candidates.is_empty() {
            return Err(IamqlError::UndefinedRelationship {
                kind: declaring.kind.to_string(),
                relation: relation.to_owned(),
            });
        }

        let mut first_error = None;
        for rule in candidates {
            match self.check_join_args(rule, &args) {
                Ok(()) => {
                    let slots: Vec<Slot> = std::iter::once(declaring.slot)
                        .chain(args.iter().map(|arg| arg.slot))
                        .collect();
                    self.current.predicates.push((rule.build)(&slots));
                    return Ok(());
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        Err(first_error.unwrap_or_else(|| IamqlError::UndefinedRelationship {
            kind: declaring.kind.to_string(),
            relation: relation.to_owned(),
        }))
    }

    fn enter_unsafe_join(&mut self, node: &UnsafeJoin) -> Result<(), IamqlError> {
        let left = self.variable(&node.left.variable)?;
        let right = self.variable(&node.right.variable)?;
        let (left_attribute, left_type) = self.resolve_attribute(left.kind, &node.left.attribute)?;
        let (right_attribute, right_type) =
            self.resolve_attribute(right.kind, &node.right.attribute)?;
        if left_type != right_type {
            return Err(IamqlError::Type(format!(
                "cannot join {}.{} ({}) with {}.{} ({})",
                node.left.variable.lexeme,
                left_attribute,
                left_type,
                node.right.variable.lexeme,
                right_attribute,
                right_type
            )));
        }
        self.current.predicates.push(Predicate::AttributeEq {
            left: (left.slot, left_attribute),
            right: (right.slot, right_attribute),
        });
        Ok(())
    }

    fn leave_projection(&mut self, node: &Projection) -> Result<(), IamqlError> {
        self.current.projection = node
            .variables
            .iter()
            .map(|variable| self.variable(variable).map(|v| v.slot))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(())
    }

    fn leave_query(&mut self, _node: &Query) -> Result<(), IamqlError> {
        let builder = std::mem::take(&mut self.current);
        let plan = QueryPlan {
            name: builder.name.clone(),
            variables: builder
                .variables
                .iter()
                .map(|(name, variable)| PlanVariable {
                    name: name.clone(),
                    kind: variable.kind,
                })
                .collect(),
            predicates: builder.predicates,
            projection: builder.projection,
        };
        log::debug!("Compiled plan: {:?}", plan);
        self.plans.insert(builder.name, plan);
        Ok(())
    }
}

/// Type-checks and lowers every query of `query_set`, in declaration order.
pub fn compile(query_set: &QuerySet) -> Result<Vec<QueryPlan>, IamqlError> {
    let mut context = CompilationContext::new();
    walk_query_set(&mut context, query_set)?;
    Ok(context.into_plans())
}
