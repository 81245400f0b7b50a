use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumDiscriminants, EnumString};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuerySet {
    pub queries: Vec<Query>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub name: Token,
    pub selection: Vec<EntityDefinition>,
    pub joins: Vec<Join>,
    pub projection: Projection,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EntityKind {
    Resource,
    Role,
    Permission,
    Member,
    Group,
    User,
    Binding,
    ServiceAccount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub variable: Token,
    pub kind: EntityKind,
    pub filter: Option<Filter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Join {
    Safe(SafeJoin),
    Unsafe(UnsafeJoin),
}

/// `var.relation(arg, ...)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeJoin {
    pub variable: Token,
    pub relation: Token,
    pub args: Vec<Token>,
}

/// `a.attr == b.attr`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsafeJoin {
    pub left: AttributeRef,
    pub right: AttributeRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeRef {
    pub variable: Token,
    pub attribute: Attribute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    pub name: Token,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Filter {
    Comparison(Comparison),
    In(InOperator),
    Like(LikeOperator),
    And(And),
    Or(Or),
    Not(Not),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl ComparisonOperator {
    /// The operator with its operands swapped: `1 < x` is `x > 1`.
    pub fn mirrored(self) -> Self {
        match self {
            ComparisonOperator::Equal => ComparisonOperator::Equal,
            ComparisonOperator::NotEqual => ComparisonOperator::NotEqual,
            ComparisonOperator::Less => ComparisonOperator::Greater,
            ComparisonOperator::LessEqual => ComparisonOperator::GreaterEqual,
            ComparisonOperator::Greater => ComparisonOperator::Less,
            ComparisonOperator::GreaterEqual => ComparisonOperator::LessEqual,
        }
    }
}

/// `attribute op literal`. A `literal op attribute` comparison is stored with
/// the operator mirrored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    pub attribute: Attribute,
    pub operator: ComparisonOperator,
    pub value: Literal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InOperator {
    pub attribute: Attribute,
    pub list: LiteralList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikeOperator {
    pub attribute: Attribute,
    pub pattern: Literal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct And {
    pub left: Box<Filter>,
    pub right: Box<Filter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Or {
    pub left: Box<Filter>,
    pub right: Box<Filter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Not {
    pub filter: Box<Filter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Literal {
    String { value: String, token: Token },
    Number { value: i64, token: Token },
}

impl Literal {
    pub fn token(&self) -> &Token {
        match self {
            Literal::String { token, .. } | Literal::Number { token, .. } => token,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiteralList {
    pub items: Vec<Literal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Projection {
    pub variables: Vec<Token>,
}

/// Depth-first traversal hooks over a `QuerySet`.
///
/// Filters are walked post-order, so `leave_*` hooks of filter nodes fire for
/// children before their parent connective.
pub trait Visitor {
    type Error;

    fn enter_query_set(&mut self, _node: &QuerySet) -> Result<(), Self::Error> {
        Ok(())
    }
    fn leave_query_set(&mut self, _node: &QuerySet) -> Result<(), Self::Error> {
        Ok(())
    }
    fn enter_query(&mut self, _node: &Query) -> Result<(), Self::Error> {
        Ok(())
    }
    fn leave_query(&mut self, _node: &Query) -> Result<(), Self::Error> {
        Ok(())
    }
    fn enter_entity_definition(&mut self, _node: &EntityDefinition) -> Result<(), Self::Error> {
        Ok(())
    }
    fn leave_entity_definition(&mut self, _node: &EntityDefinition) -> Result<(), Self::Error> {
        Ok(())
    }
    fn enter_safe_join(&mut self, _node: &SafeJoin) -> Result<(), Self::Error> {
        Ok(())
    }
    fn enter_unsafe_join(&mut self, _node: &UnsafeJoin) -> Result<(), Self::Error> {
        Ok(())
    }
    fn leave_comparison(&mut self, _node: &Comparison) -> Result<(), Self::Error> {
        Ok(())
    }
    fn leave_in_operator(&mut self, _node: &InOperator) -> Result<(), Self::Error> {
        Ok(())
    }
    fn leave_like_operator(&mut self, _node: &LikeOperator) -> Result<(), Self::Error> {
        Ok(())
    }
    fn leave_and(&mut self, _node: &And) -> Result<(), Self::Error> {
        Ok(())
    }
    fn leave_or(&mut self, _node: &Or) -> Result<(), Self::Error> {
        Ok(())
    }
    fn leave_not(&mut self, _node: &Not) -> Result<(), Self::Error> {
        Ok(())
    }
    fn leave_projection(&mut self, _node: &Projection) -> Result<(), Self::Error> {
        Ok(())
    }
}

pub fn walk_query_set<V: Visitor>(visitor: &mut V, query_set: &QuerySet) -> Result<(), V::Error> {
    visitor.enter_query_set(query_set)?;
    for query in &query_set.queries {
        walk_query(visitor, query)?;
    }
    visitor.leave_query_set(query_set)
}

pub fn walk_query<V: Visitor>(visitor: &mut V, query: &Query) -> Result<(), V::Error> {
    visitor.enter_query(query)?;
    for definition in &query.selection {
        visitor.enter_entity_definition(definition)?;
        if let Some(filter) = &definition.filter {
            walk_filter(visitor, filter)?;
        }
        visitor.leave_entity_definition(definition)?;
    }
    for join in &query.joins {
        match join {
            Join::Safe(safe_join) => visitor.enter_safe_join(safe_join)?,
            Join::Unsafe(unsafe_join) => visitor.enter_unsafe_join(unsafe_join)?,
        }
    }
    visitor.leave_projection(&query.projection)?;
    visitor.leave_query(query)
}

pub fn walk_filter<V: Visitor>(visitor: &mut V, filter: &Filter) -> Result<(), V::Error> {
    match filter {
        Filter::Comparison(comparison) => visitor.leave_comparison(comparison),
        Filter::In(in_operator) => visitor.leave_in_operator(in_operator),
        Filter::Like(like_operator) => visitor.leave_like_operator(like_operator),
        Filter::And(and) => {
            walk_filter(visitor, &and.left)?;
            walk_filter(visitor, &and.right)?;
            visitor.leave_and(and)
        }
        Filter::Or(or) => {
            walk_filter(visitor, &or.left)?;
            walk_filter(visitor, &or.right)?;
            visitor.leave_or(or)
        }
        Filter::Not(not) => {
            walk_filter(visitor, &not.filter)?;
            visitor.leave_not(not)
        }
    }
}

#[derive(PartialEq, Clone, Debug, EnumDiscriminants, Serialize, Deserialize)]
#[strum_discriminants(name(TokenTypeVariant))]
pub enum TokenType {
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftSquare,
    RightSquare,
    Comma,
    Dot,
    Colon,
    Semicolon,
    EqualEqual,
    BangEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    Identifier(String),
    String(String),
    Number(String),

    Eof,

    // Reserved keywords
    And,
    In,
    Like,
    Not,
    Or,
}

impl TokenTypeVariant {
    pub(crate) fn variant_str(&self) -> &str {
        match self {
            TokenTypeVariant::LeftParen => "(",
            TokenTypeVariant::RightParen => ")",
            TokenTypeVariant::LeftBrace => "{",
            TokenTypeVariant::RightBrace => "}",
            TokenTypeVariant::LeftSquare => "[",
            TokenTypeVariant::RightSquare => "]",
            TokenTypeVariant::Comma => ",",
            TokenTypeVariant::Dot => ".",
            TokenTypeVariant::Colon => ":",
            TokenTypeVariant::Semicolon => ";",
            TokenTypeVariant::EqualEqual => "==",
            TokenTypeVariant::BangEqual => "!=",
            TokenTypeVariant::Less => "<",
            TokenTypeVariant::LessEqual => "<=",
            TokenTypeVariant::Greater => ">",
            TokenTypeVariant::GreaterEqual => ">=",
            TokenTypeVariant::Identifier => "IDENTIFIER",
            TokenTypeVariant::String => "STRING",
            TokenTypeVariant::Number => "NUMBER",
            TokenTypeVariant::Eof => "EOF",
            TokenTypeVariant::And => "AND",
            TokenTypeVariant::In => "IN",
            TokenTypeVariant::Like => "LIKE",
            TokenTypeVariant::Not => "NOT",
            TokenTypeVariant::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenType,
    pub lexeme: String,
    pub line: u32,
    pub col: u32,
}
