use strum::IntoDiscriminant;

use crate::error::{IamqlError, ParseError};
use crate::iamql::ast::{
    And, Attribute, AttributeRef, Comparison, ComparisonOperator, EntityDefinition, EntityKind,
    Filter, InOperator, Join, LikeOperator, Literal, LiteralList, Not, Or, Projection, Query,
    QuerySet, SafeJoin, Token, TokenType, TokenTypeVariant, UnsafeJoin,
};
use crate::iamql::scanner::Scanner;

pub struct Parser<'a> {
    source_tokens: &'a Vec<Token>,
    curr: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a Vec<Token>) -> Parser<'a> {
        Self {
            source_tokens: tokens,
            curr: 0,
        }
    }

    pub fn parse(&mut self) -> Result<QuerySet, ParseError> {
        self.parse_query_set()
    }

    fn peek_prev(&self) -> &'a Token {
        &self.source_tokens[self.curr - 1]
    }

    fn peek(&self) -> &'a Token {
        &self.source_tokens[self.curr]
    }

    fn advance(&mut self) -> &'a Token {
        if !self.is_at_end() {
            // Do not advance if we peek Eof
            self.curr += 1;
            self.peek_prev()
        } else {
            self.peek()
        }
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenType::Eof
    }

    fn check_token_type(&self, token_type: TokenTypeVariant) -> bool {
        self.peek().kind.discriminant() == token_type
    }

    fn match_token_type(&mut self, token_type: TokenTypeVariant) -> bool {
        if self.check_token_type(token_type) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, token_type: TokenTypeVariant) -> Result<&'a Token, ParseError> {
        if self.check_token_type(token_type) {
            Ok(self.advance())
        } else {
            let err_msg = format!("Expected `{}`.", token_type.variant_str());
            Err(self.error(self.peek(), &err_msg))
        }
    }

    fn consume_identifier(&mut self) -> Result<&'a Token, ParseError> {
        self.consume(TokenTypeVariant::Identifier)
    }

    fn error(&self, token: &Token, message: &str) -> ParseError {
        ParseError {
            message: message.to_owned(),
            lexeme: token.lexeme.clone(),
            line: token.line,
            col: token.col,
        }
    }

    // query_set -> query+
    fn parse_query_set(&mut self) -> Result<QuerySet, ParseError> {
        let mut queries = vec![self.parse_query()?];
        while !self.check_token_type(TokenTypeVariant::Eof) {
            queries.push(self.parse_query()?);
        }
        self.consume(TokenTypeVariant::Eof)?;
        Ok(QuerySet { queries })
    }

    // query -> query_name ":" "{" entity_def+ "}" "{" join* "}" "{" projection "}"
    fn parse_query(&mut self) -> Result<Query, ParseError> {
        let name = self.consume_identifier()?.clone();
        self.consume(TokenTypeVariant::Colon)?;

        self.consume(TokenTypeVariant::LeftBrace)?;
        let mut selection = vec![self.parse_entity_definition()?];
        while !self.match_token_type(TokenTypeVariant::RightBrace) {
            selection.push(self.parse_entity_definition()?);
        }

        self.consume(TokenTypeVariant::LeftBrace)?;
        let mut joins = vec![];
        while !self.match_token_type(TokenTypeVariant::RightBrace) {
            joins.push(self.parse_join()?);
        }

        self.consume(TokenTypeVariant::LeftBrace)?;
        let projection = self.parse_projection()?;
        self.consume(TokenTypeVariant::RightBrace)?;

        Ok(Query {
            name,
            selection,
            joins,
            projection,
        })
    }

    // entity_def -> ident entity_kind ["(" filter ")"] ";"
    fn parse_entity_definition(&mut self) -> Result<EntityDefinition, ParseError> {
        let variable = self.consume_identifier()?.clone();
        let kind_token = self.consume(TokenTypeVariant::Identifier)?;
        let kind: EntityKind = kind_token.lexeme.parse().map_err(|_| {
            self.error(
                kind_token,
                "Expected entity kind: resource, role, permission, member, group, user, binding or serviceaccount.",
            )
        })?;

        let filter = if self.match_token_type(TokenTypeVariant::LeftParen) {
            let filter = self.parse_filter()?;
            self.consume(TokenTypeVariant::RightParen)?;
            Some(filter)
        } else {
            None
        };
        self.consume(TokenTypeVariant::Semicolon)?;

        Ok(EntityDefinition {
            variable,
            kind,
            filter,
        })
    }

    // join -> safe_join | unsafe_join
    // safe_join -> ident "." relation "(" ident ("," ident)* ")" ";"
    // unsafe_join -> ident "." attribute "==" ident "." attribute ";"
    fn parse_join(&mut self) -> Result<Join, ParseError> {
        let variable = self.consume_identifier()?.clone();
        self.consume(TokenTypeVariant::Dot)?;
        let member = self.consume_identifier()?.clone();

        let join = if self.match_token_type(TokenTypeVariant::LeftParen) {
            let mut args = vec![self.consume_identifier()?.clone()];
            while self.match_token_type(TokenTypeVariant::Comma) {
                args.push(self.consume_identifier()?.clone());
            }
            self.consume(TokenTypeVariant::RightParen)?;
            Join::Safe(SafeJoin {
                variable,
                relation: member,
                args,
            })
        } else if self.match_token_type(TokenTypeVariant::EqualEqual) {
            let right_variable = self.consume_identifier()?.clone();
            self.consume(TokenTypeVariant::Dot)?;
            let right_attribute = self.consume_identifier()?.clone();
            Join::Unsafe(UnsafeJoin {
                left: AttributeRef {
                    variable,
                    attribute: Attribute { name: member },
                },
                right: AttributeRef {
                    variable: right_variable,
                    attribute: Attribute {
                        name: right_attribute,
                    },
                },
            })
        } else {
            return Err(self.error(self.peek(), "Expected `(` or `==`."));
        };
        self.consume(TokenTypeVariant::Semicolon)?;
        Ok(join)
    }

    // projection -> ident ("," ident)*
    fn parse_projection(&mut self) -> Result<Projection, ParseError> {
        let mut variables = vec![self.consume_identifier()?.clone()];
        while self.match_token_type(TokenTypeVariant::Comma) {
            variables.push(self.consume_identifier()?.clone());
        }
        Ok(Projection { variables })
    }

    // filter -> "NOT" "(" filter ")"
    //         | "(" filter ")" [("AND" | "OR") "(" filter ")"]*
    //         | comparison
    fn parse_filter(&mut self) -> Result<Filter, ParseError> {
        if self.match_token_type(TokenTypeVariant::Not) {
            let filter = self.parse_grouped_filter()?;
            return Ok(Filter::Not(Not {
                filter: Box::new(filter),
            }));
        }

        if self.check_token_type(TokenTypeVariant::LeftParen) {
            let mut filter = self.parse_grouped_filter()?;
            loop {
                if self.match_token_type(TokenTypeVariant::And) {
                    let right = self.parse_grouped_filter()?;
                    filter = Filter::And(And {
                        left: Box::new(filter),
                        right: Box::new(right),
                    });
                } else if self.match_token_type(TokenTypeVariant::Or) {
                    let right = self.parse_grouped_filter()?;
                    filter = Filter::Or(Or {
                        left: Box::new(filter),
                        right: Box::new(right),
                    });
                } else {
                    break;
                }
            }
            return Ok(filter);
        }

        self.parse_comparison()
    }

    fn parse_grouped_filter(&mut self) -> Result<Filter, ParseError> {
        self.consume(TokenTypeVariant::LeftParen)?;
        let filter = self.parse_filter()?;
        self.consume(TokenTypeVariant::RightParen)?;
        Ok(filter)
    }

    // comparison -> attribute comparison_op literal
    //             | literal comparison_op attribute
    //             | attribute "IN" "[" literal ("," literal)* "]"
    //             | attribute "LIKE" string
    fn parse_comparison(&mut self) -> Result<Filter, ParseError> {
        if self.check_token_type(TokenTypeVariant::String)
            || self.check_token_type(TokenTypeVariant::Number)
        {
            let value = self.parse_literal()?;
            let operator = self.parse_comparison_operator()?;
            let attribute = self.parse_attribute()?;
            return Ok(Filter::Comparison(Comparison {
                attribute,
                operator: operator.mirrored(),
                value,
            }));
        }

        let attribute = self.parse_attribute()?;

        if self.match_token_type(TokenTypeVariant::In) {
            self.consume(TokenTypeVariant::LeftSquare)?;
            let mut items = vec![self.parse_literal()?];
            while self.match_token_type(TokenTypeVariant::Comma) {
                items.push(self.parse_literal()?);
            }
            self.consume(TokenTypeVariant::RightSquare)?;
            return Ok(Filter::In(InOperator {
                attribute,
                list: LiteralList { items },
            }));
        }

        if self.match_token_type(TokenTypeVariant::Like) {
            if !self.check_token_type(TokenTypeVariant::String) {
                return Err(self.error(self.peek(), "Expected string pattern after `LIKE`."));
            }
            let pattern = self.parse_literal()?;
            return Ok(Filter::Like(LikeOperator { attribute, pattern }));
        }

        let operator = self.parse_comparison_operator()?;
        let value = self.parse_literal()?;
        Ok(Filter::Comparison(Comparison {
            attribute,
            operator,
            value,
        }))
    }

    fn parse_attribute(&mut self) -> Result<Attribute, ParseError> {
        if !self.check_token_type(TokenTypeVariant::Identifier) {
            return Err(self.error(self.peek(), "Expected attribute."));
        }
        Ok(Attribute {
            name: self.consume_identifier()?.clone(),
        })
    }

    fn parse_comparison_operator(&mut self) -> Result<ComparisonOperator, ParseError> {
        let token = self.peek();
        let operator = match token.kind {
            TokenType::EqualEqual => ComparisonOperator::Equal,
            TokenType::BangEqual => ComparisonOperator::NotEqual,
            TokenType::Less => ComparisonOperator::Less,
            TokenType::LessEqual => ComparisonOperator::LessEqual,
            TokenType::Greater => ComparisonOperator::Greater,
            TokenType::GreaterEqual => ComparisonOperator::GreaterEqual,
            _ => {
                return Err(self.error(
                    token,
                    "Expected one of: `==` or `!=` or `<` or `<=` or `>` or `>=`.",
                ));
            }
        };
        self.advance();
        Ok(operator)
    }

    fn parse_literal(&mut self) -> Result<Literal, ParseError> {
        let token = self.peek();
        let literal = match &token.kind {
            TokenType::String(value) => Literal::String {
                value: value.clone(),
                token: token.clone(),
            },
            TokenType::Number(digits) => {
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| self.error(token, "Number literal out of range."))?;
                Literal::Number {
                    value,
                    token: token.clone(),
                }
            }
            _ => return Err(self.error(token, "Expected string or number literal.")),
        };
        self.advance();
        Ok(literal)
    }
}

/// Scans and parses IAMQL text into a `QuerySet`.
pub fn parse_iamql(text: &str) -> Result<QuerySet, IamqlError> {
    log::debug!("Parsing {}", text.chars().take(50).collect::<String>());

    let mut scanner = Scanner::new(text);

    scanner.scan()?;

    log::debug!("Tokens:");
    scanner
        .tokens()
        .iter()
        .for_each(|tok| log::debug!("{:?}", tok));

    let mut parser = Parser::new(scanner.tokens());
    let query_set = parser.parse()?;
    log::debug!("AST: {:?}", query_set);
    Ok(query_set)
}
