//! Read-only SQL guard
//!
//! Static classification of a query before it is sent to the warehouse.
//! The query is parsed with the BigQuery dialect and passes only when every
//! statement is a query whose body (and every CTE) is a plain read. DML that
//! hides behind a `WITH` clause or a second statement is caught by walking the
//! parsed tree. Text the parser rejects is refused too; its leading keywords
//! are only used to tell the model what it tried to do.

use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::BigQueryDialect;
use sqlparser::parser::{Parser, ParserError};
use sqlparser::tokenizer::{Token, Tokenizer};
use thiserror::Error;

/// Statements that change data or schema
pub const MUTATING_KEYWORDS: [&str; 8] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "MERGE",
];

/// Keywords a read-only statement may start with
const READ_ONLY_LEADING: [&str; 2] = ["SELECT", "WITH"];

/// Why a query was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardrailViolation {
    #[error("query is empty")]
    Empty,

    #[error("{0} statements modify data and are not allowed")]
    Mutating(String),

    #[error("statements starting with {0} are not read-only")]
    NotReadOnly(String),

    #[error("query could not be parsed ({0})")]
    Unparseable(String),
}

impl GuardrailViolation {
    /// Message shown to the model so it can rewrite the query
    pub fn to_observation(&self) -> String {
        format!(
            "Query rejected by the read-only guard: {}. Only SELECT queries (optionally with WITH clauses) \
             are allowed. Rewrite the query as a read-only SELECT.",
            self
        )
    }
}

/// Check that every statement in `sql` is read-only
pub fn ensure_read_only(sql: &str) -> Result<(), GuardrailViolation> {
    let statements = match Parser::parse_sql(&BigQueryDialect {}, sql) {
        Ok(statements) => statements,
        Err(error) => return Err(classify_unparsed(sql, &error)),
    };

    if statements.is_empty() {
        return Err(GuardrailViolation::Empty);
    }
    statements.iter().try_for_each(check_statement)
}

/// Leading keyword of the first statement, upper-cased, after comments and
/// opening parentheses are skipped
pub fn leading_keyword(sql: &str) -> Option<String> {
    let tokens = Tokenizer::new(&BigQueryDialect {}, sql).tokenize().ok()?;
    leading_word(&tokens)
}

fn check_statement(statement: &Statement) -> Result<(), GuardrailViolation> {
    let keyword = match statement {
        Statement::Query(query) => return check_query(query),
        Statement::Insert { .. } => "INSERT",
        Statement::Update { .. } => "UPDATE",
        Statement::Delete { .. } => "DELETE",
        Statement::Drop { .. } => "DROP",
        Statement::AlterTable { .. } => "ALTER",
        Statement::Truncate { .. } => "TRUNCATE",
        Statement::Merge { .. } => "MERGE",
        // CREATE variants, other ALTERs, GRANT, CALL, DECLARE...
        other => {
            let rendered = other.to_string();
            let word = rendered.split_whitespace().next().unwrap_or_default();
            return Err(classify_keyword(&word.to_uppercase()));
        }
    };
    Err(GuardrailViolation::Mutating(keyword.to_string()))
}

fn check_query(query: &Query) -> Result<(), GuardrailViolation> {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            check_query(&cte.query)?;
        }
    }
    check_body(&query.body)
}

fn check_body(body: &SetExpr) -> Result<(), GuardrailViolation> {
    match body {
        SetExpr::Query(query) => check_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            check_body(left)?;
            check_body(right)
        }
        SetExpr::Insert(statement) | SetExpr::Update(statement) => check_statement(statement),
        _ => Ok(()),
    }
}

fn classify_keyword(word: &str) -> GuardrailViolation {
    if MUTATING_KEYWORDS.contains(&word) {
        GuardrailViolation::Mutating(word.to_string())
    } else {
        GuardrailViolation::NotReadOnly(word.to_string())
    }
}

/// Name the offending statement when the parser gives up. A query that starts
/// like a read but does not parse is still refused.
fn classify_unparsed(sql: &str, error: &ParserError) -> GuardrailViolation {
    let unparseable = GuardrailViolation::Unparseable(error.to_string());
    let Ok(tokens) = Tokenizer::new(&BigQueryDialect {}, sql).tokenize() else {
        return unparseable;
    };

    let mut saw_statement = false;
    for statement in tokens.split(|t| *t == Token::SemiColon) {
        let Some(word) = leading_word(statement) else {
            continue;
        };
        saw_statement = true;
        if !READ_ONLY_LEADING.contains(&word.as_str()) {
            return classify_keyword(&word);
        }
    }

    if saw_statement {
        unparseable
    } else {
        GuardrailViolation::Empty
    }
}

fn leading_word(tokens: &[Token]) -> Option<String> {
    for token in tokens {
        match token {
            Token::Whitespace(_) | Token::LParen => continue,
            Token::Word(word) if word.quote_style.is_none() => return Some(word.value.to_uppercase()),
            _ => return None,
        }
    }
    None
}
