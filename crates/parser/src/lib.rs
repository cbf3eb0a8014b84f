//! SQL surface: a hand-written lexer and recursive-descent parser for the
//! supported grammar (DDL, DML, SELECT with joins/grouping/ordering, and
//! transaction control). Errors are `DbError::Syntax` with a description
//! of what was expected; the parser never panics on malformed input.

mod ast;
mod lexer;
#[cfg(test)]
mod tests;

pub use ast::*;

use common::{DbError, DbResult};
use expr::{AggFunc, BinaryOp, Expr, UnaryOp};
use lexer::{lex, Token};
use types::{SqlType, Value};

/// Parses a script into its statements.
pub fn parse_sql(sql: &str) -> DbResult<Vec<Statement>> {
    let tokens = lex(sql)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut statements = Vec::new();
    while !parser.at_end() {
        if parser.accept(&Token::Semicolon) {
            continue;
        }
        statements.push(parser.parse_statement()?);
        if !parser.at_end() && !parser.accept(&Token::Semicolon) {
            return Err(parser.unexpected("';' between statements"));
        }
    }
    Ok(statements)
}

/// Keywords that terminate an implicit alias position.
const CLAUSE_KEYWORDS: &[&str] = &[
    "where", "group", "having", "order", "limit", "join", "inner", "left", "right", "full",
    "outer", "on", "for", "set", "values", "as", "union", "cross",
];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn accept(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> DbResult<()> {
        if self.accept(token) {
            Ok(())
        } else {
            Err(self.unexpected(&token.describe()))
        }
    }

    fn peek_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == kw)
    }

    fn accept_kw(&mut self, kw: &str) -> bool {
        if self.peek_kw(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, kw: &str) -> DbResult<()> {
        if self.accept_kw(kw) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", kw.to_uppercase())))
        }
    }

    fn expect_ident(&mut self, what: &str) -> DbResult<String> {
        match self.bump() {
            Some(Token::Ident(s)) => Ok(s),
            Some(Token::QuotedIdent(s)) => Ok(s),
            Some(other) => Err(DbError::Syntax(format!(
                "expected {what}, found {}",
                other.describe()
            ))),
            None => Err(DbError::Syntax(format!(
                "expected {what}, found end of input"
            ))),
        }
    }

    fn unexpected(&self, expected: &str) -> DbError {
        match self.peek() {
            Some(token) => DbError::Syntax(format!(
                "expected {expected}, found {}",
                token.describe()
            )),
            None => DbError::Syntax(format!("expected {expected}, found end of input")),
        }
    }

    // ---- statements ----

    fn parse_statement(&mut self) -> DbResult<Statement> {
        if self.accept_kw("create") {
            if self.accept_kw("table") {
                return self.parse_create_table();
            }
            if self.accept_kw("index") {
                return self.parse_create_index();
            }
            return Err(self.unexpected("'TABLE' or 'INDEX'"));
        }
        if self.accept_kw("drop") {
            if self.accept_kw("table") {
                let name = self.expect_ident("table name")?;
                return Ok(Statement::DropTable { name });
            }
            if self.accept_kw("index") {
                let name = self.expect_ident("index name")?;
                return Ok(Statement::DropIndex { name });
            }
            return Err(self.unexpected("'TABLE' or 'INDEX'"));
        }
        if self.accept_kw("insert") {
            return self.parse_insert();
        }
        if self.accept_kw("select") {
            return self.parse_select().map(Statement::Select);
        }
        if self.accept_kw("update") {
            return self.parse_update();
        }
        if self.accept_kw("delete") {
            return self.parse_delete();
        }
        if self.accept_kw("begin") {
            self.accept_kw("transaction");
            return Ok(Statement::Begin);
        }
        if self.accept_kw("commit") {
            return Ok(Statement::Commit);
        }
        if self.accept_kw("rollback") {
            return Ok(Statement::Rollback);
        }
        Err(self.unexpected("a statement"))
    }

    fn parse_create_table(&mut self) -> DbResult<Statement> {
        let name = self.expect_ident("table name")?;
        self.expect(&Token::LParen)?;

        let mut columns: Vec<ColumnDef> = Vec::new();
        let mut table_pk: Option<Vec<String>> = None;
        loop {
            if self.accept_kw("primary") {
                self.expect_kw("key")?;
                self.expect(&Token::LParen)?;
                let mut pk = Vec::new();
                loop {
                    pk.push(self.expect_ident("column name")?);
                    if !self.accept(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RParen)?;
                if table_pk.replace(pk).is_some() {
                    return Err(DbError::Syntax("duplicate PRIMARY KEY clause".into()));
                }
            } else {
                columns.push(self.parse_column_def()?);
            }
            if !self.accept(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;

        if let Some(pk) = table_pk {
            if columns.iter().any(|c| c.primary_key) {
                return Err(DbError::Syntax(
                    "PRIMARY KEY declared both inline and at table level".into(),
                ));
            }
            for pk_col in &pk {
                let column = columns
                    .iter_mut()
                    .find(|c| c.name.eq_ignore_ascii_case(pk_col))
                    .ok_or_else(|| {
                        DbError::Semantic(format!("PRIMARY KEY names unknown column '{pk_col}'"))
                    })?;
                column.primary_key = true;
                column.unique = true;
                column.nullable = false;
            }
        }

        Ok(Statement::CreateTable { name, columns })
    }

    fn parse_column_def(&mut self) -> DbResult<ColumnDef> {
        let name = self.expect_ident("column name")?;
        let type_name = self.expect_ident("column type")?;
        let (ty, declared_len) = match type_name.as_str() {
            "int" | "integer" => (SqlType::Integer, 0),
            "bigint" => (SqlType::BigInt, 0),
            "double" | "float" => (SqlType::Double, 0),
            "boolean" | "bool" => (SqlType::Boolean, 0),
            "timestamp" => (SqlType::Timestamp, 0),
            "varchar" => {
                self.expect(&Token::LParen)?;
                let len = self.parse_unsigned("VARCHAR length")?;
                self.expect(&Token::RParen)?;
                (SqlType::Varchar, len as u32)
            }
            other => {
                return Err(DbError::Syntax(format!("unknown column type '{other}'")));
            }
        };

        let mut def = ColumnDef {
            name,
            ty,
            declared_len,
            nullable: true,
            primary_key: false,
            unique: false,
        };
        loop {
            if self.accept_kw("primary") {
                self.expect_kw("key")?;
                def.primary_key = true;
                def.unique = true;
                def.nullable = false;
            } else if self.accept_kw("not") {
                self.expect_kw("null")?;
                def.nullable = false;
            } else if self.accept_kw("unique") {
                def.unique = true;
            } else {
                break;
            }
        }
        Ok(def)
    }

    fn parse_create_index(&mut self) -> DbResult<Statement> {
        let name = self.expect_ident("index name")?;
        self.expect_kw("on")?;
        let table = self.expect_ident("table name")?;
        self.expect(&Token::LParen)?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.expect_ident("column name")?);
            if !self.accept(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(Statement::CreateIndex {
            name,
            table,
            columns,
        })
    }

    fn parse_insert(&mut self) -> DbResult<Statement> {
        self.expect_kw("into")?;
        let table = self.expect_ident("table name")?;

        let columns = if self.accept(&Token::LParen) {
            let mut cols = Vec::new();
            loop {
                cols.push(self.expect_ident("column name")?);
                if !self.accept(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen)?;
            Some(cols)
        } else {
            None
        };

        self.expect_kw("values")?;
        let mut rows = Vec::new();
        loop {
            self.expect(&Token::LParen)?;
            let mut row = Vec::new();
            loop {
                row.push(self.parse_expr()?);
                if !self.accept(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen)?;
            rows.push(row);
            if !self.accept(&Token::Comma) {
                break;
            }
        }

        Ok(Statement::Insert {
            table,
            columns,
            rows,
        })
    }

    fn parse_select(&mut self) -> DbResult<SelectStatement> {
        let distinct = self.accept_kw("distinct");

        let mut items = Vec::new();
        loop {
            if self.accept(&Token::Star) {
                items.push(SelectItem::Wildcard);
            } else {
                let expr = self.parse_expr()?;
                let alias = if self.accept_kw("as") {
                    Some(self.expect_ident("alias")?)
                } else {
                    None
                };
                items.push(SelectItem::Expr { expr, alias });
            }
            if !self.accept(&Token::Comma) {
                break;
            }
        }

        self.expect_kw("from")?;
        let from = self.parse_table_ref()?;

        let as_of_tx = if self.accept_kw("for") {
            self.expect_kw("system_time")?;
            self.expect_kw("as")?;
            self.expect_kw("of")?;
            self.expect_kw("tx")?;
            Some(self.parse_unsigned("transaction number")?)
        } else {
            None
        };

        let mut joins = Vec::new();
        loop {
            let join_type = if self.accept_kw("join") {
                JoinType::Inner
            } else if self.accept_kw("inner") {
                self.expect_kw("join")?;
                JoinType::Inner
            } else if self.accept_kw("left") {
                self.accept_kw("outer");
                self.expect_kw("join")?;
                JoinType::LeftOuter
            } else {
                break;
            };
            let table = self.parse_table_ref()?;
            self.expect_kw("on")?;
            let on = self.parse_expr()?;
            joins.push(JoinClause {
                join_type,
                table,
                on,
            });
        }

        let selection = if self.accept_kw("where") {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let group_by = if self.accept_kw("group") {
            self.expect_kw("by")?;
            let mut exprs = Vec::new();
            loop {
                exprs.push(self.parse_expr()?);
                if !self.accept(&Token::Comma) {
                    break;
                }
            }
            exprs
        } else {
            Vec::new()
        };

        let having = if self.accept_kw("having") {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let order_by = if self.accept_kw("order") {
            self.expect_kw("by")?;
            let mut keys = Vec::new();
            loop {
                keys.push(self.parse_order_item()?);
                if !self.accept(&Token::Comma) {
                    break;
                }
            }
            keys
        } else {
            Vec::new()
        };

        let limit = if self.accept_kw("limit") {
            Some(self.parse_unsigned("LIMIT count")?)
        } else {
            None
        };

        Ok(SelectStatement {
            distinct,
            items,
            from,
            joins,
            selection,
            group_by,
            having,
            order_by,
            limit,
            as_of_tx,
        })
    }

    fn parse_table_ref(&mut self) -> DbResult<TableRef> {
        let name = self.expect_ident("table name")?;
        let alias = if self.accept_kw("as") {
            Some(self.expect_ident("alias")?)
        } else {
            match self.peek() {
                Some(Token::Ident(s)) if !CLAUSE_KEYWORDS.contains(&s.as_str()) => {
                    let alias = s.clone();
                    self.pos += 1;
                    Some(alias)
                }
                _ => None,
            }
        };
        Ok(TableRef { name, alias })
    }

    fn parse_order_item(&mut self) -> DbResult<OrderByExpr> {
        let first = self.expect_ident("column name")?;
        let (table, column) = if self.accept(&Token::Dot) {
            (Some(first), self.expect_ident("column name")?)
        } else {
            (None, first)
        };
        let desc = if self.accept_kw("desc") {
            true
        } else {
            self.accept_kw("asc");
            false
        };
        Ok(OrderByExpr { table, column, desc })
    }

    fn parse_update(&mut self) -> DbResult<Statement> {
        let table = self.expect_ident("table name")?;
        self.expect_kw("set")?;

        let mut assignments = Vec::new();
        loop {
            let column = self.expect_ident("column name")?;
            self.expect(&Token::Eq)?;
            assignments.push((column, self.parse_expr()?));
            if !self.accept(&Token::Comma) {
                break;
            }
        }

        let selection = if self.accept_kw("where") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Statement::Update {
            table,
            assignments,
            selection,
        })
    }

    fn parse_delete(&mut self) -> DbResult<Statement> {
        self.expect_kw("from")?;
        let table = self.expect_ident("table name")?;
        let selection = if self.accept_kw("where") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Statement::Delete { table, selection })
    }

    fn parse_unsigned(&mut self, what: &str) -> DbResult<u64> {
        match self.bump() {
            Some(Token::Number(n)) => n
                .parse::<u64>()
                .map_err(|_| DbError::Syntax(format!("invalid {what}: {n}"))),
            Some(other) => Err(DbError::Syntax(format!(
                "expected {what}, found {}",
                other.describe()
            ))),
            None => Err(DbError::Syntax(format!(
                "expected {what}, found end of input"
            ))),
        }
    }

    // ---- expressions (precedence climbing) ----

    fn parse_expr(&mut self) -> DbResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> DbResult<Expr> {
        let mut left = self.parse_and()?;
        while self.accept_kw("or") {
            let right = self.parse_and()?;
            left = Expr::binary(left, BinaryOp::Or, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> DbResult<Expr> {
        let mut left = self.parse_not()?;
        while self.accept_kw("and") {
            let right = self.parse_not()?;
            left = Expr::binary(left, BinaryOp::And, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> DbResult<Expr> {
        if self.accept_kw("not") {
            let inner = self.parse_not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(inner),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> DbResult<Expr> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Eq) => Some(BinaryOp::Eq),
            Some(Token::Ne) => Some(BinaryOp::Ne),
            Some(Token::Lt) => Some(BinaryOp::Lt),
            Some(Token::Le) => Some(BinaryOp::Le),
            Some(Token::Gt) => Some(BinaryOp::Gt),
            Some(Token::Ge) => Some(BinaryOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let right = self.parse_additive()?;
            return Ok(Expr::binary(left, op, right));
        }
        if self.accept_kw("is") {
            let negated = self.accept_kw("not");
            self.expect_kw("null")?;
            return Ok(Expr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> DbResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> DbResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> DbResult<Expr> {
        if self.accept(&Token::Minus) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(inner),
            });
        }
        if self.accept(&Token::Plus) {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> DbResult<Expr> {
        match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Literal(parse_number_literal(&n)?))
            }
            Some(Token::Str(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(Value::Varchar(s)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                match name.as_str() {
                    "true" => return Ok(Expr::Literal(Value::Boolean(true))),
                    "false" => return Ok(Expr::Literal(Value::Boolean(false))),
                    "null" => return Ok(Expr::Literal(Value::Null)),
                    _ => {}
                }
                if self.peek() == Some(&Token::LParen) {
                    return self.parse_function(&name);
                }
                if self.accept(&Token::Dot) {
                    let column = self.expect_ident("column name")?;
                    return Ok(Expr::Column {
                        table: Some(name),
                        name: column,
                    });
                }
                Ok(Expr::Column { table: None, name })
            }
            Some(Token::QuotedIdent(name)) => {
                self.pos += 1;
                if self.accept(&Token::Dot) {
                    let column = self.expect_ident("column name")?;
                    return Ok(Expr::Column {
                        table: Some(name),
                        name: column,
                    });
                }
                Ok(Expr::Column { table: None, name })
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    fn parse_function(&mut self, name: &str) -> DbResult<Expr> {
        self.expect(&Token::LParen)?;
        let func = match name {
            "count" => {
                if self.accept(&Token::Star) {
                    self.expect(&Token::RParen)?;
                    return Ok(Expr::Aggregate {
                        func: AggFunc::CountStar,
                        arg: None,
                    });
                }
                AggFunc::Count
            }
            "sum" => AggFunc::Sum,
            "avg" => AggFunc::Avg,
            "min" => AggFunc::Min,
            "max" => AggFunc::Max,
            other => return Err(DbError::Syntax(format!("unknown function '{other}'"))),
        };
        let arg = self.parse_expr()?;
        self.expect(&Token::RParen)?;
        Ok(Expr::Aggregate {
            func,
            arg: Some(Box::new(arg)),
        })
    }
}

fn parse_number_literal(text: &str) -> DbResult<Value> {
    if text.contains('.') || text.contains('e') {
        let v = text
            .parse::<f64>()
            .map_err(|_| DbError::Syntax(format!("invalid numeric literal: {text}")))?;
        return Ok(Value::Double(v));
    }
    let v = text
        .parse::<i64>()
        .map_err(|_| DbError::Syntax(format!("invalid integer literal: {text}")))?;
    Ok(match i32::try_from(v) {
        Ok(small) => Value::Integer(small),
        Err(_) => Value::BigInt(v),
    })
}
