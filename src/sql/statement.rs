//! Session statements and their parser.
//!
//! Statements are tokenized with `sqlparser`'s tokenizer and matched by
//! hand; the grammar is small and several forms (`USE db/rev`, `@@` system
//! variables, `CALL` procedures with flag arguments) are outside what the
//! full SQL parser accepts.

use sqlparser::dialect::GenericDialect;
use sqlparser::tokenizer::{Token, Tokenizer};

use super::error::{StatementError, StatementResult};

/// suffix of the per-database default branch system variable
pub const DEFAULT_BRANCH_VARIABLE: &str = "_default_branch";

/// A parsed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `USE <db>` or `USE <db>/<rev>`
    Use(String),
    /// `CALL REVDB_CHECKOUT('<branch>')`
    Checkout { branch: String },
    /// `CALL REVDB_CHECKOUT('-b', '<new>')`
    CheckoutNew { branch: String },
    /// `CALL REVDB_BRANCH('<name>'[, '<start>'])`
    CreateBranch { name: String, start: Option<String> },
    /// `CALL REVDB_BRANCH('-d', '<name>')`
    DeleteBranch { name: String },
    /// `CALL REVDB_BRANCH('-m', '<old>', '<new>')`
    RenameBranch { old: String, new: String },
    /// `CALL REVDB_TAG('<name>'[, '<rev>'])`
    CreateTag { name: String, revision: Option<String> },
    /// `CALL REVDB_TAG('-d', '<name>')`
    DeleteTag { name: String },
    /// `CALL REVDB_COMMIT('-m', '<message>')`
    Commit { message: String },
    /// `SELECT ACTIVE_BRANCH()`
    ActiveBranch,
    ShowBranches,
    ShowTags,
    ShowTables,
    ShowDatabases,
    /// `SELECT * FROM <table>`
    SelectAll { table: String },
    /// `SET @@<db>_default_branch = '<name>'`
    SetDefaultBranch { database: String, branch: String },
}

/// Statement parser.
pub struct Parser;

impl Parser {
    /// Parse exactly one statement. A trailing semicolon is allowed.
    pub fn parse(sql: &str) -> StatementResult<Statement> {
        let mut statements = Self::split(sql)?;
        match statements.len() {
            0 => Err(StatementError::EmptyQuery),
            1 => Self::parse_tokens(statements.remove(0)),
            _ => Err(StatementError::MultipleStatements),
        }
    }

    /// Parse a semicolon separated batch.
    pub fn parse_multi(sql: &str) -> StatementResult<Vec<Statement>> {
        Self::split(sql)?.into_iter().map(Self::parse_tokens).collect()
    }

    /// tokenize and split on semicolons, dropping whitespace and empty statements
    fn split(sql: &str) -> StatementResult<Vec<Vec<Token>>> {
        let dialect = GenericDialect {};
        let tokens = Tokenizer::new(&dialect, sql).tokenize()?;

        let mut statements = Vec::new();
        let mut current = Vec::new();
        for token in tokens {
            match token {
                Token::Whitespace(_) | Token::EOF => {}
                Token::SemiColon => {
                    if !current.is_empty() {
                        statements.push(std::mem::take(&mut current));
                    }
                }
                other => current.push(other),
            }
        }
        if !current.is_empty() {
            statements.push(current);
        }
        Ok(statements)
    }

    fn parse_tokens(tokens: Vec<Token>) -> StatementResult<Statement> {
        let mut cursor = Cursor::new(tokens);
        let verb = cursor.word()?.to_uppercase();
        let statement = match verb.as_str() {
            "USE" => Statement::Use(cursor.rest_as_name()?),
            "CALL" => Self::parse_call(&mut cursor)?,
            "SELECT" => Self::parse_select(&mut cursor)?,
            "SHOW" => Self::parse_show(&mut cursor)?,
            "SET" => Self::parse_set(&mut cursor)?,
            other => return Err(StatementError::UnsupportedStatement(other.to_string())),
        };
        cursor.finish()?;
        Ok(statement)
    }

    fn parse_call(cursor: &mut Cursor) -> StatementResult<Statement> {
        let procedure = cursor.word()?.to_uppercase();
        cursor.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if !cursor.eat(&Token::RParen) {
            loop {
                args.push(cursor.literal()?);
                if cursor.eat(&Token::RParen) {
                    break;
                }
                cursor.expect(&Token::Comma)?;
            }
        }

        let wrong = |reason: &str| StatementError::WrongArguments {
            procedure: procedure.clone(),
            reason: reason.to_string(),
        };
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        match procedure.as_str() {
            "REVDB_CHECKOUT" => match args.as_slice() {
                ["-b", branch] => Ok(Statement::CheckoutNew {
                    branch: branch.to_string(),
                }),
                [branch] if !branch.starts_with('-') => Ok(Statement::Checkout {
                    branch: branch.to_string(),
                }),
                _ => Err(wrong("expected '<branch>' or '-b', '<branch>'")),
            },
            "REVDB_BRANCH" => match args.as_slice() {
                ["-d" | "-D" | "--delete", name] => Ok(Statement::DeleteBranch { name: name.to_string() }),
                ["-m" | "--move", old, new] => Ok(Statement::RenameBranch {
                    old: old.to_string(),
                    new: new.to_string(),
                }),
                [name] if !name.starts_with('-') => Ok(Statement::CreateBranch {
                    name: name.to_string(),
                    start: None,
                }),
                [name, start] if !name.starts_with('-') => Ok(Statement::CreateBranch {
                    name: name.to_string(),
                    start: Some(start.to_string()),
                }),
                _ => Err(wrong("expected '<name>'[, '<start>'], '-d', '<name>' or '-m', '<old>', '<new>'")),
            },
            "REVDB_TAG" => match args.as_slice() {
                ["-d" | "--delete", name] => Ok(Statement::DeleteTag { name: name.to_string() }),
                [name] if !name.starts_with('-') => Ok(Statement::CreateTag {
                    name: name.to_string(),
                    revision: None,
                }),
                [name, revision] if !name.starts_with('-') => Ok(Statement::CreateTag {
                    name: name.to_string(),
                    revision: Some(revision.to_string()),
                }),
                _ => Err(wrong("expected '<name>'[, '<rev>'] or '-d', '<name>'")),
            },
            "REVDB_COMMIT" => match args.as_slice() {
                ["-m" | "--message", message] => Ok(Statement::Commit {
                    message: message.to_string(),
                }),
                _ => Err(wrong("expected '-m', '<message>'")),
            },
            _ => Err(StatementError::UnknownProcedure(procedure)),
        }
    }

    fn parse_select(cursor: &mut Cursor) -> StatementResult<Statement> {
        if cursor.eat(&Token::Mul) {
            cursor.keyword("FROM")?;
            let table = cursor.word()?;
            return Ok(Statement::SelectAll { table });
        }

        let function = cursor.word()?;
        if function.eq_ignore_ascii_case("ACTIVE_BRANCH") {
            cursor.expect(&Token::LParen)?;
            cursor.expect(&Token::RParen)?;
            return Ok(Statement::ActiveBranch);
        }
        Err(StatementError::UnsupportedStatement(format!("SELECT {}", function)))
    }

    fn parse_show(cursor: &mut Cursor) -> StatementResult<Statement> {
        let what = cursor.word()?.to_uppercase();
        match what.as_str() {
            "BRANCHES" => Ok(Statement::ShowBranches),
            "TAGS" => Ok(Statement::ShowTags),
            "TABLES" => Ok(Statement::ShowTables),
            "DATABASES" => Ok(Statement::ShowDatabases),
            other => Err(StatementError::UnsupportedStatement(format!("SHOW {}", other))),
        }
    }

    fn parse_set(cursor: &mut Cursor) -> StatementResult<Statement> {
        let variable = cursor.until(&Token::Eq);
        cursor.expect(&Token::Eq)?;
        let value = cursor.literal()?;

        let name = variable
            .strip_prefix("@@")
            .ok_or_else(|| StatementError::UnsupportedStatement(format!("SET {}", variable)))?;
        let name = name
            .strip_prefix("global.")
            .or_else(|| name.strip_prefix("session."))
            .unwrap_or(name);
        match name.strip_suffix(DEFAULT_BRANCH_VARIABLE) {
            Some(database) if !database.is_empty() => Ok(Statement::SetDefaultBranch {
                database: database.to_string(),
                branch: value,
            }),
            _ => Err(StatementError::UnsupportedStatement(format!("SET {}", variable))),
        }
    }
}

/// A cursor over the non-whitespace tokens of one statement.
struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
}

impl Cursor {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> StatementResult<()> {
        match self.next_token() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(StatementError::Syntax(format!("expected {}, found {}", expected, token))),
            None => Err(StatementError::Syntax(format!("expected {}, found end of statement", expected))),
        }
    }

    /// an identifier or keyword
    fn word(&mut self) -> StatementResult<String> {
        match self.next_token() {
            Some(Token::Word(w)) => Ok(w.value),
            Some(token) => Err(StatementError::Syntax(format!("expected identifier, found {}", token))),
            None => Err(StatementError::Syntax("unexpected end of statement".into())),
        }
    }

    fn keyword(&mut self, keyword: &str) -> StatementResult<()> {
        let word = self.word()?;
        if word.eq_ignore_ascii_case(keyword) {
            Ok(())
        } else {
            Err(StatementError::Syntax(format!("expected {}, found {}", keyword, word)))
        }
    }

    /// a string literal, or a bare or quoted identifier
    fn literal(&mut self) -> StatementResult<String> {
        match self.next_token() {
            Some(Token::SingleQuotedString(s)) | Some(Token::DoubleQuotedString(s)) => Ok(s),
            Some(Token::Word(w)) => Ok(w.value),
            Some(token) => Err(StatementError::Syntax(format!("expected string, found {}", token))),
            None => Err(StatementError::Syntax("unexpected end of statement".into())),
        }
    }

    /// raw text of the tokens up to (not including) `stop`
    fn until(&mut self, stop: &Token) -> String {
        let mut text = String::new();
        while let Some(token) = self.peek() {
            if token == stop {
                break;
            }
            text.push_str(&token.to_string());
            self.pos += 1;
        }
        text
    }

    /// The remaining tokens as one name, such as `shop/feature~1`.
    fn rest_as_name(&mut self) -> StatementResult<String> {
        let rest = &self.tokens[self.pos..];
        let name = match rest {
            [] => return Err(StatementError::Syntax("expected database name".into())),
            [Token::Word(w)] => w.value.clone(),
            [Token::SingleQuotedString(s)] => s.clone(),
            tokens => tokens.iter().map(|t| t.to_string()).collect(),
        };
        self.pos = self.tokens.len();
        Ok(name)
    }

    fn finish(&self) -> StatementResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(StatementError::Syntax(format!("unexpected {}", token))),
        }
    }
}
