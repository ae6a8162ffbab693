pub mod pattern;
pub mod statement;

use tracing::debug;

use crate::errors::BotError;
use crate::models::request::{Request, RequestKind};
use crate::parse::statement::Statement;

/// Every known statement in priority order
#[derive(Debug, Clone)]
pub struct Statements {
    statements: Vec<Statement>,
}

impl Statements {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }

    /// Deploy, setup, restart and logs, tried in that order
    pub fn builtin() -> Result<Self, BotError> {
        let statements = RequestKind::PRIORITY
            .iter()
            .map(|kind| Statement::builtin(*kind))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(statements))
    }

    /// First request any statement recognises, `None` once all are exhausted.
    ///
    /// A statement that fails does not hide later ones; its error is returned
    /// only when nothing else matches.
    pub fn parse(&self, input: &str) -> Result<Option<Request>, BotError> {
        let mut first_error = None;
        for statement in &self.statements {
            match statement.parse(input) {
                Ok(Some(request)) => {
                    debug!("Parsed {} request from {:?}", statement.kind(), input);
                    return Ok(Some(request));
                }
                Ok(None) => {}
                Err(e) => {
                    debug!("{} statement rejected {:?}: {}", statement.kind(), input, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Statement> {
        self.statements.iter()
    }
}
