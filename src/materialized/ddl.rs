// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

/*!

Parsing for the statements DataFusion's own SQL front end doesn't know about:

```sql
CREATE [OR REPLACE] MATERIALIZED VIEW [IF NOT EXISTS] name [(col, ...)] AS query
DROP MATERIALIZED VIEW [IF EXISTS] name
REFRESH MATERIALIZED VIEW name
```

Anything else parses to `None` and is left to DataFusion.

*/

use std::fmt;

use datafusion_common::{plan_err, DataFusionError, Result, TableReference};
use datafusion_sql::{
    planner::object_name_to_table_reference,
    sqlparser::{
        ast::Ident,
        dialect::{Dialect, GenericDialect},
        keywords::Keyword,
        parser::{IsOptional, Parser, ParserError},
        tokenizer::Token,
    },
};

/// How CREATE treats an existing object with the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateMode {
    /// Fail if anything with the name exists.
    #[default]
    Simple,
    /// `OR REPLACE`: replace an existing materialized view.
    OrReplace,
    /// `IF NOT EXISTS`: do nothing if anything with the name exists.
    IfNotExists,
}

/// A parsed materialized view statement.
#[derive(Debug, Clone, PartialEq)]
pub enum MaterializedViewStatement {
    /// `CREATE MATERIALIZED VIEW`
    Create {
        /// Name of the view, possibly qualified.
        name: TableReference,
        /// Explicit column names; empty if none were given.
        columns: Vec<String>,
        /// The defining query.
        query: String,
        /// Collision handling.
        mode: CreateMode,
    },
    /// `DROP MATERIALIZED VIEW`
    Drop {
        /// Name of the view, possibly qualified.
        name: TableReference,
        /// Whether a missing view is tolerated.
        if_exists: bool,
    },
    /// `REFRESH MATERIALIZED VIEW`
    Refresh {
        /// Name of the view, possibly qualified.
        name: TableReference,
    },
}

impl MaterializedViewStatement {
    /// Parse `sql` with the generic dialect, normalizing unquoted identifiers to lower case.
    pub fn parse(sql: &str) -> Result<Option<Self>> {
        Self::parse_with_dialect(sql, &GenericDialect {}, true)
    }

    /// Parse `sql`. Returns `None` if it is not a materialized view statement.
    pub fn parse_with_dialect(
        sql: &str,
        dialect: &dyn Dialect,
        enable_ident_normalization: bool,
    ) -> Result<Option<Self>> {
        let mut parser = Parser::new(dialect)
            .try_with_sql(sql)
            .map_err(parser_error)?;
        let normalize = |ident: Ident| match ident.quote_style {
            Some(_) => ident.value,
            None if enable_ident_normalization => ident.value.to_lowercase(),
            None => ident.value,
        };

        let statement = if parser.parse_keyword(Keyword::CREATE) {
            let or_replace = parser.parse_keywords(&[Keyword::OR, Keyword::REPLACE]);
            if !parser.parse_keywords(&[Keyword::MATERIALIZED, Keyword::VIEW]) {
                return Ok(None);
            }
            let if_not_exists =
                parser.parse_keywords(&[Keyword::IF, Keyword::NOT, Keyword::EXISTS]);

            let mode = match (or_replace, if_not_exists) {
                (true, true) => {
                    return plan_err!(
                        "OR REPLACE and IF NOT EXISTS cannot both be given for a materialized view"
                    )
                }
                (true, false) => CreateMode::OrReplace,
                (false, true) => CreateMode::IfNotExists,
                (false, false) => CreateMode::Simple,
            };

            let name = parse_name(&mut parser, enable_ident_normalization)?;
            let columns = parser
                .parse_parenthesized_column_list(IsOptional::Optional, false)
                .map_err(parser_error)?
                .into_iter()
                .map(normalize)
                .collect();
            parser.expect_keyword(Keyword::AS).map_err(parser_error)?;
            let query = parser.parse_query().map_err(parser_error)?;

            MaterializedViewStatement::Create {
                name,
                columns,
                query: query.to_string(),
                mode,
            }
        } else if parser.parse_keyword(Keyword::DROP) {
            if !parser.parse_keywords(&[Keyword::MATERIALIZED, Keyword::VIEW]) {
                return Ok(None);
            }
            let if_exists = parser.parse_keywords(&[Keyword::IF, Keyword::EXISTS]);

            MaterializedViewStatement::Drop {
                name: parse_name(&mut parser, enable_ident_normalization)?,
                if_exists,
            }
        } else if parse_word(&mut parser, "REFRESH") {
            if !parser.parse_keywords(&[Keyword::MATERIALIZED, Keyword::VIEW]) {
                return Ok(None);
            }

            MaterializedViewStatement::Refresh {
                name: parse_name(&mut parser, enable_ident_normalization)?,
            }
        } else {
            return Ok(None);
        };

        while parser.consume_token(&Token::SemiColon) {}
        match parser.peek_token().token {
            Token::EOF => Ok(Some(statement)),
            token => plan_err!("unexpected '{token}' after {statement}"),
        }
    }

    /// Name of the view the statement acts on.
    pub fn name(&self) -> &TableReference {
        match self {
            MaterializedViewStatement::Create { name, .. }
            | MaterializedViewStatement::Drop { name, .. }
            | MaterializedViewStatement::Refresh { name } => name,
        }
    }
}

impl fmt::Display for MaterializedViewStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterializedViewStatement::Create { name, mode, .. } => match mode {
                CreateMode::Simple => write!(f, "CREATE MATERIALIZED VIEW {name}"),
                CreateMode::OrReplace => write!(f, "CREATE OR REPLACE MATERIALIZED VIEW {name}"),
                CreateMode::IfNotExists => {
                    write!(f, "CREATE MATERIALIZED VIEW IF NOT EXISTS {name}")
                }
            },
            MaterializedViewStatement::Drop { name, .. } => {
                write!(f, "DROP MATERIALIZED VIEW {name}")
            }
            MaterializedViewStatement::Refresh { name } => {
                write!(f, "REFRESH MATERIALIZED VIEW {name}")
            }
        }
    }
}

fn parse_name(parser: &mut Parser<'_>, enable_ident_normalization: bool) -> Result<TableReference> {
    object_name_to_table_reference(
        parser.parse_object_name(false).map_err(parser_error)?,
        enable_ident_normalization,
    )
}

/// Consume a non-reserved word.
fn parse_word(parser: &mut Parser<'_>, word: &str) -> bool {
    match parser.peek_token().token {
        Token::Word(w) if w.value.eq_ignore_ascii_case(word) => {
            parser.next_token();
            true
        }
        _ => false,
    }
}

fn parser_error(e: ParserError) -> DataFusionError {
    DataFusionError::SQL(e, None)
}
