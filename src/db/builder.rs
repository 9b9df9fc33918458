//! Parameterized statement builder.
//!
//! A [`Query`] assembles a statement and its positional parameters from a
//! value template containing `?` markers. Three composition strategies are
//! supported:
//!
//! - **Plain**: the statement is the template, bound once.
//! - **Placeholder**: a marker token in a base statement is replaced by the
//!   value template repeated once per parameter group (`IN (?,?,?)`).
//! - **Begin/End**: `begin + template,template,... + end`, for multi-row
//!   inserts.
//!
//! Rendered statements are sent to the backend as written. No dialect
//! translation happens, so they suit MySQL and SQLite only: PostgreSQL
//! expects `$1, $2, ...` and rejects `?`. Against PostgreSQL use the
//! string-based service operations with `$n` markers written by the caller.

use crate::error::{DbError, DbResult};
use crate::models::QueryParam;

/// Positional parameter marker.
pub const PARAM_MARKER: char = '?';

/// Terminator used by Begin/End queries when no end literal is supplied.
pub const DEFAULT_END: &str = ";";

const LOCK_CLAUSE: &str = "FOR UPDATE";
const GROUP_SEPARATOR: &str = ",";

/// How a [`Query`] renders its final statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Plain,
    Placeholder,
    BeginEnd,
}

/// A statement under construction plus its bound parameters.
///
/// Markers are always `?`; see the module docs for the PostgreSQL caveat.
#[derive(Debug, Clone)]
pub struct Query {
    strategy: Strategy,
    /// Plain statement or placeholder base.
    base: String,
    placeholder: String,
    begin: String,
    end: String,
    value_template: String,
    markers: usize,
    groups: usize,
    params: Vec<QueryParam>,
    for_update: bool,
}

impl Query {
    /// A statement used verbatim and bound with a single parameter group.
    pub fn plain(statement: impl Into<String>) -> DbResult<Self> {
        let statement = statement.into();
        let markers = count_markers(&statement)?;
        Ok(Self::with_parts(
            Strategy::Plain,
            statement.clone(),
            String::new(),
            String::new(),
            String::new(),
            statement,
            markers,
        ))
    }

    /// A base statement whose `placeholder` token expands to the repeated
    /// value template.
    ///
    /// The token must occur exactly once in `base`.
    pub fn placeholder(
        base: impl Into<String>,
        placeholder: impl Into<String>,
        value_template: impl Into<String>,
    ) -> DbResult<Self> {
        let base = base.into();
        let placeholder = placeholder.into();
        let value_template = value_template.into();

        if placeholder.is_empty() {
            return Err(DbError::invalid_query("placeholder token cannot be empty"));
        }
        let occurrences = base.matches(placeholder.as_str()).count();
        if occurrences != 1 {
            return Err(DbError::invalid_query(format!(
                "placeholder '{}' must appear exactly once in base statement, found {}",
                placeholder, occurrences
            )));
        }
        let markers = count_markers(&value_template)?;

        Ok(Self::with_parts(
            Strategy::Placeholder,
            base,
            placeholder,
            String::new(),
            String::new(),
            value_template,
            markers,
        ))
    }

    /// `begin`, then the comma-joined value templates, then `end`
    /// (defaults to `;` when empty).
    pub fn begin_end(
        begin: impl Into<String>,
        end: impl Into<String>,
        value_template: impl Into<String>,
    ) -> DbResult<Self> {
        let value_template = value_template.into();
        let mut end = end.into();
        if end.is_empty() {
            end = DEFAULT_END.to_string();
        }
        let markers = count_markers(&value_template)?;

        Ok(Self::with_parts(
            Strategy::BeginEnd,
            String::new(),
            String::new(),
            begin.into(),
            end,
            value_template,
            markers,
        ))
    }

    fn with_parts(
        strategy: Strategy,
        base: String,
        placeholder: String,
        begin: String,
        end: String,
        value_template: String,
        markers: usize,
    ) -> Self {
        Self {
            strategy,
            base,
            placeholder,
            begin,
            end,
            value_template,
            markers,
            groups: 0,
            params: Vec::new(),
            for_update: false,
        }
    }

    /// Append a `FOR UPDATE` locking clause when rendering.
    pub fn for_update(mut self, for_update: bool) -> Self {
        self.for_update = for_update;
        self
    }

    pub fn set_for_update(&mut self, for_update: bool) {
        self.for_update = for_update;
    }

    /// Add one parameter group. It must supply exactly one value per `?`
    /// in the value template.
    pub fn add_params<I, P>(&mut self, values: I) -> DbResult<&mut Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<QueryParam>,
    {
        if self.strategy == Strategy::Plain && self.groups > 0 {
            return Err(DbError::invalid_query(
                "plain query accepts a single parameter group",
            ));
        }

        let group: Vec<QueryParam> = values.into_iter().map(Into::into).collect();
        if group.len() != self.markers {
            return Err(DbError::invalid_query(format!(
                "expected {} parameters per group, got {}",
                self.markers,
                group.len()
            )));
        }

        self.params.extend(group);
        self.groups += 1;
        Ok(self)
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Number of `?` markers each parameter group must fill.
    pub fn markers_per_group(&self) -> usize {
        self.markers
    }

    pub fn group_count(&self) -> usize {
        self.groups
    }

    pub fn is_for_update(&self) -> bool {
        self.for_update
    }

    pub fn params(&self) -> &[QueryParam] {
        &self.params
    }

    /// Render the final statement.
    ///
    /// Fails until at least one parameter group has been added.
    pub fn statement(&self) -> DbResult<String> {
        if self.groups == 0 {
            return Err(DbError::invalid_query(
                "query has no parameters; add a parameter group before rendering",
            ));
        }

        let statement = match self.strategy {
            Strategy::Plain => self.base.clone(),
            Strategy::Placeholder => {
                self.base
                    .replacen(self.placeholder.as_str(), &self.repeated_values(), 1)
            }
            Strategy::BeginEnd => {
                format!("{}{}{}", self.begin, self.repeated_values(), self.end)
            }
        };

        if self.for_update {
            Ok(append_lock_clause(&statement))
        } else {
            Ok(statement)
        }
    }

    /// Resolve into the statement and its parameters.
    pub fn build(&self) -> DbResult<(String, Vec<QueryParam>)> {
        Ok((self.statement()?, self.params.clone()))
    }

    fn repeated_values(&self) -> String {
        vec![self.value_template.as_str(); self.groups].join(GROUP_SEPARATOR)
    }
}

fn count_markers(template: &str) -> DbResult<usize> {
    match template.matches(PARAM_MARKER).count() {
        0 => Err(DbError::invalid_query(format!(
            "value template '{}' contains no '{}' parameter marker",
            template, PARAM_MARKER
        ))),
        n => Ok(n),
    }
}

/// Append a `FOR UPDATE` clause to a statement.
///
/// Idempotent: a statement already ending in the clause (optionally followed
/// by `NOWAIT` or `SKIP LOCKED`) is returned as is. The words appearing
/// earlier, for example inside a string literal, do not count.
/// A trailing `;` stays at the end, after the clause.
pub fn append_lock_clause(statement: &str) -> String {
    let trimmed = statement.trim_end();
    let (body, terminated) = match trimmed.strip_suffix(';') {
        Some(body) => (body.trim_end(), true),
        None => (trimmed, false),
    };

    let mut rendered = if ends_with_lock_clause(body) {
        body.to_string()
    } else {
        format!("{} {}", body, LOCK_CLAUSE)
    };
    if terminated {
        rendered.push(';');
    }
    rendered
}

fn ends_with_lock_clause(body: &str) -> bool {
    let words: Vec<String> = body
        .split_whitespace()
        .map(str::to_ascii_uppercase)
        .collect();
    let clause = match words.as_slice() {
        [rest @ .., skip, locked] if skip == "SKIP" && locked == "LOCKED" => rest,
        [rest @ .., nowait] if nowait == "NOWAIT" => rest,
        all => all,
    };
    matches!(clause, [.., lock, update] if lock == "FOR" && update == "UPDATE")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_end_round_trip() {
        let mut query = Query::begin_end("INSERT INTO t VALUES ", ";", "(?,?)").unwrap();
        query.add_params([10, 15]).unwrap();
        assert_eq!(query.statement().unwrap(), "INSERT INTO t VALUES (?,?);");
        assert_eq!(
            query.params(),
            &[QueryParam::Int(10), QueryParam::Int(15)]
        );
    }

    #[test]
    fn test_begin_end_multiple_groups() {
        let mut query = Query::begin_end("INSERT INTO t (a, b) VALUES ", "", "(?,?)").unwrap();
        query
            .add_params([1, 2])
            .unwrap()
            .add_params([3, 4])
            .unwrap()
            .add_params([5, 6])
            .unwrap();
        assert_eq!(
            query.statement().unwrap(),
            "INSERT INTO t (a, b) VALUES (?,?),(?,?),(?,?);"
        );
        assert_eq!(query.params().len(), 6);
        assert_eq!(query.group_count(), 3);
    }

    #[test]
    fn test_placeholder_substitution() {
        let mut query =
            Query::placeholder("SELECT * FROM users WHERE id IN (#IDS#)", "#IDS#", "?").unwrap();
        query.add_params([1]).unwrap();
        query.add_params([2]).unwrap();
        query.add_params([3]).unwrap();
        assert_eq!(
            query.statement().unwrap(),
            "SELECT * FROM users WHERE id IN (?,?,?)"
        );
    }

    #[test]
    fn test_placeholder_must_appear_once() {
        assert!(Query::placeholder("SELECT 1", "#", "?").is_err());
        assert!(Query::placeholder("SELECT # FROM t WHERE x IN (#)", "#", "?").is_err());
        assert!(Query::placeholder("SELECT * FROM t WHERE x IN (#)", "", "?").is_err());
    }

    #[test]
    fn test_value_template_requires_marker() {
        assert!(Query::plain("SELECT * FROM t").is_err());
        assert!(Query::begin_end("INSERT INTO t VALUES ", ";", "(1, 2)").is_err());
        assert!(Query::placeholder("SELECT * FROM t WHERE x IN (#)", "#", "1").is_err());
    }

    #[test]
    fn test_plain_accepts_one_group() {
        let mut query = Query::plain("SELECT * FROM t WHERE a = ? AND b = ?").unwrap();
        assert_eq!(query.markers_per_group(), 2);
        query.add_params(["x", "y"]).unwrap();
        let err = query.add_params(["z", "w"]).unwrap_err();
        assert!(matches!(err, DbError::InvalidQuery { .. }));
        assert_eq!(
            query.statement().unwrap(),
            "SELECT * FROM t WHERE a = ? AND b = ?"
        );
        assert_eq!(query.params().len(), 2);
    }

    #[test]
    fn test_group_arity_mismatch() {
        let mut query = Query::begin_end("INSERT INTO t VALUES ", ";", "(?,?)").unwrap();
        assert!(query.add_params([1]).is_err());
        assert!(query.add_params([1, 2, 3]).is_err());
        assert_eq!(query.group_count(), 0);
        assert!(query.params().is_empty());
    }

    #[test]
    fn test_statement_without_params_fails() {
        let query = Query::plain("SELECT * FROM t WHERE id = ?").unwrap();
        assert!(query.statement().is_err());
        assert!(query.build().is_err());
    }

    #[test]
    fn test_for_update_query() {
        let mut query = Query::plain("SELECT * FROM t WHERE id = ?;")
            .unwrap()
            .for_update(true);
        query.add_params([7]).unwrap();
        let (statement, params) = query.build().unwrap();
        assert_eq!(statement, "SELECT * FROM t WHERE id = ? FOR UPDATE;");
        assert_eq!(params, vec![QueryParam::Int(7)]);
    }

    #[test]
    fn test_append_lock_clause() {
        assert_eq!(append_lock_clause("SELECT 1"), "SELECT 1 FOR UPDATE");
        assert_eq!(append_lock_clause("SELECT 1;"), "SELECT 1 FOR UPDATE;");
        assert_eq!(append_lock_clause("SELECT 1 ;  "), "SELECT 1 FOR UPDATE;");
        assert_eq!(
            append_lock_clause("SELECT 1 for update"),
            "SELECT 1 for update"
        );
        assert_eq!(
            append_lock_clause("SELECT 1 FOR UPDATE SKIP LOCKED;"),
            "SELECT 1 FOR UPDATE SKIP LOCKED;"
        );
    }

    #[test]
    fn test_rendered_markers_are_not_translated() {
        let mut query =
            Query::placeholder("SELECT * FROM t WHERE id IN (#IDS#)", "#IDS#", "?").unwrap();
        query.add_params([1]).unwrap();
        query.add_params([2]).unwrap();
        let statement = query.statement().unwrap();
        assert_eq!(statement, "SELECT * FROM t WHERE id IN (?,?)");
        assert!(!statement.contains('$'));

        assert!(Query::plain("SELECT * FROM t WHERE id = $1").is_err());
    }

    #[test]
    fn test_lock_words_inside_statement_do_not_count() {
        assert_eq!(
            append_lock_clause("SELECT * FROM jobs WHERE note = 'wait for update now'"),
            "SELECT * FROM jobs WHERE note = 'wait for update now' FOR UPDATE"
        );
        assert_eq!(
            append_lock_clause("SELECT * FROM t WHERE a = 'for update';"),
            "SELECT * FROM t WHERE a = 'for update' FOR UPDATE;"
        );
        assert_eq!(
            append_lock_clause("SELECT * FROM t FOR UPDATE NOWAIT"),
            "SELECT * FROM t FOR UPDATE NOWAIT"
        );
    }

    #[test]
    fn test_append_lock_clause_idempotent() {
        let once = append_lock_clause("SELECT * FROM t WHERE id = ?;");
        assert_eq!(append_lock_clause(&once), once);
    }
}
