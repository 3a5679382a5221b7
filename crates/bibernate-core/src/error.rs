//! Error types for Bibernate operations.

use std::fmt;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type for all Bibernate operations.
#[derive(Debug)]
pub enum Error {
    /// Entity mapping could not be resolved (missing or duplicate id, no entity marker)
    EntityParse(EntityParseError),
    /// Executing or mapping a find/insert/update/delete failed
    EntityQuery(EntityQueryError),
    /// Lazy association could not be created or loaded
    Association(AssociationError),
    /// Low-level field get/set failed on an entity
    ReflectAccess(ReflectAccessError),
    /// Generic wrapper for connection, transaction and provider failures
    Bibernate(BibernateError),
    /// Operation not allowed in the current session or transaction state
    IllegalState(String),
    /// Driver-level SQL failure
    Query(QueryError),
    /// Type conversion errors
    Type(TypeError),
    /// Configuration errors
    Config(ConfigError),
}

/// Discriminant of [`Error`], for matching without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    EntityParse,
    EntityQuery,
    Association,
    ReflectAccess,
    Bibernate,
    IllegalState,
    Query,
    Type,
    Config,
}

#[derive(Debug)]
pub struct EntityParseError {
    pub entity: String,
    pub message: String,
}

#[derive(Debug)]
pub struct EntityQueryError {
    pub entity: String,
    pub id: Option<String>,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<BoxedSource>,
}

#[derive(Debug)]
pub struct AssociationError {
    pub kind: AssociationErrorKind,
    pub entity: String,
    pub field: Option<String>,
    pub message: String,
    pub source: Option<BoxedSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationErrorKind {
    /// Target type has no no-argument constructor
    MissingConstructor,
    /// Target type is abstract and cannot be instantiated
    AbstractType,
    /// Target no-argument constructor failed
    ConstructorFailed,
    /// Collection field is neither list- nor set-shaped
    UnsupportedCollection,
    /// Binding requested for a type other than the declared target
    TargetMismatch,
    /// Association mapping is incomplete (missing join table, unknown field)
    Mapping,
    /// Supplier failed while loading the association
    Load,
}

#[derive(Debug)]
pub struct ReflectAccessError {
    pub entity: String,
    pub field: String,
    pub message: String,
}

#[derive(Debug)]
pub struct BibernateError {
    pub message: String,
    pub source: Option<BoxedSource>,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<BoxedSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, etc.)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied
    Permission,
    /// Data too large for column
    DataTruncation,
    /// Database busy or locked
    Busy,
    /// Interrupted
    Cancelled,
    /// Connection already closed
    Closed,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub rust_type: Option<&'static str>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<BoxedSource>,
}

impl Error {
    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EntityParse(_) => ErrorKind::EntityParse,
            Error::EntityQuery(_) => ErrorKind::EntityQuery,
            Error::Association(_) => ErrorKind::Association,
            Error::ReflectAccess(_) => ErrorKind::ReflectAccess,
            Error::Bibernate(_) => ErrorKind::Bibernate,
            Error::IllegalState(_) => ErrorKind::IllegalState,
            Error::Query(_) => ErrorKind::Query,
            Error::Type(_) => ErrorKind::Type,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Create an entity parse error.
    pub fn entity_parse(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Error::EntityParse(EntityParseError {
            entity: entity.into(),
            message: message.into(),
        })
    }

    /// Create an entity query error without id, SQL or cause.
    pub fn entity_query(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Error::EntityQuery(EntityQueryError {
            entity: entity.into(),
            id: None,
            sql: None,
            message: message.into(),
            source: None,
        })
    }

    /// Create an association error.
    pub fn association(
        kind: AssociationErrorKind,
        entity: impl Into<String>,
        field: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Error::Association(AssociationError {
            kind,
            entity: entity.into(),
            field: field.map(str::to_string),
            message: message.into(),
            source: None,
        })
    }

    /// Create a field access error.
    pub fn reflect_access(
        entity: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::ReflectAccess(ReflectAccessError {
            entity: entity.into(),
            field: field.into(),
            message: message.into(),
        })
    }

    /// Field access error for a field name the entity does not declare.
    pub fn unknown_field(entity: impl Into<String>, field: impl Into<String>) -> Self {
        Self::reflect_access(entity, field, "no such field")
    }

    /// Wrap a lower-level failure in the generic error kind.
    pub fn wrap(message: impl Into<String>, source: Error) -> Self {
        Error::Bibernate(BibernateError {
            message: message.into(),
            source: Some(Box::new(source)),
        })
    }

    /// Create an illegal-state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Error::IllegalState(message.into())
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::EntityQuery(q) => q.sql.as_deref(),
            _ => None,
        }
    }
}

impl EntityQueryError {
    /// Attach the identifier the failing operation was working on.
    pub fn with_id(mut self, id: impl fmt::Display) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Attach the SQL text the failing operation executed.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: Error) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl AssociationError {
    /// Attach the underlying cause.
    pub fn with_source(mut self, source: Error) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EntityParse(e) => write!(f, "Entity parse error: {}", e),
            Error::EntityQuery(e) => write!(f, "Entity query error: {}", e),
            Error::Association(e) => write!(f, "Association error: {}", e),
            Error::ReflectAccess(e) => write!(f, "Field access error: {}", e),
            Error::Bibernate(e) => write!(f, "{}", e.message),
            Error::IllegalState(msg) => write!(f, "Illegal state: {}", msg),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Type(e) => {
                if let Some(col) = &e.column {
                    write!(
                        f,
                        "Type error in column '{}': expected {}, found {}",
                        col, e.expected, e.actual
                    )
                } else {
                    write!(f, "Type error: expected {}, found {}", e.expected, e.actual)
                }
            }
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
        }
    }
}

fn as_source<'a>(
    source: Option<&'a (dyn std::error::Error + Send + Sync + 'static)>,
) -> Option<&'a (dyn std::error::Error + 'static)> {
    source.map(|err| err as &(dyn std::error::Error + 'static))
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::EntityQuery(e) => as_source(e.source.as_deref()),
            Error::Association(e) => as_source(e.source.as_deref()),
            Error::Bibernate(e) => as_source(e.source.as_deref()),
            Error::Query(e) => as_source(e.source.as_deref()),
            Error::Config(e) => as_source(e.source.as_deref()),
            _ => None,
        }
    }
}

impl fmt::Display for EntityParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.message)
    }
}

impl fmt::Display for EntityQueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.entity)?;
        if let Some(id) = &self.id {
            write!(f, " with id {}", id)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(sql) = &self.sql {
            write!(f, " [SQL: {}]", sql)?;
        }
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl fmt::Display for AssociationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}.{}: {}", self.entity, field, self.message)?,
            None => write!(f, "{}: {}", self.entity, self.message)?,
        }
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl fmt::Display for ReflectAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.entity, self.field, self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<EntityParseError> for Error {
    fn from(err: EntityParseError) -> Self {
        Error::EntityParse(err)
    }
}

impl From<EntityQueryError> for Error {
    fn from(err: EntityQueryError) -> Self {
        Error::EntityQuery(err)
    }
}

impl From<AssociationError> for Error {
    fn from(err: AssociationError) -> Self {
        Error::Association(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for Bibernate operations.
pub type Result<T> = std::result::Result<T, Error>;
