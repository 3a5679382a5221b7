//! Shared entities and database setup for the SQLite integration tests.

#![allow(dead_code)]

use bibernate::prelude::*;
use bibernate::{AssociationBinding, Connection, SqliteConnection};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

pub const SCHEMA: &str = "
    CREATE TABLE persons (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL
    );
    CREATE TABLE notes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        body TEXT NOT NULL,
        person_id INTEGER REFERENCES persons (id)
    );
    CREATE TABLE courses (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL
    );
    CREATE TABLE course_students (
        course_id INTEGER NOT NULL,
        person_id INTEGER NOT NULL
    );
";

#[derive(Debug, Default)]
pub struct Person {
    pub id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub notes: LazyList<Note>,
}

impl Person {
    pub fn new(first_name: &str, last_name: &str) -> Self {
        Self {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            ..Self::default()
        }
    }
}

impl Entity for Person {
    fn mapping() -> EntityMapping {
        EntityMapping::entity()
            .table("persons")
            .field(FieldMapping::new("id", SqlType::BigInt).id())
            .field(FieldMapping::new("first_name", SqlType::Text))
            .field(FieldMapping::new("last_name", SqlType::Text))
            .field(FieldMapping::one_to_many::<Note>("notes", "person"))
    }

    fn instantiate() -> std::result::Result<Self, InstantiationError> {
        Ok(Self::default())
    }

    fn get_field(&self, field: &str) -> bibernate::Result<Value> {
        match field {
            "id" => Ok(self.id.into()),
            "first_name" => Ok(self.first_name.clone().into()),
            "last_name" => Ok(self.last_name.clone().into()),
            _ => Err(Error::unknown_field("Person", field)),
        }
    }

    fn set_field(&mut self, field: &str, value: Value) -> bibernate::Result<()> {
        match field {
            "id" => self.id = value.try_into()?,
            "first_name" => self.first_name = value.try_into()?,
            "last_name" => self.last_name = value.try_into()?,
            _ => return Err(Error::unknown_field("Person", field)),
        }
        Ok(())
    }

    fn bind_association(&mut self, field: &str, binding: AssociationBinding) -> bibernate::Result<()> {
        match field {
            "notes" => self.notes = binding.into_list()?,
            _ => return Err(Error::unknown_field("Person", field)),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Note {
    pub id: Option<i64>,
    pub body: String,
    pub person: ToOne<Person>,
}

impl Entity for Note {
    fn mapping() -> EntityMapping {
        EntityMapping::entity()
            .table("notes")
            .field(FieldMapping::new("id", SqlType::BigInt).id())
            .field(FieldMapping::new("body", SqlType::Text))
            .field(FieldMapping::many_to_one::<Person>("person"))
    }

    fn instantiate() -> std::result::Result<Self, InstantiationError> {
        Ok(Self::default())
    }

    fn get_field(&self, field: &str) -> bibernate::Result<Value> {
        match field {
            "id" => Ok(self.id.into()),
            "body" => Ok(self.body.clone().into()),
            "person" => self.person.foreign_key(),
            _ => Err(Error::unknown_field("Note", field)),
        }
    }

    fn set_field(&mut self, field: &str, value: Value) -> bibernate::Result<()> {
        match field {
            "id" => self.id = value.try_into()?,
            "body" => self.body = value.try_into()?,
            _ => return Err(Error::unknown_field("Note", field)),
        }
        Ok(())
    }

    fn bind_association(&mut self, field: &str, binding: AssociationBinding) -> bibernate::Result<()> {
        match field {
            "person" => self.person = binding.into_to_one()?,
            _ => return Err(Error::unknown_field("Note", field)),
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Course {
    pub id: Option<i64>,
    pub name: String,
    pub students: LazySet<Person>,
}

impl Entity for Course {
    fn mapping() -> EntityMapping {
        EntityMapping::entity()
            .table("courses")
            .field(FieldMapping::new("id", SqlType::BigInt).id())
            .field(FieldMapping::new("name", SqlType::Text))
            .field(
                FieldMapping::many_to_many::<Person>(
                    "students",
                    JoinTable::new("course_students", "course_id", "person_id"),
                )
                .collection(CollectionKind::Set),
            )
    }

    fn instantiate() -> std::result::Result<Self, InstantiationError> {
        Ok(Self::default())
    }

    fn get_field(&self, field: &str) -> bibernate::Result<Value> {
        match field {
            "id" => Ok(self.id.into()),
            "name" => Ok(self.name.clone().into()),
            _ => Err(Error::unknown_field("Course", field)),
        }
    }

    fn set_field(&mut self, field: &str, value: Value) -> bibernate::Result<()> {
        match field {
            "id" => self.id = value.try_into()?,
            "name" => self.name = value.try_into()?,
            _ => return Err(Error::unknown_field("Course", field)),
        }
        Ok(())
    }

    fn bind_association(&mut self, field: &str, binding: AssociationBinding) -> bibernate::Result<()> {
        match field {
            "students" => self.students = binding.into_set()?,
            _ => return Err(Error::unknown_field("Course", field)),
        }
        Ok(())
    }
}

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A file database with the test schema, removed on drop.
pub struct TestDb {
    _dir: TempDir,
    path: String,
    pub factory: SessionFactory,
}

impl TestDb {
    pub fn new() -> Self {
        init_logging();
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir
            .path()
            .join("bibernate.db")
            .to_string_lossy()
            .into_owned();

        let conn = SqliteConnection::open_file(path.clone()).expect("open database");
        conn.execute_raw(SCHEMA).expect("create schema");
        conn.close().expect("close setup connection");

        let provider = SqliteConnectionProvider::new(SqliteConfig::file(path.clone()));
        let factory = SessionFactory::new(Arc::new(provider), SessionConfig::new().show_sql(true));
        factory.register::<Person>().expect("register Person");
        factory.register::<Note>().expect("register Note");
        factory.register::<Course>().expect("register Course");

        Self {
            _dir: dir,
            path,
            factory,
        }
    }

    pub fn session(&self) -> Session {
        self.factory.open_session().expect("open session")
    }

    /// A connection outside any session, for setup and assertions.
    pub fn raw(&self) -> SqliteConnection {
        SqliteConnection::open_file(self.path.clone()).expect("open raw connection")
    }

    pub fn count(&self, table: &str) -> i64 {
        let conn = self.raw();
        let rows = conn
            .query(&format!("SELECT COUNT(*) AS n FROM {}", table), &[])
            .expect("count rows");
        rows[0].get_named::<i64>("n").expect("count column")
    }

    /// Insert a person directly and return its id.
    pub fn insert_person(&self, first_name: &str, last_name: &str) -> i64 {
        let conn = self.raw();
        let result = conn
            .insert(
                "INSERT INTO persons (first_name, last_name) VALUES (?, ?)",
                &[Value::from(first_name), Value::from(last_name)],
            )
            .expect("insert person");
        result
            .generated_key()
            .and_then(Value::as_i64)
            .expect("generated id")
    }
}
