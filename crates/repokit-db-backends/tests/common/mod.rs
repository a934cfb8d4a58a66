//! Shared fixtures: a small publishing schema.
//!
//! A `Section` has many `Subsection`s and an optional `PublicationStatus`.

#![allow(dead_code)]

use std::sync::LazyLock;

use repokit_core::RepoResult;
use repokit_db::{
    fields, ColumnDef, ColumnType, Entity, EntityDescriptor, Fields, Record, Relationship,
};
use repokit_db_backends::SqliteDatabase;

pub const SCHEMA: &str = "
    CREATE TABLE statuses (
        id INTEGER PRIMARY KEY,
        code TEXT NOT NULL UNIQUE
    );
    CREATE TABLE sections (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        position INTEGER,
        status_id INTEGER REFERENCES statuses(id)
    );
    CREATE TABLE subsections (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        section_id INTEGER NOT NULL REFERENCES sections(id)
    );
";

pub static SECTION: LazyLock<EntityDescriptor> = LazyLock::new(|| {
    EntityDescriptor::builder("section", "sections")
        .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
        .column(ColumnDef::new("title", ColumnType::Text))
        .column(ColumnDef::new("position", ColumnType::Integer).nullable())
        .column(ColumnDef::new("status_id", ColumnType::Integer).nullable())
        .relationship(Relationship::one_to_many(
            "subsections",
            || &*SUBSECTION,
            "id",
            "section_id",
        ))
        .relationship(Relationship::many_to_one("status", || &*STATUS, "status_id", "id"))
        .build()
});

pub static SUBSECTION: LazyLock<EntityDescriptor> = LazyLock::new(|| {
    EntityDescriptor::builder("subsection", "subsections")
        .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
        .column(ColumnDef::new("title", ColumnType::Text))
        .column(ColumnDef::new("section_id", ColumnType::Integer))
        .relationship(Relationship::many_to_one("section", || &*SECTION, "section_id", "id"))
        .build()
});

pub static STATUS: LazyLock<EntityDescriptor> = LazyLock::new(|| {
    EntityDescriptor::builder("publication_status", "statuses")
        .column(ColumnDef::new("id", ColumnType::Integer).primary_key())
        .column(ColumnDef::new("code", ColumnType::Text).unique())
        .build()
});

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub id: Option<i64>,
    pub title: String,
    pub position: Option<i64>,
    pub status_id: Option<i64>,
    pub subsections: Option<Vec<Subsection>>,
    pub status: Option<Option<PublicationStatus>>,
}

impl Entity for Section {
    fn descriptor() -> &'static EntityDescriptor {
        &SECTION
    }

    fn from_record(record: &Record) -> RepoResult<Self> {
        Ok(Self {
            id: record.get("id")?,
            title: record.get("title")?,
            position: record.get("position")?,
            status_id: record.get("status_id")?,
            subsections: record.load_many("subsections")?,
            status: record.load_one("status")?,
        })
    }

    fn field_values(&self) -> Fields {
        fields! {
            "id" => self.id,
            "title" => self.title.as_str(),
            "position" => self.position,
            "status_id" => self.status_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subsection {
    pub id: Option<i64>,
    pub title: String,
    pub section_id: i64,
}

impl Entity for Subsection {
    fn descriptor() -> &'static EntityDescriptor {
        &SUBSECTION
    }

    fn from_record(record: &Record) -> RepoResult<Self> {
        Ok(Self {
            id: record.get("id")?,
            title: record.get("title")?,
            section_id: record.get("section_id")?,
        })
    }

    fn field_values(&self) -> Fields {
        fields! {
            "id" => self.id,
            "title" => self.title.as_str(),
            "section_id" => self.section_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublicationStatus {
    pub id: Option<i64>,
    pub code: String,
}

impl Entity for PublicationStatus {
    fn descriptor() -> &'static EntityDescriptor {
        &STATUS
    }

    fn from_record(record: &Record) -> RepoResult<Self> {
        Ok(Self {
            id: record.get("id")?,
            code: record.get("code")?,
        })
    }

    fn field_values(&self) -> Fields {
        fields! { "id" => self.id, "code" => self.code.as_str() }
    }
}

/// An in-memory database with the schema applied.
pub async fn database() -> SqliteDatabase {
    let db = SqliteDatabase::memory().unwrap();
    db.execute_batch(SCHEMA).await.unwrap();
    db
}

/// Inserts `sections` sections, each with `per_section` subsections.
///
/// Section ids run from 1 in insertion order; titles are `s01`, `s02`, ...
/// and subsection titles `s01-a`, `s01-b`, ...
pub async fn seed(db: &SqliteDatabase, sections: usize, per_section: usize) {
    let mut sql =
        String::from("INSERT INTO statuses (id, code) VALUES (1, 'draft'), (2, 'published');");
    for s in 1..=sections {
        let status = if s % 2 == 0 { "2" } else { "NULL" };
        sql.push_str(&format!(
            "INSERT INTO sections (id, title, position, status_id) VALUES ({s}, 's{s:02}', {s}, {status});"
        ));
        for suffix in ('a'..='z').take(per_section) {
            sql.push_str(&format!(
                "INSERT INTO subsections (title, section_id) VALUES ('s{s:02}-{suffix}', {s});"
            ));
        }
    }
    db.execute_batch(&sql).await.unwrap();
}
