use std::fmt::Display;
use std::path::Path;

use acadterm_core::{
    ArchiveRole, Assessment, AssessmentId, Course, CourseId, DepartmentId, EntityScope, Faculty,
    FacultyId, FacultyRole, QuestionId, SchoolId, TenantScope, TermArchiveEntry, TermId,
    UniversityId, DEFAULT_TERM,
};
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

// v1 is the legacy shape: a single `department` column that holds either a
// display name or a foreign key, and term columns that mix numeric and
// float-rendered spellings.
const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS term_pointers (
  key TEXT NOT NULL,
  university_id TEXT NOT NULL DEFAULT '',
  term TEXT NOT NULL,
  UNIQUE (key, university_id)
);

CREATE TABLE IF NOT EXISTS courses (
  course_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  code TEXT NOT NULL,
  university_id TEXT NOT NULL DEFAULT '',
  school_id TEXT NOT NULL DEFAULT '',
  department TEXT NOT NULL DEFAULT '',
  coordinator_id TEXT,
  is_deleted INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS course_active_terms (
  course_id TEXT NOT NULL,
  term TEXT NOT NULL,
  PRIMARY KEY (course_id, term),
  FOREIGN KEY (course_id) REFERENCES courses(course_id)
);

CREATE TABLE IF NOT EXISTS course_faculty (
  course_id TEXT NOT NULL,
  faculty_id TEXT NOT NULL,
  PRIMARY KEY (course_id, faculty_id)
);

CREATE TABLE IF NOT EXISTS faculty (
  faculty_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  role TEXT NOT NULL CHECK (role IN ('admin','hod','faculty','course_coordinator')),
  university_id TEXT NOT NULL DEFAULT '',
  school_id TEXT NOT NULL DEFAULT '',
  department TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS term_archive (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  term TEXT NOT NULL,
  course_id TEXT NOT NULL,
  faculty_id TEXT NOT NULL,
  role TEXT NOT NULL CHECK (role IN ('faculty','course_coordinator')),
  university_id TEXT NOT NULL DEFAULT '',
  school_id TEXT NOT NULL DEFAULT '',
  department TEXT NOT NULL DEFAULT '',
  archived_at TEXT NOT NULL,
  UNIQUE (term, course_id, faculty_id, university_id)
);

CREATE TABLE IF NOT EXISTS assessments (
  assessment_id TEXT PRIMARY KEY,
  course_id TEXT NOT NULL,
  term TEXT NOT NULL,
  title TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS questions (
  question_id TEXT PRIMARY KEY,
  assessment_id TEXT NOT NULL,
  faculty_id TEXT NOT NULL DEFAULT '',
  question_set TEXT NOT NULL DEFAULT '',
  body TEXT NOT NULL,
  FOREIGN KEY (assessment_id) REFERENCES assessments(assessment_id)
);

CREATE INDEX IF NOT EXISTS idx_term_archive_term ON term_archive(term);
CREATE INDEX IF NOT EXISTS idx_assessments_course_term ON assessments(course_id, term);
";

// v2 splits the mixed `department` column into department_id/department_name
// and canonicalizes every stored term spelling.
const MIGRATION_002_CREATE_V2_TABLES_SQL: &str = r"
CREATE TABLE IF NOT EXISTS term_pointers_v2 (
  key TEXT NOT NULL,
  university_id TEXT NOT NULL DEFAULT '',
  term TEXT NOT NULL,
  UNIQUE (key, university_id)
);

CREATE TABLE IF NOT EXISTS courses_v2 (
  course_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  code TEXT NOT NULL,
  university_id TEXT NOT NULL DEFAULT '',
  school_id TEXT NOT NULL DEFAULT '',
  department_id TEXT NOT NULL DEFAULT '',
  department_name TEXT NOT NULL DEFAULT '',
  coordinator_id TEXT,
  is_deleted INTEGER NOT NULL DEFAULT 0,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS course_active_terms_v2 (
  course_id TEXT NOT NULL,
  term TEXT NOT NULL,
  PRIMARY KEY (course_id, term)
);

CREATE TABLE IF NOT EXISTS faculty_v2 (
  faculty_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  role TEXT NOT NULL CHECK (role IN ('admin','hod','faculty','course_coordinator')),
  university_id TEXT NOT NULL DEFAULT '',
  school_id TEXT NOT NULL DEFAULT '',
  department_id TEXT NOT NULL DEFAULT '',
  department_name TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS term_archive_v2 (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  term TEXT NOT NULL,
  course_id TEXT NOT NULL,
  faculty_id TEXT NOT NULL,
  role TEXT NOT NULL CHECK (role IN ('faculty','course_coordinator')),
  university_id TEXT NOT NULL DEFAULT '',
  school_id TEXT NOT NULL DEFAULT '',
  department_id TEXT NOT NULL DEFAULT '',
  archived_at TEXT NOT NULL,
  UNIQUE (term, course_id, faculty_id, university_id)
);

CREATE TABLE IF NOT EXISTS assessments_v2 (
  assessment_id TEXT PRIMARY KEY,
  course_id TEXT NOT NULL,
  term TEXT NOT NULL,
  title TEXT NOT NULL,
  created_at TEXT NOT NULL
);
";

const MIGRATION_002_REPLACE_TABLES_SQL: &str = r"
DROP TABLE term_pointers;
DROP TABLE course_active_terms;
DROP TABLE courses;
DROP TABLE faculty;
DROP TABLE term_archive;
DROP TABLE assessments;

ALTER TABLE term_pointers_v2 RENAME TO term_pointers;
ALTER TABLE courses_v2 RENAME TO courses;
ALTER TABLE course_active_terms_v2 RENAME TO course_active_terms;
ALTER TABLE faculty_v2 RENAME TO faculty;
ALTER TABLE term_archive_v2 RENAME TO term_archive;
ALTER TABLE assessments_v2 RENAME TO assessments;
";

const MIGRATION_002_FINAL_INDEXES_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_term_archive_term ON term_archive(term);
CREATE INDEX IF NOT EXISTS idx_term_archive_course ON term_archive(course_id);
CREATE INDEX IF NOT EXISTS idx_assessments_course_term ON assessments(course_id, term);
CREATE INDEX IF NOT EXISTS idx_courses_code ON courses(code, university_id);
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

impl SqliteStore {
    /// Open a SQLite-backed registry store and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot
    /// be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step
    /// fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version == 0 {
            version = self.bootstrap_schema_version()?;
        }

        if version < 2 {
            self.apply_migration_2()?;
            version = current_schema_version(&self.conn)?;
            tracing::info!(version, "applied schema migration");
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn bootstrap_schema_version(&self) -> Result<i64> {
        let has_courses = table_exists(&self.conn, "courses")?;

        if !has_courses {
            apply_migration_1(&self.conn)?;
            return Ok(1);
        }

        if table_has_column(&self.conn, "courses", "department_name")? {
            // Database already in v2 shape but missing migration records.
            record_schema_version(&self.conn, 1)?;
            record_schema_version(&self.conn, 2)?;
            return Ok(2);
        }

        if table_has_column(&self.conn, "courses", "department")? {
            record_schema_version(&self.conn, 1)?;
            return Ok(1);
        }

        Err(anyhow!(
            "database schema is invalid: courses has neither department nor department_name"
        ))
    }

    fn apply_migration_2(&mut self) -> Result<()> {
        if table_has_column(&self.conn, "courses", "department_name")? {
            record_schema_version(&self.conn, 2)?;
            return Ok(());
        }

        let tx = self.conn.transaction().context("failed to start migration v2 transaction")?;

        tx.execute_batch(MIGRATION_002_CREATE_V2_TABLES_SQL)
            .context("failed to create v2 staging tables")?;

        copy_term_pointers_to_v2(&tx)?;
        copy_courses_to_v2(&tx)?;
        copy_active_terms_to_v2(&tx)?;
        copy_faculty_to_v2(&tx)?;
        copy_archive_to_v2(&tx)?;
        copy_assessments_to_v2(&tx)?;

        tx.execute_batch(MIGRATION_002_REPLACE_TABLES_SQL)
            .context("failed to replace legacy tables with v2 tables")?;
        tx.execute_batch(MIGRATION_002_FINAL_INDEXES_SQL).context("failed to create v2 indexes")?;

        let now = now_rfc3339()?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![2_i64, now],
        )
        .context("failed to record migration version 2")?;

        tx.commit().context("failed to commit migration v2")?;
        Ok(())
    }

    /// Read the tenant's current term, creating the pointer with the
    /// documented default on first use. Never fails due to absence.
    ///
    /// # Errors
    /// Returns an error when the pointer row cannot be read or initialized.
    pub fn current_term(&self, tenant: &TenantScope) -> Result<TermId> {
        let key = university_key(tenant.university_id);
        self.conn
            .execute(
                "INSERT OR IGNORE INTO term_pointers(key, university_id, term)
                 VALUES ('current_term', ?1, ?2)",
                params![key, DEFAULT_TERM],
            )
            .context("failed to initialize term pointer")?;

        let raw: String = self
            .conn
            .query_row(
                "SELECT term FROM term_pointers WHERE key = 'current_term' AND university_id = ?1",
                params![key],
                |row| row.get(0),
            )
            .context("failed to read term pointer")?;

        TermId::parse(&raw).map_err(|err| anyhow!("stored term pointer is invalid: {err}"))
    }

    /// Advance the tenant's term pointer. Only the transition procedure
    /// calls this; last-writer-wins.
    ///
    /// # Errors
    /// Returns an error when the pointer upsert fails.
    pub fn set_current_term(&self, tenant: &TenantScope, term: &TermId) -> Result<()> {
        let key = university_key(tenant.university_id);
        self.conn
            .execute(
                "INSERT INTO term_pointers(key, university_id, term)
                 VALUES ('current_term', ?1, ?2)
                 ON CONFLICT(key, university_id) DO UPDATE SET term = excluded.term",
                params![key, term.as_str()],
            )
            .context("failed to write term pointer")?;
        Ok(())
    }

    /// Insert a course with its active-term and roster rows.
    ///
    /// A code collision against a live course is a conflict; a collision
    /// against a soft-deleted course renames the deleted row's code so the
    /// new course can take it.
    ///
    /// # Errors
    /// Returns an error on validation failure, live-code conflict, or any
    /// write failure.
    pub fn insert_course(&mut self, course: &Course) -> Result<()> {
        course.validate().map_err(|err| anyhow!("course validation failed: {err}"))?;

        let tx = self.conn.transaction().context("failed to start transaction")?;
        let university = university_key(course.scope.university_id);

        {
            let mut stmt = tx.prepare(
                "SELECT course_id, is_deleted FROM courses
                 WHERE code = ?1 AND university_id = ?2",
            )?;
            let rows = stmt
                .query_map(params![course.code, university], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            for (existing_id, is_deleted) in rows {
                if is_deleted == 0 {
                    return Err(anyhow!(
                        "conflict: course code {} already in use within tenant",
                        course.code
                    ));
                }
                let retired_code = format!("{}-retired-{}", course.code, Ulid::new());
                tx.execute(
                    "UPDATE courses SET code = ?1 WHERE course_id = ?2",
                    params![retired_code, existing_id],
                )
                .context("failed to rename soft-deleted course code")?;
            }
        }

        tx.execute(
            "INSERT INTO courses(
                course_id, name, code, university_id, school_id,
                department_id, department_name, coordinator_id, is_deleted, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                course.course_id.to_string(),
                course.name,
                course.code,
                university,
                id_key(course.scope.school_id),
                id_key(course.scope.department_id),
                course.scope.department_name.clone().unwrap_or_default(),
                course.coordinator.map(|id| id.to_string()),
                i64::from(course.is_deleted),
                now_rfc3339()?,
            ],
        )
        .context("failed to insert course")?;

        for term in &course.active_terms {
            tx.execute(
                "INSERT OR IGNORE INTO course_active_terms(course_id, term) VALUES (?1, ?2)",
                params![course.course_id.to_string(), term.as_str()],
            )
            .context("failed to insert active term")?;
        }
        for faculty_id in &course.faculty_roster {
            tx.execute(
                "INSERT OR IGNORE INTO course_faculty(course_id, faculty_id) VALUES (?1, ?2)",
                params![course.course_id.to_string(), faculty_id.to_string()],
            )
            .context("failed to insert roster member")?;
        }

        tx.commit().context("failed to commit course insert")?;
        Ok(())
    }

    /// Load one course with its active terms and roster. Soft-deleted courses
    /// are returned too; listings are responsible for filtering them.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn get_course(&self, course_id: CourseId) -> Result<Option<Course>> {
        let row = self
            .conn
            .query_row(
                "SELECT name, code, university_id, school_id, department_id, department_name,
                        coordinator_id, is_deleted
                 FROM courses WHERE course_id = ?1",
                params![course_id.to_string()],
                |row| {
                    Ok(CourseRow {
                        name: row.get(0)?,
                        code: row.get(1)?,
                        university_id: row.get(2)?,
                        school_id: row.get(3)?,
                        department_id: row.get(4)?,
                        department_name: row.get(5)?,
                        coordinator_id: row.get(6)?,
                        is_deleted: row.get(7)?,
                    })
                },
            )
            .optional()
            .context("failed to read course")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let active_terms = self.load_active_terms(course_id)?;
        let faculty_roster = self.load_roster(course_id)?;

        Ok(Some(Course {
            course_id,
            name: row.name,
            code: row.code,
            scope: EntityScope {
                university_id: parse_optional_id(&row.university_id, UniversityId)?,
                school_id: parse_optional_id(&row.school_id, SchoolId)?,
                department_id: parse_optional_id(&row.department_id, DepartmentId)?,
                department_name: non_empty(row.department_name),
            },
            active_terms,
            coordinator: row
                .coordinator_id
                .as_deref()
                .map(|raw| parse_ulid(raw, "coordinator_id").map(FacultyId))
                .transpose()?,
            faculty_roster,
            is_deleted: row.is_deleted != 0,
        }))
    }

    /// List live (not soft-deleted) courses owned by the tenant.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_courses(&self, tenant: &TenantScope) -> Result<Vec<Course>> {
        let course_ids = {
            let mut stmt = self.conn.prepare(
                "SELECT course_id FROM courses WHERE is_deleted = 0 ORDER BY code ASC",
            )?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        let mut courses = Vec::new();
        for raw in course_ids {
            let course_id = CourseId(parse_ulid(&raw, "course_id")?);
            if let Some(course) = self.get_course(course_id)? {
                if tenant.owns(&course.scope) {
                    courses.push(course);
                }
            }
        }
        Ok(courses)
    }

    /// # Errors
    /// Returns an error when the update fails.
    pub fn set_coordinator(
        &self,
        course_id: CourseId,
        coordinator: Option<FacultyId>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE courses SET coordinator_id = ?1 WHERE course_id = ?2",
                params![coordinator.map(|id| id.to_string()), course_id.to_string()],
            )
            .context("failed to update coordinator")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the write fails.
    pub fn add_roster_member(&self, course_id: CourseId, faculty_id: FacultyId) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO course_faculty(course_id, faculty_id) VALUES (?1, ?2)",
                params![course_id.to_string(), faculty_id.to_string()],
            )
            .context("failed to add roster member")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the delete fails.
    pub fn remove_roster_member(&self, course_id: CourseId, faculty_id: FacultyId) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM course_faculty WHERE course_id = ?1 AND faculty_id = ?2",
                params![course_id.to_string(), faculty_id.to_string()],
            )
            .context("failed to remove roster member")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the write fails.
    pub fn add_active_term(&self, course_id: CourseId, term: &TermId) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO course_active_terms(course_id, term) VALUES (?1, ?2)",
                params![course_id.to_string(), term.as_str()],
            )
            .context("failed to add active term")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the update fails.
    pub fn soft_delete_course(&self, course_id: CourseId) -> Result<()> {
        self.conn
            .execute(
                "UPDATE courses SET is_deleted = 1 WHERE course_id = ?1",
                params![course_id.to_string()],
            )
            .context("failed to soft-delete course")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error on validation or write failure.
    pub fn insert_faculty(&self, faculty: &Faculty) -> Result<()> {
        faculty.validate().map_err(|err| anyhow!("faculty validation failed: {err}"))?;
        self.conn
            .execute(
                "INSERT INTO faculty(
                    faculty_id, name, role, university_id, school_id,
                    department_id, department_name
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    faculty.faculty_id.to_string(),
                    faculty.name,
                    faculty.role.as_str(),
                    university_key(faculty.scope.university_id),
                    id_key(faculty.scope.school_id),
                    id_key(faculty.scope.department_id),
                    faculty.scope.department_name.clone().unwrap_or_default(),
                ],
            )
            .context("failed to insert faculty")?;
        Ok(())
    }

    /// Load one faculty member with their course refs from the join table.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn get_faculty(&self, faculty_id: FacultyId) -> Result<Option<Faculty>> {
        let row = self
            .conn
            .query_row(
                "SELECT name, role, university_id, school_id, department_id, department_name
                 FROM faculty WHERE faculty_id = ?1",
                params![faculty_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()
            .context("failed to read faculty")?;

        let Some((name, role_raw, university, school, department, department_name)) = row else {
            return Ok(None);
        };

        let role = FacultyRole::parse(&role_raw)
            .ok_or_else(|| anyhow!("unknown faculty role: {role_raw}"))?;

        let mut stmt = self
            .conn
            .prepare("SELECT course_id FROM course_faculty WHERE faculty_id = ?1")?;
        let course_refs = stmt
            .query_map(params![faculty_id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|raw| parse_ulid(&raw, "course_id").map(CourseId))
            .collect::<Result<_>>()?;

        Ok(Some(Faculty {
            faculty_id,
            name,
            role,
            scope: EntityScope {
                university_id: parse_optional_id(&university, UniversityId)?,
                school_id: parse_optional_id(&school, SchoolId)?,
                department_id: parse_optional_id(&department, DepartmentId)?,
                department_name: non_empty(department_name),
            },
            course_refs,
        }))
    }

    /// # Errors
    /// Returns an error when the update fails.
    pub fn set_faculty_role(&self, faculty_id: FacultyId, role: FacultyRole) -> Result<()> {
        self.conn
            .execute(
                "UPDATE faculty SET role = ?1 WHERE faculty_id = ?2",
                params![role.as_str(), faculty_id.to_string()],
            )
            .context("failed to update faculty role")?;
        Ok(())
    }

    /// Number of live courses this faculty member currently coordinates.
    ///
    /// # Errors
    /// Returns an error when the count query fails.
    pub fn coordinated_course_count(&self, faculty_id: FacultyId) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM courses WHERE coordinator_id = ?1 AND is_deleted = 0",
                params![faculty_id.to_string()],
                |row| row.get(0),
            )
            .context("failed to count coordinatorships")?;
        usize::try_from(count).context("coordinatorship count out of range")
    }

    /// Idempotent archive upsert: at most one row per
    /// (term, course, faculty, university); a repeat write overwrites the
    /// role. A same-key row under a different university is surfaced as a
    /// conflict, never merged.
    ///
    /// # Errors
    /// Returns an error on cross-tenant conflict or write failure.
    pub fn upsert_archive_entry(&self, entry: &TermArchiveEntry) -> Result<()> {
        let university = university_key(entry.university_id);

        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT university_id FROM term_archive
                 WHERE term = ?1 AND course_id = ?2 AND faculty_id = ?3
                 LIMIT 1",
                params![
                    entry.term.as_str(),
                    entry.course_id.to_string(),
                    entry.faculty_id.to_string()
                ],
                |row| row.get(0),
            )
            .optional()
            .context("failed to probe archive for conflicts")?;

        if let Some(existing_university) = existing {
            if existing_university != university {
                return Err(anyhow!(
                    "conflict: archive entry for term {} course {} faculty {} belongs to another tenant",
                    entry.term,
                    entry.course_id,
                    entry.faculty_id
                ));
            }
        }

        self.conn
            .execute(
                "INSERT INTO term_archive(
                    term, course_id, faculty_id, role,
                    university_id, school_id, department_id, archived_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(term, course_id, faculty_id, university_id)
                 DO UPDATE SET role = excluded.role, archived_at = excluded.archived_at",
                params![
                    entry.term.as_str(),
                    entry.course_id.to_string(),
                    entry.faculty_id.to_string(),
                    entry.role.as_str(),
                    university,
                    id_key(entry.school_id),
                    id_key(entry.department_id),
                    now_rfc3339()?,
                ],
            )
            .context("failed to upsert archive entry")?;
        Ok(())
    }

    /// Load archive rows for one term within the tenant's scope, optionally
    /// narrowed to one course or one faculty member.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn archive_entries(
        &self,
        tenant: &TenantScope,
        term: &TermId,
        course_id: Option<CourseId>,
        faculty_id: Option<FacultyId>,
    ) -> Result<Vec<TermArchiveEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT term, course_id, faculty_id, role, university_id, school_id, department_id
             FROM term_archive WHERE term = ?1
             ORDER BY course_id ASC, faculty_id ASC",
        )?;

        let mut rows = stmt.query(params![term.as_str()])?;
        let mut entries = Vec::new();

        while let Some(row) = rows.next()? {
            let term_raw: String = row.get(0)?;
            let course_raw: String = row.get(1)?;
            let faculty_raw: String = row.get(2)?;
            let role_raw: String = row.get(3)?;
            let university_raw: String = row.get(4)?;
            let school_raw: String = row.get(5)?;
            let department_raw: String = row.get(6)?;

            let entry = TermArchiveEntry {
                term: TermId::parse(&term_raw)
                    .map_err(|err| anyhow!("stored archive term is invalid: {err}"))?,
                course_id: CourseId(parse_ulid(&course_raw, "course_id")?),
                faculty_id: FacultyId(parse_ulid(&faculty_raw, "faculty_id")?),
                role: ArchiveRole::parse(&role_raw)
                    .ok_or_else(|| anyhow!("unknown archive role: {role_raw}"))?,
                university_id: parse_optional_id(&university_raw, UniversityId)?,
                school_id: parse_optional_id(&school_raw, SchoolId)?,
                department_id: parse_optional_id(&department_raw, DepartmentId)?,
            };

            if let Some(filter) = course_id {
                if entry.course_id != filter {
                    continue;
                }
            }
            if let Some(filter) = faculty_id {
                if entry.faculty_id != filter {
                    continue;
                }
            }
            if !tenant_owns_archive_row(tenant, &entry) {
                continue;
            }

            entries.push(entry);
        }

        Ok(entries)
    }

    /// # Errors
    /// Returns an error when the write fails.
    pub fn insert_assessment(&self, assessment: &Assessment) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO assessments(assessment_id, course_id, term, title, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    assessment.assessment_id.to_string(),
                    assessment.course_id.to_string(),
                    assessment.term.as_str(),
                    assessment.title,
                    now_rfc3339()?,
                ],
            )
            .context("failed to insert assessment")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when the write fails.
    pub fn insert_question(
        &self,
        question_id: QuestionId,
        assessment_id: AssessmentId,
        faculty_id: FacultyId,
        question_set: &str,
        body: &str,
    ) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO questions(question_id, assessment_id, faculty_id, question_set, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    question_id.to_string(),
                    assessment_id.to_string(),
                    faculty_id.to_string(),
                    question_set,
                    body
                ],
            )
            .context("failed to insert question")?;
        Ok(())
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_assessments(&self, course_id: CourseId, term: &TermId) -> Result<Vec<Assessment>> {
        let mut stmt = self.conn.prepare(
            "SELECT assessment_id, title FROM assessments
             WHERE course_id = ?1 AND term = ?2
             ORDER BY assessment_id ASC",
        )?;
        let rows = stmt
            .query_map(params![course_id.to_string(), term.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(raw_id, title)| {
                Ok(Assessment {
                    assessment_id: AssessmentId(parse_ulid(&raw_id, "assessment_id")?),
                    course_id,
                    term: term.clone(),
                    title,
                })
            })
            .collect()
    }

    /// # Errors
    /// Returns an error when the count query fails.
    pub fn question_count(&self, assessment_id: AssessmentId) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM questions WHERE assessment_id = ?1",
                params![assessment_id.to_string()],
                |row| row.get(0),
            )
            .context("failed to count questions")?;
        usize::try_from(count).context("question count out of range")
    }

    /// Detach one course from one term: delete every question nested under
    /// the (course, term) assessments, then the assessments, then the
    /// active-term row. The course catalog row is untouched.
    ///
    /// # Errors
    /// Returns an error when any delete in the transaction fails.
    pub fn delete_course_term(
        &mut self,
        course_id: CourseId,
        term: &TermId,
    ) -> Result<(usize, usize)> {
        let tx = self.conn.transaction().context("failed to start cascade transaction")?;

        let assessment_ids = {
            let mut stmt = tx.prepare(
                "SELECT assessment_id FROM assessments WHERE course_id = ?1 AND term = ?2",
            )?;
            let ids = stmt
                .query_map(params![course_id.to_string(), term.as_str()], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            ids
        };

        let mut removed_questions = 0_usize;
        for assessment_id in &assessment_ids {
            removed_questions += tx
                .execute(
                    "DELETE FROM questions WHERE assessment_id = ?1",
                    params![assessment_id],
                )
                .context("failed to delete questions")?;
        }

        let removed_assessments = tx
            .execute(
                "DELETE FROM assessments WHERE course_id = ?1 AND term = ?2",
                params![course_id.to_string(), term.as_str()],
            )
            .context("failed to delete assessments")?;

        tx.execute(
            "DELETE FROM course_active_terms WHERE course_id = ?1 AND term = ?2",
            params![course_id.to_string(), term.as_str()],
        )
        .context("failed to remove active term")?;

        tx.commit().context("failed to commit cascade transaction")?;
        Ok((removed_assessments, removed_questions))
    }

    fn load_active_terms(&self, course_id: CourseId) -> Result<std::collections::BTreeSet<TermId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT term FROM course_active_terms WHERE course_id = ?1")?;
        let raw_terms = stmt
            .query_map(params![course_id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raw_terms
            .into_iter()
            .map(|raw| {
                TermId::parse(&raw).map_err(|err| anyhow!("stored active term is invalid: {err}"))
            })
            .collect()
    }

    fn load_roster(&self, course_id: CourseId) -> Result<std::collections::BTreeSet<FacultyId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT faculty_id FROM course_faculty WHERE course_id = ?1")?;
        let raw_ids = stmt
            .query_map(params![course_id.to_string()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raw_ids
            .into_iter()
            .map(|raw| parse_ulid(&raw, "faculty_id").map(FacultyId))
            .collect()
    }
}

struct CourseRow {
    name: String,
    code: String,
    university_id: String,
    school_id: String,
    department_id: String,
    department_name: String,
    coordinator_id: Option<String>,
    is_deleted: i64,
}

fn tenant_owns_archive_row(tenant: &TenantScope, entry: &TermArchiveEntry) -> bool {
    if let Some(university_id) = tenant.university_id {
        if entry.university_id != Some(university_id) {
            return false;
        }
    }
    if let Some(school_id) = tenant.school_id {
        if entry.school_id != Some(school_id) {
            return false;
        }
    }
    true
}

fn university_key(university_id: Option<UniversityId>) -> String {
    university_id.map(|id| id.to_string()).unwrap_or_default()
}

fn id_key<T: Display>(id: Option<T>) -> String {
    id.map(|value| value.to_string()).unwrap_or_default()
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_ulid(raw: &str, field: &str) -> Result<Ulid> {
    Ulid::from_string(raw).map_err(|err| anyhow!("invalid {field} value {raw}: {err}"))
}

fn parse_optional_id<T>(raw: &str, wrap: impl FnOnce(Ulid) -> T) -> Result<Option<T>> {
    if raw.is_empty() {
        return Ok(None);
    }
    Ok(Some(wrap(parse_ulid(raw, "scope id")?)))
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format timestamp")
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .with_context(|| format!("failed to probe for table {table}"))?;
    Ok(count > 0)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table {table}"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name == column))
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<i64> = conn
        .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read schema version")?;
    Ok(version.unwrap_or(0))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now_rfc3339()?],
    )
    .with_context(|| format!("failed to record schema version {version}"))?;
    Ok(())
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if !table_exists(conn, "courses")? {
        return Ok((0, false));
    }
    if table_has_column(conn, "courses", "department_name")? {
        return Ok((2, true));
    }
    Ok((1, true))
}

fn apply_migration_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
    record_schema_version(conn, 1)
}

/// Split the legacy mixed `department` column: values that parse as an id
/// become the foreign key, anything else survives as the display name.
fn split_department(raw: &str) -> (String, String) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return (String::new(), String::new());
    }
    if Ulid::from_string(trimmed).is_ok() {
        (trimmed.to_string(), String::new())
    } else {
        (String::new(), trimmed.to_string())
    }
}

fn canonical_term(raw: &str) -> Result<String> {
    TermId::parse(raw)
        .map(|term| term.as_str().to_string())
        .map_err(|err| anyhow!("cannot canonicalize legacy term {raw}: {err}"))
}

fn copy_term_pointers_to_v2(tx: &rusqlite::Transaction<'_>) -> Result<()> {
    let mut stmt = tx.prepare("SELECT key, university_id, term FROM term_pointers")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (key, university, term) in rows {
        tx.execute(
            "INSERT OR IGNORE INTO term_pointers_v2(key, university_id, term) VALUES (?1, ?2, ?3)",
            params![key, university, canonical_term(&term)?],
        )
        .context("failed to copy term pointer into v2")?;
    }
    Ok(())
}

fn copy_courses_to_v2(tx: &rusqlite::Transaction<'_>) -> Result<()> {
    let mut stmt = tx.prepare(
        "SELECT course_id, name, code, university_id, school_id, department,
                coordinator_id, is_deleted, created_at
         FROM courses ORDER BY course_id ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, i64>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (course_id, name, code, university, school, department, coordinator, is_deleted, created)
        in rows
    {
        let (department_id, department_name) = split_department(&department);
        tx.execute(
            "INSERT INTO courses_v2(
                course_id, name, code, university_id, school_id,
                department_id, department_name, coordinator_id, is_deleted, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                course_id,
                name,
                code,
                university,
                school,
                department_id,
                department_name,
                coordinator,
                is_deleted,
                created
            ],
        )
        .context("failed to copy course into v2")?;
    }
    Ok(())
}

fn copy_active_terms_to_v2(tx: &rusqlite::Transaction<'_>) -> Result<()> {
    let mut stmt = tx.prepare("SELECT course_id, term FROM course_active_terms")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (course_id, term) in rows {
        // Canonicalization can collapse "24252" and "24252.0" into one row.
        tx.execute(
            "INSERT OR IGNORE INTO course_active_terms_v2(course_id, term) VALUES (?1, ?2)",
            params![course_id, canonical_term(&term)?],
        )
        .context("failed to copy active term into v2")?;
    }
    Ok(())
}

fn copy_faculty_to_v2(tx: &rusqlite::Transaction<'_>) -> Result<()> {
    let mut stmt = tx.prepare(
        "SELECT faculty_id, name, role, university_id, school_id, department
         FROM faculty ORDER BY faculty_id ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (faculty_id, name, role, university, school, department) in rows {
        let (department_id, department_name) = split_department(&department);
        tx.execute(
            "INSERT INTO faculty_v2(
                faculty_id, name, role, university_id, school_id,
                department_id, department_name
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![faculty_id, name, role, university, school, department_id, department_name],
        )
        .context("failed to copy faculty into v2")?;
    }
    Ok(())
}

fn copy_archive_to_v2(tx: &rusqlite::Transaction<'_>) -> Result<()> {
    let mut stmt = tx.prepare(
        "SELECT term, course_id, faculty_id, role, university_id, school_id, department, archived_at
         FROM term_archive ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (term, course_id, faculty_id, role, university, school, department, archived_at) in rows {
        let (department_id, _department_name) = split_department(&department);
        tx.execute(
            "INSERT INTO term_archive_v2(
                term, course_id, faculty_id, role,
                university_id, school_id, department_id, archived_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(term, course_id, faculty_id, university_id)
             DO UPDATE SET role = excluded.role",
            params![
                canonical_term(&term)?,
                course_id,
                faculty_id,
                role,
                university,
                school,
                department_id,
                archived_at
            ],
        )
        .context("failed to copy archive entry into v2")?;
    }
    Ok(())
}

fn copy_assessments_to_v2(tx: &rusqlite::Transaction<'_>) -> Result<()> {
    let mut stmt = tx.prepare(
        "SELECT assessment_id, course_id, term, title, created_at FROM assessments",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    for (assessment_id, course_id, term, title, created_at) in rows {
        tx.execute(
            "INSERT INTO assessments_v2(assessment_id, course_id, term, title, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![assessment_id, course_id, canonical_term(&term)?, title, created_at],
        )
        .context("failed to copy assessment into v2")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("acadterm-store-{}.sqlite3", Ulid::new()))
    }

    fn open_migrated() -> (SqliteStore, PathBuf) {
        let path = unique_temp_db_path();
        let mut store = match SqliteStore::open(&path) {
            Ok(store) => store,
            Err(err) => panic!("store should open: {err}"),
        };
        if let Err(err) = store.migrate() {
            panic!("fresh database should migrate: {err}");
        }
        (store, path)
    }

    fn term(raw: &str) -> TermId {
        match TermId::parse(raw) {
            Ok(term) => term,
            Err(err) => panic!("fixture term {raw} should parse: {err}"),
        }
    }

    fn fixture_course(university_id: Option<UniversityId>, code: &str) -> Course {
        Course {
            course_id: CourseId::new(),
            name: "Introduction to Computing".to_string(),
            code: code.to_string(),
            scope: EntityScope { university_id, ..EntityScope::default() },
            active_terms: BTreeSet::new(),
            coordinator: None,
            faculty_roster: BTreeSet::new(),
            is_deleted: false,
        }
    }

    fn fixture_entry(
        term_raw: &str,
        course_id: CourseId,
        faculty_id: FacultyId,
        role: ArchiveRole,
        university_id: Option<UniversityId>,
    ) -> TermArchiveEntry {
        TermArchiveEntry {
            term: term(term_raw),
            course_id,
            faculty_id,
            role,
            university_id,
            school_id: None,
            department_id: None,
        }
    }

    #[test]
    fn fresh_database_migrates_to_latest() {
        let (store, path) = open_migrated();
        let status = match store.schema_status() {
            Ok(status) => status,
            Err(err) => panic!("schema status should read: {err}"),
        };
        assert_eq!(status.current_version, LATEST_SCHEMA_VERSION);
        assert!(status.pending_versions.is_empty());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn term_pointer_self_initializes_with_default() {
        let (store, path) = open_migrated();
        let tenant = TenantScope::default();

        let current = match store.current_term(&tenant) {
            Ok(term) => term,
            Err(err) => panic!("pointer read should self-initialize: {err}"),
        };
        assert_eq!(current, term(DEFAULT_TERM));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn term_pointer_round_trips_per_tenant() {
        let (store, path) = open_migrated();
        let global = TenantScope::default();
        let scoped = TenantScope {
            university_id: Some(UniversityId::new()),
            ..TenantScope::default()
        };

        if let Err(err) = store.set_current_term(&scoped, &term("25262")) {
            panic!("pointer write should succeed: {err}");
        }

        let scoped_term = match store.current_term(&scoped) {
            Ok(term) => term,
            Err(err) => panic!("scoped pointer read should succeed: {err}"),
        };
        let global_term = match store.current_term(&global) {
            Ok(term) => term,
            Err(err) => panic!("global pointer read should succeed: {err}"),
        };

        assert_eq!(scoped_term, term("25262"));
        assert_eq!(global_term, term(DEFAULT_TERM));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn archive_upsert_is_idempotent_and_overwrites_role() {
        let (store, path) = open_migrated();
        let course_id = CourseId::new();
        let faculty_id = FacultyId::new();

        let faculty_entry =
            fixture_entry("24252", course_id, faculty_id, ArchiveRole::Faculty, None);
        for _ in 0..2 {
            if let Err(err) = store.upsert_archive_entry(&faculty_entry) {
                panic!("archive upsert should succeed: {err}");
            }
        }

        let promoted =
            fixture_entry("24252", course_id, faculty_id, ArchiveRole::CourseCoordinator, None);
        if let Err(err) = store.upsert_archive_entry(&promoted) {
            panic!("archive role overwrite should succeed: {err}");
        }

        let entries = match store.archive_entries(&TenantScope::default(), &term("24252"), None, None)
        {
            Ok(entries) => entries,
            Err(err) => panic!("archive read should succeed: {err}"),
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].role, ArchiveRole::CourseCoordinator);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn archive_upsert_surfaces_cross_tenant_conflict() {
        let (store, path) = open_migrated();
        let course_id = CourseId::new();
        let faculty_id = FacultyId::new();

        let entry_a = fixture_entry(
            "24252",
            course_id,
            faculty_id,
            ArchiveRole::Faculty,
            Some(UniversityId::new()),
        );
        if let Err(err) = store.upsert_archive_entry(&entry_a) {
            panic!("first tenant upsert should succeed: {err}");
        }

        let entry_b = fixture_entry(
            "24252",
            course_id,
            faculty_id,
            ArchiveRole::Faculty,
            Some(UniversityId::new()),
        );
        let err = match store.upsert_archive_entry(&entry_b) {
            Ok(()) => panic!("cross-tenant upsert should conflict"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("conflict"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn archive_reads_are_tenant_isolated() {
        let (store, path) = open_migrated();
        let university_a = UniversityId::new();
        let university_b = UniversityId::new();

        let entry_a = fixture_entry(
            "24252",
            CourseId::new(),
            FacultyId::new(),
            ArchiveRole::Faculty,
            Some(university_a),
        );
        let entry_b = fixture_entry(
            "24252",
            CourseId::new(),
            FacultyId::new(),
            ArchiveRole::Faculty,
            Some(university_b),
        );
        for entry in [&entry_a, &entry_b] {
            if let Err(err) = store.upsert_archive_entry(entry) {
                panic!("archive upsert should succeed: {err}");
            }
        }

        let tenant_a =
            TenantScope { university_id: Some(university_a), ..TenantScope::default() };
        let entries = match store.archive_entries(&tenant_a, &term("24252"), None, None) {
            Ok(entries) => entries,
            Err(err) => panic!("archive read should succeed: {err}"),
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].university_id, Some(university_a));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn live_code_collision_is_a_conflict() {
        let (mut store, path) = open_migrated();
        let university_id = Some(UniversityId::new());

        if let Err(err) = store.insert_course(&fixture_course(university_id, "CSE101")) {
            panic!("first course insert should succeed: {err}");
        }
        let err = match store.insert_course(&fixture_course(university_id, "CSE101")) {
            Ok(()) => panic!("duplicate live code should conflict"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("conflict"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn soft_deleted_code_collision_renames_the_deleted_row() {
        let (mut store, path) = open_migrated();
        let university_id = Some(UniversityId::new());

        let old_course = fixture_course(university_id, "CSE101");
        if let Err(err) = store.insert_course(&old_course) {
            panic!("first course insert should succeed: {err}");
        }
        if let Err(err) = store.soft_delete_course(old_course.course_id) {
            panic!("soft delete should succeed: {err}");
        }

        let new_course = fixture_course(university_id, "CSE101");
        if let Err(err) = store.insert_course(&new_course) {
            panic!("insert over soft-deleted code should succeed: {err}");
        }

        let reloaded_old = match store.get_course(old_course.course_id) {
            Ok(Some(course)) => course,
            Ok(None) => panic!("soft-deleted course catalog row should survive"),
            Err(err) => panic!("course read should succeed: {err}"),
        };
        assert!(reloaded_old.code.starts_with("CSE101-retired-"));
        assert!(reloaded_old.is_deleted);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn cascade_delete_counts_and_spares_other_terms() {
        let (mut store, path) = open_migrated();
        let course = fixture_course(None, "CSE101");
        if let Err(err) = store.insert_course(&course) {
            panic!("course insert should succeed: {err}");
        }
        for raw in ["24252", "25262"] {
            if let Err(err) = store.add_active_term(course.course_id, &term(raw)) {
                panic!("active term insert should succeed: {err}");
            }
        }

        let faculty_id = FacultyId::new();
        let mut other_term_assessment = None;
        for raw in ["24252", "24252", "25262"] {
            let assessment = Assessment {
                assessment_id: AssessmentId::new(),
                course_id: course.course_id,
                term: term(raw),
                title: format!("Quiz {raw}"),
            };
            if let Err(err) = store.insert_assessment(&assessment) {
                panic!("assessment insert should succeed: {err}");
            }
            for set_name in ["set-a", "set-b"] {
                if let Err(err) = store.insert_question(
                    QuestionId::new(),
                    assessment.assessment_id,
                    faculty_id,
                    set_name,
                    "What is a B-tree?",
                ) {
                    panic!("question insert should succeed: {err}");
                }
            }
            if raw == "25262" {
                other_term_assessment = Some(assessment.assessment_id);
            }
        }

        let (removed_assessments, removed_questions) =
            match store.delete_course_term(course.course_id, &term("24252")) {
                Ok(counts) => counts,
                Err(err) => panic!("cascade delete should succeed: {err}"),
            };
        assert_eq!(removed_assessments, 2);
        assert_eq!(removed_questions, 4);

        let survivors = match store.list_assessments(course.course_id, &term("25262")) {
            Ok(assessments) => assessments,
            Err(err) => panic!("assessment listing should succeed: {err}"),
        };
        assert_eq!(survivors.len(), 1);
        if let Some(assessment_id) = other_term_assessment {
            let count = match store.question_count(assessment_id) {
                Ok(count) => count,
                Err(err) => panic!("question count should succeed: {err}"),
            };
            assert_eq!(count, 2);
        }

        let reloaded = match store.get_course(course.course_id) {
            Ok(Some(course)) => course,
            Ok(None) => panic!("course catalog row should survive cascade"),
            Err(err) => panic!("course read should succeed: {err}"),
        };
        assert!(!reloaded.active_terms.contains(&term("24252")));
        assert!(reloaded.active_terms.contains(&term("25262")));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn migration_v2_normalizes_drifted_terms_and_splits_departments() {
        let path = unique_temp_db_path();
        let department_id = DepartmentId::new();
        let course_id = CourseId::new();
        let faculty_id = FacultyId::new();

        {
            let conn = match Connection::open(&path) {
                Ok(conn) => conn,
                Err(err) => panic!("legacy database should open: {err}"),
            };
            if let Err(err) = conn.execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL) {
                panic!("schema_migrations should apply: {err}");
            }
            if let Err(err) = apply_migration_1(&conn) {
                panic!("legacy schema should apply: {err}");
            }

            let now = match now_rfc3339() {
                Ok(now) => now,
                Err(err) => panic!("timestamp should format: {err}"),
            };
            let legacy_rows: &[&str] = &[
                // A course whose department column holds a foreign key.
                &format!(
                    "INSERT INTO courses(course_id, name, code, department, created_at, is_deleted)
                     VALUES ('{course_id}', 'Algorithms', 'CSE201', '{department_id}', '{now}', 0)"
                ),
                // A faculty row whose department column holds a display name.
                &format!(
                    "INSERT INTO faculty(faculty_id, name, role, department)
                     VALUES ('{faculty_id}', 'Prof. Rao', 'faculty', 'Computer Science')"
                ),
                // Drifting term spellings across tables.
                &format!(
                    "INSERT INTO course_active_terms(course_id, term)
                     VALUES ('{course_id}', '24252.0')"
                ),
                &format!(
                    "INSERT INTO course_active_terms(course_id, term)
                     VALUES ('{course_id}', '024252')"
                ),
                &format!(
                    "INSERT INTO term_archive(term, course_id, faculty_id, role, archived_at)
                     VALUES ('24252.0', '{course_id}', '{faculty_id}', 'faculty', '{now}')"
                ),
                "INSERT INTO term_pointers(key, university_id, term)
                 VALUES ('current_term', '', '25262.0')",
            ];
            for sql in legacy_rows {
                if let Err(err) = conn.execute(sql, []) {
                    panic!("legacy fixture insert should succeed: {err}\nsql: {sql}");
                }
            }
        }

        let mut store = match SqliteStore::open(&path) {
            Ok(store) => store,
            Err(err) => panic!("store should open: {err}"),
        };
        if let Err(err) = store.migrate() {
            panic!("legacy database should migrate: {err}");
        }

        let course = match store.get_course(course_id) {
            Ok(Some(course)) => course,
            Ok(None) => panic!("migrated course should exist"),
            Err(err) => panic!("course read should succeed: {err}"),
        };
        assert_eq!(course.scope.department_id, Some(department_id));
        assert_eq!(course.scope.department_name, None);
        // "24252.0" and "024252" collapse into a single canonical row.
        assert_eq!(course.active_terms.len(), 1);
        assert!(course.active_terms.contains(&term("24252")));

        let faculty = match store.get_faculty(faculty_id) {
            Ok(Some(faculty)) => faculty,
            Ok(None) => panic!("migrated faculty should exist"),
            Err(err) => panic!("faculty read should succeed: {err}"),
        };
        assert_eq!(faculty.scope.department_id, None);
        assert_eq!(faculty.scope.department_name, Some("Computer Science".to_string()));

        let entries = match store.archive_entries(&TenantScope::default(), &term("24252"), None, None)
        {
            Ok(entries) => entries,
            Err(err) => panic!("archive read should succeed: {err}"),
        };
        assert_eq!(entries.len(), 1);

        let current = match store.current_term(&TenantScope::default()) {
            Ok(term) => term,
            Err(err) => panic!("pointer read should succeed: {err}"),
        };
        assert_eq!(current, term("25262"));
        let _ = std::fs::remove_file(&path);
    }
}
