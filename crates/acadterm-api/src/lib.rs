use std::path::PathBuf;

use acadterm_core::{
    live_roster, reconstruct_rosters, snapshot_course_roster, ArchiveRole, Assessment,
    AssessmentId, Course, CourseId, CourseRoster, DepartmentHandle, DepartmentId, DepartmentRef,
    EntityScope, Faculty, FacultyId, FacultyRole, QuestionId, RegistryError, RosterSource,
    SchoolId, TenantScope, TermArchiveEntry, TermId, UniversityId,
};
use acadterm_store_sqlite::{SchemaStatus, SqliteStore};
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// Tenant scope as it arrives on a request: flat optional dimensions, with
/// the department addressable by foreign key or by legacy display name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TenantScopeRequest {
    pub university_id: Option<UniversityId>,
    pub school_id: Option<SchoolId>,
    pub department_id: Option<DepartmentId>,
    pub department_name: Option<String>,
}

impl TenantScopeRequest {
    /// Resolve the raw request fields into a canonical [`TenantScope`].
    /// The department fields collapse into one [`DepartmentRef`] here, at the
    /// tenancy boundary, so no downstream code re-decides which to trust.
    #[must_use]
    pub fn resolve(&self) -> TenantScope {
        let department = match (self.department_id, &self.department_name) {
            (Some(id), _) => Some(DepartmentRef::ById(id)),
            (None, Some(name)) if !name.trim().is_empty() => {
                Some(DepartmentRef::ByLegacyName(name.clone()))
            }
            _ => None,
        }
        .map(resolve_department_ref);

        TenantScope {
            university_id: self.university_id,
            school_id: self.school_id,
            department,
        }
    }

    fn entity_scope(&self) -> EntityScope {
        EntityScope {
            university_id: self.university_id,
            school_id: self.school_id,
            department_id: self.department_id,
            department_name: self
                .department_name
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(ToString::to_string),
        }
    }
}

#[must_use]
pub fn resolve_department_ref(reference: DepartmentRef) -> DepartmentHandle {
    match reference {
        DepartmentRef::ById(id) => {
            DepartmentHandle { department_id: Some(id), legacy_name: None }
        }
        DepartmentRef::ByLegacyName(name) => DepartmentHandle {
            department_id: None,
            legacy_name: Some(name.trim().to_string()),
        },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CourseArchiveCount {
    pub course_id: CourseId,
    pub entries_written: usize,
}

/// Outcome of one term transition, detailed enough that an operator retrying
/// a failed run can see which courses were already archived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransitionReport {
    pub previous_term: TermId,
    pub new_term: TermId,
    pub archived_courses: Vec<CourseArchiveCount>,
    pub skipped_inactive: Vec<CourseId>,
    pub entries_written: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CascadeReport {
    pub course_id: CourseId,
    pub term: TermId,
    pub removed_assessments: usize,
    pub removed_questions: usize,
}

/// A course roster resolved for one term, live or reconstructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterView {
    pub course_id: CourseId,
    pub term: TermId,
    pub source: RosterSource,
    pub coordinator: Option<FacultyId>,
    pub faculty: Vec<FacultyId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CourseOffering {
    pub course_id: CourseId,
    pub code: String,
    pub name: String,
    pub coordinator: Option<FacultyId>,
    pub faculty: Vec<FacultyId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TermCourses {
    pub term: TermId,
    pub source: RosterSource,
    pub courses: Vec<CourseOffering>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FacultyCourseView {
    pub course_id: CourseId,
    pub code: String,
    pub name: String,
    pub role: ArchiveRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FacultyCourses {
    pub faculty_id: FacultyId,
    pub term: TermId,
    pub source: RosterSource,
    pub courses: Vec<FacultyCourseView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateCourseRequest {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub active_terms: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateFacultyRequest {
    pub name: String,
    pub role: FacultyRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReappointRequest {
    pub term: serde_json::Value,
    pub course_id: CourseId,
    pub faculty_id: FacultyId,
    pub role: ArchiveRole,
}

/// Parse a course id from its string rendering.
///
/// # Errors
/// Returns an error when the value is not a valid ULID.
pub fn parse_course_id(raw: &str) -> Result<CourseId> {
    Ulid::from_string(raw).map(CourseId).map_err(|err| anyhow!("invalid course id {raw}: {err}"))
}

/// Parse a faculty id from its string rendering.
///
/// # Errors
/// Returns an error when the value is not a valid ULID.
pub fn parse_faculty_id(raw: &str) -> Result<FacultyId> {
    Ulid::from_string(raw).map(FacultyId).map_err(|err| anyhow!("invalid faculty id {raw}: {err}"))
}

/// Parse an assessment id from its string rendering.
///
/// # Errors
/// Returns an error when the value is not a valid ULID.
pub fn parse_assessment_id(raw: &str) -> Result<AssessmentId> {
    Ulid::from_string(raw)
        .map(AssessmentId)
        .map_err(|err| anyhow!("invalid assessment id {raw}: {err}"))
}

#[derive(Debug, Clone)]
pub struct TermRegistryApi {
    db_path: PathBuf,
}

impl TermRegistryApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                inferred_from_legacy: before.inferred_from_legacy,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            inferred_from_legacy: before.inferred_from_legacy,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Read the tenant's current term; self-initializes on first use.
    ///
    /// # Errors
    /// Returns an error when the pointer cannot be read.
    pub fn current_term(&self, scope: &TenantScopeRequest) -> Result<TermId> {
        let store = self.open_migrated()?;
        store.current_term(&scope.resolve())
    }

    /// Transition the tenant to a new term.
    ///
    /// Every in-scope course active in the outgoing term has its roster
    /// snapshotted into the archive before the pointer moves; any snapshot
    /// failure aborts with the pointer untouched. Re-running with the same
    /// arguments converges because archive writes are idempotent upserts.
    ///
    /// # Errors
    /// Returns an error on invalid term input or any snapshot/pointer
    /// failure.
    pub fn transition_term(
        &self,
        scope: &TenantScopeRequest,
        new_term: &serde_json::Value,
    ) -> Result<TransitionReport> {
        let tenant = scope.resolve();
        let store = self.open_migrated()?;

        let previous_term = store.current_term(&tenant)?;
        let new_term = TermId::from_json(new_term)?;

        tracing::info!(
            previous_term = %previous_term,
            new_term = %new_term,
            "term transition started"
        );

        let mut archived_courses = Vec::new();
        let mut skipped_inactive = Vec::new();
        let mut entries_written = 0_usize;

        for course in store.list_courses(&tenant)? {
            if !course.is_active_in(&previous_term) {
                skipped_inactive.push(course.course_id);
                continue;
            }
            let entries = snapshot_course_roster(&course, &previous_term);
            for entry in &entries {
                store.upsert_archive_entry(entry)?;
            }
            entries_written += entries.len();
            archived_courses
                .push(CourseArchiveCount { course_id: course.course_id, entries_written: entries.len() });
        }

        store.set_current_term(&tenant, &new_term)?;

        tracing::info!(
            previous_term = %previous_term,
            new_term = %new_term,
            archived_courses = archived_courses.len(),
            entries_written,
            "term transition complete"
        );

        Ok(TransitionReport {
            previous_term,
            new_term,
            archived_courses,
            skipped_inactive,
            entries_written,
        })
    }

    /// Resolve one course's roster for a term.
    ///
    /// The current term reads the live roster; any other term reconstructs
    /// from the archive. An empty reconstruction is an empty roster, not an
    /// error. Faculty references no longer present in the live store are
    /// dropped from the result.
    ///
    /// # Errors
    /// Returns an error when the course does not exist, is outside the
    /// tenant's scope, or storage fails.
    pub fn resolve_course_roster(
        &self,
        scope: &TenantScopeRequest,
        course_id: CourseId,
        requested_term: Option<&serde_json::Value>,
    ) -> Result<RosterView> {
        let tenant = scope.resolve();
        let store = self.open_migrated()?;

        let current = store.current_term(&tenant)?;
        let term = resolve_requested_term(requested_term, &current)?;

        let course = store
            .get_course(course_id)?
            .ok_or_else(|| RegistryError::NotFound(format!("course {course_id}")))?;
        if !tenant.owns(&course.scope) {
            return Err(RegistryError::ScopeMismatch(format!(
                "course {course_id} is outside the requested tenant scope"
            ))
            .into());
        }

        if term == current {
            if course.is_deleted {
                return Err(RegistryError::NotFound(format!("course {course_id}")).into());
            }
            if !course.is_active_in(&term) {
                return Err(RegistryError::NotFound(format!(
                    "course {course_id} is not offered in term {term}"
                ))
                .into());
            }
            let roster = live_roster(&course);
            return Ok(RosterView {
                course_id,
                term,
                source: RosterSource::Live,
                coordinator: roster.coordinator,
                faculty: roster.faculty,
            });
        }

        let entries = store.archive_entries(&tenant, &term, Some(course_id), None)?;
        let roster = reconstruct_rosters(&entries)
            .remove(&course_id)
            .unwrap_or_else(|| CourseRoster { coordinator: None, faculty: Vec::new() });
        let roster = retain_live_faculty(&store, roster)?;

        Ok(RosterView {
            course_id,
            term,
            source: RosterSource::Reconstructed,
            coordinator: roster.coordinator,
            faculty: roster.faculty,
        })
    }

    /// List the tenant's courses offered in a term, with rosters.
    ///
    /// # Errors
    /// Returns an error on invalid term input or storage failure.
    pub fn resolve_department_courses(
        &self,
        scope: &TenantScopeRequest,
        requested_term: Option<&serde_json::Value>,
    ) -> Result<TermCourses> {
        let tenant = scope.resolve();
        let store = self.open_migrated()?;

        let current = store.current_term(&tenant)?;
        let term = resolve_requested_term(requested_term, &current)?;

        if term == current {
            let mut courses = Vec::new();
            for course in store.list_courses(&tenant)? {
                if !course.is_active_in(&term) {
                    continue;
                }
                let roster = live_roster(&course);
                courses.push(CourseOffering {
                    course_id: course.course_id,
                    code: course.code,
                    name: course.name,
                    coordinator: roster.coordinator,
                    faculty: roster.faculty,
                });
            }
            return Ok(TermCourses { term, source: RosterSource::Live, courses });
        }

        let entries = store.archive_entries(&tenant, &term, None, None)?;
        let mut courses = Vec::new();
        for (course_id, roster) in reconstruct_rosters(&entries) {
            // Archive rows alone do not prove department ownership; the
            // catalog row does.
            let Some(course) = store.get_course(course_id)? else {
                tracing::debug!(%course_id, "archived course missing from catalog; skipped");
                continue;
            };
            if !tenant.owns(&course.scope) {
                continue;
            }
            let roster = retain_live_faculty(&store, roster)?;
            courses.push(CourseOffering {
                course_id,
                code: course.code,
                name: course.name,
                coordinator: roster.coordinator,
                faculty: roster.faculty,
            });
        }
        courses.sort_by(|a, b| a.code.cmp(&b.code));

        Ok(TermCourses { term, source: RosterSource::Reconstructed, courses })
    }

    /// List the courses one faculty member taught (or coordinated) in a term.
    ///
    /// # Errors
    /// Returns an error when the faculty member does not exist, is outside
    /// the tenant's scope, or storage fails.
    pub fn resolve_faculty_courses(
        &self,
        scope: &TenantScopeRequest,
        faculty_id: FacultyId,
        requested_term: Option<&serde_json::Value>,
    ) -> Result<FacultyCourses> {
        let tenant = scope.resolve();
        let store = self.open_migrated()?;

        let current = store.current_term(&tenant)?;
        let term = resolve_requested_term(requested_term, &current)?;

        let faculty = store
            .get_faculty(faculty_id)?
            .ok_or_else(|| RegistryError::NotFound(format!("faculty {faculty_id}")))?;
        if !tenant.owns(&faculty.scope) {
            return Err(RegistryError::ScopeMismatch(format!(
                "faculty {faculty_id} is outside the requested tenant scope"
            ))
            .into());
        }

        if term == current {
            let mut courses = Vec::new();
            for course in store.list_courses(&tenant)? {
                if !course.is_active_in(&term) {
                    continue;
                }
                let coordinates = course.coordinator == Some(faculty_id);
                if !coordinates && !course.faculty_roster.contains(&faculty_id) {
                    continue;
                }
                courses.push(FacultyCourseView {
                    course_id: course.course_id,
                    code: course.code,
                    name: course.name,
                    role: if coordinates {
                        ArchiveRole::CourseCoordinator
                    } else {
                        ArchiveRole::Faculty
                    },
                });
            }
            return Ok(FacultyCourses {
                faculty_id,
                term,
                source: RosterSource::Live,
                courses,
            });
        }

        let entries = store.archive_entries(&tenant, &term, None, Some(faculty_id))?;
        let mut courses = Vec::new();
        for entry in entries {
            let Some(course) = store.get_course(entry.course_id)? else {
                tracing::debug!(course_id = %entry.course_id, "archived course missing from catalog; skipped");
                continue;
            };
            if !tenant.owns(&course.scope) {
                continue;
            }
            courses.push(FacultyCourseView {
                course_id: entry.course_id,
                code: course.code,
                name: course.name,
                role: entry.role,
            });
        }
        courses.sort_by(|a, b| a.code.cmp(&b.code));

        Ok(FacultyCourses { faculty_id, term, source: RosterSource::Reconstructed, courses })
    }

    /// Detach a course from one term, deleting the term's assessments and
    /// their nested question sets. The term is mandatory: there is no
    /// implicit current-term default for a destructive operation.
    ///
    /// # Errors
    /// Returns a validation error when the term is absent or null, a
    /// not-found/scope error for the course, or a storage error.
    pub fn remove_course_from_term(
        &self,
        scope: &TenantScopeRequest,
        course_id: CourseId,
        term: Option<&serde_json::Value>,
    ) -> Result<CascadeReport> {
        let term = match term {
            None | Some(serde_json::Value::Null) => {
                return Err(RegistryError::Validation(
                    "term identifier MUST be provided explicitly for term-scoped deletion"
                        .to_string(),
                )
                .into());
            }
            Some(value) => TermId::from_json(value)?,
        };

        let tenant = scope.resolve();
        let mut store = self.open_migrated()?;

        let course = store
            .get_course(course_id)?
            .ok_or_else(|| RegistryError::NotFound(format!("course {course_id}")))?;
        if !tenant.owns(&course.scope) {
            return Err(RegistryError::ScopeMismatch(format!(
                "course {course_id} is outside the requested tenant scope"
            ))
            .into());
        }

        let (removed_assessments, removed_questions) =
            store.delete_course_term(course_id, &term)?;

        tracing::info!(
            %course_id,
            %term,
            removed_assessments,
            removed_questions,
            "term-scoped cascade deletion"
        );

        Ok(CascadeReport { course_id, term, removed_assessments, removed_questions })
    }

    /// Create a course in the tenant's scope.
    ///
    /// # Errors
    /// Returns an error on invalid input, a live code collision, or storage
    /// failure.
    pub fn create_course(
        &self,
        scope: &TenantScopeRequest,
        input: CreateCourseRequest,
    ) -> Result<Course> {
        let mut store = self.open_migrated()?;

        let active_terms = input
            .active_terms
            .iter()
            .map(TermId::from_json)
            .collect::<Result<std::collections::BTreeSet<_>, _>>()?;

        let course = Course {
            course_id: CourseId::new(),
            name: input.name,
            code: input.code,
            scope: scope.entity_scope(),
            active_terms,
            coordinator: None,
            faculty_roster: std::collections::BTreeSet::new(),
            is_deleted: false,
        };
        store.insert_course(&course)?;
        Ok(course)
    }

    /// Create a faculty member in the tenant's scope.
    ///
    /// # Errors
    /// Returns an error on invalid input or storage failure.
    pub fn create_faculty(
        &self,
        scope: &TenantScopeRequest,
        input: CreateFacultyRequest,
    ) -> Result<Faculty> {
        let store = self.open_migrated()?;

        let faculty = Faculty {
            faculty_id: FacultyId::new(),
            name: input.name,
            role: input.role,
            scope: scope.entity_scope(),
            course_refs: std::collections::BTreeSet::new(),
        };
        store.insert_faculty(&faculty)?;
        Ok(faculty)
    }

    /// Add a faculty member to a course roster.
    ///
    /// # Errors
    /// Returns an error when either side is missing or out of scope, or the
    /// write fails.
    pub fn assign_faculty(
        &self,
        scope: &TenantScopeRequest,
        course_id: CourseId,
        faculty_id: FacultyId,
    ) -> Result<()> {
        let tenant = scope.resolve();
        let store = self.open_migrated()?;
        require_owned_course(&store, &tenant, course_id)?;
        require_owned_faculty(&store, &tenant, faculty_id)?;
        store.add_roster_member(course_id, faculty_id)
    }

    /// Remove a faculty member from a course roster. Archive rows from past
    /// terms are untouched.
    ///
    /// # Errors
    /// Returns an error when either side is missing or out of scope, or the
    /// delete fails.
    pub fn remove_faculty(
        &self,
        scope: &TenantScopeRequest,
        course_id: CourseId,
        faculty_id: FacultyId,
    ) -> Result<()> {
        let tenant = scope.resolve();
        let store = self.open_migrated()?;
        require_owned_course(&store, &tenant, course_id)?;
        require_owned_faculty(&store, &tenant, faculty_id)?;
        store.remove_roster_member(course_id, faculty_id)
    }

    /// Appoint a course coordinator.
    ///
    /// A plain faculty appointee is promoted to the coordinator role; the
    /// previous coordinator is demoted back to faculty when this was their
    /// last coordinatorship.
    ///
    /// # Errors
    /// Returns an error when the course or faculty is missing or out of
    /// scope, or a write fails.
    pub fn appoint_coordinator(
        &self,
        scope: &TenantScopeRequest,
        course_id: CourseId,
        faculty_id: FacultyId,
    ) -> Result<Course> {
        let tenant = scope.resolve();
        let store = self.open_migrated()?;
        let course = require_owned_course(&store, &tenant, course_id)?;
        let appointee = require_owned_faculty(&store, &tenant, faculty_id)?;

        let previous = course.coordinator;
        store.set_coordinator(course_id, Some(faculty_id))?;

        if appointee.role == FacultyRole::Faculty {
            store.set_faculty_role(faculty_id, FacultyRole::CourseCoordinator)?;
        }

        if let Some(previous_id) = previous {
            if previous_id != faculty_id {
                if let Some(previous_faculty) = store.get_faculty(previous_id)? {
                    if previous_faculty.role == FacultyRole::CourseCoordinator
                        && store.coordinated_course_count(previous_id)? == 0
                    {
                        store.set_faculty_role(previous_id, FacultyRole::Faculty)?;
                    }
                }
            }
        }

        store
            .get_course(course_id)?
            .ok_or_else(|| RegistryError::NotFound(format!("course {course_id}")).into())
    }

    /// Soft-delete a course. The catalog row and archive history survive.
    ///
    /// # Errors
    /// Returns an error when the course is missing or out of scope, or the
    /// update fails.
    pub fn soft_delete_course(
        &self,
        scope: &TenantScopeRequest,
        course_id: CourseId,
    ) -> Result<()> {
        let tenant = scope.resolve();
        let store = self.open_migrated()?;
        require_owned_course(&store, &tenant, course_id)?;
        store.soft_delete_course(course_id)
    }

    /// Explicitly write one archive row for a past term. This is the only
    /// archive writer outside the transition procedure.
    ///
    /// # Errors
    /// Returns an error on invalid term input, missing/out-of-scope course
    /// or faculty, cross-tenant archive conflict, or storage failure.
    pub fn reappoint(
        &self,
        scope: &TenantScopeRequest,
        input: &ReappointRequest,
    ) -> Result<TermArchiveEntry> {
        let tenant = scope.resolve();
        let store = self.open_migrated()?;

        let term = TermId::from_json(&input.term)?;
        let course = require_owned_course(&store, &tenant, input.course_id)?;
        require_owned_faculty(&store, &tenant, input.faculty_id)?;

        let entry = TermArchiveEntry {
            term,
            course_id: input.course_id,
            faculty_id: input.faculty_id,
            role: input.role,
            university_id: course.scope.university_id,
            school_id: course.scope.school_id,
            department_id: course.scope.department_id,
        };
        store.upsert_archive_entry(&entry)?;
        Ok(entry)
    }

    /// Add an assessment to a course for a term (defaults to the current
    /// term).
    ///
    /// # Errors
    /// Returns an error when the course is missing or out of scope, or the
    /// write fails.
    pub fn add_assessment(
        &self,
        scope: &TenantScopeRequest,
        course_id: CourseId,
        title: String,
        requested_term: Option<&serde_json::Value>,
    ) -> Result<Assessment> {
        let tenant = scope.resolve();
        let store = self.open_migrated()?;

        let current = store.current_term(&tenant)?;
        let term = resolve_requested_term(requested_term, &current)?;
        require_owned_course(&store, &tenant, course_id)?;

        let assessment =
            Assessment { assessment_id: AssessmentId::new(), course_id, term, title };
        store.insert_assessment(&assessment)?;
        Ok(assessment)
    }

    /// Add a question to a faculty member's question set under an
    /// assessment.
    ///
    /// # Errors
    /// Returns an error when the assessment reference is invalid or the
    /// write fails.
    pub fn add_question(
        &self,
        assessment_id: AssessmentId,
        faculty_id: FacultyId,
        question_set: &str,
        body: &str,
    ) -> Result<QuestionId> {
        let store = self.open_migrated()?;
        let question_id = QuestionId::new();
        store.insert_question(question_id, assessment_id, faculty_id, question_set, body)?;
        Ok(question_id)
    }
}

fn resolve_requested_term(
    requested: Option<&serde_json::Value>,
    current: &TermId,
) -> Result<TermId> {
    match requested {
        None | Some(serde_json::Value::Null) => Ok(current.clone()),
        Some(value) => Ok(TermId::from_json(value)?),
    }
}

fn require_owned_course(
    store: &SqliteStore,
    tenant: &TenantScope,
    course_id: CourseId,
) -> Result<Course> {
    let course = store
        .get_course(course_id)?
        .ok_or_else(|| RegistryError::NotFound(format!("course {course_id}")))?;
    if !tenant.owns(&course.scope) {
        return Err(RegistryError::ScopeMismatch(format!(
            "course {course_id} is outside the requested tenant scope"
        ))
        .into());
    }
    Ok(course)
}

fn require_owned_faculty(
    store: &SqliteStore,
    tenant: &TenantScope,
    faculty_id: FacultyId,
) -> Result<Faculty> {
    let faculty = store
        .get_faculty(faculty_id)?
        .ok_or_else(|| RegistryError::NotFound(format!("faculty {faculty_id}")))?;
    if !tenant.owns(&faculty.scope) {
        return Err(RegistryError::ScopeMismatch(format!(
            "faculty {faculty_id} is outside the requested tenant scope"
        ))
        .into());
    }
    Ok(faculty)
}

fn retain_live_faculty(store: &SqliteStore, roster: CourseRoster) -> Result<CourseRoster> {
    let mut faculty = Vec::new();
    for faculty_id in roster.faculty {
        if store.get_faculty(faculty_id)?.is_some() {
            faculty.push(faculty_id);
        }
    }
    let coordinator = if let Some(coordinator_id) = roster.coordinator {
        if store.get_faculty(coordinator_id)?.is_some() {
            Some(coordinator_id)
        } else {
            None
        }
    } else {
        None
    };
    Ok(CourseRoster { coordinator, faculty })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("acadterm-api-{}.sqlite3", Ulid::new()))
    }

    fn scoped(university_id: UniversityId) -> TenantScopeRequest {
        TenantScopeRequest { university_id: Some(university_id), ..TenantScopeRequest::default() }
    }

    fn mk_course(api: &TermRegistryApi, scope: &TenantScopeRequest, code: &str) -> Result<Course> {
        api.create_course(
            scope,
            CreateCourseRequest {
                name: format!("Course {code}"),
                code: code.to_string(),
                active_terms: Vec::new(),
            },
        )
    }

    fn mk_faculty(
        api: &TermRegistryApi,
        scope: &TenantScopeRequest,
        name: &str,
    ) -> Result<Faculty> {
        api.create_faculty(
            scope,
            CreateFacultyRequest { name: name.to_string(), role: FacultyRole::Faculty },
        )
    }

    #[test]
    fn term_transition_archives_and_reconstructs_round_trip() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = TermRegistryApi::new(db_path.clone());
        let scope = scoped(UniversityId::new());

        let course = mk_course(&api, &scope, "CSE101")?;
        let coordinator = mk_faculty(&api, &scope, "Prof. Iyer")?;
        let member = mk_faculty(&api, &scope, "Prof. Rao")?;
        api.assign_faculty(&scope, course.course_id, coordinator.faculty_id)?;
        api.assign_faculty(&scope, course.course_id, member.faculty_id)?;
        api.appoint_coordinator(&scope, course.course_id, coordinator.faculty_id)?;

        // New term arrives as a JSON number; archive reads spell the old
        // term as a string. Both are the same canonical term.
        let report = api.transition_term(&scope, &serde_json::json!(25_262))?;
        assert_eq!(report.previous_term.as_str(), "24252");
        assert_eq!(report.new_term.as_str(), "25262");
        assert_eq!(report.entries_written, 2);

        assert_eq!(api.current_term(&scope)?.as_str(), "25262");

        let reconstructed = api.resolve_course_roster(
            &scope,
            course.course_id,
            Some(&serde_json::json!("24252.0")),
        )?;
        assert_eq!(reconstructed.source, RosterSource::Reconstructed);
        assert_eq!(reconstructed.coordinator, Some(coordinator.faculty_id));
        assert_eq!(
            reconstructed.faculty.len(),
            2,
            "coordinator and member both appear in the reconstructed list"
        );

        // Editing the live roster never rewrites history.
        api.remove_faculty(&scope, course.course_id, member.faculty_id)?;
        let after_edit = api.resolve_course_roster(
            &scope,
            course.course_id,
            Some(&serde_json::json!("24252")),
        )?;
        assert_eq!(after_edit.faculty.len(), 2);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn transition_retry_converges() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = TermRegistryApi::new(db_path.clone());
        let scope = scoped(UniversityId::new());

        let course = mk_course(&api, &scope, "CSE101")?;
        let member = mk_faculty(&api, &scope, "Prof. Rao")?;
        api.assign_faculty(&scope, course.course_id, member.faculty_id)?;

        let first = api.transition_term(&scope, &serde_json::json!("25262"))?;
        let second = api.transition_term(&scope, &serde_json::json!("25262"))?;
        assert_eq!(first.entries_written, 1);
        // The retry archives the (already current) new term; the old term's
        // archive is unchanged.
        assert_eq!(second.previous_term.as_str(), "25262");

        let archived = api.resolve_course_roster(
            &scope,
            course.course_id,
            Some(&serde_json::json!("24252")),
        )?;
        assert_eq!(archived.faculty, vec![member.faculty_id]);

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn cascade_requires_an_explicit_term() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = TermRegistryApi::new(db_path.clone());
        let scope = scoped(UniversityId::new());
        let course = mk_course(&api, &scope, "CSE101")?;

        for missing in [None, Some(serde_json::Value::Null)] {
            let err = match api.remove_course_from_term(&scope, course.course_id, missing.as_ref())
            {
                Ok(report) => panic!("cascade without a term should fail, got {report:?}"),
                Err(err) => err,
            };
            assert!(err.to_string().contains("term identifier MUST be provided"));
        }

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn cascade_removes_one_term_and_spares_the_rest() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = TermRegistryApi::new(db_path.clone());
        let scope = scoped(UniversityId::new());

        let course = mk_course(&api, &scope, "CSE101")?;
        let faculty = mk_faculty(&api, &scope, "Prof. Rao")?;

        let current = api.add_assessment(&scope, course.course_id, "Quiz 1".to_string(), None)?;
        api.add_question(current.assessment_id, faculty.faculty_id, "set-a", "Define a trie.")?;
        api.add_question(current.assessment_id, faculty.faculty_id, "set-b", "Define a heap.")?;

        let other = api.add_assessment(
            &scope,
            course.course_id,
            "Quiz 2".to_string(),
            Some(&serde_json::json!("25262")),
        )?;
        api.add_question(other.assessment_id, faculty.faculty_id, "set-a", "Define a graph.")?;

        let report = api.remove_course_from_term(
            &scope,
            course.course_id,
            Some(&serde_json::json!("24252")),
        )?;
        assert_eq!(report.removed_assessments, 1);
        assert_eq!(report.removed_questions, 2);

        // The other term's assessment and the catalog row survive.
        let listing =
            api.resolve_department_courses(&scope, Some(&serde_json::json!("25262")))?;
        assert_eq!(listing.source, RosterSource::Reconstructed);
        let roster = api.resolve_course_roster(&scope, course.course_id, None);
        assert!(roster.is_ok(), "course catalog row should survive the cascade");

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn coordinator_appointment_promotes_and_demotes_roles() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = TermRegistryApi::new(db_path.clone());
        let scope = scoped(UniversityId::new());

        let course = mk_course(&api, &scope, "CSE101")?;
        let first = mk_faculty(&api, &scope, "Prof. Iyer")?;
        let second = mk_faculty(&api, &scope, "Prof. Rao")?;

        api.appoint_coordinator(&scope, course.course_id, first.faculty_id)?;
        let courses = api.resolve_faculty_courses(&scope, first.faculty_id, None)?;
        assert_eq!(courses.courses.len(), 1);
        assert_eq!(courses.courses[0].role, ArchiveRole::CourseCoordinator);

        // Replacing the coordinator demotes the first appointee back to
        // plain faculty because this was their only coordinatorship.
        let updated = api.appoint_coordinator(&scope, course.course_id, second.faculty_id)?;
        assert_eq!(updated.coordinator, Some(second.faculty_id));

        let view = api.resolve_faculty_courses(&scope, first.faculty_id, None)?;
        assert!(view.courses.is_empty());

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn scope_mismatch_is_surfaced_not_hidden() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = TermRegistryApi::new(db_path.clone());
        let owner = scoped(UniversityId::new());
        let intruder = scoped(UniversityId::new());

        let course = mk_course(&api, &owner, "CSE101")?;
        let err = match api.resolve_course_roster(&intruder, course.course_id, None) {
            Ok(view) => panic!("cross-tenant read should fail, got {view:?}"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("scope mismatch"));

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn legacy_department_name_matches_until_a_foreign_key_exists() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = TermRegistryApi::new(db_path.clone());
        let university_id = UniversityId::new();

        let legacy_scope = TenantScopeRequest {
            university_id: Some(university_id),
            department_name: Some("Computer Science".to_string()),
            ..TenantScopeRequest::default()
        };
        let course = mk_course(&api, &legacy_scope, "CSE101")?;

        let by_name = api.resolve_course_roster(&legacy_scope, course.course_id, None)?;
        assert_eq!(by_name.source, RosterSource::Live);

        let other_department = TenantScopeRequest {
            university_id: Some(university_id),
            department_name: Some("Mathematics".to_string()),
            ..TenantScopeRequest::default()
        };
        let err = match api.resolve_course_roster(&other_department, course.course_id, None) {
            Ok(view) => panic!("wrong department should be rejected, got {view:?}"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("scope mismatch"));

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }

    #[test]
    fn reappointment_writes_history_for_a_past_term() -> Result<()> {
        let db_path = unique_temp_db_path();
        let api = TermRegistryApi::new(db_path.clone());
        let scope = scoped(UniversityId::new());

        let course = mk_course(&api, &scope, "CSE101")?;
        let faculty = mk_faculty(&api, &scope, "Prof. Rao")?;
        api.transition_term(&scope, &serde_json::json!("25262"))?;

        api.reappoint(
            &scope,
            &ReappointRequest {
                term: serde_json::json!("24252"),
                course_id: course.course_id,
                faculty_id: faculty.faculty_id,
                role: ArchiveRole::CourseCoordinator,
            },
        )?;

        let roster = api.resolve_course_roster(
            &scope,
            course.course_id,
            Some(&serde_json::json!(24_252)),
        )?;
        assert_eq!(roster.coordinator, Some(faculty.faculty_id));

        let _ = std::fs::remove_file(&db_path);
        Ok(())
    }
}
