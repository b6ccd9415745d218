use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RegistryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("scope mismatch: {0}")]
    ScopeMismatch(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

macro_rules! ulid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(pub Ulid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

ulid_id!(UniversityId);
ulid_id!(SchoolId);
ulid_id!(DepartmentId);
ulid_id!(CourseId);
ulid_id!(FacultyId);
ulid_id!(AssessmentId);
ulid_id!(QuestionId);

/// Canonical term identifier.
///
/// Historical data spells the same term as a JSON number, a digit string,
/// or a float rendering such as `"24252.0"`. Every representation is
/// normalized here once, so that equality and ordering never depend on how
/// a caller or a stored row happened to spell the term.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct TermId(String);

impl TermId {
    /// Parse a raw term spelling into its canonical form.
    ///
    /// # Errors
    /// Returns [`RegistryError::Validation`] when the input is empty or an
    /// unparseable float rendering.
    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RegistryError::Validation("term identifier MUST be non-empty".to_string()));
        }

        if let Some((integral, fraction)) = trimmed.split_once('.') {
            // Float renderings of numeric terms ("24252.0") collapse to the
            // integral part; anything with a real fraction is ambiguous.
            if !integral.is_empty()
                && integral.bytes().all(|byte| byte.is_ascii_digit())
                && !fraction.is_empty()
                && fraction.bytes().all(|byte| byte == b'0')
            {
                return Ok(Self(canonical_digits(integral)));
            }
            return Err(RegistryError::Validation(format!(
                "ambiguous term identifier: {trimmed}"
            )));
        }

        if trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
            return Ok(Self(canonical_digits(trimmed)));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Parse a term spelling out of raw JSON, accepting both string and
    /// numeric encodings.
    ///
    /// # Errors
    /// Returns [`RegistryError::Validation`] for null, fractional numbers,
    /// and non-scalar values.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, RegistryError> {
        match value {
            serde_json::Value::String(raw) => Self::parse(raw),
            serde_json::Value::Number(number) => {
                if let Some(integer) = number.as_i64() {
                    if integer < 0 {
                        return Err(RegistryError::Validation(format!(
                            "term identifier MUST NOT be negative: {integer}"
                        )));
                    }
                    return Self::parse(&integer.to_string());
                }
                Err(RegistryError::Validation(format!(
                    "term identifier MUST be an integer or string: {number}"
                )))
            }
            other => Err(RegistryError::Validation(format!(
                "term identifier MUST be a string or number, got: {other}"
            ))),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TermId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn canonical_digits(digits: &str) -> String {
    let stripped = digits.trim_start_matches('0');
    if stripped.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    }
}

/// The term every tenant pointer self-initializes with on first read.
pub const DEFAULT_TERM: &str = "24252";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FacultyRole {
    Admin,
    Hod,
    Faculty,
    CourseCoordinator,
}

impl FacultyRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Hod => "hod",
            Self::Faculty => "faculty",
            Self::CourseCoordinator => "course_coordinator",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "hod" => Some(Self::Hod),
            "faculty" => Some(Self::Faculty),
            "course_coordinator" => Some(Self::CourseCoordinator),
            _ => None,
        }
    }
}

/// Role recorded in the archive; only teaching roles are snapshotted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveRole {
    Faculty,
    CourseCoordinator,
}

impl ArchiveRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Faculty => "faculty",
            Self::CourseCoordinator => "course_coordinator",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "faculty" => Some(Self::Faculty),
            "course_coordinator" => Some(Self::CourseCoordinator),
            _ => None,
        }
    }
}

/// Department addressing as it arrives from callers: either a foreign key or
/// a legacy display-name string. Resolved once at the tenancy boundary into a
/// [`DepartmentHandle`] so no downstream code re-decides which field to trust.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DepartmentRef {
    ById(DepartmentId),
    ByLegacyName(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct DepartmentHandle {
    pub department_id: Option<DepartmentId>,
    pub legacy_name: Option<String>,
}

impl DepartmentHandle {
    /// Ownership test against an entity's stored department fields: the
    /// foreign key wins whenever both sides carry one, legacy name equality
    /// is the fallback.
    #[must_use]
    pub fn owns(&self, department_id: Option<DepartmentId>, department_name: Option<&str>) -> bool {
        if let (Some(handle_id), Some(entity_id)) = (self.department_id, department_id) {
            return handle_id == entity_id;
        }

        match (&self.legacy_name, department_name) {
            (Some(handle_name), Some(entity_name)) => {
                handle_name.trim() == entity_name.trim()
            }
            _ => false,
        }
    }
}

/// Request-side scope, already resolved at the tenancy boundary.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct TenantScope {
    pub university_id: Option<UniversityId>,
    pub school_id: Option<SchoolId>,
    pub department: Option<DepartmentHandle>,
}

impl TenantScope {
    /// Check whether an entity's stored scope belongs to this tenant.
    ///
    /// A scope dimension the tenant does not constrain is treated as a
    /// wildcard; a dimension the tenant does constrain must match.
    #[must_use]
    pub fn owns(&self, entity: &EntityScope) -> bool {
        if let Some(university_id) = self.university_id {
            if entity.university_id != Some(university_id) {
                return false;
            }
        }

        if let Some(school_id) = self.school_id {
            if entity.school_id != Some(school_id) {
                return false;
            }
        }

        if let Some(department) = &self.department {
            return department.owns(entity.department_id, entity.department_name.as_deref());
        }

        true
    }
}

/// Scope fields as stored on an entity. `department_name` survives from
/// legacy rows written before department foreign keys existed.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct EntityScope {
    pub university_id: Option<UniversityId>,
    pub school_id: Option<SchoolId>,
    pub department_id: Option<DepartmentId>,
    pub department_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Course {
    pub course_id: CourseId,
    pub name: String,
    pub code: String,
    pub scope: EntityScope,
    #[serde(default)]
    pub active_terms: BTreeSet<TermId>,
    pub coordinator: Option<FacultyId>,
    #[serde(default)]
    pub faculty_roster: BTreeSet<FacultyId>,
    pub is_deleted: bool,
}

impl Course {
    /// Whether the course is offered in `term`. An empty `active_terms` set
    /// means "always active" (legacy rows never carried the field).
    #[must_use]
    pub fn is_active_in(&self, term: &TermId) -> bool {
        self.active_terms.is_empty() || self.active_terms.contains(term)
    }

    /// Validate catalog invariants before persistence.
    ///
    /// # Errors
    /// Returns [`RegistryError::Validation`] when name or code is blank.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::Validation("course name MUST be non-empty".to_string()));
        }
        if self.code.trim().is_empty() {
            return Err(RegistryError::Validation("course code MUST be non-empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Faculty {
    pub faculty_id: FacultyId,
    pub name: String,
    pub role: FacultyRole,
    pub scope: EntityScope,
    #[serde(default)]
    pub course_refs: BTreeSet<CourseId>,
}

impl Faculty {
    /// Validate roster invariants before persistence.
    ///
    /// # Errors
    /// Returns [`RegistryError::Validation`] when the name is blank.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::Validation("faculty name MUST be non-empty".to_string()));
        }
        Ok(())
    }
}

/// Term-scoped assessment attached to a course offering. Assessments and
/// their questions are the payload removed by term-scoped cascade deletion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assessment {
    pub assessment_id: AssessmentId,
    pub course_id: CourseId,
    pub term: TermId,
    pub title: String,
}

/// One immutable roster fact: this faculty member held this role on this
/// course in this term. The sole durable record for non-current terms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TermArchiveEntry {
    pub term: TermId,
    pub course_id: CourseId,
    pub faculty_id: FacultyId,
    pub role: ArchiveRole,
    pub university_id: Option<UniversityId>,
    pub school_id: Option<SchoolId>,
    pub department_id: Option<DepartmentId>,
}

/// Where a resolved roster came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RosterSource {
    Live,
    Reconstructed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CourseRoster {
    pub coordinator: Option<FacultyId>,
    pub faculty: Vec<FacultyId>,
}

/// Produce the archive rows that snapshot one course's roster for `term`.
///
/// The coordinator is archived with [`ArchiveRole::CourseCoordinator`] and is
/// also a teaching member; every other roster member gets
/// [`ArchiveRole::Faculty`]. Output is deduplicated by faculty id with the
/// coordinator role winning, and ordered by faculty id for determinism.
#[must_use]
pub fn snapshot_course_roster(course: &Course, term: &TermId) -> Vec<TermArchiveEntry> {
    let mut roles: BTreeMap<FacultyId, ArchiveRole> = BTreeMap::new();
    for faculty_id in &course.faculty_roster {
        roles.insert(*faculty_id, ArchiveRole::Faculty);
    }
    if let Some(coordinator) = course.coordinator {
        roles.insert(coordinator, ArchiveRole::CourseCoordinator);
    }

    roles
        .into_iter()
        .map(|(faculty_id, role)| TermArchiveEntry {
            term: term.clone(),
            course_id: course.course_id,
            faculty_id,
            role,
            university_id: course.scope.university_id,
            school_id: course.scope.school_id,
            department_id: course.scope.department_id,
        })
        .collect()
}

/// Rebuild per-course rosters from archive rows for one term.
///
/// The entry carrying [`ArchiveRole::CourseCoordinator`] supplies the
/// coordinator (lowest faculty id wins if the archive somehow holds more than
/// one); all entries, coordinator included, populate the faculty list with
/// duplicates suppressed by faculty id.
#[must_use]
pub fn reconstruct_rosters(entries: &[TermArchiveEntry]) -> BTreeMap<CourseId, CourseRoster> {
    let mut grouped: BTreeMap<CourseId, BTreeMap<FacultyId, ArchiveRole>> = BTreeMap::new();
    for entry in entries {
        let roles = grouped.entry(entry.course_id).or_default();
        match roles.get(&entry.faculty_id) {
            Some(ArchiveRole::CourseCoordinator) => {}
            _ => {
                roles.insert(entry.faculty_id, entry.role);
            }
        }
    }

    grouped
        .into_iter()
        .map(|(course_id, roles)| {
            let coordinator = roles
                .iter()
                .find(|(_, role)| **role == ArchiveRole::CourseCoordinator)
                .map(|(faculty_id, _)| *faculty_id);
            let faculty = roles.keys().copied().collect();
            (course_id, CourseRoster { coordinator, faculty })
        })
        .collect()
}

/// The live projection of a course's roster, shaped like a reconstruction so
/// current-term and past-term reads are interchangeable at call sites.
#[must_use]
pub fn live_roster(course: &Course) -> CourseRoster {
    let mut faculty: BTreeSet<FacultyId> = course.faculty_roster.clone();
    if let Some(coordinator) = course.coordinator {
        faculty.insert(coordinator);
    }
    CourseRoster { coordinator: course.coordinator, faculty: faculty.into_iter().collect() }
}
