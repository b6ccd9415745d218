use std::path::PathBuf;

use acadterm_api::{
    parse_assessment_id, parse_course_id, parse_faculty_id, CreateCourseRequest,
    CreateFacultyRequest, ReappointRequest, TenantScopeRequest, TermRegistryApi,
};
use acadterm_core::{ArchiveRole, DepartmentId, FacultyRole, SchoolId, UniversityId};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use ulid::Ulid;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "acadterm")]
#[command(about = "Academic term registry CLI")]
struct Cli {
    #[arg(long, default_value = "./acadterm.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    Term {
        #[command(subcommand)]
        command: Box<TermCommand>,
    },
    Course {
        #[command(subcommand)]
        command: Box<CourseCommand>,
    },
    Faculty {
        #[command(subcommand)]
        command: Box<FacultyCommand>,
    },
    Query {
        #[command(subcommand)]
        command: Box<QueryCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum TermCommand {
    Current(TermCurrentArgs),
    Switch(TermSwitchArgs),
}

#[derive(Debug, Args)]
struct TermCurrentArgs {
    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Debug, Args)]
struct TermSwitchArgs {
    #[arg(long)]
    new_term: String,
    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Debug, Subcommand)]
enum CourseCommand {
    Create(CourseCreateArgs),
    Assign(RosterEditArgs),
    RemoveFaculty(RosterEditArgs),
    Coordinator(RosterEditArgs),
    SoftDelete(CourseIdArgs),
    List(CourseListArgs),
    RemoveTerm(RemoveTermArgs),
    AddAssessment(AddAssessmentArgs),
    AddQuestion(AddQuestionArgs),
}

#[derive(Debug, Args)]
struct CourseCreateArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    code: String,
    #[arg(long = "active-term")]
    active_terms: Vec<String>,
    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Debug, Args)]
struct RosterEditArgs {
    #[arg(long)]
    course_id: String,
    #[arg(long)]
    faculty_id: String,
    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Debug, Args)]
struct CourseIdArgs {
    #[arg(long)]
    course_id: String,
    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Debug, Args)]
struct CourseListArgs {
    #[arg(long)]
    term_id: Option<String>,
    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Debug, Args)]
struct RemoveTermArgs {
    #[arg(long)]
    course_id: String,
    // Deliberately optional at the flag level: the registry rejects the
    // omission itself so the operator sees the domain error, not a clap
    // usage message.
    #[arg(long)]
    term_id: Option<String>,
    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Debug, Args)]
struct AddAssessmentArgs {
    #[arg(long)]
    course_id: String,
    #[arg(long)]
    title: String,
    #[arg(long)]
    term_id: Option<String>,
    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Debug, Args)]
struct AddQuestionArgs {
    #[arg(long)]
    assessment_id: String,
    #[arg(long)]
    faculty_id: String,
    #[arg(long)]
    question_set: String,
    #[arg(long)]
    body: String,
}

#[derive(Debug, Subcommand)]
enum FacultyCommand {
    Create(FacultyCreateArgs),
    Courses(FacultyCoursesArgs),
    Reappoint(ReappointArgs),
}

#[derive(Debug, Args)]
struct FacultyCreateArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    role: RoleArg,
    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Debug, Args)]
struct FacultyCoursesArgs {
    #[arg(long)]
    faculty_id: String,
    #[arg(long)]
    term_id: Option<String>,
    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Debug, Args)]
struct ReappointArgs {
    #[arg(long)]
    term_id: String,
    #[arg(long)]
    course_id: String,
    #[arg(long)]
    faculty_id: String,
    #[arg(long)]
    role: ArchiveRoleArg,
    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Debug, Subcommand)]
enum QueryCommand {
    Roster(RosterQueryArgs),
}

#[derive(Debug, Args)]
struct RosterQueryArgs {
    #[arg(long)]
    course_id: String,
    #[arg(long)]
    term_id: Option<String>,
    #[command(flatten)]
    scope: ScopeArgs,
}

#[derive(Debug, Args)]
struct ScopeArgs {
    #[arg(long)]
    university_id: Option<String>,
    #[arg(long)]
    school_id: Option<String>,
    #[arg(long)]
    department_id: Option<String>,
    #[arg(long)]
    department_name: Option<String>,
}

impl ScopeArgs {
    fn resolve(&self) -> Result<TenantScopeRequest> {
        Ok(TenantScopeRequest {
            university_id: parse_scope_id(self.university_id.as_deref())?.map(UniversityId),
            school_id: parse_scope_id(self.school_id.as_deref())?.map(SchoolId),
            department_id: parse_scope_id(self.department_id.as_deref())?.map(DepartmentId),
            department_name: self.department_name.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Admin,
    Hod,
    Faculty,
    CourseCoordinator,
}

impl RoleArg {
    fn into_role(self) -> FacultyRole {
        match self {
            Self::Admin => FacultyRole::Admin,
            Self::Hod => FacultyRole::Hod,
            Self::Faculty => FacultyRole::Faculty,
            Self::CourseCoordinator => FacultyRole::CourseCoordinator,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ArchiveRoleArg {
    Faculty,
    CourseCoordinator,
}

impl ArchiveRoleArg {
    fn into_role(self) -> ArchiveRole {
        match self {
            Self::Faculty => ArchiveRole::Faculty,
            Self::CourseCoordinator => ArchiveRole::CourseCoordinator,
        }
    }
}

fn parse_scope_id(raw: Option<&str>) -> Result<Option<Ulid>> {
    match raw {
        None => Ok(None),
        Some(value) => {
            let parsed =
                Ulid::from_string(value).with_context(|| format!("invalid ULID: {value}"))?;
            Ok(Some(parsed))
        }
    }
}

fn term_value(raw: Option<&str>) -> Option<Value> {
    raw.map(|value| Value::String(value.to_string()))
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let api = TermRegistryApi::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(*command, &api),
        Command::Term { command } => run_term(*command, &api),
        Command::Course { command } => run_course(*command, &api),
        Command::Faculty { command } => run_faculty(*command, &api),
        Command::Query { command } => run_query(*command, &api),
    }
}

fn run_db(command: DbCommand, api: &TermRegistryApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
                "inferred_from_legacy": status.inferred_from_legacy
            }))
        }
        DbCommand::Migrate(args) => {
            let result = api.migrate(args.dry_run)?;
            emit_json(serde_json::to_value(&result).context("failed to serialize migrate result")?)
        }
    }
}

fn run_term(command: TermCommand, api: &TermRegistryApi) -> Result<()> {
    match command {
        TermCommand::Current(args) => {
            let scope = args.scope.resolve()?;
            let term = api.current_term(&scope)?;
            emit_json(serde_json::json!({ "current_term": term }))
        }
        TermCommand::Switch(args) => {
            let scope = args.scope.resolve()?;
            let report =
                api.transition_term(&scope, &Value::String(args.new_term))?;
            emit_json(
                serde_json::to_value(&report).context("failed to serialize transition report")?,
            )
        }
    }
}

fn run_course(command: CourseCommand, api: &TermRegistryApi) -> Result<()> {
    match command {
        CourseCommand::Create(args) => {
            let scope = args.scope.resolve()?;
            let course = api.create_course(
                &scope,
                CreateCourseRequest {
                    name: args.name,
                    code: args.code,
                    active_terms: args
                        .active_terms
                        .into_iter()
                        .map(Value::String)
                        .collect(),
                },
            )?;
            emit_json(serde_json::to_value(&course).context("failed to serialize course")?)
        }
        CourseCommand::Assign(args) => {
            let scope = args.scope.resolve()?;
            let course_id = parse_course_id(&args.course_id)?;
            let faculty_id = parse_faculty_id(&args.faculty_id)?;
            api.assign_faculty(&scope, course_id, faculty_id)?;
            emit_json(serde_json::json!({
                "course_id": course_id,
                "faculty_id": faculty_id,
                "assigned": true
            }))
        }
        CourseCommand::RemoveFaculty(args) => {
            let scope = args.scope.resolve()?;
            let course_id = parse_course_id(&args.course_id)?;
            let faculty_id = parse_faculty_id(&args.faculty_id)?;
            api.remove_faculty(&scope, course_id, faculty_id)?;
            emit_json(serde_json::json!({
                "course_id": course_id,
                "faculty_id": faculty_id,
                "removed": true
            }))
        }
        CourseCommand::Coordinator(args) => {
            let scope = args.scope.resolve()?;
            let course_id = parse_course_id(&args.course_id)?;
            let faculty_id = parse_faculty_id(&args.faculty_id)?;
            let course = api.appoint_coordinator(&scope, course_id, faculty_id)?;
            emit_json(serde_json::to_value(&course).context("failed to serialize course")?)
        }
        CourseCommand::SoftDelete(args) => {
            let scope = args.scope.resolve()?;
            let course_id = parse_course_id(&args.course_id)?;
            api.soft_delete_course(&scope, course_id)?;
            emit_json(serde_json::json!({ "course_id": course_id, "deleted": true }))
        }
        CourseCommand::List(args) => {
            let scope = args.scope.resolve()?;
            let term = term_value(args.term_id.as_deref());
            let courses = api.resolve_department_courses(&scope, term.as_ref())?;
            emit_json(serde_json::to_value(&courses).context("failed to serialize courses")?)
        }
        CourseCommand::RemoveTerm(args) => {
            let scope = args.scope.resolve()?;
            let course_id = parse_course_id(&args.course_id)?;
            let term = term_value(args.term_id.as_deref());
            let report = api.remove_course_from_term(&scope, course_id, term.as_ref())?;
            emit_json(serde_json::to_value(&report).context("failed to serialize cascade report")?)
        }
        CourseCommand::AddAssessment(args) => {
            let scope = args.scope.resolve()?;
            let course_id = parse_course_id(&args.course_id)?;
            let term = term_value(args.term_id.as_deref());
            let assessment = api.add_assessment(&scope, course_id, args.title, term.as_ref())?;
            emit_json(serde_json::to_value(&assessment).context("failed to serialize assessment")?)
        }
        CourseCommand::AddQuestion(args) => {
            let assessment_id = parse_assessment_id(&args.assessment_id)?;
            let faculty_id = parse_faculty_id(&args.faculty_id)?;
            let question_id =
                api.add_question(assessment_id, faculty_id, &args.question_set, &args.body)?;
            emit_json(serde_json::json!({
                "question_id": question_id,
                "assessment_id": assessment_id,
                "question_set": args.question_set
            }))
        }
    }
}

fn run_faculty(command: FacultyCommand, api: &TermRegistryApi) -> Result<()> {
    match command {
        FacultyCommand::Create(args) => {
            let scope = args.scope.resolve()?;
            let faculty = api.create_faculty(
                &scope,
                CreateFacultyRequest { name: args.name, role: args.role.into_role() },
            )?;
            emit_json(serde_json::to_value(&faculty).context("failed to serialize faculty")?)
        }
        FacultyCommand::Courses(args) => {
            let scope = args.scope.resolve()?;
            let faculty_id = parse_faculty_id(&args.faculty_id)?;
            let term = term_value(args.term_id.as_deref());
            let courses = api.resolve_faculty_courses(&scope, faculty_id, term.as_ref())?;
            emit_json(
                serde_json::to_value(&courses).context("failed to serialize faculty courses")?,
            )
        }
        FacultyCommand::Reappoint(args) => {
            let scope = args.scope.resolve()?;
            let entry = api.reappoint(
                &scope,
                &ReappointRequest {
                    term: Value::String(args.term_id),
                    course_id: parse_course_id(&args.course_id)?,
                    faculty_id: parse_faculty_id(&args.faculty_id)?,
                    role: args.role.into_role(),
                },
            )?;
            emit_json(serde_json::to_value(&entry).context("failed to serialize archive entry")?)
        }
    }
}

fn run_query(command: QueryCommand, api: &TermRegistryApi) -> Result<()> {
    match command {
        QueryCommand::Roster(args) => {
            let scope = args.scope.resolve()?;
            let course_id = parse_course_id(&args.course_id)?;
            let term = term_value(args.term_id.as_deref());
            let roster = api.resolve_course_roster(&scope, course_id, term.as_ref())?;
            emit_json(serde_json::to_value(&roster).context("failed to serialize roster")?)
        }
    }
}
