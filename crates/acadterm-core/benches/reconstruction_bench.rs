use std::collections::BTreeSet;

use acadterm_core::{
    reconstruct_rosters, snapshot_course_roster, Course, CourseId, EntityScope, FacultyId, TermId,
};
use criterion::{criterion_group, criterion_main, Criterion};

fn fixture_term() -> TermId {
    match TermId::parse("24252") {
        Ok(term) => term,
        Err(err) => panic!("bench term should parse: {err}"),
    }
}

fn mk_course(roster_size: usize) -> Course {
    let roster: BTreeSet<FacultyId> = (0..roster_size).map(|_| FacultyId::new()).collect();
    let coordinator = roster.iter().next().copied();
    Course {
        course_id: CourseId::new(),
        name: "Benchmark Course".to_string(),
        code: "BENCH101".to_string(),
        scope: EntityScope::default(),
        active_terms: BTreeSet::new(),
        coordinator,
        faculty_roster: roster,
        is_deleted: false,
    }
}

fn bench_snapshot(c: &mut Criterion) {
    let courses = (0..200).map(|_| mk_course(12)).collect::<Vec<_>>();
    let term = fixture_term();

    c.bench_function("snapshot_200_courses_of_12", |b| {
        b.iter(|| {
            let mut total = 0_usize;
            for course in &courses {
                total += snapshot_course_roster(course, &term).len();
            }
            total
        });
    });
}

fn bench_reconstruction(c: &mut Criterion) {
    let term = fixture_term();
    let entries = (0..200)
        .map(|_| mk_course(12))
        .flat_map(|course| snapshot_course_roster(&course, &term))
        .collect::<Vec<_>>();

    c.bench_function("reconstruct_2400_archive_entries", |b| {
        b.iter(|| reconstruct_rosters(&entries).len());
    });
}

criterion_group!(benches, bench_snapshot, bench_reconstruction);
criterion_main!(benches);
