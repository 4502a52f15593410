use datarepo_core::db::open_db_in_memory;
use datarepo_core::model::{MEMBER_SCHEMA, TEAM_SCHEMA};
use datarepo_core::{
    ClearPolicy, CrudRepository, FetchPlan, GenericRepository, Managed, ManualMemberRepository,
    Member, MemberRepository, Params, QueryDefinition, RepoError, RepositoryConfig, Team,
    TeamRepository, UnitOfWork,
};

const AGES: [i32; 5] = [10, 20, 21, 40, 50];

fn seed(uow: &mut UnitOfWork<'_>, members: &MemberRepository) -> Vec<Managed<Member>> {
    AGES.iter()
        .enumerate()
        .map(|(index, age)| {
            members
                .save(uow, &Managed::new(Member::with_age(format!("member{}", index + 1), *age)))
                .unwrap()
        })
        .collect()
}

#[test]
fn bulk_update_clears_unit_of_work_by_default() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = MemberRepository::new().unwrap();
    let saved = seed(&mut uow, &members);
    let member5 = &saved[4];

    let affected = members.bulk_age_plus(&mut uow, 20).unwrap();
    assert_eq!(affected, 4);
    assert!(!uow.contains(member5));
    assert_eq!(uow.managed_count(), 0);

    // The stale instance keeps its old value; a fresh read sees the update.
    assert_eq!(member5.borrow().age, 50);
    let reloaded = members
        .find_by_id(&mut uow, member5.id().unwrap())
        .unwrap()
        .unwrap();
    assert!(!Managed::ptr_eq(&reloaded, member5));
    assert_eq!(reloaded.borrow().age, 51);

    let by_name = members.find_list_by_username(&mut uow, "member1").unwrap();
    assert_eq!(by_name[0].borrow().age, 10);
}

#[test]
fn pending_changes_are_flushed_before_bulk_update() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = MemberRepository::new().unwrap();
    let saved = seed(&mut uow, &members);

    saved[0].borrow_mut().age = 30;
    assert_eq!(members.bulk_age_plus(&mut uow, 20).unwrap(), 5);

    let first = members
        .find_by_id(&mut uow, saved[0].id().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(first.borrow().age, 31);
}

#[test]
fn caller_managed_clear_blocks_reads_until_cleared() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = MemberRepository::new().unwrap();
    let manual = ManualMemberRepository::new();
    let saved = seed(&mut uow, &members);

    assert_eq!(manual.bulk_age_plus(&mut uow, 20).unwrap(), 4);
    assert!(uow.contains(&saved[4]));

    let err = manual.find_by_id(&mut uow, saved[4].id().unwrap()).unwrap_err();
    assert!(matches!(err, RepoError::StaleCache { entity: "Member" }));
    let err = members
        .find_all(&mut uow, &FetchPlan::none())
        .unwrap_err();
    assert!(matches!(err, RepoError::StaleCache { .. }));

    uow.clear();
    let member5 = manual.find(&mut uow, saved[4].id().unwrap()).unwrap();
    assert_eq!(member5.borrow().age, 51);
}

#[test]
fn stale_dirty_instance_is_not_flushed() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = MemberRepository::new().unwrap();
    let manual = ManualMemberRepository::new();
    let saved = seed(&mut uow, &members);

    manual.bulk_age_plus(&mut uow, 20).unwrap();
    saved[4].borrow_mut().username = "overwrite".to_string();
    let err = uow.flush().unwrap_err();
    assert!(matches!(err, RepoError::StaleCache { .. }));
}

#[test]
fn configuration_and_definition_select_clear_policy() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let config = RepositoryConfig {
        clear_after_bulk_update: false,
        ..RepositoryConfig::default()
    };
    let members = MemberRepository::with_config(&config).unwrap();
    seed(&mut uow, &members);

    members.bulk_age_plus(&mut uow, 20).unwrap();
    assert!(uow.is_stale(&MEMBER_SCHEMA));
    uow.clear();

    let overriding = GenericRepository::<Member>::with_config(
        &config,
        vec![QueryDefinition::explicit("reset", "UPDATE members SET age = :age")
            .modifying()
            .clear_policy(ClearPolicy::Automatic)],
    )
    .unwrap();
    let member = members.find_list_by_username(&mut uow, "member1").unwrap();
    assert_eq!(
        overriding
            .bulk_update(&mut uow, "reset", &Params::new().with("age", 0))
            .unwrap(),
        5
    );
    assert!(!uow.contains(&member[0]));
    assert!(!uow.is_stale(&MEMBER_SCHEMA));
}

#[test]
fn select_query_cannot_run_as_bulk_update() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let repo = GenericRepository::<Member>::new(vec![QueryDefinition::derived("findByAge")]).unwrap();
    let err = repo
        .bulk_update(&mut uow, "findByAge", &Params::new().with("age", 1))
        .unwrap_err();
    assert!(matches!(err, RepoError::InvalidQueryUsage { .. }));
}

#[test]
fn resolved_lazy_reference_is_guarded_after_caller_managed_update() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = MemberRepository::new().unwrap();
    let teams = TeamRepository::new().unwrap();
    let team = teams.save(&mut uow, &Managed::new(Team::new("old"))).unwrap();
    members
        .save(&mut uow, &Managed::new(Member::with_team("member1", 10, &team).unwrap()))
        .unwrap();
    uow.flush().unwrap();
    uow.clear();

    let loaded = members.find_all_with_team(&mut uow).unwrap();
    let member = loaded[0].borrow();
    let lazy = member.team().unwrap();
    assert!(lazy.is_resolved_in(&uow));

    let rename = GenericRepository::<Team>::new(vec![QueryDefinition::explicit(
        "renameAll",
        "UPDATE teams SET name = :name",
    )
    .modifying()
    .clear_policy(ClearPolicy::CallerManaged)])
    .unwrap();
    rename
        .bulk_update(&mut uow, "renameAll", &Params::new().with("name", "new"))
        .unwrap();

    assert!(!lazy.is_resolved_in(&uow));
    let err = lazy.resolve(&mut uow).unwrap_err();
    assert!(matches!(err, RepoError::StaleCache { entity: "Team" }));
    let err = teams.find_by_id(&mut uow, team.id().unwrap()).unwrap_err();
    assert!(matches!(err, RepoError::StaleCache { entity: "Team" }));

    uow.clear();
    let fresh = lazy.resolve(&mut uow).unwrap();
    assert_eq!(fresh.borrow().name, "new");
}

#[test]
fn caller_managed_update_marks_the_statement_target_stale() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let teams = TeamRepository::new().unwrap();
    teams.save(&mut uow, &Managed::new(Team::new("teamA"))).unwrap();

    let repo = GenericRepository::<Member>::new(vec![QueryDefinition::explicit(
        "renameTeams",
        "UPDATE teams SET name = :name",
    )
    .modifying()
    .clear_policy(ClearPolicy::CallerManaged)])
    .unwrap();
    assert_eq!(
        repo.bulk_update(&mut uow, "renameTeams", &Params::new().with("name", "x"))
            .unwrap(),
        1
    );

    assert!(uow.is_stale(&TEAM_SCHEMA));
    assert!(!uow.is_stale(&MEMBER_SCHEMA));
    let err = teams.find_by_name(&mut uow, "x").unwrap_err();
    assert!(matches!(err, RepoError::StaleCache { entity: "Team" }));
    assert_eq!(repo.count(&mut uow).unwrap(), 0);
}
