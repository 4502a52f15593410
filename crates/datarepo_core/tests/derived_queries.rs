use datarepo_core::db::open_db_in_memory;
use datarepo_core::{
    CrudRepository, GenericRepository, Managed, Member, MemberDto, MemberRepository, Params,
    QueryDefinition, RepoError, Team, TeamRepository, UnitOfWork,
};

fn seed(uow: &mut UnitOfWork<'_>, members: &MemberRepository, rows: &[(&str, i32)]) {
    for (username, age) in rows {
        members
            .save(uow, &Managed::new(Member::with_age(*username, *age)))
            .unwrap();
    }
}

fn usernames(found: &[Managed<Member>]) -> Vec<String> {
    found
        .iter()
        .map(|member| member.borrow().username.clone())
        .collect()
}

#[test]
fn greater_than_excludes_the_threshold() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = MemberRepository::new().unwrap();
    seed(&mut uow, &members, &[("AAA", 10), ("AAA", 20), ("AAA", 15), ("BBB", 30)]);

    let found = members
        .find_by_username_and_age_greater_than(&mut uow, "AAA", 15)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].borrow().age, 20);

    assert!(members
        .find_by_username_and_age_greater_than(&mut uow, "AAA", 20)
        .unwrap()
        .is_empty());
}

#[test]
fn top3_caps_result_size() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = MemberRepository::new().unwrap();
    seed(
        &mut uow,
        &members,
        &[("m1", 1), ("m2", 2), ("m3", 3), ("m4", 4), ("m5", 5)],
    );

    assert_eq!(members.find_top3_hello_by(&mut uow).unwrap().len(), 3);
}

#[test]
fn explicit_named_and_in_queries() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = MemberRepository::new().unwrap();
    seed(&mut uow, &members, &[("AAA", 10), ("BBB", 20), ("CCC", 30)]);

    let user = members.find_user(&mut uow, "AAA", 10).unwrap();
    assert_eq!(usernames(&user), ["AAA"]);
    assert!(members.find_user(&mut uow, "AAA", 11).unwrap().is_empty());

    let named = members.find_by_username(&mut uow, "BBB").unwrap();
    assert_eq!(named[0].borrow().age, 20);

    let mut by_names = usernames(&members.find_by_names(&mut uow, &["AAA", "CCC"]).unwrap());
    by_names.sort();
    assert_eq!(by_names, ["AAA", "CCC"]);
    assert!(members.find_by_names(&mut uow, &[]).unwrap().is_empty());

    let mut all_names = members.find_username_list(&mut uow).unwrap();
    all_names.sort();
    assert_eq!(all_names, ["AAA", "BBB", "CCC"]);
}

#[test]
fn dto_projection_reads_joined_columns() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = MemberRepository::new().unwrap();
    let teams = TeamRepository::new().unwrap();

    let team = teams.save(&mut uow, &Managed::new(Team::new("teamA"))).unwrap();
    let member = members
        .save(&mut uow, &Managed::new(Member::with_team("AAA", 10, &team).unwrap()))
        .unwrap();
    members
        .save(&mut uow, &Managed::new(Member::with_age("loner", 5)))
        .unwrap();

    let dtos = members.find_member_dto(&mut uow).unwrap();
    assert_eq!(
        dtos,
        vec![MemberDto::new(
            member.id().unwrap(),
            "AAA",
            Some("teamA".to_string())
        )]
    );
    let json = serde_json::to_value(&dtos[0]).unwrap();
    assert_eq!(json["team_name"], "teamA");
}

#[test]
fn return_type_variants() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = MemberRepository::new().unwrap();
    seed(&mut uow, &members, &[("AAA", 10), ("BBB", 20), ("BBB", 30)]);

    assert!(members
        .find_list_by_username(&mut uow, "nobody")
        .unwrap()
        .is_empty());
    assert!(members
        .find_member_by_username(&mut uow, "nobody")
        .unwrap()
        .is_none());
    assert!(members
        .find_option_by_username(&mut uow, "AAA")
        .unwrap()
        .is_some());

    let err = members
        .find_option_by_username(&mut uow, "BBB")
        .unwrap_err();
    assert!(matches!(err, RepoError::NonUniqueResult { count: 2, .. }));
}

#[test]
fn query_results_share_identity_with_saved_instances() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = MemberRepository::new().unwrap();
    let saved = members
        .save(&mut uow, &Managed::new(Member::with_age("AAA", 10)))
        .unwrap();

    let found = members
        .find_member_by_username(&mut uow, "AAA")
        .unwrap()
        .unwrap();
    assert!(Managed::ptr_eq(&saved, &found));
}

#[test]
fn pending_changes_are_visible_to_queries() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = MemberRepository::new().unwrap();
    let saved = members
        .save(&mut uow, &Managed::new(Member::with_age("before", 10)))
        .unwrap();

    saved.borrow_mut().username = "after".to_string();
    assert_eq!(members.find_list_by_username(&mut uow, "after").unwrap().len(), 1);
}

#[test]
fn unsupported_method_name_fails_at_construction() {
    let err = GenericRepository::<Member>::new(vec![
        QueryDefinition::derived("findByUsername"),
        QueryDefinition::derived("findByUsernameAndShoeSizeGreaterThan"),
    ])
    .unwrap_err();
    match err {
        RepoError::UnsupportedDerivation { method, segment } => {
            assert_eq!(method, "findByUsernameAndShoeSizeGreaterThan");
            assert_eq!(segment, "ShoeSizeGreaterThan");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_parameter_fails_at_call_time() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let repo = GenericRepository::<Member>::new(vec![QueryDefinition::explicit(
        "byAge",
        "SELECT m.* FROM members m WHERE m.age = :age",
    )])
    .unwrap();

    let err = repo
        .list(&mut uow, "byAge", &Params::new().with("username", "x"))
        .unwrap_err();
    assert!(matches!(err, RepoError::UnboundParameter { ref name, .. } if name == "age"));
}

#[test]
fn derived_count_exists_and_delete() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let members = MemberRepository::new().unwrap();
    seed(&mut uow, &members, &[("a", 10), ("b", 20), ("c", 30), ("d", 40)]);

    let repo = GenericRepository::<Member>::new(vec![
        QueryDefinition::derived("countByAgeGreaterThanEqual"),
        QueryDefinition::derived("existsByUsernameIgnoreCase"),
        QueryDefinition::derived("deleteByAgeLessThan"),
        QueryDefinition::derived("findByAgeBetweenOrderByAgeDesc"),
    ])
    .unwrap();

    let params = Params::new().with("age", 20);
    assert_eq!(repo.count_by(&mut uow, "countByAgeGreaterThanEqual", &params).unwrap(), 3);
    assert!(repo
        .exists_by(&mut uow, "existsByUsernameIgnoreCase", &Params::new().with("username", "B"))
        .unwrap());

    let between = repo
        .list(
            &mut uow,
            "findByAgeBetweenOrderByAgeDesc",
            &Params::new().with("age_min", 15).with("age_max", 35),
        )
        .unwrap();
    assert_eq!(usernames(&between), ["c", "b"]);

    let removed = repo.delete_by(&mut uow, "deleteByAgeLessThan", &params).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(members.count(&mut uow).unwrap(), 3);
}
