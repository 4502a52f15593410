use datarepo_core::db::open_db_in_memory;
use datarepo_core::{
    CrudRepository, Direction, FetchPlan, Managed, ManualMemberRepository, Member,
    MemberRepository, PageRequest, RepoError, Sort, UnitOfWork,
};

fn names(found: &[Managed<Member>]) -> Vec<String> {
    found
        .iter()
        .map(|member| member.borrow().username.clone())
        .collect()
}

#[test]
fn basic_crud() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let repo = ManualMemberRepository::new();

    let member1 = repo.save(&mut uow, &Managed::new(Member::new("member1"))).unwrap();
    let member2 = repo.save(&mut uow, &Managed::new(Member::new("member2"))).unwrap();

    let found1 = repo.find_by_id(&mut uow, member1.id().unwrap()).unwrap().unwrap();
    let found2 = repo.find(&mut uow, member2.id().unwrap()).unwrap();
    assert!(Managed::ptr_eq(&found1, &member1));
    assert!(Managed::ptr_eq(&found2, &member2));

    assert_eq!(repo.find_all(&mut uow).unwrap().len(), 2);
    assert_eq!(repo.count(&mut uow).unwrap(), 2);

    repo.remove(&mut uow, &member1).unwrap();
    repo.remove(&mut uow, &member2).unwrap();
    assert_eq!(repo.count(&mut uow).unwrap(), 0);

    let err = repo.find(&mut uow, member1.id().unwrap()).unwrap_err();
    assert!(matches!(err, RepoError::NotFound { entity: "Member", .. }));
}

#[test]
fn paging_by_offset_and_limit() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let repo = ManualMemberRepository::new();
    for index in 1..=5 {
        repo.save(&mut uow, &Managed::new(Member::with_age(format!("member{index}"), 10)))
            .unwrap();
    }
    repo.save(&mut uow, &Managed::new(Member::with_age("other", 20)))
        .unwrap();

    let page = repo.find_by_page(&mut uow, 10, 0, 3).unwrap();
    assert_eq!(names(&page), ["member5", "member4", "member3"]);
    let rest = repo.find_by_page(&mut uow, 10, 3, 3).unwrap();
    assert_eq!(names(&rest), ["member2", "member1"]);
    assert_eq!(repo.total_count(&mut uow, 10).unwrap(), 5);
    assert_eq!(repo.total_count(&mut uow, 99).unwrap(), 0);
}

#[test]
fn agrees_with_registered_repository() {
    let mut conn = open_db_in_memory().unwrap();
    let mut uow = UnitOfWork::begin(&mut conn).unwrap();
    let manual = ManualMemberRepository::new();
    let members = MemberRepository::new().unwrap();
    for (username, age) in [("AAA", 10), ("AAA", 20), ("BBB", 20), ("CCC", 10)] {
        manual
            .save(&mut uow, &Managed::new(Member::with_age(username, age)))
            .unwrap();
    }

    let by_hand = manual
        .find_by_username_and_age_greater_than(&mut uow, "AAA", 15)
        .unwrap();
    let derived = members
        .find_by_username_and_age_greater_than(&mut uow, "AAA", 15)
        .unwrap();
    assert_eq!(by_hand.len(), 1);
    assert!(Managed::ptr_eq(&by_hand[0], &derived[0]));

    let named_by_hand = manual.find_by_username(&mut uow, "AAA").unwrap();
    let named = members.find_by_username(&mut uow, "AAA").unwrap();
    assert_eq!(names(&named_by_hand), names(&named));

    let manual_page = manual.find_by_page(&mut uow, 10, 0, 10).unwrap();
    let registered_page = members
        .find_by_age(
            &mut uow,
            10,
            &PageRequest::of_sorted(0, 10, Sort::by(Direction::Desc, &["username"])).unwrap(),
        )
        .unwrap();
    assert_eq!(names(&manual_page), names(&registered_page.content));
    assert_eq!(
        manual.total_count(&mut uow, 10).unwrap(),
        registered_page.total_elements
    );

    assert_eq!(
        manual.find_all(&mut uow).unwrap().len(),
        members.find_all(&mut uow, &FetchPlan::none()).unwrap().len()
    );
    assert_eq!(manual.count(&mut uow).unwrap(), members.count(&mut uow).unwrap());
}
