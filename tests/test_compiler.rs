use iamx::error::IamqlError;
use iamx::iamql::{compile_iamql, run_iamql};
use iamx::model::{DataModel, MemberKind};
use iamx::test_utils::{IAMQL_TESTS_FILE, TestIamqlData, explain_scenario};

fn load_test_data() -> TestIamqlData {
    let iamql_test_file =
        std::fs::read_to_string(IAMQL_TESTS_FILE).expect("Cannot open IAMQL test cases");
    toml::from_str(&iamql_test_file).expect("Cannot parse test cases defined in toml")
}

#[test]
fn test_query_results() {
    let data = explain_scenario().expect("Cannot build scenario");
    for test in load_test_data().tests {
        println!("Testing IAMQL: {}", test.query);
        let results = match run_iamql(&test.query, &data) {
            Ok(results) => results,
            Err(err) => panic!("{}", err),
        };
        assert_eq!(results.len(), test.expected.len());
        for result in results {
            let expected = test
                .expected
                .get(&result.name)
                .unwrap_or_else(|| panic!("No expected rows for query {}", result.name));
            assert_eq!(&result.named_rows(&data), expected);
        }
    }
}

#[test]
fn test_compile_errors() {
    for test in load_test_data().errors {
        println!("Testing IAMQL compile error: {}", test.query);
        let err = compile_iamql(&test.query).unwrap_err();
        println!("Got: {}", err);
        assert!(
            err.to_string().contains(&test.error),
            "expected `{}` in `{}`",
            test.error,
            err
        );
    }
}

#[test]
fn test_join_type_error_names_both_kinds() {
    let err = compile_iamql("q: { ro role; ro2 role; } { ro.has(ro2); } { ro }").unwrap_err();
    assert_eq!(
        err,
        IamqlError::JoinArgumentType {
            relation: "has".to_owned(),
            expected: "permission".to_owned(),
            actual: "role".to_owned(),
        }
    );
}

#[test]
fn test_plan_shape() {
    let plans = compile_iamql(
        r#"
        q1: { r resource (type == "project"); m user; } { } { m, r }
        q2: { p permission; } { } { p }
        "#,
    )
    .unwrap();
    assert_eq!(plans.len(), 2);
    assert_eq!(plans[0].name, "q1");
    assert_eq!(plans[0].variables.len(), 2);
    assert_eq!(plans[0].projection, vec![1, 0]);
    // the type filter plus the implicit member kind restriction
    assert_eq!(plans[0].predicates.len(), 2);
    assert!(plans[1].predicates.is_empty());
}

#[test]
fn test_distinct_rows() {
    let mut data = DataModel::new();
    data.add_resource("project/p", "project", None).unwrap();
    data.add_role("roles/editor", &["storage.buckets.update"])
        .unwrap();
    for user in ["user/a", "user/b", "user/c"] {
        data.add_member(user, MemberKind::User, &[]).unwrap();
        data.add_binding("project/p", "roles/editor", &[user]).unwrap();
    }
    assert_eq!(data.bindings().count(), 1);

    let results = run_iamql(
        "q: { r resource; b binding; ro role; m user; } { b.grants(r, ro, m); } { r }",
        &data,
    )
    .unwrap();
    assert_eq!(results[0].named_rows(&data), vec![vec!["project/p".to_owned()]]);

    let results = run_iamql(
        "q: { r resource; b binding; ro role; m user; } { b.grants(r, ro, m); } { m }",
        &data,
    )
    .unwrap();
    assert_eq!(results[0].rows.len(), 3);
}

#[test]
fn test_member_kind_restriction() {
    let data = explain_scenario().unwrap();
    let results = run_iamql(
        r#"
        everyone: { m member; } { } { m }
        people: { u user (name like "user/f%"); } { } { u }
        "#,
        &data,
    )
    .unwrap();
    assert_eq!(results[0].rows.len(), 6);
    assert_eq!(results[0].columns, vec!["m".to_owned()]);
    assert_eq!(
        results[1].named_rows(&data),
        vec![vec!["user/felix".to_owned()], vec!["user/fooba".to_owned()]]
    );
}

#[test]
fn test_join_on_large_model() {
    let mut data = DataModel::new();
    data.add_resource("organization/org", "organization", None)
        .unwrap();
    for role in 0..50 {
        data.add_role(&format!("roles/r{}", role), &[&format!("service.op{}", role)])
            .unwrap();
    }
    for i in 0..2000 {
        let project = format!("project/p{}", i);
        let user = format!("user/u{}", i);
        data.add_resource(&project, "project", Some("organization/org"))
            .unwrap();
        data.add_member(&user, MemberKind::User, &[]).unwrap();
        data.add_binding(&project, &format!("roles/r{}", i % 50), &[&user])
            .unwrap();
    }
    assert_eq!(data.bindings().count(), 2000);

    // a nested loop over these variables would visit 4e11 rows
    let results = run_iamql(
        r#"
        all: { m member; b binding; r resource; ro role; } { b.grants(r, ro, m); } { m }
        one: { r resource (name == "project/p1999"); b binding; ro role; m member; }
             { b.grants(r, ro, m); } { m, ro }
        viewers: { p permission (name == "service.op7"); ro role; b binding; m member; r resource; }
                 { ro.has(p); b.grants(r, ro, m); } { r }
        "#,
        &data,
    )
    .unwrap();
    assert_eq!(results[0].rows.len(), 2000);
    assert_eq!(
        results[0].named_rows(&data)[..2],
        [vec!["user/u0".to_owned()], vec!["user/u1".to_owned()]]
    );
    assert_eq!(
        results[1].named_rows(&data),
        vec![vec!["user/u1999".to_owned(), "roles/r49".to_owned()]]
    );
    assert_eq!(results[2].rows.len(), 40);
    assert_eq!(
        results[2].named_rows(&data)[0],
        vec!["project/p7".to_owned()]
    );
}

#[test]
fn test_resource_email_attribute() {
    let mut data = DataModel::new();
    data.add_resource("project/p", "project", None).unwrap();
    data.add_resource("serviceaccount/robot", "serviceaccount", Some("project/p"))
        .unwrap();
    data.set_email("serviceaccount/robot", "robot@p.iam.gserviceaccount.com")
        .unwrap();

    let results = run_iamql(
        r#"q: { r resource (email like "%.iam.gserviceaccount.com"); } { } { r }"#,
        &data,
    )
    .unwrap();
    assert_eq!(
        results[0].named_rows(&data),
        vec![vec!["serviceaccount/robot".to_owned()]]
    );
}

#[test]
fn test_runs_against_empty_model() {
    let data = DataModel::new();
    let results = run_iamql("q: { r resource; } { } { r }", &data).unwrap();
    assert!(results[0].rows.is_empty());
}
