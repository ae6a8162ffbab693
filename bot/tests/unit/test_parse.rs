//! Sentence parsing through the built-in statements

use deploybot::errors::BotError;
use deploybot::models::request::{Request, RequestKind, Verbosity};
use deploybot::parse::pattern::{GroupSpec, Pattern, PatternFlags};
use deploybot::parse::statement::Statement;
use deploybot::parse::Statements;

#[test]
fn test_deploy_sentence() {
    let statements = Statements::builtin().unwrap();
    let request = statements
        .parse("please deploy shaka from carlos/tasks branch to staging,dev server")
        .unwrap()
        .unwrap();

    let Request::Deploy(deploy) = request else {
        panic!("expected a deploy request");
    };
    assert_eq!(deploy.app_name, "shaka");
    assert_eq!(deploy.branch, "carlos/tasks");
    assert_eq!(deploy.sites, vec!["staging", "dev"]);
    assert_eq!(deploy.verbosity, Verbosity::Normal);
    assert!(deploy.from_message.is_none());
}

#[test]
fn test_logging_tokens_set_one_flag() {
    let statements = Statements::builtin().unwrap();
    for (token, expected) in [
        ("verbosely", Verbosity::Verbose),
        ("silently", Verbosity::Silent),
        ("debugly", Verbosity::Debug),
    ] {
        let sentence = format!("restart shaka on dev {}", token);
        let request = statements.parse(&sentence).unwrap().unwrap();
        assert_eq!(request.verbosity(), expected);

        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("logging").is_none());
        let flags = ["verbose", "silent", "debug"]
            .iter()
            .filter(|flag| value.get(**flag) == Some(&serde_json::Value::Bool(true)))
            .count();
        assert_eq!(flags, 1);
    }
}

#[test]
fn test_priority_order_and_misses() {
    let statements = Statements::builtin().unwrap();

    let request = statements.parse("setup deploy:prepare on dev").unwrap().unwrap();
    assert_eq!(request.kind().as_str(), "setup");

    let request = statements.parse("show me the logs of dev, staging").unwrap().unwrap();
    assert_eq!(request.sites(), ["dev", "staging"]);

    assert!(statements.parse("make me a sandwich").unwrap().is_none());
    assert!(statements.iter().all(|s| !s.test("make me a sandwich")));
}

#[test]
fn test_substituted_values_round_trip() {
    let pattern = Pattern::compile(
        "ship   :app\tto  :target",
        PatternFlags::default(),
        vec![GroupSpec::new("target", r"[a-z\-]+")],
    )
    .unwrap();

    for (app, target) in [("shaka", "dev"), ("api_v2", "eu-west")] {
        let sentence = format!("ship {}    to\t{}", app, target);
        let captures = pattern.captures(&sentence).unwrap();
        assert_eq!(captures["app"], app);
        assert_eq!(captures["target"], target);
    }
}

#[test]
fn test_failing_statement_does_not_hide_later_ones() {
    let strict = Statement::new(
        RequestKind::Restart,
        vec![Pattern::compile("restart :appName on :sites :logging", PatternFlags::default(), vec![])
            .unwrap()],
    );
    let builtin = Statement::builtin(RequestKind::Restart).unwrap();

    let statements = Statements::new(vec![strict.clone(), builtin]);
    let request = statements.parse("restart shaka on dev loudly").unwrap().unwrap();
    assert_eq!(request.sites(), ["dev"]);
    assert_eq!(request.verbosity(), Verbosity::Normal);

    let statements = Statements::new(vec![strict]);
    let err = statements.parse("restart shaka on dev loudly").unwrap_err();
    assert!(matches!(err, BotError::ParseError(_)));
}
