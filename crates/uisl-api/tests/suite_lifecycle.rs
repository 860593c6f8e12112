use std::time::Duration;

use bigdecimal::BigDecimal;
use uisl_api::{
    parse_suite_auto, parse_suite_source, parse_suite_source_with_loader, play_suite,
    serialize_commands, serialize_suite, PlayOptions,
};
use uisl_core::{Command, CommandFlow, Value, ValueCommand};
use uisl_parser::MapResourceLoader;
use uisl_runtime::{Player, RhaiEvaluator};

fn quick() -> PlayOptions {
    PlayOptions {
        command_interval: Duration::ZERO,
        test_cases: Vec::new(),
    }
}

#[test]
fn greet_example_runs_end_to_end() {
    let source = "def greet(name)\n  set msg = \"hi \" + name\nend\ngreet \"Ann\"\n";
    let outcome = parse_suite_source(source, Some("greet.uisl")).expect("source should parse");
    assert!(outcome.is_clean(), "{:?}", outcome.errors);

    let mut context = outcome.suite.test_cases[0].context.clone();
    let mut player =
        Player::new(Box::new(RhaiEvaluator::new())).with_command_interval(Duration::ZERO);
    let flow = player.play(&mut context).expect("script should play");
    assert_eq!(flow, CommandFlow::Next);
    assert_eq!(
        context.variable("msg"),
        Some(&Value::String("hi Ann".to_string()))
    );
    assert_eq!(context.variable("name"), None);
}

#[test]
fn serialized_suites_reparse_to_the_same_text() {
    let source = "suite \"checkout\"\ntest_case \"happy\"\ndef total(a, b)\n  set sum = a + b\nend\ntotal 1, 2\nif sum == 3\n  print \"ok\"\nend\n";
    let outcome = parse_suite_source(source, None).expect("source should parse");
    assert!(outcome.is_clean(), "{:?}", outcome.errors);

    let emitted = serialize_suite(&outcome.suite);
    let again = parse_suite_auto(&emitted, Some("emitted.uisl")).expect("emitted text should parse");
    assert!(again.is_clean(), "{:?}", again.errors);
    assert_eq!(serialize_suite(&again.suite), emitted);
}

#[test]
fn defs_before_the_first_test_case_survive_formatting() {
    let source = "suite \"s\"\ndef open_app(name)\n  set opened = name\nend\ntest_case \"tc\"\nopen_app \"calc\"\nassert \"calc\", opened\n";
    let outcome = parse_suite_source(source, None).expect("source should parse");
    assert!(outcome.is_clean(), "{:?}", outcome.errors);
    assert_eq!(outcome.suite.commands.len(), 1);

    let emitted = serialize_suite(&outcome.suite);
    assert!(emitted.contains("def open_app(name)"));

    let again = parse_suite_auto(&emitted, Some("emitted.uisl")).expect("emitted text should parse");
    assert!(again.is_clean(), "{:?}", again.errors);
    let report = play_suite(&again, &quick()).expect("clean outcome should play");
    assert!(report.errors.is_empty(), "{:?}", report.errors);
}

#[test]
fn xml_attribute_types_survive_into_the_dsl_form() {
    let xml = r#"
<suite name="s">
  <test_case name="tc">
    <def name="fill">
      <parameter name="field" type="string"/>
      <parameter name="amount" type="number"/>
    </def>
    <fill field="100" amount="100"/>
  </test_case>
</suite>"#;
    let outcome = parse_suite_auto(xml, Some("s.xml")).expect("xml should parse");
    assert!(outcome.is_clean(), "{:?}", outcome.errors);

    let commands = outcome.suite.test_cases[0].context.commands();
    let Command::MethodCall(call) = &commands[1] else {
        panic!("expected a call");
    };
    assert!(matches!(
        &call.arguments[0].1,
        ValueCommand::Literal {
            value: Value::String(text),
            ..
        } if text == "100"
    ));
    assert!(matches!(
        &call.arguments[1].1,
        ValueCommand::Literal {
            value: Value::Number(number),
            ..
        } if number == &BigDecimal::from(100)
    ));

    // The string argument keeps its quotes in the textual form.
    let emitted = serialize_commands(commands);
    assert!(emitted.contains("fill \"100\", 100"));
}

#[test]
fn faults_are_isolated_per_test_case() {
    let source = "suite \"s\"\ntest_case \"bad\"\ninc ghost\ntest_case \"good\"\nset n = 1\nassert \"1\", n\n";
    let outcome = parse_suite_source(source, None).expect("source should parse");
    assert!(outcome.is_clean(), "{:?}", outcome.errors);

    let report = play_suite(&outcome, &quick()).expect("clean outcome should play");
    assert_eq!(report.flow, CommandFlow::Next);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].test_case.as_deref(), Some("bad"));
    assert!(report.errors[0].message.starts_with("EXEC_VAR_MISSING"));
}

#[test]
fn required_units_never_execute_their_top_level_commands() {
    let mut loader = MapResourceLoader::new();
    loader.insert(
        "lib.uisl",
        "def double(n)\n  set doubled = n * 2\nend\nset side_effect = 1\n",
    );
    let source = "require \"lib.uisl\"\ndouble 21\nassert \"42\", doubled\n";
    let outcome = parse_suite_source_with_loader(source, None, &loader)
        .expect("source should parse");
    assert!(outcome.is_clean(), "{:?}", outcome.errors);

    let report = play_suite(&outcome, &quick()).expect("clean outcome should play");
    assert!(report.errors.is_empty(), "{:?}", report.errors);

    // side_effect would only exist if lib's top-level set had run.
    let mut context = outcome.suite.test_cases[0].context.clone();
    let mut player =
        Player::new(Box::new(RhaiEvaluator::new())).with_command_interval(Duration::ZERO);
    player.play(&mut context).expect("script should play");
    assert_eq!(context.variable("side_effect"), None);
    assert_eq!(
        context.variable("doubled"),
        Some(&Value::Number(BigDecimal::from(42)))
    );
}

#[test]
fn exit_aborts_the_whole_suite() {
    let source = "suite \"s\"\ntest_case \"first\"\nexit\ntest_case \"second\"\ninc ghost\n";
    let outcome = parse_suite_source(source, None).expect("source should parse");
    let report = play_suite(&outcome, &quick()).expect("clean outcome should play");
    assert_eq!(report.flow, CommandFlow::Exit);
    // The second case never ran, so its fault never happened.
    assert!(report.errors.is_empty());
}
