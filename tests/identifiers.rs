//! Text and identifier strategies driven through whole sessions.

use falsify::strategy::FilterHint;
use falsify::strings::{is_identifier, CharStrategy, TextStrategy};
use falsify::{identifiers, text, Config, EngineError, SessionResult};

#[test]
fn generated_identifiers_satisfy_the_lexical_rule() {
    let result = falsify::run(
        identifiers(1, 12).unwrap(),
        |s| is_identifier(s),
        Config::default(),
    );
    assert!(matches!(result, SessionResult::AllPassed));
}

#[test]
fn identifier_failures_shrink_to_the_length_boundary() {
    let result = falsify::run(
        identifiers(1, 12).unwrap(),
        |s| s.chars().count() < 3,
        Config::default(),
    );
    match result {
        SessionResult::Falsified { minimal, .. } => {
            assert_eq!(minimal.value.chars().count(), 3);
            assert!(is_identifier(&minimal.value), "{:?}", minimal.value);
        }
        other => panic!("expected falsification, got {other:?}"),
    }
}

#[test]
fn text_sessions_respect_size_bounds() {
    let result = falsify::run(
        text(2, 6).unwrap(),
        |s| (2..=6).contains(&s.chars().count()),
        Config::default(),
    );
    assert!(matches!(result, SessionResult::AllPassed));
}

#[test]
fn hinted_text_runs_as_an_identifier_strategy() {
    let element =
        CharStrategy::from_args(Some('a' as u32), Some('z' as u32), "_0123456789", "").unwrap();
    let strategy = TextStrategy::new(element, 1, 10)
        .unwrap()
        .filter_hint(FilterHint::IsIdentifier)
        .unwrap();
    let result = falsify::run(strategy, |s| is_identifier(s), Config::default());
    assert!(matches!(result, SessionResult::AllPassed));
}

#[test]
fn length_hints_hold_across_a_session() {
    let strategy = text(0, 20)
        .unwrap()
        .filter_hint(FilterHint::MinLength(4))
        .unwrap();
    let result = falsify::run(strategy, |s| s.chars().count() >= 4, Config::default());
    assert!(matches!(result, SessionResult::AllPassed));
}

#[test]
fn contradictory_hints_are_argument_errors() {
    let err = text(5, 20).unwrap().filter_hint(FilterHint::MaxLength(3));
    assert!(matches!(err, Err(EngineError::InvalidArgument(_))));

    // Digits alone cannot start an identifier.
    let element = CharStrategy::from_args(Some('0' as u32), Some('9' as u32), "", "").unwrap();
    let err = TextStrategy::new(element, 1, 10)
        .unwrap()
        .filter_hint(FilterHint::IsIdentifier);
    assert!(matches!(err, Err(EngineError::InvalidArgument(_))));
}
