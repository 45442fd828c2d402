//! Character, text, and identifier strategies.
//!
//! All string generation runs over `IntervalSet`s of allowed codepoints.
//! A text strategy whose element is a one-character strategy draws through
//! the batched `DataSource::draw_string` path rather than the generic
//! sequence machinery; the two produce the same distribution because the
//! batched path makes exactly the same repeat-flag and character-index
//! draws.
//!
//! Identifier generation follows the lexical rule: one start character
//! (XID_Start plus underscore, minus the codepoints whose NFKC
//! normalization is itself invalid in an identifier), then continue
//! characters (start set plus XID_Continue). Construction guarantees
//! validity in the overwhelming majority of cases; a cheap final filter
//! guards the normalization edge cases.

use once_cell::sync::Lazy;
use unicode_ident::{is_xid_continue, is_xid_start};

use crate::data::{DataSource, DrawError};
use crate::errors::EngineError;
use crate::intervals::IntervalSet;
use crate::strategy::{FilterHint, Strategy, FILTER_ATTEMPTS};

/// Codepoints that are valid identifier starts but whose NFKC
/// normalization is not a valid identifier. They all fall in the start
/// set, so subtracting them once is enough.
const NFKC_INVALID_STARTS: &str = concat!(
    "\u{037a}\u{0e33}\u{0eb3}\u{2e2f}\u{309b}\u{309c}\u{fc5e}\u{fc5f}\u{fc60}\u{fc61}",
    "\u{fc62}\u{fc63}\u{fdfa}\u{fdfb}\u{fe70}\u{fe72}\u{fe74}\u{fe76}\u{fe78}\u{fe7a}",
    "\u{fe7c}\u{fe7e}\u{ff9e}\u{ff9f}",
);

static IDENTIFIER_START: Lazy<IntervalSet> = Lazy::new(|| {
    IntervalSet::matching(|c| is_xid_start(c) || c == '_')
        .subtract(&IntervalSet::from_chars(NFKC_INVALID_STARTS))
});

static IDENTIFIER_CONTINUE: Lazy<IntervalSet> = Lazy::new(|| {
    IDENTIFIER_START.union(&IntervalSet::matching(is_xid_continue))
});

/// Every scalar value (surrogates excluded by construction).
static ALL_CHARS: Lazy<IntervalSet> = Lazy::new(|| IntervalSet::matching(|_| true));

/// Whether `s` is a valid identifier: one start character followed by
/// continue characters.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        None => false,
        Some(first) => {
            (is_xid_start(first) || first == '_') && chars.all(is_xid_continue)
        }
    }
}

/// Strategy for single characters drawn from an interval set.
#[derive(Debug, Clone)]
pub struct CharStrategy {
    intervals: IntervalSet,
    repr: String,
}

impl CharStrategy {
    /// Build from explicit constraints. An empty resulting domain is an
    /// argument error naming the constraints, never an infinite retry
    /// loop at draw time.
    pub fn from_args(
        min_codepoint: Option<u32>,
        max_codepoint: Option<u32>,
        include_characters: &str,
        exclude_characters: &str,
    ) -> Result<CharStrategy, EngineError> {
        let lo = min_codepoint.unwrap_or(0);
        let hi = max_codepoint.unwrap_or(char::MAX as u32);
        let mut intervals = if lo <= hi {
            IntervalSet::new(vec![(lo, hi)]).intersect(&ALL_CHARS)
        } else {
            IntervalSet::empty()
        };
        intervals = intervals.union(&IntervalSet::from_chars(include_characters));
        intervals = intervals.subtract(&IntervalSet::from_chars(exclude_characters));
        let repr = format!(
            "characters(min_codepoint={min_codepoint:?}, max_codepoint={max_codepoint:?}, \
             include_characters={include_characters:?}, exclude_characters={exclude_characters:?})"
        );
        if intervals.is_empty() {
            return Err(EngineError::invalid_argument(format!(
                "no characters are allowed to be generated by this combination of arguments: {repr}"
            )));
        }
        Ok(CharStrategy { intervals, repr })
    }

    pub fn from_intervals(intervals: IntervalSet) -> Result<CharStrategy, EngineError> {
        if intervals.is_empty() {
            return Err(EngineError::invalid_argument(
                "character strategy over an empty interval set",
            ));
        }
        let repr = format!("characters({} codepoints)", intervals.len());
        Ok(CharStrategy { intervals, repr })
    }

    pub fn intervals(&self) -> &IntervalSet {
        &self.intervals
    }
}

impl Strategy for CharStrategy {
    type Value = char;

    fn draw(&self, source: &mut DataSource) -> Result<char, DrawError> {
        source.with_label("characters", |source| source.draw_char(&self.intervals))
    }

    fn label(&self) -> String {
        self.repr.clone()
    }
}

/// Strategy for strings of characters from a one-character element
/// strategy.
#[derive(Debug, Clone)]
pub struct TextStrategy {
    element: CharStrategy,
    min_size: usize,
    max_size: usize,
}

impl TextStrategy {
    pub fn new(
        element: CharStrategy,
        min_size: usize,
        max_size: usize,
    ) -> Result<TextStrategy, EngineError> {
        if min_size > max_size {
            return Err(EngineError::invalid_argument(format!(
                "text: min_size {min_size} exceeds max_size {max_size}"
            )));
        }
        Ok(TextStrategy {
            element,
            min_size,
            max_size,
        })
    }

    pub fn min_size(&self) -> usize {
        self.min_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Rebuild under a recognized semantic hint. Length hints tighten the
    /// size bounds by construction; the identifier hint rebuilds as an
    /// identifier strategy over the intersection of this strategy's
    /// alphabet with the allowed start characters. Arbitrary predicates
    /// without a hint go through plain `filter` instead.
    pub fn filter_hint(self, hint: FilterHint) -> Result<HintedText, EngineError> {
        match hint {
            FilterHint::MinLength(n) => Ok(HintedText::Text(TextStrategy {
                min_size: self.min_size.max(n),
                ..self
            })),
            FilterHint::MaxLength(n) => {
                let max_size = self.max_size.min(n);
                if self.min_size > max_size {
                    return Err(EngineError::invalid_argument(format!(
                        "text: max-length hint {n} is below min_size {}",
                        self.min_size
                    )));
                }
                Ok(HintedText::Text(TextStrategy { max_size, ..self }))
            }
            FilterHint::IsIdentifier => {
                if self.max_size < 1 {
                    return Err(EngineError::invalid_argument(
                        "identifier filter on an always-empty text strategy",
                    ));
                }
                let ident = IdentifierStrategy::with_alphabet(
                    self.element.intervals(),
                    self.min_size.max(1),
                    self.max_size,
                )?;
                Ok(HintedText::Identifier(ident))
            }
        }
    }
}

impl Strategy for TextStrategy {
    type Value = String;

    fn draw(&self, source: &mut DataSource) -> Result<String, DrawError> {
        // Element strategy is always a one-character strategy here, so we
        // can use the batched string draw.
        source.with_label("text", |source| {
            source.draw_string(self.element.intervals(), self.min_size, self.max_size)
        })
    }

    fn label(&self) -> String {
        format!(
            "text({}, min_size={}, max_size={})",
            self.element.label(),
            self.min_size,
            self.max_size
        )
    }
}

/// Result of applying a semantic hint to a text strategy.
#[derive(Debug, Clone)]
pub enum HintedText {
    Text(TextStrategy),
    Identifier(IdentifierStrategy),
}

impl Strategy for HintedText {
    type Value = String;

    fn draw(&self, source: &mut DataSource) -> Result<String, DrawError> {
        match self {
            HintedText::Text(s) => s.draw(source),
            HintedText::Identifier(s) => s.draw(source),
        }
    }

    fn label(&self) -> String {
        match self {
            HintedText::Text(s) => s.label(),
            HintedText::Identifier(s) => s.label(),
        }
    }
}

/// Strategy for valid identifiers: exactly one start character followed
/// by zero or more continue characters.
#[derive(Debug, Clone)]
pub struct IdentifierStrategy {
    start: IntervalSet,
    cont: IntervalSet,
    min_size: usize,
    max_size: usize,
}

impl IdentifierStrategy {
    /// Identifiers over the full start/continue sets.
    pub fn new(min_size: usize, max_size: usize) -> Result<IdentifierStrategy, EngineError> {
        IdentifierStrategy::build(
            IDENTIFIER_START.clone(),
            IDENTIFIER_CONTINUE.clone(),
            min_size,
            max_size,
        )
    }

    /// Identifiers restricted to an alphabet: the start set is the
    /// alphabet intersected with the allowed start characters, the
    /// continue set likewise. An alphabet with no valid start characters
    /// is an empty-domain argument error.
    pub fn with_alphabet(
        alphabet: &IntervalSet,
        min_size: usize,
        max_size: usize,
    ) -> Result<IdentifierStrategy, EngineError> {
        IdentifierStrategy::build(
            alphabet.intersect(&IDENTIFIER_START),
            alphabet.intersect(&IDENTIFIER_CONTINUE),
            min_size,
            max_size,
        )
    }

    fn build(
        start: IntervalSet,
        cont: IntervalSet,
        min_size: usize,
        max_size: usize,
    ) -> Result<IdentifierStrategy, EngineError> {
        if min_size < 1 || min_size > max_size {
            return Err(EngineError::invalid_argument(format!(
                "identifiers: invalid size bounds [{min_size}, {max_size}]"
            )));
        }
        if start.is_empty() {
            return Err(EngineError::invalid_argument(
                "identifiers: no allowed start characters in this alphabet",
            ));
        }
        Ok(IdentifierStrategy {
            start,
            cont,
            min_size,
            max_size,
        })
    }
}

impl Strategy for IdentifierStrategy {
    type Value = String;

    fn draw(&self, source: &mut DataSource) -> Result<String, DrawError> {
        source.with_label("identifiers", |source| {
            // Valid by construction almost always; the filter only guards
            // normalization edge cases.
            for _ in 0..FILTER_ATTEMPTS {
                let first = source.draw_char(&self.start)?;
                let rest = source.draw_string(&self.cont, self.min_size - 1, self.max_size - 1)?;
                let mut out = String::with_capacity(first.len_utf8() + rest.len());
                out.push(first);
                out.push_str(&rest);
                if is_identifier(&out) {
                    return Ok(out);
                }
            }
            source.mark_invalid();
            Err(DrawError::FilterRejected {
                path: source.label_path(),
            })
        })
    }

    fn label(&self) -> String {
        format!(
            "identifiers(min_size={}, max_size={})",
            self.min_size, self.max_size
        )
    }
}

/// Text over the full character space with the given size bounds.
pub fn text(min_size: usize, max_size: usize) -> Result<TextStrategy, EngineError> {
    let element = CharStrategy::from_args(None, None, "", "")?;
    TextStrategy::new(element, min_size, max_size)
}

/// Identifiers over the full start/continue sets.
pub fn identifiers(min_size: usize, max_size: usize) -> Result<IdentifierStrategy, EngineError> {
    IdentifierStrategy::new(min_size, max_size)
}
