//! Source transformation for detected signatures.
//!
//! Three rules are supported:
//!
//! - [`Replacement::Line`]: lines that are exactly the literal signature are
//!   swapped for the replacement text. Partial-line occurrences are kept.
//! - [`Replacement::Text`]: every occurrence of the literal signature is
//!   swapped.
//! - [`Replacement::Capture`]: for each distinct captured value `X`, every
//!   literal occurrence of the `from` template rendered with `X` becomes the
//!   `to` template rendered with the derived value.
//!
//! Text outside the matched occurrences is copied through unchanged, and
//! the output depends only on the input text and the rule.

use crate::config::{Derive, Replacement, Signature, VALUE_PLACEHOLDER};
use crate::detect::{Detection, PatternError};
use regex::{Captures, Regex};
use std::collections::HashMap;

/// Output of a transformation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Transformed holds the new source text"]
pub struct Transformed {
    pub text: String,
    /// Number of occurrences rewritten.
    pub replacements: usize,
}

impl Transformed {
    fn unchanged(source: &str) -> Self {
        Self {
            text: source.to_string(),
            replacements: 0,
        }
    }
}

/// Apply `rule` to every occurrence of the detected signature in `source`.
///
/// A detection with `present == false` always yields the input unchanged.
pub fn transform(
    source: &str,
    signature: &Signature,
    detection: &Detection,
    rule: &Replacement,
) -> Result<Transformed, PatternError> {
    if !detection.present {
        return Ok(Transformed::unchanged(source));
    }

    match (signature, rule) {
        (Signature::Literal { text: search }, Replacement::Line { text }) => {
            Ok(replace_lines(source, search, text))
        }
        (Signature::Literal { text: search }, Replacement::Text { text }) => {
            Ok(replace_text(source, search, text))
        }
        (Signature::Regex { .. }, Replacement::Capture { from, to, derive }) => {
            replace_captures(source, &detection.captures, from, to, *derive)
        }
        (signature, rule) => Err(PatternError::IncompatibleRule {
            signature: signature.kind(),
            replacement: rule.kind(),
        }),
    }
}

/// Split a line into its body and `\n` / `\r\n` terminator.
fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

fn replace_lines(source: &str, search: &str, replacement: &str) -> Transformed {
    if search.is_empty() {
        return Transformed::unchanged(source);
    }

    let normalized = replacement.replace("\r\n", "\n");
    let crlf = normalized.replace('\n', "\r\n");

    let mut out = String::with_capacity(source.len() + replacement.len());
    let mut replacements = 0;
    for line in source.split_inclusive('\n') {
        let (body, ending) = split_line_ending(line);
        if body == search {
            out.push_str(if ending == "\r\n" { &crlf } else { &normalized });
            out.push_str(ending);
            replacements += 1;
        } else {
            out.push_str(line);
        }
    }

    if replacements == 0 {
        return Transformed::unchanged(source);
    }
    Transformed {
        text: out,
        replacements,
    }
}

fn replace_text(source: &str, search: &str, replacement: &str) -> Transformed {
    if search.is_empty() {
        return Transformed::unchanged(source);
    }
    let replacements = source.matches(search).count();
    if replacements == 0 {
        return Transformed::unchanged(source);
    }
    Transformed {
        text: source.replace(search, replacement),
        replacements,
    }
}

fn render(template: &str, value: &str) -> String {
    template.replace(VALUE_PLACEHOLDER, value)
}

/// Derive the replacement value for a captured value.
pub fn derive_value(value: &str, derive: Derive) -> String {
    match derive {
        Derive::Identity => value.to_string(),
        Derive::Negate => {
            let value = value.trim();
            if let Some(inner) = value.strip_prefix("not ") {
                let inner = inner.trim_start();
                if is_atom(inner) {
                    return inner.to_string();
                }
            }
            if is_atom(value) {
                format!("not {value}")
            } else {
                format!("not ({value})")
            }
        }
    }
}

/// An expression that `not` binds to as a whole.
///
/// Without whitespace there is no room for `and`, `or` or a conditional
/// expression, all of which bind looser than `not`.
fn is_atom(value: &str) -> bool {
    !value.is_empty() && !value.chars().any(char::is_whitespace)
}

fn replace_captures(
    source: &str,
    captures: &[String],
    from: &str,
    to: &str,
    derive: Derive,
) -> Result<Transformed, PatternError> {
    let mut pairs: Vec<(String, String)> = captures
        .iter()
        .map(|value| (render(from, value), render(to, &derive_value(value, derive))))
        .filter(|(from, _)| !from.is_empty())
        .collect();
    if pairs.is_empty() {
        return Ok(Transformed::unchanged(source));
    }

    // Longest first so one rendered template never shadows a longer one
    // at the same position.
    pairs.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
    pairs.dedup_by(|a, b| a.0 == b.0);

    let alternation = pairs
        .iter()
        .map(|(from, _)| regex::escape(from))
        .collect::<Vec<_>>()
        .join("|");
    let re = Regex::new(&alternation).map_err(|source| PatternError::Invalid {
        pattern: alternation.clone(),
        source,
    })?;
    let lookup: HashMap<&str, &str> = pairs
        .iter()
        .map(|(from, to)| (from.as_str(), to.as_str()))
        .collect();

    // Single pass: text produced by one substitution is never rescanned.
    let mut replacements = 0;
    let text = re.replace_all(source, |caps: &Captures<'_>| {
        replacements += 1;
        lookup
            .get(&caps[0])
            .map(|to| to.to_string())
            .unwrap_or_else(|| caps[0].to_string())
    });
    let text = text.into_owned();

    Ok(Transformed { text, replacements })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::detect;

    fn literal(text: &str) -> Signature {
        Signature::Literal {
            text: text.to_string(),
        }
    }

    fn resume_signature() -> Signature {
        Signature::Regex {
            pattern: r"resume_download\s*=\s*([^,\)]+)".to_string(),
        }
    }

    fn resume_rule() -> Replacement {
        Replacement::Capture {
            from: "resume_download={value},".to_string(),
            to: "force_download={value},".to_string(),
            derive: Derive::Negate,
        }
    }

    fn run(source: &str, signature: &Signature, rule: &Replacement) -> Transformed {
        let detection = detect(source, signature).unwrap();
        transform(source, signature, &detection, rule).unwrap()
    }

    #[test]
    fn test_line_substitution_exact() {
        let source = "import os\nfrom pkg import old_fn, keep_fn\n\nold_fn()\n";
        let rule = Replacement::Line {
            text: "from pkg import keep_fn\ndef old_fn(*a, **k): return keep_fn(*a, **k)"
                .to_string(),
        };
        let out = run(source, &literal("from pkg import old_fn, keep_fn"), &rule);
        assert_eq!(out.replacements, 1);
        assert_eq!(
            out.text,
            "import os\nfrom pkg import keep_fn\ndef old_fn(*a, **k): return keep_fn(*a, **k)\n\nold_fn()\n"
        );
        assert!(!out.text.contains("from pkg import old_fn, keep_fn"));
    }

    #[test]
    fn test_line_substitution_ignores_partial_lines() {
        let source = "    from pkg import old_fn, keep_fn\nx = 'from pkg import old_fn, keep_fn'\n";
        let rule = Replacement::Line {
            text: "from pkg import keep_fn".to_string(),
        };
        let out = run(source, &literal("from pkg import old_fn, keep_fn"), &rule);
        assert_eq!(out.replacements, 0);
        assert_eq!(out.text, source);
    }

    #[test]
    fn test_line_substitution_keeps_crlf() {
        let source = "a\r\nold\r\nb";
        let rule = Replacement::Line {
            text: "new1\nnew2".to_string(),
        };
        let out = run(source, &literal("old"), &rule);
        assert_eq!(out.text, "a\r\nnew1\r\nnew2\r\nb");
    }

    #[test]
    fn test_line_substitution_last_line_without_newline() {
        let out = run(
            "a\nold",
            &literal("old"),
            &Replacement::Line {
                text: "new".to_string(),
            },
        );
        assert_eq!(out.text, "a\nnew");
    }

    #[test]
    fn test_text_substitution_all_occurrences() {
        let source = "torch.utils._pytree._register_pytree_node(A)\n\
                      torch.utils._pytree._register_pytree_node(B)\n";
        let out = run(
            source,
            &literal("torch.utils._pytree._register_pytree_node"),
            &Replacement::Text {
                text: "torch.utils._pytree.register_pytree_node".to_string(),
            },
        );
        assert_eq!(out.replacements, 2);
        assert!(!out.text.contains("_register_pytree_node"));
        assert_eq!(out.text.matches("register_pytree_node(").count(), 2);
    }

    #[test]
    fn test_capture_substitution_exact() {
        let out = run(
            "foo(resume_download=flag, other=1)",
            &resume_signature(),
            &resume_rule(),
        );
        assert_eq!(out.text, "foo(force_download=not flag, other=1)");
        assert!(!out.text.contains("resume_download="));
        assert_eq!(out.replacements, 1);
    }

    #[test]
    fn test_capture_substitution_every_distinct_value() {
        let source = "a(resume_download=x, b=1)\nc(resume_download=y, d=2)\ne(resume_download=x, f=3)\n";
        let out = run(source, &resume_signature(), &resume_rule());
        assert_eq!(out.replacements, 3);
        assert_eq!(
            out.text,
            "a(force_download=not x, b=1)\nc(force_download=not y, d=2)\ne(force_download=not x, f=3)\n"
        );
    }

    #[test]
    fn test_capture_leaves_unmatched_spelling() {
        // Trailing argument has no comma, so the literal template misses it.
        let source = "foo(a=1, resume_download=flag)";
        let out = run(source, &resume_signature(), &resume_rule());
        assert_eq!(out.replacements, 0);
        assert_eq!(out.text, source);
    }

    #[test]
    fn test_absent_detection_is_noop() {
        let source = "nothing to see";
        let out = transform(
            source,
            &literal("missing"),
            &Detection::default(),
            &Replacement::Text {
                text: "x".to_string(),
            },
        )
        .unwrap();
        assert_eq!(out.text, source);
        assert_eq!(out.replacements, 0);
    }

    #[test]
    fn test_incompatible_rule() {
        let detection = Detection {
            present: true,
            captures: Vec::new(),
        };
        let err = transform("x", &resume_signature(), &detection, &Replacement::Text {
            text: "y".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, PatternError::IncompatibleRule { .. }));
    }

    #[test]
    fn test_derive_negate() {
        assert_eq!(derive_value("flag", Derive::Negate), "not flag");
        assert_eq!(derive_value("not flag", Derive::Negate), "flag");
        assert_eq!(derive_value("a or b", Derive::Negate), "not (a or b)");
        assert_eq!(derive_value("not a or b", Derive::Negate), "not (not a or b)");
        assert_eq!(derive_value(" True ", Derive::Negate), "not True");
        assert_eq!(derive_value("x", Derive::Identity), "x");
    }

    mod properties {
        use super::*;
        use crate::config::Replacement;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn text_without_signature_is_untouched(source in "[a-z =(),\n]{0,200}") {
                let signature = literal("_register_pytree_node");
                let rule = Replacement::Text { text: "register_pytree_node".to_string() };
                let out = run(&source, &signature, &rule);
                prop_assert_eq!(out.text, source);
            }

            #[test]
            fn capture_rule_is_deterministic(values in proptest::collection::vec("[a-z]{1,6}", 1..6)) {
                let source: String = values
                    .iter()
                    .map(|v| format!("call(resume_download={v}, other=1)\n"))
                    .collect();
                let first = run(&source, &resume_signature(), &resume_rule());
                let second = run(&source, &resume_signature(), &resume_rule());
                prop_assert_eq!(&first, &second);
                prop_assert!(!first.text.contains("resume_download="));
            }

            #[test]
            fn transformed_capture_output_is_stable(values in proptest::collection::vec("[a-z]{1,6}", 1..6)) {
                let source: String = values
                    .iter()
                    .map(|v| format!("call(resume_download={v}, other=1)\n"))
                    .collect();
                let once = run(&source, &resume_signature(), &resume_rule());
                let twice = run(&once.text, &resume_signature(), &resume_rule());
                prop_assert_eq!(twice.replacements, 0);
                prop_assert_eq!(twice.text, once.text);
            }
        }
    }
}
