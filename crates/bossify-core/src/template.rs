//! Choice-template parser and variant counting.
//!
//! Syntax:
//!   `{a|b|c}`          - choice between alternatives
//!   `{nested {x|y}|z}` - choices nest arbitrarily deep
//!   `{|a }`            - an empty alternative renders to ""
//!   `\{ \} \| \\`      - escaped literals

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("choice group opened at byte {0} is never closed")]
    UnclosedGroup(usize),
    #[error("template expands to more than {limit} variants")]
    TooManyVariants { limit: usize },
}

/// One node of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Literal(String),
    /// Each alternative is itself a node sequence; an empty sequence is a
    /// valid alternative meaning "nothing".
    Choice(Vec<Vec<Node>>),
}

/// Parse a template string into its node sequence.
pub fn parse(template: &str) -> Result<Vec<Node>, TemplateError> {
    let bytes = template.as_bytes();
    let mut pos = 0;
    parse_sequence(bytes, &mut pos, false)
}

/// Parse nodes until end of input, or until an unescaped `|` / `}` when
/// `in_choice` is set. Leaves the delimiter unconsumed.
fn parse_sequence(
    bytes: &[u8],
    pos: &mut usize,
    in_choice: bool,
) -> Result<Vec<Node>, TemplateError> {
    let mut nodes = Vec::new();
    let mut literal: Vec<u8> = Vec::new();

    while *pos < bytes.len() {
        let ch = bytes[*pos];

        if ch == b'\\' && *pos + 1 < bytes.len() {
            let next = bytes[*pos + 1];
            if matches!(next, b'{' | b'}' | b'|' | b'\\') {
                literal.push(next);
                *pos += 2;
                continue;
            }
        }

        if in_choice && matches!(ch, b'|' | b'}') {
            flush_literal(&mut literal, &mut nodes);
            return Ok(nodes);
        }

        if ch == b'{' {
            flush_literal(&mut literal, &mut nodes);
            let opened_at = *pos;
            *pos += 1;
            nodes.push(parse_choice(bytes, pos, opened_at)?);
        } else {
            literal.push(ch);
            *pos += 1;
        }
    }

    flush_literal(&mut literal, &mut nodes);
    Ok(nodes)
}

/// Parse the alternatives of a choice whose `{` has just been consumed.
fn parse_choice(bytes: &[u8], pos: &mut usize, opened_at: usize) -> Result<Node, TemplateError> {
    let mut alternatives = Vec::new();

    loop {
        alternatives.push(parse_sequence(bytes, pos, true)?);

        if *pos >= bytes.len() {
            return Err(TemplateError::UnclosedGroup(opened_at));
        }

        let ch = bytes[*pos];
        *pos += 1;

        if ch == b'}' {
            break;
        }
    }

    Ok(Node::Choice(alternatives))
}

fn flush_literal(literal: &mut Vec<u8>, nodes: &mut Vec<Node>) {
    if !literal.is_empty() {
        // Splits only ever happen at ASCII metacharacters, so the
        // accumulated bytes are always valid UTF-8.
        let text = String::from_utf8_lossy(literal).into_owned();
        nodes.push(Node::Literal(text));
        literal.clear();
    }
}

/// Exact variant count of a node sequence: literals contribute a factor of 1,
/// choices contribute the sum of their alternatives' counts, and the sequence
/// total is the product of the factors. An empty sequence counts as 1.
pub fn count_variants(nodes: &[Node]) -> u128 {
    nodes.iter().fold(1u128, |acc, node| {
        let factor = match node {
            Node::Literal(_) => 1,
            Node::Choice(alts) => alts.iter().map(|alt| count_variants(alt)).sum(),
        };
        acc.saturating_mul(factor)
    })
}

/// log2 of a variant count.
pub fn entropy_bits(count: u128) -> f64 {
    (count as f64).log2()
}

/// Enumerate every variant of a node sequence, refusing to expand spaces
/// larger than `limit`.
pub fn expand(nodes: &[Node], limit: usize) -> Result<Vec<String>, TemplateError> {
    if count_variants(nodes) > limit as u128 {
        return Err(TemplateError::TooManyVariants { limit });
    }
    Ok(expand_unchecked(nodes))
}

fn expand_unchecked(nodes: &[Node]) -> Vec<String> {
    if nodes.is_empty() {
        return vec![String::new()];
    }

    let rest = expand_unchecked(&nodes[1..]);

    match &nodes[0] {
        Node::Literal(s) => rest.into_iter().map(|r| format!("{s}{r}")).collect(),
        Node::Choice(alts) => alts
            .iter()
            .flat_map(|alt| expand_unchecked(alt))
            .flat_map(|prefix| rest.iter().map(move |suffix| format!("{prefix}{suffix}")))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(template: &str) -> u128 {
        count_variants(&parse(template).unwrap())
    }

    #[test]
    fn plain_literal_is_one_variant() {
        assert_eq!(count("fix typo"), 1);
        assert_eq!(count(""), 1);
    }

    #[test]
    fn two_by_two_choice() {
        assert_eq!(count("{a|b}{c|d}"), 4);
        assert_eq!(count("{fix|Fix}: {typo|spelling} in README"), 4);
    }

    #[test]
    fn empty_alternative_counts() {
        assert_eq!(count("{|x}"), 2);
        assert_eq!(count("{|a |the }"), 3);
    }

    #[test]
    fn nested_choice() {
        assert_eq!(count("{a{x|y}|b}"), 3);
        assert_eq!(count("{{a|b}{c|d}|e}"), 5);
    }

    #[test]
    fn escaped_metacharacters_are_literal() {
        let nodes = parse(r"\{not a choice\|really\}").unwrap();
        assert_eq!(
            nodes,
            vec![Node::Literal("{not a choice|really}".to_string())]
        );
        assert_eq!(count_variants(&nodes), 1);
    }

    #[test]
    fn escaped_backslash() {
        let nodes = parse(r"a\\b").unwrap();
        assert_eq!(nodes, vec![Node::Literal(r"a\b".to_string())]);
    }

    #[test]
    fn trailing_backslash_is_literal() {
        let nodes = parse(r"abc\").unwrap();
        assert_eq!(nodes, vec![Node::Literal(r"abc\".to_string())]);
    }

    #[test]
    fn unclosed_group_is_rejected() {
        assert_eq!(parse("oops {a|b"), Err(TemplateError::UnclosedGroup(5)));
        assert_eq!(parse("{a|{b}"), Err(TemplateError::UnclosedGroup(0)));
    }

    #[test]
    fn stray_closers_outside_choice_are_literal() {
        let nodes = parse("a}b|c").unwrap();
        assert_eq!(nodes, vec![Node::Literal("a}b|c".to_string())]);
    }

    #[test]
    fn parse_structure() {
        let nodes = parse("x{a|}y").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Literal("x".to_string()),
                Node::Choice(vec![vec![Node::Literal("a".to_string())], vec![]]),
                Node::Literal("y".to_string()),
            ]
        );
    }

    #[test]
    fn unicode_literals_survive() {
        let nodes = parse("héllo {wörld|mond}").unwrap();
        assert_eq!(count_variants(&nodes), 2);
        let variants = expand(&nodes, 10).unwrap();
        assert!(variants.contains(&"héllo wörld".to_string()));
    }

    #[test]
    fn expand_matches_count() {
        for template in ["{a|b}{c|d}", "{|x}", "{a{x|y}|b}", "plain", "{fix|Fix}: {a|b|c}"] {
            let nodes = parse(template).unwrap();
            let variants = expand(&nodes, 1000).unwrap();
            assert_eq!(variants.len() as u128, count_variants(&nodes), "{template}");
            // No duplicates in these templates
            let unique: std::collections::HashSet<_> = variants.iter().collect();
            assert_eq!(unique.len(), variants.len(), "{template}");
        }
    }

    #[test]
    fn expand_enumerates_cartesian_product() {
        let nodes = parse("{a|b}-{1|2}").unwrap();
        let variants = expand(&nodes, 10).unwrap();
        assert_eq!(variants.len(), 4);
        for v in ["a-1", "a-2", "b-1", "b-2"] {
            assert!(variants.contains(&v.to_string()), "{v}");
        }
    }

    #[test]
    fn expand_refuses_past_limit() {
        let nodes = parse("{a|b}{c|d}{e|f}").unwrap();
        assert_eq!(
            expand(&nodes, 7),
            Err(TemplateError::TooManyVariants { limit: 7 })
        );
    }

    #[test]
    fn entropy_bits_of_power_of_two() {
        assert_eq!(entropy_bits(1), 0.0);
        assert_eq!(entropy_bits(4096), 12.0);
    }

    #[test]
    fn deep_nesting() {
        assert_eq!(count("{a|{b|{c|{d|e}}}}"), 5);
    }

    #[test]
    fn large_counts_do_not_wrap() {
        // 16 independent 10-way choices: 10^16 variants, well past u64 * u64
        // products that a naive u32 would truncate.
        let template = "{0|1|2|3|4|5|6|7|8|9}".repeat(16);
        assert_eq!(count(&template), 10u128.pow(16));
    }
}
