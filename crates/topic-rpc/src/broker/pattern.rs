// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic routing-key matching.
//!
//! Keys and patterns are dot-separated words. In a pattern `*` matches
//! exactly one word and `#` matches zero or more words.

/// Check if `routing_key` matches the binding `pattern`.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern = split_words(pattern);
    let key = split_words(routing_key);
    match_words(&pattern, &key)
}

/// A pattern is valid when wildcards only appear as whole words.
pub fn is_valid_pattern(pattern: &str) -> bool {
    split_words(pattern)
        .iter()
        .all(|word| matches!(*word, "*" | "#") || !word.contains(['*', '#']))
}

fn split_words(s: &str) -> Vec<&str> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split('.').collect()
    }
}

/// `reachable[j]` holds when the pattern words seen so far match exactly the
/// first `j` key words.
fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    let mut reachable = vec![false; key.len() + 1];
    reachable[0] = true;

    for word in pattern {
        let mut next = vec![false; key.len() + 1];
        match *word {
            "#" => {
                let mut any = false;
                for (slot, &prev) in next.iter_mut().zip(&reachable) {
                    any |= prev;
                    *slot = any;
                }
            }
            "*" => {
                for (slot, &prev) in next[1..].iter_mut().zip(&reachable) {
                    *slot = prev;
                }
            }
            literal => {
                for ((slot, &prev), key_word) in next[1..].iter_mut().zip(&reachable).zip(key) {
                    *slot = prev && *key_word == literal;
                }
            }
        }
        reachable = next;
    }

    reachable[key.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact() {
        assert!(topic_matches("testRoutingKey", "testRoutingKey"));
        assert!(!topic_matches("testRoutingKey", "testRoutingKey.15"));
        assert!(topic_matches("", ""));
        assert!(!topic_matches("", "a"));
    }

    #[test]
    fn test_star_matches_one_word() {
        assert!(topic_matches("*.15", "testRoutingKey.15"));
        assert!(!topic_matches("*.15", "15"));
        assert!(!topic_matches("*.15", "a.b.15"));
        assert!(topic_matches("a.*.c", "a.b.c"));
        assert!(!topic_matches("a.*.c", "a.c"));
    }

    #[test]
    fn test_hash_matches_zero_or_more() {
        assert!(topic_matches("#", ""));
        assert!(topic_matches("#", "a.b.c"));
        assert!(topic_matches("a.#", "a"));
        assert!(topic_matches("a.#", "a.b.c"));
        assert!(!topic_matches("a.#", "b.a"));
        assert!(topic_matches("#.c", "a.b.c"));
        assert!(topic_matches("a.#.c", "a.c"));
        assert!(topic_matches("a.#.c", "a.x.y.c"));
        assert!(topic_matches("#.*", "a"));
        assert!(!topic_matches("#.*", ""));
    }

    #[test]
    fn test_many_hash_words_on_long_key() {
        let pattern = vec!["#"; 40].join(".") + ".z";
        let key = vec!["a"; 60].join(".");
        assert!(!topic_matches(&pattern, &key));
        assert!(topic_matches(&pattern, &(key + ".z")));
        assert!(topic_matches("#.#.a.#", "x.a"));
    }

    #[test]
    fn test_pattern_validation() {
        assert!(is_valid_pattern("*.15"));
        assert!(is_valid_pattern("a.#"));
        assert!(is_valid_pattern("plain"));
        assert!(!is_valid_pattern("a*.b"));
        assert!(!is_valid_pattern("a.b#"));
    }
}
