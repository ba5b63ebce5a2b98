//! Keywording for the search index: splits an entry name into the tokens
//! used as posting-list keys.
//!
//! The rule is deliberately simple and fixed: lower-case, then split on any
//! run of characters that isn't an ASCII letter or digit. Case folding is
//! part of keywording; accent stripping is not.

/// Split `name` into lower-cased keyword tokens. Empty tokens are dropped.
pub fn keywords_for(name: &str) -> Vec<String> {
    let lower = name.to_lowercase();
    lower
        .split(|c: char| !(c.is_ascii_alphanumeric()))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Split a user search query into keyword tokens using the same rule as
/// entry names, so that a query and the index it's matched against are
/// tokenized identically.
pub fn keywords_for_query(query: &str) -> Vec<String> {
    keywords_for(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_punctuation_and_whitespace() {
        assert_eq!(keywords_for("foo bar.txt"), vec!["foo", "bar", "txt"]);
        assert_eq!(keywords_for("Bar_Baz-99!"), vec!["bar", "baz", "99"]);
    }

    #[test]
    fn lowercases() {
        assert_eq!(keywords_for("SONG.OGG"), vec!["song", "ogg"]);
    }

    #[test]
    fn drops_empty_tokens() {
        assert_eq!(keywords_for("  ...  "), Vec::<String>::new());
    }

    #[test]
    fn query_and_name_tokenize_identically() {
        assert_eq!(keywords_for_query("bar"), keywords_for("foo bar.txt")[1..]);
    }
}
