use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// `[[target]]` or `[[target|display]]`; brackets are not allowed inside
static WIKI_LINK: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\[\[([^\[\]]+?)\]\]").ok());

/// Extract the set of wiki link targets from note text.
///
/// The target is the text before the first `|`, trimmed. Empty targets are dropped.
pub fn extract_links(text: &str) -> BTreeSet<String> {
    let Some(re) = WIKI_LINK.as_ref() else {
        return BTreeSet::new();
    };
    re.captures_iter(text)
        .filter_map(|caps| {
            let inner = caps.get(1)?.as_str();
            let target = inner.split('|').next().unwrap_or(inner).trim();
            (!target.is_empty()).then(|| target.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dedup_and_alias() {
        assert_eq!(extract_links("[[a]] [[b|B]] [[a]]"), set(&["a", "b"]));
    }

    #[test]
    fn test_no_links() {
        assert!(extract_links("plain text with [single] brackets").is_empty());
    }

    #[test]
    fn test_nested_paths_and_whitespace() {
        let text = "See [[ projects/alpha | Alpha ]] and [[daily/2024-01-01]].\n[[|empty]]";
        assert_eq!(
            extract_links(text),
            set(&["daily/2024-01-01", "projects/alpha"])
        );
    }

    #[test]
    fn test_embed_syntax_counts_as_link() {
        assert_eq!(extract_links("![[diagram.png]]"), set(&["diagram.png"]));
    }
}
