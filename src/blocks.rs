//! Fenced block protocol embedded in model output.
//!
//! A block opens with ```` ```<tag> ```` and closes with the next ```` ``` ````.
//! The first line of a multi-line block may carry a `label:path` directive
//! naming a file the block contents should be persisted to.

use std::sync::OnceLock;

use regex::{Captures, Regex};

pub const CLOSING_FENCE: &str = "```";

/// Blocks collected for one tag, in order of appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSet {
    pub blocks: Vec<String>,
    /// Last save path declared by any block of the set.
    pub save_path: Option<String>,
}

impl BlockSet {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }
}

/// Extract every ```` ```<tag> ```` block from `text`.
///
/// Returns `None` when the opening marker never occurs, which callers treat as
/// "nothing for this tool". An opening marker without a closing fence ends the
/// scan; blocks collected before it are kept.
pub fn extract_blocks(text: &str, tag: &str) -> Option<BlockSet> {
    let opening = format!("{CLOSING_FENCE}{tag}");
    if !text.contains(&opening) {
        return None;
    }

    let mut set = BlockSet::default();
    let mut cursor = 0;
    while let Some(found) = text[cursor..].find(&opening) {
        let body_start = cursor + found + opening.len();
        let Some(close) = text[body_start..].find(CLOSING_FENCE) else {
            break;
        };
        let body_end = body_start + close;
        let content = text[body_start..body_end].trim();

        match split_directive(content) {
            Some((save_path, rest)) => {
                set.save_path = Some(save_path);
                set.blocks.push(rest.to_string());
            }
            None => set.blocks.push(content.to_string()),
        }

        cursor = body_end + CLOSING_FENCE.len();
    }
    Some(set)
}

/// Split a leading `name:value` directive line off a block body.
///
/// The directive name may not contain whitespace, so command lines such as
/// `curl http://host` are left alone. A bare `out.txt:` names the path itself.
fn split_directive(content: &str) -> Option<(String, &str)> {
    let (first_line, rest) = content.split_once('\n')?;
    let (name, value) = first_line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return None;
    }
    let value = value.trim();
    // `scheme://...` lines are URLs, not save targets.
    if value.starts_with("//") {
        return None;
    }
    let path = if value.is_empty() { name } else { value };
    Some((path.to_string(), rest.trim()))
}

/// Look up a `key=value` parameter line inside a block.
pub fn parameter_value<'a>(block: &'a str, key: &str) -> Option<&'a str> {
    block.trim().lines().find_map(|line| {
        let (candidate, value) = line.trim().split_once('=')?;
        (candidate.trim() == key).then(|| value.trim())
    })
}

fn block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)```.*?\n.*?\n```").expect("valid block regex"))
}

/// Replace every fenced block with a `block:<n>` placeholder, numbered in order.
pub fn replace_blocks_with_placeholders(text: &str) -> String {
    let mut index = 0usize;
    block_pattern()
        .replace_all(text, |_: &Captures| {
            let placeholder = format!("block:{index}");
            index += 1;
            placeholder
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_block() {
        let text = "Listing files now.\n```bash\nls -la\n```\nDone.";
        let set = extract_blocks(text, "bash").unwrap();
        assert_eq!(set.blocks, vec!["ls -la"]);
        assert_eq!(set.save_path, None);
    }

    #[test]
    fn missing_tag_is_none() {
        assert_eq!(extract_blocks("```python\nprint(1)\n```", "bash"), None);
        assert_eq!(extract_blocks("no fences at all", "web_search"), None);
    }

    #[test]
    fn directive_sets_save_path_and_is_stripped() {
        let text = "```bash\nout.txt:\necho hello\n```";
        let set = extract_blocks(text, "bash").unwrap();
        assert_eq!(set.blocks, vec!["echo hello"]);
        assert_eq!(set.save_path.as_deref(), Some("out.txt"));

        let labelled = "```bash\nscript:scans/run.sh\nnmap -sV host\n```";
        let set = extract_blocks(labelled, "bash").unwrap();
        assert_eq!(set.blocks, vec!["nmap -sV host"]);
        assert_eq!(set.save_path.as_deref(), Some("scans/run.sh"));
    }

    #[test]
    fn command_lines_with_colons_are_not_directives() {
        let text = "```bash\ncurl http://10.0.0.5:8080/\nls\n```";
        let set = extract_blocks(text, "bash").unwrap();
        assert_eq!(set.blocks, vec!["curl http://10.0.0.5:8080/\nls"]);
        assert_eq!(set.save_path, None);
    }

    #[test]
    fn single_line_block_is_always_a_command() {
        let set = extract_blocks("```bash\nsave: out.sh\n```", "bash").unwrap();
        assert_eq!(set.blocks, vec!["save: out.sh"]);
        assert_eq!(set.save_path, None);
    }

    #[test]
    fn url_first_line_is_not_a_directive() {
        let text = "```web_search\nhttps://nvd.nist.gov/vuln\nCVE-2023-1234 details\n```";
        let set = extract_blocks(text, "web_search").unwrap();
        assert_eq!(set.blocks, vec!["https://nvd.nist.gov/vuln\nCVE-2023-1234 details"]);
        assert_eq!(set.save_path, None);
    }

    #[test]
    fn last_save_path_wins_and_order_is_kept() {
        let text = "```bash\na.txt:\necho a\n```\ntext\n```bash\nb.txt:\necho b\n```";
        let set = extract_blocks(text, "bash").unwrap();
        assert_eq!(set.blocks, vec!["echo a", "echo b"]);
        assert_eq!(set.save_path.as_deref(), Some("b.txt"));
    }

    #[test]
    fn closing_fence_is_not_reused_across_tags() {
        let text = "```bash\nls\n```\n```web_search\nrust news\n```";
        assert_eq!(extract_blocks(text, "bash").unwrap().blocks, vec!["ls"]);
        assert_eq!(
            extract_blocks(text, "web_search").unwrap().blocks,
            vec!["rust news"]
        );
    }

    #[test]
    fn unterminated_block_stops_collection() {
        let text = "```bash\nwhoami\n```\n```bash\nid";
        let set = extract_blocks(text, "bash").unwrap();
        assert_eq!(set.blocks, vec!["whoami"]);

        let only_open = extract_blocks("```bash\nid", "bash").unwrap();
        assert!(only_open.is_empty());
    }

    #[test]
    fn reads_parameters() {
        let block = "action=read\n  name = notes.txt\n";
        assert_eq!(parameter_value(block, "action"), Some("read"));
        assert_eq!(parameter_value(block, "name"), Some("notes.txt"));
        assert_eq!(parameter_value(block, "mode"), None);
    }

    #[test]
    fn placeholders_follow_appearance_order() {
        let text = "First:\n```bash\nls\n```\nThen:\n```file_finder\nname=a\n```";
        assert_eq!(
            replace_blocks_with_placeholders(text),
            "First:\nblock:0\nThen:\nblock:1"
        );
    }
}
