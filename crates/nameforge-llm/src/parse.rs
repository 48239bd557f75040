//! Line parser shared by every adapter: turns model output into items.

use regex::Regex;
use std::sync::OnceLock;

use crate::GeneratedItem;

const MIN_NAME_CHARS: usize = 2;
const MAX_NAME_CHARS: usize = 10;

fn numbering() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+[.、)）]\s*").expect("numbering pattern is valid"))
}

fn label() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?i:姓名|name)\s*").expect("label pattern is valid"))
}

fn dash_split() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\s*[-–—]\s*(.+)$").expect("dash pattern is valid"))
}

/// Strips list numbering, a leading name label and stray colons.
fn clean_name(raw: &str) -> String {
    let name = numbering().replace(raw.trim(), "");
    let name = label().replace(name.trim(), "");
    name.replace(['：', ':'], "").trim().to_string()
}

fn accept(name: &str, meaning: &str) -> bool {
    let len = name.chars().count();
    !meaning.is_empty() && (MIN_NAME_CHARS..=MAX_NAME_CHARS).contains(&len)
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let separator = if line.contains('：') {
        Some('：')
    } else if line.contains(':') {
        Some(':')
    } else {
        None
    };

    if let Some(sep) = separator {
        if let Some((head, tail)) = line.split_once(sep) {
            let name = clean_name(head);
            let meaning = tail.trim();
            if accept(&name, meaning) {
                return Some((name, meaning.to_string()));
            }
        }
    }

    let caps = dash_split().captures(line)?;
    let name = clean_name(&caps[1]);
    let meaning = caps[2].trim();
    accept(&name, meaning).then(|| (name, meaning.to_string()))
}

/// Parses one item per recognizable line. Lines that match no shape are skipped.
pub fn parse_items(text: &str, source: &str) -> Vec<GeneratedItem> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(parse_line)
        .map(|(name, meaning)| GeneratedItem::new(name, meaning, source))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_numbered_colon_lines() {
        let items = parse_items("1. 林晚：傍晚林间的宁静\n2、苏映雪: 如映雪般纯净", "aliyun");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].content, "林晚");
        assert_eq!(items[0].meaning, "傍晚林间的宁静");
        assert_eq!(items[0].source, "aliyun");
        assert_eq!(items[1].content, "苏映雪");
    }

    #[test]
    fn parses_dash_lines() {
        let items = parse_items("3) 陈思远 - 思虑深远\n4）王雅 — 雅致高贵", "paiou");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].content, "陈思远");
        assert_eq!(items[0].meaning, "思虑深远");
        assert_eq!(items[1].content, "王雅");
        assert_eq!(items[1].meaning, "雅致高贵");
    }

    #[test]
    fn label_line_falls_through_to_dash() {
        // "姓名：" splits on the colon first and leaves an empty name.
        let items = parse_items("1. 姓名：李智 - 智慧超群", "x");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "李智");
        assert_eq!(items[0].meaning, "智慧超群");
    }

    #[test]
    fn english_label_and_names() {
        let items = parse_items("Name: Aldric - old ruler\n2. Elowen: elm tree", "openai");
        assert_eq!(items[0].content, "Aldric");
        assert_eq!(items[0].meaning, "old ruler");
        assert_eq!(items[1].content, "Elowen");
    }

    #[test]
    fn rejects_out_of_range_names_and_noise() {
        let text = "\n以下是为您生成的名字\n李：太短\n这是一个非常非常长的名字啊啊：含义\n王五：\n";
        assert!(parse_items(text, "x").is_empty());
    }

    #[test]
    fn name_length_counts_characters_not_bytes() {
        // Ten CJK characters are 30 bytes but still acceptable.
        let items = parse_items("一二三四五六七八九十：含义", "x");
        assert_eq!(items.len(), 1);
    }
}
