use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::model::{Article, normalize_tag};

/// Keys this system has ever written under default configuration. Used to
/// decide what "remove disabled properties" may delete.
const KNOWN_DEFAULT_KEYS: &[&str] = &[
    "url", "title", "author", "date", "published", "tags", "source",
];

/// Keys reserved by the host application. Written to when one of our fields
/// targets them (tags), but never removed.
const HOST_RESERVED_KEYS: &[&str] = &["tags", "aliases", "cssclasses"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyField {
    pub enabled: bool,
    pub name: String,
}

impl PropertyField {
    fn new(name: &str) -> Self {
        PropertyField {
            enabled: true,
            name: name.to_string(),
        }
    }
}

/// Per-field frontmatter configuration. `source` carries a static value
/// instead of one derived from the article.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertyConfig {
    pub url: PropertyField,
    pub title: PropertyField,
    pub author: PropertyField,
    pub date: PropertyField,
    pub published: PropertyField,
    pub tags: PropertyField,
    pub source: PropertyField,
    pub source_value: String,
}

impl Default for PropertyConfig {
    fn default() -> Self {
        PropertyConfig {
            url: PropertyField::new("url"),
            title: PropertyField::new("title"),
            author: PropertyField::new("author"),
            date: PropertyField::new("date"),
            published: PropertyField::new("published"),
            tags: PropertyField::new("tags"),
            source: PropertyField::new("source"),
            source_value: "instapaper".to_string(),
        }
    }
}

impl PropertyConfig {
    fn fields(&self) -> [&PropertyField; 7] {
        [
            &self.url,
            &self.title,
            &self.author,
            &self.date,
            &self.published,
            &self.tags,
            &self.source,
        ]
    }

    fn configured_names(&self) -> Vec<&str> {
        self.fields().iter().map(|f| f.name.as_str()).collect()
    }

    fn enabled_names(&self) -> Vec<&str> {
        self.fields()
            .iter()
            .filter(|f| f.enabled)
            .map(|f| f.name.as_str())
            .collect()
    }
}

/// A frontmatter entry holds the raw lines belonging to one key, so entries
/// we do not own round-trip byte-for-byte.
type Entries = IndexMap<String, Vec<String>>;

fn parse(text: &str) -> (Entries, &str) {
    let mut entries = Entries::new();
    let Some(rest) = text.strip_prefix("---\n") else {
        return (entries, text);
    };
    // An empty block closes immediately; a terminator at offset 0 has no
    // leading newline to find.
    let (block, body) = if let Some(stripped) = rest.strip_prefix("---\n") {
        ("", stripped)
    } else if let Some(end) = rest.find("\n---\n") {
        (&rest[..end], &rest[end + "\n---\n".len()..])
    } else {
        return (entries, text);
    };

    let mut current: Option<String> = None;
    for line in block.lines() {
        let is_continuation = line.starts_with(' ') || line.starts_with('-') || line.is_empty();
        if !is_continuation {
            if let Some(colon) = line.find(':') {
                let key = line[..colon].trim().to_string();
                entries.insert(key.clone(), vec![line.to_string()]);
                current = Some(key);
                continue;
            }
        }
        if let Some(key) = &current {
            entries[key].push(line.to_string());
        }
    }

    (entries, body)
}

fn serialize(entries: &Entries, body: &str) -> String {
    if entries.is_empty() {
        return body.to_string();
    }
    let mut out = String::from("---\n");
    for lines in entries.values() {
        for line in lines {
            out.push_str(line);
            out.push('\n');
        }
    }
    out.push_str("---\n");
    out.push_str(body);
    out
}

fn quote(value: &str) -> String {
    let needs_quoting = value.is_empty()
        || value.contains(": ")
        || value.ends_with(':')
        || value.contains(" #")
        || value.starts_with(' ')
        || value.ends_with(' ')
        || value.starts_with([
            '#', '[', ']', '{', '}', '&', '*', '!', '|', '>', '%', '@', '"', '\'', '-', '?',
        ]);
    if needs_quoting {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn scalar(key: &str, value: &str) -> Vec<String> {
    vec![format!("{}: {}", key, quote(value))]
}

fn list(key: &str, values: &[String]) -> Vec<String> {
    let mut lines = vec![format!("{}:", key)];
    for v in values {
        lines.push(format!("  - {}", quote(v)));
    }
    lines
}

fn date(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Writes or refreshes the article-derived metadata keys on a note's text,
/// returning the rewritten text. Ordering of existing entries is preserved;
/// new entries append. With `remove_disabled`, keys this system owns (known
/// defaults plus configured names) that are no longer enabled are dropped,
/// while host-reserved keys and unrecognized user keys are left alone.
pub fn apply_properties(
    text: &str,
    article: &Article,
    config: &PropertyConfig,
    remove_disabled: bool,
) -> String {
    let (mut entries, body) = parse(text);

    if remove_disabled {
        let enabled = config.enabled_names();
        let configured = config.configured_names();
        entries.retain(|key, _| {
            let owned = KNOWN_DEFAULT_KEYS.contains(&key.as_str())
                || configured.contains(&key.as_str());
            let reserved = HOST_RESERVED_KEYS.contains(&key.as_str());
            !owned || enabled.contains(&key.as_str()) || reserved
        });
    }

    if config.url.enabled {
        entries.insert(config.url.name.clone(), scalar(&config.url.name, &article.url));
    }
    if config.title.enabled {
        entries.insert(
            config.title.name.clone(),
            scalar(&config.title.name, &article.title),
        );
    }
    if config.author.enabled {
        if let Some(author) = &article.author {
            entries.insert(
                config.author.name.clone(),
                scalar(&config.author.name, author),
            );
        }
    }
    if config.date.enabled {
        entries.insert(
            config.date.name.clone(),
            scalar(&config.date.name, &date(article.saved_at)),
        );
    }
    if config.published.enabled {
        if let Some(published) = article.published_at {
            entries.insert(
                config.published.name.clone(),
                scalar(&config.published.name, &date(published)),
            );
        }
    }
    if config.tags.enabled && !article.tags.is_empty() {
        let tags: Vec<String> = article
            .tags
            .iter()
            .map(|t| normalize_tag(&t.name))
            .filter(|t| !t.is_empty())
            .collect();
        entries.insert(config.tags.name.clone(), list(&config.tags.name, &tags));
    }
    if config.source.enabled {
        entries.insert(
            config.source.name.clone(),
            scalar(&config.source.name, &config.source_value),
        );
    }

    serialize(&entries, body)
}
