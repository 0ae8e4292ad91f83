use crate::model::Highlight;

/// Template used to render new highlights when the user has not configured
/// one. `{?note}...{/note}` is kept only when the highlight carries a note.
pub const DEFAULT_TEMPLATE: &str =
    "{text}\n\n{?note}**Note:** {note}\n\n{/note}[View highlight]({link}) {blockId}";

/// Prefix every line of the highlight text so it reads as a block quote.
fn block_quote(text: &str) -> String {
    text.lines()
        .map(|line| format!("> {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Resolves `{?note}...{/note}` sections: the enclosed text is kept when the
/// highlight has a note and dropped otherwise. An unterminated opener is
/// left verbatim rather than guessed at.
fn apply_note_sections(template: &str, has_note: bool) -> String {
    const OPEN: &str = "{?note}";
    const CLOSE: &str = "{/note}";

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        match after.find(CLOSE) {
            Some(end) => {
                if has_note {
                    out.push_str(&after[..end]);
                }
                rest = &after[end + CLOSE.len()..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Renders a highlight through the given template.
///
/// Guarantees the output carries a dedup anchor: if the user's template drops
/// both `{link}` and `{blockId}`, the block id is forcibly appended so every
/// rendered block stays recognizable on later runs. Output is right-trimmed
/// and suffixed with exactly two newlines, which keeps spacing between
/// consecutively appended blocks consistent.
pub fn render(highlight: &Highlight, template: &str) -> String {
    let link = highlight.link();
    let block_id = highlight.block_id();
    let note = highlight.note.as_deref().unwrap_or("").trim();

    let mut out = apply_note_sections(template, highlight.has_note())
        .replace("{text}", &block_quote(&highlight.text))
        .replace("{link}", &link)
        .replace("{blockId}", &block_id)
        .replace("{note}", note);

    if !out.contains(&link) && !out.contains(&block_id) {
        out = format!("{} {}", out.trim_end(), block_id);
    }

    format!("{}\n\n", out.trim_end())
}

/// The fixed rendering used before templates existed. Byte-stable: files
/// written by old versions are migrated by matching this output verbatim.
pub fn render_legacy(highlight: &Highlight) -> String {
    format!(
        "{}\n\n🔗 {}\n\n",
        block_quote(&highlight.text),
        highlight.link()
    )
}

/// True iff the file already contains this highlight, judged purely by
/// substring: the block-id literal or the permalink literal. Files created
/// before block ids existed only carry the link, hence the dual check. No
/// structural parsing, since users edit freely around rendered blocks.
pub fn already_present(file_text: &str, highlight: &Highlight) -> bool {
    file_text.contains(&highlight.block_id()) || file_text.contains(&highlight.link())
}
