use serde::Deserialize;
use serde_json::Value;

use crate::error::CapabilityError;

#[derive(Debug, Default, Deserialize)]
struct PageLayout {
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Default, Deserialize)]
struct Page {
    #[serde(default)]
    lines: Vec<Line>,
}

#[derive(Debug, Default, Deserialize)]
struct Line {
    #[serde(default)]
    content: String,
}

/// Joins the recognised lines of each page with `\n`, and the pages with a
/// blank line between them.
pub fn flatten_text(result: &Value) -> Result<String, CapabilityError> {
    let layout = PageLayout::deserialize(result).map_err(|e| CapabilityError::InvalidResult {
        operation: "analyze".to_string(),
        message: format!("unexpected page layout: {}", e),
    })?;

    Ok(layout
        .pages
        .iter()
        .map(|page| {
            page.lines
                .iter()
                .map(|line| line.content.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n"))
}
