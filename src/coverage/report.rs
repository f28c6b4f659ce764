//! Serializes the ledger to `ccov-info.json` and substitutes it into an HTML
//! template (SPEC_FULL.md §4.F).

use crate::coverage::Ledger;
use crate::error::Result;
use std::fs;
use std::path::Path;

const SUBSTITUTION_TOKEN: &str = "m_coverage_info";

/// Serialize `ledger` as pretty JSON to `path`.
pub fn write_json(ledger: &Ledger, path: &Path) -> Result<()> {
    let body = serde_json::to_string_pretty(ledger)?;
    fs::write(path, body)?;
    Ok(())
}

/// Replace the sole occurrence of `m_coverage_info` in `template_path` with
/// `ledger`'s JSON and write the result to `out_path`.
///
/// A missing template or a template without the token is logged as a
/// warning and treated as a no-op, not an error: the JSON report is the
/// source of truth and the HTML view is best-effort (SPEC_FULL.md §7).
pub fn write_html(ledger: &Ledger, template_path: &Path, out_path: &Path) -> Result<()> {
    let template = match fs::read_to_string(template_path) {
        Ok(t) => t,
        Err(e) => {
            log::warn!(target: "report", "{} not found, skipping index.html output: {e}", template_path.display());
            return Ok(());
        }
    };

    let Some(token_index) = template.find(SUBSTITUTION_TOKEN) else {
        log::warn!(
            target: "report",
            "{} does not contain the {SUBSTITUTION_TOKEN} token, skipping index.html output",
            template_path.display()
        );
        return Ok(());
    };

    let body = serde_json::to_string(ledger)?;
    let mut html = String::with_capacity(template.len() + body.len());
    html.push_str(&template[..token_index]);
    html.push_str(&body);
    html.push_str(&template[token_index + SUBSTITUTION_TOKEN.len()..]);

    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(out_path, html)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::CoveredFile;
    use std::path::PathBuf;

    fn sample_ledger() -> Ledger {
        Ledger {
            run: 1000,
            files: vec![CoveredFile {
                path: PathBuf::from("/proj/foo.c"),
                relative_path: PathBuf::from("foo.c"),
                lines: vec![],
                total_lines: 0,
                total_relevant_lines: 0,
                relevant_lines_hit: 0,
                average_hits_per_line: 0.0,
                total_hits: 0,
                last_hit: 0,
                coverage: 0.0,
            }],
            hits: serde_json::Map::new(),
        }
    }

    #[test]
    fn write_json_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ccov-info.json");
        let ledger = sample_ledger();

        write_json(&ledger, &path).unwrap();
        let parsed: Ledger = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.run, ledger.run);
        assert_eq!(parsed.files[0].relative_path, ledger.files[0].relative_path);
    }

    #[test]
    fn write_html_substitutes_token() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("index.template.html");
        let out_path = dir.path().join("index.html");
        fs::write(&template_path, "<html>m_coverage_info</html>").unwrap();

        write_html(&sample_ledger(), &template_path, &out_path).unwrap();
        let html = fs::read_to_string(&out_path).unwrap();
        assert!(html.starts_with("<html>"));
        assert!(html.ends_with("</html>"));
        assert!(html.contains("\"run\":1000"));
    }

    #[test]
    fn write_html_skips_missing_template_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("absent.html");
        let out_path = dir.path().join("index.html");

        write_html(&sample_ledger(), &template_path, &out_path).unwrap();
        assert!(!out_path.exists());
    }

    #[test]
    fn write_html_skips_template_without_token() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("index.template.html");
        let out_path = dir.path().join("index.html");
        fs::write(&template_path, "<html>no token here</html>").unwrap();

        write_html(&sample_ledger(), &template_path, &out_path).unwrap();
        assert!(!out_path.exists());
    }
}
