//! Content sources for the detection stage: fetched pages and local text
//! files. Failures are per-source, logged and skipped, never fatal to the
//! batch.

use std::time::Duration;

use piiwatch_detect::SourceText;
use tracing::{info, warn};

use crate::config::SourcesConfig;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.36";

/// Gather text from every configured source.
pub async fn gather(
    cfg: &SourcesConfig,
    client: &reqwest::Client,
    fetch_delay: Duration,
) -> Vec<SourceText> {
    let group = cfg.group.clone().unwrap_or_else(|| "web-crawl".to_string());
    let mut out = Vec::new();

    for path in &cfg.files {
        match std::fs::read_to_string(path) {
            Ok(text) => out.push(SourceText {
                url: path.clone(),
                group: group.clone(),
                text,
            }),
            Err(err) => warn!(file = %path, error = %err, "skipping unreadable source file"),
        }
    }

    let total = cfg.urls.len();
    for (i, url) in cfg.urls.iter().enumerate() {
        match fetch_page(client, url).await {
            Ok(text) => {
                info!(url = %url, bytes = text.len(), "fetched page");
                out.push(SourceText {
                    url: url.clone(),
                    group: group.clone(),
                    text,
                });
            }
            Err(err) => warn!(url = %url, error = %err, "skipping unfetchable page"),
        }
        if i + 1 < total && !fetch_delay.is_zero() {
            tokio::time::sleep(fetch_delay).await;
        }
    }

    out
}

async fn fetch_page(client: &reqwest::Client, url: &str) -> anyhow::Result<String> {
    let resp = client
        .get(url)
        .header(reqwest::header::USER_AGENT, USER_AGENT)
        .send()
        .await?
        .error_for_status()?;
    let body = resp.text().await?;
    Ok(html_to_text(&body))
}

/// Reduce an HTML page to its visible text: script and style blocks go
/// away, tags become spaces, and the common entities are decoded. The
/// context window normalizes whitespace later, so no collapsing here.
fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut rest = html;
    while let Some(lt) = rest.find('<') {
        out.push_str(&rest[..lt]);
        rest = &rest[lt..];
        let lower = rest.to_ascii_lowercase();
        let skip_to = if lower.starts_with("<script") {
            Some("</script>")
        } else if lower.starts_with("<style") {
            Some("</style>")
        } else {
            None
        };
        if let Some(closer) = skip_to {
            match lower.find(closer) {
                Some(pos) => {
                    let after = pos + closer.len();
                    rest = &rest[after..];
                    out.push(' ');
                    continue;
                }
                None => break,
            }
        }
        match rest.find('>') {
            Some(gt) => {
                rest = &rest[gt + 1..];
                out.push(' ');
            }
            None => break,
        }
    }
    out.push_str(rest);
    decode_entities(&out)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_keeps_visible_text() {
        let html = "<html><body><p>contact <b>a@b.com</b> now</p></body></html>";
        let text = html_to_text(html);
        assert!(text.contains("contact"));
        assert!(text.contains("a@b.com"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn script_and_style_bodies_are_not_text() {
        let html = "<p>keep</p><script>var secret = 'a@b.com';</script><style>.x{}</style><p>also</p>";
        let text = html_to_text(html);
        assert!(text.contains("keep"));
        assert!(text.contains("also"));
        assert!(!text.contains("secret"));
    }

    #[test]
    fn entities_decode() {
        assert_eq!(decode_entities("a &amp; b&nbsp;&lt;x&gt;"), "a & b <x>");
    }

    #[tokio::test]
    async fn missing_file_is_skipped_not_fatal() {
        let cfg = SourcesConfig {
            files: vec!["definitely/not/here.txt".into()],
            ..Default::default()
        };
        let client = reqwest::Client::new();
        let sources = gather(&cfg, &client, Duration::ZERO).await;
        assert!(sources.is_empty());
    }
}
