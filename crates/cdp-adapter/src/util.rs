use anyhow::{anyhow, Result};
use chromiumoxide::async_process::Child;
use futures::io::{AsyncBufReadExt, BufReader};
use futures::stream::StreamExt;
use tokio::time::{timeout, Duration};

const STDERR_PREVIEW_LINES: usize = 8;

/// DevTools browser endpoint announced on a Chromium stderr line, if any.
pub fn devtools_url_from_line(line: &str) -> Option<&str> {
    let (_, tail) = line.rsplit_once("listening on ")?;
    let url = tail.trim();
    (url.starts_with("ws") && url.contains("devtools/browser")).then_some(url)
}

/// Read Chromium stderr until it announces its DevTools websocket URL.
pub async fn extract_ws_url(child: &mut Child) -> Result<String> {
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("chromium process has no stderr handle"))?;
    let mut lines = BufReader::new(stderr).lines();
    let mut preview: Vec<String> = Vec::new();

    let scan = async {
        while let Some(line) = lines.next().await {
            let line = line?;
            if let Some(url) = devtools_url_from_line(&line) {
                return Ok(url.to_string());
            }
            if preview.len() < STDERR_PREVIEW_LINES {
                preview.push(line);
            }
        }
        Err(anyhow!(
            "chromium exited without announcing a devtools url; stderr: {}",
            preview.join(" | ")
        ))
    };

    timeout(Duration::from_secs(20), scan)
        .await
        .map_err(|_| anyhow!("timed out waiting for the chromium devtools url"))?
}

#[cfg(test)]
mod tests {
    use super::devtools_url_from_line;

    #[test]
    fn picks_browser_endpoint_from_stderr() {
        let line = "DevTools listening on ws://127.0.0.1:9222/devtools/browser/abc-123";
        assert_eq!(
            devtools_url_from_line(line),
            Some("ws://127.0.0.1:9222/devtools/browser/abc-123")
        );
        assert_eq!(devtools_url_from_line("[WARNING] gpu process crashed"), None);
        assert_eq!(
            devtools_url_from_line("listening on http://127.0.0.1:9222/json"),
            None
        );
    }
}
