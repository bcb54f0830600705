// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device-side probes over the printer's embedded HTTP endpoint.
//
// Reachability is a bare HEAD; many devices answer it with 405, which still
// proves the box is alive. The paper level comes from the device status
// page, which renders the input-tray report as flat <font> runs of
// key=value text rather than anything structured.

use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// HEAD the device endpoint; any HTTP answer counts as reachable.
///
/// Only transport failures (refused, unroutable, timeout) mean offline —
/// `405 Method Not Allowed` in particular is a healthy device.
pub async fn probe_reachable(client: &reqwest::Client, ipp: &str) -> bool {
    match client.head(ipp).send().await {
        Ok(response) => {
            debug!(url = ipp, status = %response.status(), "probe answered");
            true
        }
        Err(e) => {
            debug!(url = ipp, %e, "probe failed");
            false
        }
    }
}

/// Fetch the device status page and parse the primary cassette fill level.
///
/// Returns `None` on any transport or parse failure; the aggregator treats
/// absence as "unknown", never as an error.
pub async fn paper_pct(client: &reqwest::Client, ipp: &str) -> Option<u8> {
    let url = device_page_url(ipp)?;
    let response = match client.get(url.clone()).send().await {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            warn!(%url, status = %r.status(), "tray page unavailable");
            return None;
        }
        Err(e) => {
            warn!(%url, %e, "tray page fetch failed");
            return None;
        }
    };
    let html = response.text().await.ok()?;
    parse_paper_percentage(&html)
}

/// Root page of the device web server hosting the IPP endpoint.
///
/// The embedded pages are served over plain HTTP on the IPP port, so the
/// URL is rebuilt from host and port alone.
fn device_page_url(ipp: &str) -> Option<reqwest::Url> {
    let url = reqwest::Url::parse(ipp).ok()?;
    let host = url.host_str()?;
    let port = url.port().unwrap_or(631);
    reqwest::Url::parse(&format!("http://{host}:{port}/")).ok()
}

/// Parse the input-tray report out of the device status page.
///
/// The report is one `<br>`-delimited line following the literal
/// `printer-input-tray:` label, holding one `<font>` run per tray with
/// `level=`/`maxcapacity=` pairs. The primary cassette is the tray whose
/// text mentions `Cassette`; the result is floor(level / maxcapacity * 100).
pub fn parse_paper_percentage(html: &str) -> Option<u8> {
    static LEVEL: OnceLock<Regex> = OnceLock::new();
    static MAXCAP: OnceLock<Regex> = OnceLock::new();
    let level_re = LEVEL.get_or_init(|| Regex::new(r"level=(\d+)").unwrap());
    let maxcap_re = MAXCAP.get_or_init(|| Regex::new(r"maxcapacity=(\d+)").unwrap());

    let start = html.find("printer-input-tray:")?;
    let section = &html[start..];
    let section = match section.find("<br") {
        Some(end) => &section[..end],
        None => section,
    };

    for chunk in section.split("<font") {
        if !chunk.contains("Cassette") {
            continue;
        }
        let level: u64 = level_re.captures(chunk)?.get(1)?.as_str().parse().ok()?;
        let maxcapacity: u64 = maxcap_re.captures(chunk)?.get(1)?.as_str().parse().ok()?;
        if maxcapacity == 0 {
            return None;
        }
        return Some(((level * 100) / maxcapacity).min(100) as u8);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRAY_PAGE: &str = concat!(
        "<html><body>printer-state-reasons: none<br>\n",
        "<font>printer-input-tray:</font> ",
        "<font>type=other, level=-2, name=ByPassTray;</font> ",
        "<font>type=sheetFeedAutoRemovableTray, dimunit=micrometers, ",
        "mediafeed=297000, mediaxfeed=210000, maxcapacity=250, level=175, ",
        "status=0, name=Cassette 1;</font><br>\n",
        "printer-output-tray: ...<br></body></html>",
    );

    #[test]
    fn parses_cassette_level() {
        assert_eq!(parse_paper_percentage(TRAY_PAGE), Some(70));
    }

    #[test]
    fn percentage_is_floored() {
        let html = "printer-input-tray: <font>maxcapacity=3, level=2, name=Cassette;</font><br>";
        // 2/3 = 66.67 -> 66
        assert_eq!(parse_paper_percentage(html), Some(66));
    }

    #[test]
    fn missing_tray_section_is_none() {
        assert_eq!(parse_paper_percentage("<html>no trays here</html>"), None);
    }

    #[test]
    fn missing_cassette_is_none() {
        let html = "printer-input-tray: <font>maxcapacity=100, level=50, name=ByPassTray;</font><br>";
        assert_eq!(parse_paper_percentage(html), None);
    }

    #[test]
    fn zero_capacity_is_none() {
        let html = "printer-input-tray: <font>maxcapacity=0, level=0, name=Cassette;</font><br>";
        assert_eq!(parse_paper_percentage(html), None);
    }

    #[test]
    fn report_past_line_break_is_ignored() {
        let html = concat!(
            "printer-input-tray: <font>name=ByPassTray, level=1, maxcapacity=1;</font><br>",
            "<font>level=9, maxcapacity=10, name=Cassette;</font>",
        );
        // The cassette sits after the <br>, outside the tray report line.
        assert_eq!(parse_paper_percentage(html), None);
    }

    #[test]
    fn device_page_url_strips_path() {
        let url = device_page_url("http://10.0.0.10:631/ipp/print").unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.10:631/");
    }

    #[test]
    fn ipp_scheme_becomes_http_on_the_same_port() {
        let url = device_page_url("ipp://10.0.0.10/ipp/print").unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.10:631/");
    }
}
