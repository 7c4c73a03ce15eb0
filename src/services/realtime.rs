use std::time::Duration;

use chrono::Utc;
use isahc::{config::Configurable, AsyncReadResponseExt, HttpClient, Request};
use rand::seq::SliceRandom;
use regex::Regex;
use tracing::debug;

use crate::models::Quote;

// Note: upstream endpoints are free quote pages; none offer authentication.

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.3 Safari/605.1.15",
];

/// How many distinct upstream quote sources the rotation covers.
pub const SOURCE_COUNT: u64 = 3;

fn user_agent() -> &'static str {
    USER_AGENTS.choose(&mut rand::thread_rng()).copied().unwrap_or(USER_AGENTS[0])
}

fn build_client(proxy: Option<&str>, timeout: Duration) -> Option<HttpClient> {
    let mut builder = HttpClient::builder().timeout(timeout);
    if let Some(proxy_url) = proxy {
        let uri: isahc::http::Uri = proxy_url.parse().ok()?;
        builder = builder.proxy(Some(uri));
    }
    builder.build().ok()
}

async fn get_text(
    client: &HttpClient,
    url: &str,
    referer: Option<&str>,
) -> Option<String> {
    let mut request = Request::get(url).header("User-Agent", user_agent());
    if let Some(referer) = referer {
        request = request.header("Referer", referer);
    }
    let request = request.body(()).ok()?;
    let mut response = client.send_async(request).await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.text().await.ok()
}

/// Fetch one realtime quote for `code`, rotating upstream sources by
/// `source_index`, optionally through a proxy. Any network or parse failure
/// yields `None`; the caller decides whether and when to retry.
pub async fn fetch(
    code: u32,
    source_index: u64,
    proxy: Option<&str>,
    timeout: Duration,
) -> Option<Quote> {
    let client = build_client(proxy, timeout)?;
    let quote = match source_index % SOURCE_COUNT {
        0 => fetch_xml_source(&client, code).await,
        1 => fetch_tilde_source(&client, code).await,
        _ => fetch_comma_source(&client, code).await,
    };
    if quote.is_none() {
        debug!(code, source = source_index % SOURCE_COUNT, "fetch failed");
    }
    quote
}

fn xml_field(body: &str, tag: &str) -> Option<String> {
    // The quote payload is a flat XML document; a tag-scoped capture is all
    // the structure we need from it.
    let re = Regex::new(&format!("<{t}>([^<]*)</{t}>", t = regex::escape(tag))).ok()?;
    Some(re.captures(body)?.get(1)?.as_str().to_string())
}

/// Source 0: XML quote document with open/high/low/price/volume elements.
/// "null" open/high/low fields fall back to the traded price.
async fn fetch_xml_source(client: &HttpClient, code: u32) -> Option<Quote> {
    let url = format!(
        "http://money18.on.cc/securityQuote/genStockXML.php?stockcode={}",
        code
    );
    let body = get_text(client, &url, Some("http://money18.on.cc/")).await?;
    let price: f64 = xml_field(&body, "price")?.parse().ok()?;
    let volume: f64 = xml_field(&body, "volume")?.parse().ok()?;
    let field_or_price = |tag: &str| -> Option<f64> {
        let raw = xml_field(&body, tag)?;
        if raw == "null" {
            Some(price)
        } else {
            raw.parse().ok()
        }
    };
    Some(Quote {
        code,
        timestamp: now_epoch(),
        open: field_or_price("open")?,
        high: field_or_price("high")?,
        low: field_or_price("low")?,
        last: price,
        volume,
    })
}

/// Source 1: single-line payload with `~`-delimited fields.
async fn fetch_tilde_source(client: &HttpClient, code: u32) -> Option<Quote> {
    let url = format!("http://qt.gtimg.cn/q=r_hk{:05}", code);
    let body = get_text(client, &url, None).await?;
    let tokens: Vec<&str> = body.split('~').collect();
    Some(Quote {
        code,
        timestamp: now_epoch(),
        open: tokens.get(5)?.parse().ok()?,
        high: tokens.get(33)?.parse().ok()?,
        low: tokens.get(34)?.parse().ok()?,
        last: tokens.get(3)?.parse().ok()?,
        volume: tokens.get(36)?.parse().ok()?,
    })
}

/// Source 2: single-line payload with `,`-delimited fields.
async fn fetch_comma_source(client: &HttpClient, code: u32) -> Option<Quote> {
    let url = format!("http://hq.sinajs.cn/?list=rt_hk{:05}", code);
    let referer = format!(
        "http://stock.finance.sina.com.cn/hkstock/quotes/{:05}.html",
        code
    );
    let body = get_text(client, &url, Some(&referer)).await?;
    let tokens: Vec<&str> = body.split(',').collect();
    Some(Quote {
        code,
        timestamp: now_epoch(),
        open: tokens.get(2)?.parse().ok()?,
        high: tokens.get(4)?.parse().ok()?,
        low: tokens.get(5)?.parse().ok()?,
        last: tokens.get(6)?.parse().ok()?,
        volume: tokens.get(12)?.parse().ok()?,
    })
}

fn now_epoch() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + now.timestamp_subsec_micros() as f64 * 1e-6
}
