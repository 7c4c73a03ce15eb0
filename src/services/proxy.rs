use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::time::Duration;

use isahc::{config::Configurable, AsyncReadResponseExt, HttpClient};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::services::pool::TaskPool;
use crate::services::realtime;

/// Discovers proxy endpoints by crawling listing pages and keeps only those
/// that survive a strict health check. `None` (direct connection) is always a
/// valid fallback and never appears in the managed list.
pub struct ProxyManager {
    config: ProxyConfig,
}

impl ProxyManager {
    pub fn new(config: ProxyConfig) -> Self {
        ProxyManager { config }
    }

    /// Load the persisted endpoint list. A missing or unreadable file is a
    /// soft failure: discovery can always rebuild the list.
    pub fn load_persisted(&self) -> Vec<String> {
        let Some(path) = &self.config.file else {
            return Vec::new();
        };
        match std::fs::read_to_string(path) {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(String::from)
                .collect(),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no persisted proxy list");
                Vec::new()
            }
        }
    }

    /// Persist `endpoints` unioned with whatever was already on disk.
    pub fn persist_union(&self, endpoints: &[String]) -> Result<Vec<String>> {
        let Some(path) = &self.config.file else {
            return Err(Error::Config("proxy.file is not configured".to_string()));
        };
        let mut merged: HashSet<String> = self.load_persisted().into_iter().collect();
        merged.extend(endpoints.iter().cloned());
        let mut merged: Vec<String> = merged.into_iter().collect();
        merged.sort();
        write_lines(path, &merged)?;
        Ok(merged)
    }

    /// Breadth-first crawl for candidate endpoints, bounded by
    /// `link_budget` successfully visited pages. Cycles in the link graph are
    /// harmless: a visited-set prevents revisits, and the budget caps the
    /// walk regardless.
    pub async fn crawl(&self) -> Vec<String> {
        let client = match HttpClient::builder().timeout(Duration::from_secs(20)).build() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "cannot build crawl client");
                return Vec::new();
            }
        };

        let mut found: HashSet<String> = HashSet::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut frontier: VecDeque<String> = self.config.seed_sites.iter().cloned().collect();

        while let Some(url) = frontier.pop_front() {
            if visited.len() >= self.config.link_budget {
                break;
            }
            if visited.contains(&url) {
                continue;
            }
            let body = match fetch_page(&client, &url).await {
                Some(body) => body,
                None => continue,
            };
            info!(url = %url, "crawled proxy page");
            visited.insert(url);

            for endpoint in page_endpoints(&body) {
                found.insert(endpoint);
            }
            for link in page_links(&body, &self.config.allow_domains) {
                frontier.push_back(link);
            }
        }

        let mut found: Vec<String> = found.into_iter().collect();
        found.sort();
        info!(candidates = found.len(), pages = visited.len(), "proxy crawl finished");
        found
    }

    /// Health-check candidates with bounded parallelism. A proxy is retained
    /// only if every one of `check_tries` sequential probe fetches succeeds.
    /// Ctrl-C returns the subset validated so far instead of discarding it.
    pub async fn check_proxies(&self, candidates: Vec<String>, workers: usize) -> Vec<String> {
        let tries = self.config.check_tries.max(1);
        let timeout = Duration::from_secs(self.config.check_timeout_secs.max(1));
        let probe = self.config.probe_code;

        let mut pool: TaskPool<Option<String>> = TaskPool::new(workers);
        let total = candidates.len();
        for proxy in candidates {
            pool.submit(check_one(proxy, probe, tries, timeout));
        }

        let mut validated = Vec::new();
        let mut drained = 0usize;
        while drained < total {
            tokio::select! {
                result = pool.recv() => {
                    let Some(result) = result else { break };
                    drained += 1;
                    if let Some(proxy) = result {
                        info!(proxy = %proxy, "proxy validated");
                        validated.push(proxy);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!(checked = drained, total, "interrupt during proxy checks, keeping partial results");
                    break;
                }
            }
        }
        pool.shutdown();
        validated
    }
}

async fn check_one(proxy: String, probe: u32, tries: u32, timeout: Duration) -> Option<String> {
    for attempt in 0..tries {
        realtime::fetch(probe, attempt as u64, Some(proxy.as_str()), timeout).await?;
    }
    Some(proxy)
}

async fn fetch_page(client: &HttpClient, url: &str) -> Option<String> {
    let mut response = client.get_async(url).await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.text().await.ok()
}

/// Scrape `host:port` candidates out of a page body. Listing sites publish
/// endpoints either as adjacent table cells or as literal host:port text.
pub fn page_endpoints(contents: &str) -> Vec<String> {
    let mut result = HashSet::new();
    let cell_re =
        Regex::new(r"<td>([0-9]+\.[0-9]+\.[0-9]+\.[0-9]+)</td><td>([0-9]+)</td>").unwrap();
    for caps in cell_re.captures_iter(contents) {
        result.insert(format!("http://{}:{}", &caps[1], &caps[2]));
    }
    let bare_re = Regex::new(r"([0-9]+\.[0-9]+\.[0-9]+\.[0-9]+):([0-9]+)").unwrap();
    for caps in bare_re.captures_iter(contents) {
        result.insert(format!("http://{}:{}", &caps[1], &caps[2]));
    }
    let mut result: Vec<String> = result.into_iter().collect();
    result.sort();
    result
}

/// Extract outbound links whose host matches the allow-list. Everything else
/// stays out of the crawl frontier.
pub fn page_links(contents: &str, allow_domains: &[String]) -> Vec<String> {
    let href_re = Regex::new(r#"<a\s[^>]*href=["']([^"']+)["']"#).unwrap();
    let mut result = HashSet::new();
    for caps in href_re.captures_iter(contents) {
        let link = &caps[1];
        if let Some(host) = url_host(link) {
            if allow_domains.iter().any(|d| host.contains(d.as_str())) {
                result.insert(link.to_string());
            }
        }
    }
    let mut result: Vec<String> = result.into_iter().collect();
    result.sort();
    result
}

fn url_host(url: &str) -> Option<&str> {
    let rest = url.split("://").nth(1)?;
    let host = rest.split('/').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut contents = lines.join("\n");
    contents.push('\n');
    std::fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_endpoints_both_shapes() {
        let body = r#"
            <tr><td>10.0.0.1</td><td>8080</td></tr>
            some text 192.168.1.50:3128 more text
            not-an-ip 999.letters:80
        "#;
        let endpoints = page_endpoints(body);
        assert!(endpoints.contains(&"http://10.0.0.1:8080".to_string()));
        assert!(endpoints.contains(&"http://192.168.1.50:3128".to_string()));
        assert_eq!(endpoints.len(), 2);
    }

    #[test]
    fn test_page_links_filters_by_domain() {
        let body = r#"
            <a href="http://lists.blogspot.com/page2">next</a>
            <a href="http://evil.example.com/x">other</a>
            <a href='http://mirror.blogspot.hk/'>mirror</a>
        "#;
        let allow = vec!["blogspot".to_string()];
        let links = page_links(body, &allow);
        assert_eq!(links.len(), 2);
        assert!(links.iter().all(|l| l.contains("blogspot")));
    }

    #[test]
    fn test_url_host() {
        assert_eq!(url_host("http://a.b.c/d"), Some("a.b.c"));
        assert_eq!(url_host("https://a.b.c"), Some("a.b.c"));
        assert_eq!(url_host("no-scheme"), None);
    }

    #[tokio::test]
    async fn test_crawl_budget_bounds_cyclic_graph() {
        // Seeds pointing at unresolvable hosts: every fetch fails, the
        // frontier drains, and the crawl terminates without hitting the
        // budget. The budget itself is exercised by the loop guard.
        let manager = ProxyManager::new(ProxyConfig {
            file: None,
            seed_sites: vec!["http://127.0.0.1:1/loop".to_string()],
            link_budget: 3,
            allow_domains: vec![],
            check_tries: 1,
            check_timeout_secs: 1,
            probe_code: 1,
        });
        let found = manager.crawl().await;
        assert!(found.is_empty());
    }

    #[test]
    fn test_persist_union_merges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        std::fs::write(&path, "http://1.1.1.1:80\n").unwrap();

        let manager = ProxyManager::new(ProxyConfig {
            file: Some(path.clone()),
            ..Default::default()
        });
        let merged = manager
            .persist_union(&["http://2.2.2.2:81".to_string(), "http://1.1.1.1:80".to_string()])
            .unwrap();
        assert_eq!(merged.len(), 2);

        let reloaded = manager.load_persisted();
        assert_eq!(reloaded.len(), 2);
    }
}
