//! Habr.com article search: RSS feed first, HTML scrape as fallback.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::{Duration, Instant};

use domovoy_config::Settings;
use domovoy_core::{Article, ArticleQuery, ArticleSearch, ProxyError, RateLimiter, Result};

const BASE_URL: &str = "https://habr.com";
const RSS_URL: &str = "https://habr.com/ru/rss/all/";
const SEARCH_URL: &str = "https://habr.com/ru/search/";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "Mozilla/5.0 (compatible; DomovoyBot/1.0)";

struct CachedArticles {
    articles: Vec<Article>,
    stored_at: Instant,
}

pub struct HabrClient {
    client: Client,
    rate_limiter: Arc<RateLimiter>,
    rate_per_minute: usize,
    cache: DashMap<String, CachedArticles>,
    cache_ttl: Duration,
}

impl HabrClient {
    pub fn new(settings: &Settings, rate_limiter: Arc<RateLimiter>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| ProxyError::Internal(format!("http client: {e}")))?;

        Ok(Self {
            client,
            rate_limiter,
            rate_per_minute: settings.rate_limits.habr_per_minute,
            cache: DashMap::new(),
            cache_ttl: Duration::from_secs(settings.cache.habr_ttl_minutes * 60),
        })
    }

    fn check_rate(&self) -> Result<()> {
        let decision = self.rate_limiter.check("habr", self.rate_per_minute, "default");
        if !decision.allowed {
            return Err(ProxyError::RateLimited {
                name: "habr".into(),
                wait_secs: decision.wait_secs,
            });
        }
        Ok(())
    }

    fn cached(&self, key: &str) -> Option<Vec<Article>> {
        let hit = self.cache.get(key)?;
        if hit.stored_at.elapsed() < self.cache_ttl {
            tracing::debug!(key, "habr cache hit");
            Some(hit.articles.clone())
        } else {
            None
        }
    }

    async fn search_rss(&self, query: &ArticleQuery) -> Result<Vec<Article>> {
        let response = self
            .client
            .get(RSS_URL)
            .send()
            .await
            .map_err(|e| ProxyError::upstream("habr", e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProxyError::upstream(
                "habr",
                format!("rss feed returned {}", response.status()),
            ));
        }
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::upstream("habr", e.to_string()))?;

        let parsed = parse_rss(&body)?;
        Ok(filter_articles(parsed, query))
    }

    async fn search_html(&self, text: &str, query: &ArticleQuery) -> Result<Vec<Article>> {
        let url = format!("{SEARCH_URL}?q={}&target_type=posts", urlencode(text));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProxyError::upstream("habr", e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProxyError::upstream(
                "habr",
                format!("search page returned {}", response.status()),
            ));
        }
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::upstream("habr", e.to_string()))?;

        let articles = parse_search_html(&body);
        let mut query = query.clone();
        // Full-text matching already happened server-side.
        query.query = None;
        Ok(filter_articles(articles, &query))
    }

    /// Voice-friendly summary of a result list.
    pub fn format_for_voice(articles: &[Article], max_articles: usize) -> String {
        if articles.is_empty() {
            return "К сожалению, статьи по вашему запросу не найдены.".to_string();
        }

        let shown = max_articles.min(articles.len());
        let mut lines = vec![format!(
            "Найдено статей: {}. Вот топ {}:",
            articles.len(),
            shown
        )];
        for (i, article) in articles.iter().take(shown).enumerate() {
            let mut line = format!("{}. {}", i + 1, article.title);
            if let Some(published) = article.published {
                line.push_str(&format!(" от {}", published.format("%d.%m")));
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    /// Markdown list with links for the messaging channel.
    pub fn format_for_telegram(articles: &[Article], max_articles: usize) -> String {
        if articles.is_empty() {
            return "Статьи не найдены.".to_string();
        }

        let mut lines = vec![format!("📚 *Найдено статей на Habr: {}*\n", articles.len())];
        for (i, article) in articles.iter().take(max_articles).enumerate() {
            lines.push(format!("{}. [{}]({})", i + 1, article.title, article.link));
        }
        lines.join("\n")
    }
}

#[async_trait]
impl ArticleSearch for HabrClient {
    async fn search(&self, query: ArticleQuery) -> Result<Vec<Article>> {
        self.check_rate()?;

        let key = format!(
            "{:?}:{:?}:{:?}:{:?}:{}",
            query.query, query.tags, query.hubs, query.days, query.limit
        );
        if let Some(articles) = self.cached(&key) {
            return Ok(articles);
        }

        let articles = match self.search_rss(&query).await {
            Ok(articles) => articles,
            Err(rss_error) => {
                tracing::warn!(error = %rss_error, "rss search failed, trying html");
                match &query.query {
                    Some(text) => self.search_html(text, &query).await?,
                    None => return Err(rss_error),
                }
            }
        };

        tracing::info!(results = articles.len(), "habr search completed");
        self.cache.insert(
            key,
            CachedArticles {
                articles: articles.clone(),
                stored_at: Instant::now(),
            },
        );
        Ok(articles)
    }
}

/// Parse an RSS 2.0 feed into articles.
fn parse_rss(xml: &str) -> Result<Vec<Article>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut articles = Vec::new();
    let mut in_item = false;
    let mut current_tag = String::new();
    let mut article = Article {
        title: String::new(),
        link: String::new(),
        published: None,
        summary: String::new(),
        tags: Vec::new(),
        author: "Unknown".to_string(),
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "item" {
                    in_item = true;
                } else if in_item {
                    current_tag = name;
                }
            }
            Ok(Event::Text(t)) if in_item => {
                let text = t
                    .unescape()
                    .map_err(|e| ProxyError::Serialization(format!("rss unescape: {e}")))?
                    .to_string();
                match current_tag.as_str() {
                    "title" => article.title = text,
                    "link" => article.link = text,
                    "pubDate" => {
                        article.published = DateTime::parse_from_rfc2822(&text)
                            .ok()
                            .map(|t| t.with_timezone(&Utc));
                    }
                    "description" => {
                        article.summary = strip_html(&text).chars().take(500).collect();
                    }
                    "category" => article.tags.push(text.to_lowercase()),
                    "dc:creator" | "creator" => article.author = text,
                    _ => {}
                }
            }
            Ok(Event::CData(t)) if in_item => {
                let text = String::from_utf8_lossy(&t).to_string();
                if current_tag == "description" {
                    article.summary = strip_html(&text).chars().take(500).collect();
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "item" {
                    in_item = false;
                    articles.push(std::mem::replace(
                        &mut article,
                        Article {
                            title: String::new(),
                            link: String::new(),
                            published: None,
                            summary: String::new(),
                            tags: Vec::new(),
                            author: "Unknown".to_string(),
                        },
                    ));
                } else if in_item {
                    current_tag.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ProxyError::Serialization(format!("rss parse: {e}")));
            }
            _ => {}
        }
    }

    Ok(articles)
}

/// Best-effort extraction from the search results page. The markup
/// changes occasionally; selector misses just produce fewer results.
fn parse_search_html(html: &str) -> Vec<Article> {
    let document = Html::parse_document(html);
    let item_selector = Selector::parse("article.tm-articles-list__item").unwrap();
    let title_selector = Selector::parse("a.tm-article-snippet__title-link").unwrap();
    let time_selector = Selector::parse("time").unwrap();
    let lead_selector = Selector::parse("div.tm-article-snippet__lead").unwrap();
    let tag_selector = Selector::parse("a.tm-tags-list__link").unwrap();

    let mut articles = Vec::new();
    for element in document.select(&item_selector) {
        let Some(title_el) = element.select(&title_selector).next() else {
            continue;
        };
        let title: String = title_el.text().collect::<String>().trim().to_string();
        let link = title_el
            .value()
            .attr("href")
            .map(|href| format!("{BASE_URL}{href}"))
            .unwrap_or_default();

        let published = element
            .select(&time_selector)
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|t| t.with_timezone(&Utc));

        let summary = element
            .select(&lead_selector)
            .next()
            .map(|lead| lead.text().collect::<String>().trim().chars().take(500).collect())
            .unwrap_or_default();

        let tags = element
            .select(&tag_selector)
            .map(|tag| tag.text().collect::<String>().trim().to_lowercase())
            .collect();

        articles.push(Article {
            title,
            link,
            published,
            summary,
            tags,
            author: "Unknown".to_string(),
        });
    }
    articles
}

fn filter_articles(articles: Vec<Article>, query: &ArticleQuery) -> Vec<Article> {
    let cutoff = query
        .days
        .map(|days| Utc::now() - ChronoDuration::days(days as i64));
    let limit = if query.limit == 0 { 10 } else { query.limit };

    articles
        .into_iter()
        .filter(|article| {
            if let (Some(cutoff), Some(published)) = (cutoff, article.published) {
                if published < cutoff {
                    return false;
                }
            }
            if !query.tags.is_empty() {
                let wanted: Vec<String> = query.tags.iter().map(|t| t.to_lowercase()).collect();
                if !wanted.iter().any(|t| article.tags.contains(t)) {
                    return false;
                }
            }
            if !query.hubs.is_empty() {
                let wanted: Vec<String> = query.hubs.iter().map(|h| h.to_lowercase()).collect();
                if !wanted.iter().any(|h| article.tags.contains(h)) {
                    return false;
                }
            }
            if let Some(text) = &query.query {
                let needle = text.to_lowercase();
                if !article.title.to_lowercase().contains(&needle)
                    && !article.summary.to_lowercase().contains(&needle)
                {
                    return false;
                }
            }
            true
        })
        .take(limit)
        .collect()
}

fn strip_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.trim().to_string()
}

fn urlencode(text: &str) -> String {
    let mut out = String::new();
    for b in text.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            b' ' => out.push('+'),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RSS: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<rss version="2.0"><channel>
<title>Habr</title>
<item>
  <title>Оркестрация асинхронных задач в Rust</title>
  <link>https://habr.com/ru/articles/1/</link>
  <pubDate>Mon, 20 Jul 2026 10:00:00 GMT</pubDate>
  <description>&lt;p&gt;Большой разбор tokio&lt;/p&gt;</description>
  <category>rust</category>
  <category>tokio</category>
</item>
<item>
  <title>Обзор умного дома</title>
  <link>https://habr.com/ru/articles/2/</link>
  <pubDate>Sun, 19 Jul 2026 09:00:00 GMT</pubDate>
  <description>Home Assistant на практике</description>
  <category>smart home</category>
</item>
</channel></rss>"#;

    #[test]
    fn test_parse_rss() {
        let articles = parse_rss(SAMPLE_RSS).unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title, "Оркестрация асинхронных задач в Rust");
        assert_eq!(articles[0].tags, vec!["rust", "tokio"]);
        assert!(articles[0].summary.contains("Большой разбор tokio"));
        assert!(articles[0].published.is_some());
    }

    #[test]
    fn test_filter_by_query_text() {
        let articles = parse_rss(SAMPLE_RSS).unwrap();
        let filtered = filter_articles(
            articles,
            &ArticleQuery {
                query: Some("rust".into()),
                limit: 10,
                ..Default::default()
            },
        );
        assert_eq!(filtered.len(), 1);
        assert!(filtered[0].title.contains("Rust"));
    }

    #[test]
    fn test_filter_by_tags() {
        let articles = parse_rss(SAMPLE_RSS).unwrap();
        let filtered = filter_articles(
            articles,
            &ArticleQuery {
                tags: vec!["Tokio".into()],
                limit: 10,
                ..Default::default()
            },
        );
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn test_filter_limit() {
        let articles = parse_rss(SAMPLE_RSS).unwrap();
        let filtered = filter_articles(
            articles,
            &ArticleQuery {
                limit: 1,
                ..Default::default()
            },
        );
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn test_voice_formatting() {
        let articles = parse_rss(SAMPLE_RSS).unwrap();
        let voice = HabrClient::format_for_voice(&articles, 3);
        assert!(voice.starts_with("Найдено статей: 2"));
        assert!(voice.contains("1. Оркестрация"));

        let empty = HabrClient::format_for_voice(&[], 3);
        assert!(empty.contains("не найдены"));
    }

    #[test]
    fn test_telegram_formatting_has_links() {
        let articles = parse_rss(SAMPLE_RSS).unwrap();
        let text = HabrClient::format_for_telegram(&articles, 5);
        assert!(text.contains("[Оркестрация асинхронных задач в Rust](https://habr.com/ru/articles/1/)"));
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<p>текст <b>жирный</b></p>"), "текст жирный");
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("умный дом"), "%D1%83%D0%BC%D0%BD%D1%8B%D0%B9+%D0%B4%D0%BE%D0%BC");
        assert_eq!(urlencode("rust-2026"), "rust-2026");
    }

    #[test]
    fn test_parse_search_html() {
        let html = r#"
        <html><body>
        <article class="tm-articles-list__item">
          <a class="tm-article-snippet__title-link" href="/ru/articles/99/"><span>Заголовок</span></a>
          <time datetime="2026-07-20T10:00:00.000Z"></time>
          <div class="tm-article-snippet__lead">Краткое описание</div>
          <a class="tm-tags-list__link">rust</a>
        </article>
        </body></html>"#;
        let articles = parse_search_html(html);
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].title, "Заголовок");
        assert_eq!(articles[0].link, "https://habr.com/ru/articles/99/");
        assert_eq!(articles[0].tags, vec!["rust"]);
    }
}
